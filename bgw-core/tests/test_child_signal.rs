//! 子プロセスの終了通知を signalfd 経由で受け取って回収するテスト
//!
//! 通常のテストハーネスではメインスレッドが SIGCHLD をブロックしていないため、
//! 通知がそちらで捨てられることがあります。ここでは他のスレッドを作る前に
//! ブロックしてから、すべてをメインスレッドで実行します。

use bgw_core::{Debugger, DebuggerState, ExitStatus, RunOutcome};
use bgw_target::SignalSource;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use std::io::Write;
use std::os::fd::AsFd;
use tempfile::NamedTempFile;

fn script(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

/// 通知が読めるようになるまで待つ
fn wait_readable(signals: &SignalSource) {
    let mut fds = [PollFd::new(signals.as_fd(), PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::from(10_000u16)).unwrap();
    assert_eq!(ready, 1, "no SIGCHLD within 10 seconds");
}

fn test_child_exit_is_reaped_once_through_signal(signals: &mut SignalSource) {
    let file = script("#!/bin/sh\nexit 4\n");
    let mut debugger = Debugger::new(file.path()).unwrap();

    let report = debugger.run().unwrap();
    assert_eq!(report.outcome, RunOutcome::Finished { lines: 2 });

    wait_readable(signals);
    let received = signals.drain().unwrap();
    assert!(received.contains(&Signal::SIGCHLD), "received {:?}", received);

    assert_eq!(debugger.reap_child().unwrap(), Some(ExitStatus::Exited(4)));
    assert_eq!(debugger.state(), DebuggerState::Terminated);
    assert_eq!(debugger.subshell_pid(), None);

    // 二度目の回収では何も返らない
    assert_eq!(debugger.reap_child().unwrap(), None);
    assert_eq!(debugger.shutdown().unwrap(), None);
    assert!(signals.drain().unwrap().is_empty());
}

fn test_running_child_is_not_reaped(signals: &mut SignalSource) {
    let file = script("#!/bin/sh\n: one\n: two\n");
    let mut debugger = Debugger::new(file.path()).unwrap();
    debugger.set_breakpoint("2").unwrap();

    let report = debugger.run().unwrap();
    assert!(matches!(report.outcome, RunOutcome::Stopped { line: 2, .. }));

    // 停止中のシェルは動いたままなので回収されない
    assert_eq!(debugger.reap_child().unwrap(), None);
    assert_eq!(debugger.state(), DebuggerState::Paused);

    let status = debugger.shutdown().unwrap();
    assert!(status.is_some());
    // shutdown で回収済みなので、遅れて届いた通知では何も返らない
    signals.drain().unwrap();
    assert_eq!(debugger.reap_child().unwrap(), None);
}

fn main() {
    let mut signals = SignalSource::new(&[Signal::SIGCHLD]).unwrap();

    test_child_exit_is_reaped_once_through_signal(&mut signals);
    println!("test test_child_exit_is_reaped_once_through_signal ... ok");

    test_running_child_is_not_reaped(&mut signals);
    println!("test test_running_child_is_not_reaped ... ok");
}
