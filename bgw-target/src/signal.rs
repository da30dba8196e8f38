//! シグナルのファイルディスクリプタ化
//!
//! 対象のシグナルをブロックして signalfd で受け取ることで、子プロセスの終了通知などを
//! イベントループの poll で他の入力と同じように扱えるようにします。

use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::{AsFd, BorrowedFd};
use tracing::warn;

/// シグナルを読み取り可能なファイルディスクリプタとして受け取る
pub struct SignalSource {
    fd: SignalFd,
}

impl SignalSource {
    /// 呼び出し元スレッドで `signals` をブロックし、signalfd を作成する
    ///
    /// 他のスレッドを起動する前に呼び出す必要があります。
    pub fn new(signals: &[Signal]) -> Result<Self, Errno> {
        let mut mask = SigSet::empty();
        for &sig in signals {
            mask.add(sig);
        }
        mask.thread_block()?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)?;
        Ok(Self { fd })
    }

    /// 溜まっている通知をすべて読み出す
    ///
    /// 同じシグナルは合流するため、SIGCHLD の件数は終了した子の数とは一致しません。
    pub fn drain(&mut self) -> Result<Vec<Signal>, Errno> {
        let mut received = Vec::new();
        while let Some(info) = self.fd.read_signal()? {
            match Signal::try_from(info.ssi_signo as i32) {
                Ok(sig) => received.push(sig),
                Err(e) => warn!(signo = info.ssi_signo, error = %e, "unknown signal"),
            }
        }
        Ok(received)
    }
}

impl AsFd for SignalSource {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
