//! サブシェル制御機能
//!
//! 擬似端末のスレーブ側を制御端末としてインタプリタを起動し、
//! 親側ではそのプロセスグループへのシグナル送信と終了状態の回収を行います。

use crate::terminal::TerminalState;
use nix::errno::Errno;
use nix::libc;
use nix::pty::openpty;
use nix::sys::signal::{kill, killpg, signal, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execv, fork, setsid, ForkResult, Pid};
use std::ffi::{CString, OsStr};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// サブシェルの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// exit による終了
    Exited(i32),
    /// シグナルによる終了
    Signaled(Signal),
}

impl ExitStatus {
    /// 終了コード（シグナルで終了した場合は None）
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }

    fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitStatus::Signaled(sig)),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// サブシェル制御のエラー
#[derive(Debug, Error)]
pub enum SubshellError {
    /// 端末属性の取得に失敗
    #[error("failed to get terminal attributes: {0}")]
    Terminal(#[source] Errno),

    /// 擬似端末の確保に失敗
    #[error("failed to allocate pseudoterminal: {0}")]
    PtyAllocation(#[source] Errno),

    /// fork に失敗
    #[error("failed to fork: {0}")]
    Fork(#[source] Errno),

    /// 引数にヌル文字が含まれている
    #[error("invalid argument {0:?}: contains null byte")]
    InvalidArgument(String),

    /// シグナル送信に失敗
    #[error("failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        signal: Signal,
        pgid: i32,
        #[source]
        source: Errno,
    },

    /// waitpid に失敗
    #[error("failed to wait for shell: {0}")]
    Wait(#[source] Errno),

    /// サブシェルは既に閉じられている
    #[error("shell is not open")]
    NotOpen,
}

/// 擬似端末上で動くインタプリタ
pub struct Subshell {
    pid: Pid,
    /// 擬似端末のマスター側（close後は None）
    master: Option<OwnedFd>,
    /// open時に保存した操作端末の属性
    terminal: Option<TerminalState>,
    exit_status: Option<ExitStatus>,
}

impl Subshell {
    /// インタプリタを擬似端末上で起動する
    ///
    /// 子プロセスは新しいセッションを作り、擬似端末のスレーブ側を制御端末かつ
    /// 標準入力にしてから `interpreter` を `argv` で exec します。
    /// 親側は子の終了を待たずに戻ります。
    pub fn open<P, S>(interpreter: P, argv: &[S]) -> Result<Self, SubshellError>
    where
        P: AsRef<Path>,
        S: AsRef<OsStr>,
    {
        let interpreter = interpreter.as_ref();
        let path = to_cstring(interpreter.as_os_str())?;
        let args = argv
            .iter()
            .map(|arg| to_cstring(arg.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let terminal = TerminalState::capture().map_err(SubshellError::Terminal)?;
        let pty = openpty(
            terminal.as_ref().and_then(|t| t.winsize()),
            terminal.as_ref().map(|t| t.termios()),
        )
        .map_err(SubshellError::PtyAllocation)?;

        match unsafe { fork() }.map_err(SubshellError::Fork)? {
            ForkResult::Child => {
                // 子プロセス: ここから先は親側のコードへ戻ってはいけない
                let master_fd = pty.master.as_raw_fd();
                let slave_fd = pty.slave.as_raw_fd();
                unsafe {
                    // デバッガがブロックしている SIGCHLD や無視している SIGPIPE を引き継がない
                    let _ = SigSet::empty().thread_set_mask();
                    let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);

                    if setsid().is_err() {
                        libc::_exit(1);
                    }
                    // 制御端末にできなくても標準入力は擬似端末になる
                    let _ = libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
                    libc::close(master_fd);
                    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0 {
                        libc::_exit(1);
                    }
                    if slave_fd > libc::STDERR_FILENO {
                        libc::close(slave_fd);
                    }

                    let _ = execv(&path, &args);
                    libc::_exit(1);
                }
            }
            ForkResult::Parent { child } => {
                drop(pty.slave);
                info!(pid = %child, interpreter = %interpreter.display(), "shell spawned");
                Ok(Self {
                    pid: child,
                    master: Some(pty.master),
                    terminal,
                    exit_status: None,
                })
            }
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// サブシェルが開いているか
    pub fn is_open(&self) -> bool {
        self.master.is_some()
    }

    /// 回収済みの終了状態
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// プロセスグループを一時停止する
    pub fn suspend(&self) -> Result<(), SubshellError> {
        self.signal_group(Signal::SIGSTOP)
    }

    /// 一時停止したプロセスグループを再開する
    pub fn resume(&self) -> Result<(), SubshellError> {
        self.signal_group(Signal::SIGCONT)
    }

    fn signal_group(&self, sig: Signal) -> Result<(), SubshellError> {
        if !self.is_open() {
            return Err(SubshellError::NotOpen);
        }
        self.send_signal(sig).map_err(|source| SubshellError::Signal {
            signal: sig,
            pgid: self.pid.as_raw(),
            source,
        })
    }

    /// プロセスグループへシグナルを送る
    ///
    /// 子が setsid する前はグループがまだ存在しないため、未回収なら子自身へ送ります。
    fn send_signal(&self, sig: Signal) -> Result<(), Errno> {
        match killpg(self.pid, sig) {
            Err(Errno::ESRCH) if self.exit_status.is_none() => {
                debug!(pid = %self.pid, %sig, "process group not ready, signalling the shell directly");
                kill(self.pid, sig)
            }
            result => result,
        }
    }

    /// ブロックせずに終了状態を回収する
    ///
    /// まだ動いている場合は `Ok(None)` を返します。回収は一度だけ行われ、
    /// 以降は保存した終了状態を返します。
    pub fn wait_nonblocking(&mut self) -> Result<Option<ExitStatus>, SubshellError> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }

        let status =
            waitpid(self.pid, Some(WaitPidFlag::WNOHANG)).map_err(SubshellError::Wait)?;
        self.exit_status = ExitStatus::from_wait_status(status);
        if let Some(status) = self.exit_status {
            debug!(pid = %self.pid, %status, "shell reaped");
        }
        Ok(self.exit_status)
    }

    /// サブシェルを閉じる
    ///
    /// プロセスグループに SIGTERM を送り、終了を一度だけ待ってから
    /// 操作端末の属性を open 時の状態に戻します。閉じた後の呼び出しは何もしません。
    pub fn close(&mut self) -> Result<Option<ExitStatus>, SubshellError> {
        let Some(master) = self.master.take() else {
            return Ok(self.exit_status);
        };

        let result = self.terminate();

        drop(master);
        if let Some(terminal) = &self.terminal {
            if let Err(e) = terminal.restore() {
                warn!(error = %e, "failed to restore terminal attributes");
            }
        }

        result.map(|()| self.exit_status)
    }

    fn terminate(&mut self) -> Result<(), SubshellError> {
        if self.exit_status.is_some() {
            return Ok(());
        }

        for sig in [Signal::SIGTERM, Signal::SIGCONT] {
            match self.send_signal(sig) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(source) => {
                    return Err(SubshellError::Signal {
                        signal: sig,
                        pgid: self.pid.as_raw(),
                        source,
                    })
                }
            }
        }

        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(status) = ExitStatus::from_wait_status(status) {
                        debug!(pid = %self.pid, %status, "shell reaped");
                        self.exit_status = Some(status);
                        return Ok(());
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(SubshellError::Wait(e)),
            }
        }
    }
}

impl Drop for Subshell {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close shell");
        }
    }
}

fn to_cstring(s: &OsStr) -> Result<CString, SubshellError> {
    CString::new(s.as_bytes())
        .map_err(|_| SubshellError::InvalidArgument(s.to_string_lossy().into_owned()))
}
