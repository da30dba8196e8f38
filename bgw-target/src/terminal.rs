//! 操作端末の属性の保存と復元

use nix::errno::Errno;
use nix::libc;
use nix::pty::Winsize;
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use std::io::{self, IsTerminal};
use std::os::fd::AsRawFd;

nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, Winsize);

/// 操作端末（標準入力）の属性とウィンドウサイズ
///
/// 擬似端末の確保時に同じ属性を引き継ぎ、サブシェル終了時に元へ戻すために使います。
pub struct TerminalState {
    termios: Termios,
    winsize: Option<Winsize>,
}

impl TerminalState {
    /// 標準入力の端末属性を取得する
    ///
    /// 標準入力が端末でない場合は `Ok(None)` を返します。
    pub fn capture() -> Result<Option<Self>, Errno> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }

        let termios = tcgetattr(&stdin)?;

        let mut winsize = Winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // ウィンドウサイズが取れなくても擬似端末は確保できる
        let winsize = match unsafe { tiocgwinsz(stdin.as_raw_fd(), &mut winsize) } {
            Ok(_) => Some(winsize),
            Err(_) => None,
        };

        Ok(Some(Self { termios, winsize }))
    }

    /// 保存した端末属性
    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    /// 保存したウィンドウサイズ
    pub fn winsize(&self) -> Option<&Winsize> {
        self.winsize.as_ref()
    }

    /// 保存した属性を操作端末に書き戻す
    pub fn restore(&self) -> Result<(), Errno> {
        tcsetattr(io::stdin(), SetArg::TCSADRAIN, &self.termios)
    }
}
