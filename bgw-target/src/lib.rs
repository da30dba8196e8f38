//! bgw ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のシェルスクリプトを実行するための低レベル機能を提供します。
//! 擬似端末上でのインタプリタ起動、名前付きパイプによるコマンドチャネル、
//! 子プロセス終了通知のファイルディスクリプタ化などを行います。

pub mod channel;
pub mod signal;
pub mod subshell;
pub mod terminal;

pub use channel::{write_all_retrying, ChannelError, CommandChannel};
pub use signal::SignalSource;
pub use subshell::{ExitStatus, Subshell, SubshellError};
pub use terminal::TerminalState;
