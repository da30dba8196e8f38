//! bgw デバッガのコア機能
//!
//! このクレートは、デバッガの中核となるロジックを提供します。
//! サブシェルの起動、コマンドチャネルへの行の送出、ブレークポイントによる停止を統合します。

pub mod breakpoint;
pub mod command;
pub mod debugger;
pub mod errors;
pub mod parse;

pub use breakpoint::BreakpointSet;
pub use command::Command;
pub use debugger::{Debugger, DebuggerState, RunOutcome, RunReport, DEFAULT_LIST_SIZE};
pub use errors::DebugError;

// 他のクレートから使用するために再エクスポート
pub use bgw_target::ExitStatus;

/// デバッガの結果型
pub type Result<T> = std::result::Result<T, DebugError>;
