//! デバッガのエラー

use bgw_source::SourceError;
use bgw_target::{ChannelError, ExitStatus, SubshellError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// デバッガ操作のエラー
#[derive(Debug, Error)]
pub enum DebugError {
    /// 実行中のスクリプトがない
    #[error("The script is not running.")]
    NotRunning,

    /// 最初の行がシバンでない
    #[error("{}: missing shebang", .0.display())]
    MissingShebang(PathBuf),

    /// キーワードを含む行が見つからない
    #[error("keyword not found: {0}")]
    KeywordNotFound(String),

    /// 行番号が範囲外
    #[error("Line {line} out of range; the script has {total} lines.")]
    LineOutOfRange { line: usize, total: usize },

    /// まだ何も表示していない
    #[error("No line listed yet; give a line number or keyword.")]
    NothingListed,

    /// `do` に引数がない
    #[error("Argument required (command to send).")]
    ArgumentRequired,

    /// チャネルを開く前にサブシェルが終了した
    #[error("shell terminated with {0} before opening the command channel")]
    ShellExited(ExitStatus),

    /// ソースの読み込みに失敗
    #[error(transparent)]
    Source(#[from] SourceError),

    /// コマンドチャネルの操作に失敗
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// サブシェルの操作に失敗
    #[error(transparent)]
    Subshell(#[from] SubshellError),

    /// その他の入出力エラー
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DebugError {
    /// セッションを続けられないエラーか
    ///
    /// 使い方の誤りと、擬似端末・fork・FIFO・一時ディレクトリの準備や削除の失敗が該当します。
    pub fn is_fatal(&self) -> bool {
        match self {
            DebugError::MissingShebang(_) => true,
            DebugError::Channel(e) => e.is_setup_failure(),
            DebugError::Subshell(e) => matches!(
                e,
                SubshellError::Terminal(_) | SubshellError::PtyAllocation(_) | SubshellError::Fork(_)
            ),
            _ => false,
        }
    }
}
