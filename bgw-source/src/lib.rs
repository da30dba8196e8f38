//! bgw ソースファイル解析
//!
//! このクレートは、デバッグ対象スクリプトのテキストを扱う機能を提供します。
//! 行数の数え上げ、キーワードを含む行の検索、シバン行の解析、行番号付きの一覧表示などを行います。

pub mod lines;
pub mod listing;
pub mod search;
pub mod shebang;

pub use lines::{count_lines, first_line, line_number_width};
pub use listing::list_lines;
pub use search::{find_line, find_word, WordPattern};
pub use shebang::Shebang;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// ソース解析のエラー
#[derive(Debug, Error)]
pub enum SourceError {
    /// ファイルを開けなかった
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// ファイルの読み込みに失敗
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 一覧の出力に失敗
    #[error("failed to write listing: {0}")]
    Output(#[source] io::Error),
}

/// ソース解析の結果型
pub type Result<T> = std::result::Result<T, SourceError>;
