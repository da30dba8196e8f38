//! シバン行の解析

use crate::lines::first_line;
use crate::Result;
use std::path::{Path, PathBuf};

/// `#!<interpreter> [args...]` 形式の行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shebang {
    /// インタプリタのパス
    pub interpreter: PathBuf,
    /// インタプリタに渡す先頭の引数
    pub args: Vec<String>,
}

impl Shebang {
    /// 行をシバンとして解析する
    ///
    /// `#!` で始まらない行や、インタプリタが書かれていない行は None を返します。
    ///
    /// # Examples
    /// ```
    /// use bgw_source::Shebang;
    ///
    /// let shebang = Shebang::parse("#! /bin/bash -eu").unwrap();
    /// assert_eq!(shebang.interpreter.to_str(), Some("/bin/bash"));
    /// assert_eq!(shebang.args, vec!["-eu".to_string()]);
    /// ```
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.strip_prefix("#!")?.split_ascii_whitespace();
        let interpreter = PathBuf::from(tokens.next()?);
        let args = tokens.map(str::to_string).collect();
        Some(Self { interpreter, args })
    }

    /// ファイルの最初の行からシバンを読み取る
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        Ok(Self::parse(&first_line(path)?))
    }
}
