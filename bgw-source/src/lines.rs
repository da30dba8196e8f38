//! ソース行の読み取り

use crate::{Result, SourceError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// ファイルを行単位の読み取り用に開く
pub(crate) fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// 一行を読み、末尾の改行を取り除いて `buf` に入れる
///
/// ファイル末尾に達した場合は `false` を返します。
pub(crate) fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, path: &Path) -> Result<bool> {
    buf.clear();
    let n = reader
        .read_until(b'\n', buf)
        .map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(n > 0)
}

/// ファイルの行数を数える
///
/// 改行で終わらない最後の行も一行として数えます。
pub fn count_lines<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    let mut reader = open(path)?;
    let mut buf = Vec::new();
    let mut count = 0;
    while next_line(&mut reader, &mut buf, path)? {
        count += 1;
    }
    Ok(count)
}

/// ファイルの最初の行を改行を除いて返す
pub fn first_line<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut reader = open(path)?;
    let mut buf = Vec::new();
    next_line(&mut reader, &mut buf, path)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// 行番号の表示幅（行数の10進桁数）
pub fn line_number_width(count: usize) -> usize {
    count.max(1).to_string().len()
}
