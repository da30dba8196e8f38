//! 行番号付きのソース表示

use crate::lines::{next_line, open};
use crate::{Result, SourceError};
use std::io::Write;
use std::path::Path;

/// `from`（0始まり）から最大 `count` 行を行番号付きで出力する
///
/// 行番号は `width` 桁に右寄せされます。出力した最後の行の番号（0始まり）を返し、
/// `from` がファイル末尾より後ろの場合は何も出力せずに None を返します。
pub fn list_lines<P, W>(path: P, from: usize, count: usize, width: usize, out: &mut W) -> Result<Option<usize>>
where
    P: AsRef<Path>,
    W: Write + ?Sized,
{
    let path = path.as_ref();
    let mut reader = open(path)?;
    let mut buf = Vec::new();
    let mut index = 0;
    let mut last = None;

    while index < from.saturating_add(count) && next_line(&mut reader, &mut buf, path)? {
        if index >= from {
            writeln!(out, "{:>width$} {}", index + 1, String::from_utf8_lossy(&buf), width = width)
                .map_err(SourceError::Output)?;
            last = Some(index);
        }
        index += 1;
    }
    Ok(last)
}
