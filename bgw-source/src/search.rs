//! キーワード検索

use crate::lines::{next_line, open};
use crate::Result;
use regex::bytes::Regex;
use std::path::Path;

/// 単語単位で一致するパターン
///
/// 前後が英数字とアンダースコア以外の文字、または行の端である場合のみ一致します。
#[derive(Debug, Clone)]
pub struct WordPattern {
    regex: Regex,
}

impl WordPattern {
    /// 単語からパターンを作成する（空文字列の場合は None）
    pub fn new(word: &str) -> Option<Self> {
        if word.is_empty() {
            return None;
        }
        let pattern = format!(
            r"(?:^|(?-u:[^0-9A-Za-z_]))({})(?:(?-u:[^0-9A-Za-z_])|$)",
            regex::escape(word)
        );
        Regex::new(&pattern).ok().map(|regex| Self { regex })
    }

    /// 行の中で最初に一致した単語のバイト位置を返す
    pub fn find(&self, line: &[u8]) -> Option<usize> {
        self.regex
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.start())
    }

    /// 行に単語が含まれているか
    pub fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(line)
    }
}

/// 行の中から単語を探し、そのバイト位置を返す
pub fn find_word(line: &[u8], word: &str) -> Option<usize> {
    WordPattern::new(word)?.find(line)
}

/// 単語を含む最初の行を探し、0始まりの行番号を返す
pub fn find_line<P: AsRef<Path>>(word: &str, path: P) -> Result<Option<usize>> {
    let path = path.as_ref();
    let mut reader = open(path)?;
    let Some(pattern) = WordPattern::new(word) else {
        return Ok(None);
    };

    let mut buf = Vec::new();
    let mut index = 0;
    while next_line(&mut reader, &mut buf, path)? {
        if pattern.is_match(&buf) {
            return Ok(Some(index));
        }
        index += 1;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_find_word() {
        let cases: &[(&str, &str, Option<usize>)] = &[
            ("abc", "abc", Some(0)),
            ("abc def ghi", "def", Some(4)),
            ("abc(def)ghi", "def", Some(4)),
            ("abcdefghi", "xyz", None),
            ("abcdefghi", "def", None),
            ("abcdefghi", "abc", None),
            ("abcdefghi", "ghi", None),
            ("do_stop () {", "do_stop", Some(0)),
            ("do_stop () {", "stop", None),
            // 最初の出現が単語でなくても後続の出現を見つける
            ("abcdef def", "def", Some(7)),
        ];

        for (line, word, expected) in cases {
            assert_eq!(
                find_word(line.as_bytes(), word),
                *expected,
                "line={:?} word={:?}",
                line,
                word
            );
        }
    }

    #[test]
    fn test_find_word_escapes_metacharacters() {
        assert_eq!(find_word(b"x=$((a+b))", "a+b"), Some(5));
        assert_eq!(find_word(b"aab", "a+b"), None);
        assert_eq!(find_word(b"anything", ""), None);
    }

    #[test]
    fn test_find_line() {
        let cases: &[(&str, &str, Option<usize>)] = &[
            ("abcdefghi\nabc def ghi\nabc def ghi\n", "def", Some(1)),
            ("abcdefghi\nabc def ghi\nabc def ghi\n", "abcdefghi", Some(0)),
            ("abc def ghi", "ghi", Some(0)),
            ("abc def ghi", "xyz", None),
            ("abc\ndef", "abc\ndef", None),
        ];

        for (data, word, expected) in cases {
            let mut file = NamedTempFile::new().unwrap();
            file.write_all(data.as_bytes()).unwrap();
            assert_eq!(find_line(word, file.path()).unwrap(), *expected, "word={:?}", word);
        }
    }

    #[test]
    fn test_find_line_missing_file() {
        assert!(find_line("main", "/nonexistent/bgw-script.sh").is_err());
    }
}
