//! パース関連のユーティリティ関数

/// `break` / `list` の位置指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// 指定なし（直前の表示位置を使う）
    Default,
    /// 1始まりの行番号
    Line(usize),
    /// 単語として含む最初の行
    Keyword(String),
}

/// 位置指定文字列をパースする
///
/// 10進数のみからなる場合は行番号、それ以外はキーワードとして扱います。
///
/// # Examples
/// ```
/// use bgw_core::parse::{parse_locator, Locator};
///
/// assert_eq!(parse_locator("12"), Locator::Line(12));
/// assert_eq!(parse_locator("do_stop"), Locator::Keyword("do_stop".to_string()));
/// assert_eq!(parse_locator(""), Locator::Default);
/// ```
pub fn parse_locator(s: &str) -> Locator {
    let s = s.trim();

    if s.is_empty() {
        Locator::Default
    } else if s.bytes().all(|b| b.is_ascii_digit()) {
        // 桁あふれする行番号は範囲外として後で弾かれる
        Locator::Line(s.parse().unwrap_or(usize::MAX))
    } else {
        Locator::Keyword(s.to_string())
    }
}
