//! デバッガコマンド

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 任意のコマンドをサブシェルへ送る
    Do(String),
    /// ブレークポイントを設定
    Break(String),
    /// ソースを表示
    List(String),
    /// 実行継続
    Continue,
    /// 最初から実行
    Run,
    /// 終了
    Quit,
    /// 次の行へ（未実装）
    Next,
    /// ヘルプ表示（未実装）
    Help,
    /// 編集（未実装）
    Edit,
    /// ステップ実行（未実装）
    Step,
    /// 値の表示（未実装）
    Print,
    /// バックトレース表示（未実装）
    Backtrace,
    /// 未定義のコマンド（先頭の単語を保持）
    Undefined(String),
}

impl Command {
    /// コマンド文字列をパースする
    ///
    /// 先頭の単語で大文字小文字を区別して判定します。空行の場合は None を返します。
    /// `do` の引数は最初の空白より後ろをそのまま保持します。
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim_start();
        let (head, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
        if head.is_empty() {
            return None;
        }

        let command = match head {
            "do" => Command::Do(rest.to_string()),
            "break" => Command::Break(rest.trim().to_string()),
            "list" => Command::List(rest.trim().to_string()),
            "continue" => Command::Continue,
            "run" => Command::Run,
            "quit" => Command::Quit,
            "next" => Command::Next,
            "help" => Command::Help,
            "edit" => Command::Edit,
            "step" => Command::Step,
            "print" => Command::Print,
            "backtrace" => Command::Backtrace,
            _ => Command::Undefined(head.to_string()),
        };
        Some(command)
    }
}
