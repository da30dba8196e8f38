//! デバッガのメインロジック
//!
//! スクリプトを一行ずつコマンドチャネルへ送り、ブレークポイントの行で止まります。
//! 状態はすべて `Debugger` が持ち、イベントループから可変参照で操作されます。

use crate::breakpoint::BreakpointSet;
use crate::errors::DebugError;
use crate::parse::{parse_locator, Locator};
use crate::Result;
use bgw_source::{count_lines, find_line, line_number_width, list_lines, Shebang, SourceError};
use bgw_target::{CommandChannel, ExitStatus, Subshell};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `list` で一度に表示する行数の既定値
pub const DEFAULT_LIST_SIZE: usize = 10;

/// 読み手が FIFO を開くのを待つ間隔
const CHANNEL_OPEN_INTERVAL: Duration = Duration::from_millis(10);

/// デバッガの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    /// サブシェルなし
    Idle,
    /// サブシェルが動いていて、行を送っている
    Running,
    /// ブレークポイントで停止中
    Paused,
    /// 実行が終わった、またはサブシェルが終了した
    Terminated,
}

/// `run` / `continue` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// ブレークポイントで停止した
    Stopped {
        /// 最後に送った行（1始まり）
        line: usize,
        /// その行の内容
        text: String,
    },
    /// ファイル末尾まで送り終えた
    Finished {
        /// 送った行数
        lines: usize,
    },
}

/// `run` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// 実行途中からやり直したか
    pub restarted: bool,
    /// やり直しのために閉じた前回のサブシェルの終了状態
    pub previous_exit: Option<ExitStatus>,
    pub outcome: RunOutcome,
}

/// プログラムカウンタ
///
/// 送った行数と、次に読む位置を保持するファイルカーソルの組です。
struct ProgramCounter {
    line: usize,
    reader: BufReader<File>,
}

/// デバッガ
pub struct Debugger {
    /// デバッグ対象スクリプト
    source: PathBuf,
    /// 起動時の行数
    line_count: usize,
    /// 行番号の表示幅
    width: usize,
    breakpoints: BreakpointSet,
    state: DebuggerState,
    /// サブシェル（チャネルより先に閉じる）
    subshell: Option<Subshell>,
    /// コマンドチャネル
    channel: Option<CommandChannel>,
    /// 実行中のみ存在する
    pc: Option<ProgramCounter>,
    list_size: usize,
    /// 次の `list` の開始行（0始まり）
    list_next: usize,
    /// 直前の `list` で最後に表示した行（0始まり）
    last_listed: Option<usize>,
}

impl Debugger {
    /// 新しいデバッガを作成する
    ///
    /// この時点の行数でブレークポイント集合の大きさが決まります。
    pub fn new<P: AsRef<Path>>(source: P) -> Result<Self> {
        let source = source.as_ref().to_path_buf();
        let line_count = count_lines(&source)?;
        debug!(source = %source.display(), line_count, "script loaded");

        Ok(Self {
            source,
            line_count,
            width: line_number_width(line_count),
            breakpoints: BreakpointSet::new(line_count),
            state: DebuggerState::Idle,
            subshell: None,
            channel: None,
            pc: None,
            list_size: DEFAULT_LIST_SIZE,
            list_next: 0,
            last_listed: None,
        })
    }

    /// `list` で一度に表示する行数を設定する
    pub fn with_list_size(mut self, list_size: usize) -> Self {
        self.list_size = list_size.max(1);
        self
    }

    /// デバッグ対象スクリプトのパス
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// 起動時のスクリプトの行数
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// 現在の状態
    pub fn state(&self) -> DebuggerState {
        self.state
    }

    /// ブレークポイント集合
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// 送った行数（実行中のみ）
    pub fn program_counter(&self) -> Option<usize> {
        self.pc.as_ref().map(|pc| pc.line)
    }

    /// コマンドチャネルの FIFO のパス
    pub fn channel_path(&self) -> Option<&Path> {
        self.channel.as_ref().map(|c| c.path())
    }

    /// サブシェルのプロセスID
    pub fn subshell_pid(&self) -> Option<i32> {
        self.subshell.as_ref().map(|s| s.pid())
    }

    /// スクリプトを最初から実行する
    ///
    /// シバン行からインタプリタと引数を取り出し、新しいコマンドチャネルを作って
    /// `[スクリプト名, シバンの引数..., FIFOのパス]` でサブシェルを起動します。
    /// 実行中だった場合は前回のサブシェルとチャネルを閉じてからやり直します。
    pub fn run(&mut self) -> Result<RunReport> {
        let restarted = self.pc.is_some();
        if restarted {
            info!(source = %self.source.display(), "restarting from the first line");
        }
        let previous_exit = self.shutdown()?;
        self.state = DebuggerState::Idle;

        let shebang = Shebang::read(&self.source)?
            .ok_or_else(|| DebugError::MissingShebang(self.source.clone()))?;

        let mut channel = CommandChannel::create()?;

        let mut argv: Vec<OsString> = Vec::with_capacity(shebang.args.len() + 2);
        argv.push(self.source.clone().into_os_string());
        argv.extend(shebang.args.iter().map(OsString::from));
        argv.push(channel.path().as_os_str().to_owned());

        self.subshell = Some(Subshell::open(&shebang.interpreter, &argv)?);
        self.state = DebuggerState::Running;

        if let Err(e) = self.open_channel(&mut channel) {
            self.state = DebuggerState::Terminated;
            if let Some(mut subshell) = self.subshell.take() {
                subshell.close()?;
            }
            channel.destroy()?;
            return Err(e);
        }
        self.channel = Some(channel);

        let reader = File::open(&self.source)
            .map(BufReader::new)
            .map_err(|source| SourceError::Open {
                path: self.source.clone(),
                source,
            })?;
        self.pc = Some(ProgramCounter { line: 0, reader });

        let outcome = self.continue_run()?;
        Ok(RunReport {
            restarted,
            previous_exit,
            outcome,
        })
    }

    /// 読み手が FIFO を開くまで待ってから書き込み側を開く
    fn open_channel(&mut self, channel: &mut CommandChannel) -> Result<()> {
        let subshell = self.subshell.as_mut().ok_or(DebugError::NotRunning)?;
        while !channel.try_open_writer()? {
            if let Some(status) = subshell.wait_nonblocking()? {
                return Err(DebugError::ShellExited(status));
            }
            thread::sleep(CHANNEL_OPEN_INTERVAL);
        }
        Ok(())
    }

    /// 保存した位置から実行を継続する
    ///
    /// 一行送るごとにプログラムカウンタを進め、送った行にブレークポイントがあれば停止します。
    /// ファイル末尾まで送った場合はチャネルを閉じて実行を終えます。
    pub fn continue_run(&mut self) -> Result<RunOutcome> {
        let mut pc = self.pc.take().ok_or(DebugError::NotRunning)?;
        let Some(channel) = self.channel.as_mut() else {
            return Err(DebugError::NotRunning);
        };
        self.state = DebuggerState::Running;

        match Self::stream(&mut pc, channel, &self.breakpoints) {
            Ok(Some(text)) => {
                let line = pc.line;
                info!(line, "breakpoint hit");
                self.pc = Some(pc);
                self.state = DebuggerState::Paused;
                Ok(RunOutcome::Stopped { line, text })
            }
            Ok(None) => {
                let lines = pc.line;
                debug!(lines, "reached end of script");
                drop(pc);
                self.state = DebuggerState::Terminated;
                self.end_run()?;
                Ok(RunOutcome::Finished { lines })
            }
            Err(e) => {
                warn!(error = %e, line = pc.line, "run aborted");
                drop(pc);
                self.state = DebuggerState::Terminated;
                if let Err(cleanup) = self.end_run() {
                    warn!(error = %cleanup, "failed to clean up command channel");
                }
                Err(e)
            }
        }
    }

    /// ブレークポイントに当たるかファイル末尾に達するまで行を送る
    ///
    /// 停止した場合は最後に送った行の内容を返します。
    fn stream(
        pc: &mut ProgramCounter,
        channel: &mut CommandChannel,
        breakpoints: &BreakpointSet,
    ) -> Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if pc.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }

            channel.write_line(&line)?;
            pc.line += 1;

            // 起動後に増えた行にはブレークポイントを置けない
            let index = pc.line - 1;
            if index < breakpoints.len() && breakpoints.test(index) {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }

    /// ブレークポイントを設定し、その行番号（1始まり）を返す
    ///
    /// 位置指定が空の場合は直前の `list` で最後に表示した行を使います。
    pub fn set_breakpoint(&mut self, locator: &str) -> Result<usize> {
        let index = self.resolve(parse_locator(locator))?;
        self.breakpoints.set(index);
        debug!(line = index + 1, "breakpoint set");
        Ok(index + 1)
    }

    /// ソースを行番号付きで表示する
    ///
    /// 位置指定が空の場合は前回の続きから、ファイル末尾の後は先頭から表示します。
    pub fn list<W: Write + ?Sized>(&mut self, locator: &str, out: &mut W) -> Result<()> {
        let from = match parse_locator(locator) {
            Locator::Default => self.list_next,
            locator => self.resolve(locator)?,
        };

        match list_lines(&self.source, from, self.list_size, self.width, out)? {
            Some(last) => {
                self.last_listed = Some(last);
                self.list_next = if last + 1 >= self.line_count { 0 } else { last + 1 };
            }
            None => self.list_next = 0,
        }
        Ok(())
    }

    /// 位置指定を0始まりの行番号に変換する
    fn resolve(&self, locator: Locator) -> Result<usize> {
        let index = match locator {
            Locator::Default => self.last_listed.ok_or(DebugError::NothingListed)?,
            Locator::Line(0) => {
                return Err(DebugError::LineOutOfRange {
                    line: 0,
                    total: self.line_count,
                })
            }
            Locator::Line(line) => line - 1,
            Locator::Keyword(keyword) => match find_line(&keyword, &self.source)? {
                Some(index) => index,
                None => return Err(DebugError::KeywordNotFound(keyword)),
            },
        };

        if index >= self.line_count {
            return Err(DebugError::LineOutOfRange {
                line: index.saturating_add(1),
                total: self.line_count,
            });
        }
        Ok(index)
    }

    /// 任意のコマンドをそのままサブシェルへ送る
    ///
    /// プログラムカウンタは進めません。
    pub fn inject(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(DebugError::ArgumentRequired);
        }
        let channel = self
            .channel
            .as_mut()
            .filter(|c| c.is_open())
            .ok_or(DebugError::NotRunning)?;
        channel.write_line(text.as_bytes())?;
        Ok(())
    }

    /// 子プロセスの終了を回収する
    ///
    /// 終了通知を受けた後に呼び出します。終了していればチャネルを片付けて
    /// その終了状態を返し、まだ動いている（または既に回収済みの）場合は None を返します。
    pub fn reap_child(&mut self) -> Result<Option<ExitStatus>> {
        let Some(subshell) = self.subshell.as_mut() else {
            return Ok(None);
        };
        let Some(status) = subshell.wait_nonblocking()? else {
            return Ok(None);
        };
        info!(%status, "shell terminated");

        if let Some(mut subshell) = self.subshell.take() {
            subshell.close()?;
        }
        self.state = DebuggerState::Terminated;
        self.end_run()?;
        Ok(Some(status))
    }

    /// サブシェルとチャネルを閉じる
    ///
    /// サブシェルのプロセスグループにシグナルを送って終了を待ち、その後に
    /// チャネルと一時ディレクトリを削除します。閉じたサブシェルの終了状態を返します。
    pub fn shutdown(&mut self) -> Result<Option<ExitStatus>> {
        let closed = self.subshell.take().map(|mut s| s.close()).transpose();
        if self.state != DebuggerState::Idle {
            self.state = DebuggerState::Terminated;
        }
        let ended = self.end_run();

        let status = closed?.flatten();
        ended?;
        Ok(status)
    }

    /// 実行を終える（ファイルカーソルを捨て、チャネルを削除する）
    fn end_run(&mut self) -> Result<()> {
        self.pc = None;
        if let Some(channel) = self.channel.take() {
            channel.destroy()?;
        }
        Ok(())
    }
}
