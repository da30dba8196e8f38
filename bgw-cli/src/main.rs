//! bgw CLI - コマンドラインインターフェース
//!
//! シェルスクリプトを一行ずつ送り込むデバッガ bgw の対話インターフェース。
//! 操作者の入力と子プロセスの終了通知を一つの poll で待ち受けます。

use anyhow::{Context, Result};
use bgw_core::{Command, DebugError, Debugger, DebuggerState, ExitStatus, RunOutcome, DEFAULT_LIST_SIZE};
use bgw_target::SignalSource;
use clap::Parser;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "(bgw) ";

/// bgw - Shell Script Debugger
#[derive(Parser)]
#[command(name = "bgw")]
#[command(version)]
#[command(about = "Line-stepping debugger for shell scripts", long_about = None)]
struct Cli {
    /// Path to the script to debug
    script: PathBuf,

    /// Number of lines shown by each `list`
    #[arg(long, default_value_t = DEFAULT_LIST_SIZE)]
    list_size: usize,

    /// Log filter, e.g. `info` or `bgw_core=debug`
    #[arg(long, env = "BGW_LOG", default_value = "warn")]
    log: String,
}

/// 入力処理後にループを続けるかどうか
enum Flow {
    Continue,
    Quit,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bgw: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// ログ出力を初期化する（操作者への出力と混ざらないよう標準エラーへ）
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// デバッガを作成してイベントループを回し、最後に必ず後片付けをする
fn run(cli: Cli) -> Result<()> {
    let mut debugger = Debugger::new(&cli.script)
        .with_context(|| format!("cannot load {}", cli.script.display()))?
        .with_list_size(cli.list_size);

    // 子プロセスを起動する前に SIGCHLD をブロックしておく
    let mut signals = SignalSource::new(&[Signal::SIGCHLD, Signal::SIGINT])
        .context("failed to set up signal notification")?;
    let mut input = OperatorInput::stdin().context("failed to open operator input")?;

    let mut out = io::stdout();
    writeln!(
        out,
        "Reading {} ({} lines). Type 'run' to start.",
        cli.script.display(),
        debugger.line_count()
    )?;

    session(&mut debugger, &mut signals, &mut input, &mut out)
}

/// イベントループを回し、抜けた理由にかかわらず後片付けをする
fn session<W: Write>(
    debugger: &mut Debugger,
    signals: &mut SignalSource,
    input: &mut OperatorInput,
    out: &mut W,
) -> Result<()> {
    let result = event_loop(debugger, signals, input, out);
    let cleanup = shutdown(debugger, out);
    result.and(cleanup)
}

/// 終了処理: サブシェルへシグナルを送り、チャネルを削除する
fn shutdown<W: Write>(debugger: &mut Debugger, out: &mut W) -> Result<()> {
    let status = debugger.shutdown().context("cleanup failed")?;
    if let Some(status) = status {
        report_exit(status, out)?;
    }
    Ok(())
}

/// 操作者の入力と子プロセスの終了通知を待ち受ける
fn event_loop<W: Write>(
    debugger: &mut Debugger,
    signals: &mut SignalSource,
    input: &mut OperatorInput,
    out: &mut W,
) -> Result<()> {
    print_prompt(out)?;

    loop {
        let (input_ready, signal_ready) = {
            let mut fds = [
                PollFd::new(input.as_fd(), PollFlags::POLLIN),
                PollFd::new(signals.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll failed"),
            }
            (is_ready(&fds[0]), is_ready(&fds[1]))
        };

        if signal_ready {
            handle_signals(debugger, signals, out)?;
        }

        if input_ready {
            let open = input.fill().context("failed to read operator input")?;
            while let Some(line) = input.next_line() {
                if let Flow::Quit = handle_command(debugger, &line, out)? {
                    return Ok(());
                }
            }
            if !open {
                // EOF は quit と同じ扱い
                if let Some(line) = input.take_rest() {
                    if let Flow::Quit = handle_command(debugger, &line, out)? {
                        return Ok(());
                    }
                }
                writeln!(out, "quit")?;
                return Ok(());
            }
        }

        print_prompt(out)?;
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents()
        .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
}

fn print_prompt<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "{}", PROMPT)?;
    out.flush()?;
    Ok(())
}

/// シグナル通知を処理する
fn handle_signals<W: Write>(
    debugger: &mut Debugger,
    signals: &mut SignalSource,
    out: &mut W,
) -> Result<()> {
    let received = signals.drain().context("failed to read signal notification")?;
    debug!(?received, "signals received");

    if received.contains(&Signal::SIGINT) {
        writeln!(out)?;
    }
    if received.contains(&Signal::SIGCHLD) {
        match debugger.reap_child() {
            Ok(Some(status)) => {
                writeln!(out)?;
                report_exit(status, out)?;
            }
            Ok(None) => {}
            Err(e) => report_error(e, out)?,
        }
    }
    Ok(())
}

/// 1行分のコマンドを処理する
fn handle_command<W: Write>(debugger: &mut Debugger, line: &str, out: &mut W) -> Result<Flow> {
    let Some(command) = Command::parse(line) else {
        return Ok(Flow::Continue);
    };

    let result = match command {
        Command::Quit => return Ok(Flow::Quit),
        Command::Do(text) => debugger.inject(&text),
        Command::Break(loc) => handle_break(debugger, &loc, out),
        Command::List(loc) => debugger.list(&loc, out),
        Command::Continue => handle_continue(debugger, out),
        Command::Run => handle_run(debugger, out),
        Command::Undefined(word) => {
            writeln!(out, "Undefined command: \"{}\"", word)?;
            Ok(())
        }
        reserved @ (Command::Next
        | Command::Help
        | Command::Edit
        | Command::Step
        | Command::Print
        | Command::Backtrace) => {
            debug!(command = ?reserved, "reserved command ignored");
            Ok(())
        }
    };

    if let Err(e) = result {
        report_error(e, out)?;
    }
    Ok(Flow::Continue)
}

/// Breakコマンドを処理する
fn handle_break<W: Write>(debugger: &mut Debugger, loc: &str, out: &mut W) -> bgw_core::Result<()> {
    let line = debugger.set_breakpoint(loc)?;
    writeln!(out, "Breakpoint set at line {}", line)?;
    Ok(())
}

/// Runコマンドを処理する
fn handle_run<W: Write>(debugger: &mut Debugger, out: &mut W) -> bgw_core::Result<()> {
    if debugger.state() == DebuggerState::Paused {
        writeln!(out, "Restarting {} from the first line.", debugger.source().display())?;
    }

    let report = debugger.run()?;
    if let Some(status) = report.previous_exit {
        report_exit(status, out)?;
    }
    report_outcome(&report.outcome, out)?;
    Ok(())
}

/// Continueコマンドを処理する
fn handle_continue<W: Write>(debugger: &mut Debugger, out: &mut W) -> bgw_core::Result<()> {
    let outcome = debugger.continue_run()?;
    report_outcome(&outcome, out)?;
    Ok(())
}

fn report_outcome<W: Write>(outcome: &RunOutcome, out: &mut W) -> io::Result<()> {
    match outcome {
        RunOutcome::Stopped { line, text } => writeln!(out, "Breakpoint, line {}: {}", line, text),
        RunOutcome::Finished { lines } => writeln!(out, "End of script ({} lines sent).", lines),
    }
}

fn report_exit<W: Write>(status: ExitStatus, out: &mut W) -> io::Result<()> {
    writeln!(out, "shell terminated with {}", status)
}

/// コマンドのエラーを報告する（致命的なものはイベントループを抜ける）
fn report_error<W: Write>(e: DebugError, out: &mut W) -> Result<()> {
    if e.is_fatal() {
        return Err(e.into());
    }
    writeln!(out, "{}", e)?;
    Ok(())
}

/// 操作者の入力
///
/// 標準入力を複製したディスクリプタから直接読み、行単位に区切ります。
/// 読み込みは poll で読み取り可能になったときだけ行います。
struct OperatorInput {
    file: File,
    pending: Vec<u8>,
}

impl OperatorInput {
    /// 標準入力を複製して使う
    fn stdin() -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::from_fd(fd))
    }

    fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            pending: Vec::new(),
        }
    }

    /// 読める分を読み込む（EOF の場合は false）
    fn fill(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 4096];
        loop {
            match self.file.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// 改行まで揃った行を一つ取り出す
    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(decode_line(&line[..pos]))
    }

    /// EOF 時に改行で終わっていない残りを取り出す
    fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

impl AsFd for OperatorInput {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use tempfile::NamedTempFile;

    const FIVE_LINES: &str = "#!/bin/sh\n: one\n: two\n: three\n: four\n";

    fn script(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// `input` を操作者の入力として流し込み、EOF まで実行したときの出力と結果
    fn drive(debugger: &mut Debugger, input: &str) -> (String, Result<()>) {
        let (read_end, write_end) = pipe().unwrap();
        let mut writer = File::from(write_end);
        writer.write_all(input.as_bytes()).unwrap();
        drop(writer);

        let mut signals = SignalSource::new(&[Signal::SIGCHLD, Signal::SIGINT]).unwrap();
        let mut input = OperatorInput::from_fd(read_end);
        let mut out = Vec::new();
        let result = session(debugger, &mut signals, &mut input, &mut out);
        (String::from_utf8(out).unwrap(), result)
    }

    #[test]
    fn test_cli_requires_script() {
        assert!(Cli::try_parse_from(["bgw"]).is_err());

        let cli = Cli::try_parse_from(["bgw", "reboot.sh"]).unwrap();
        assert_eq!(cli.script, PathBuf::from("reboot.sh"));
        assert_eq!(cli.list_size, DEFAULT_LIST_SIZE);

        let cli = Cli::try_parse_from(["bgw", "--list-size", "20", "reboot.sh"]).unwrap();
        assert_eq!(cli.list_size, 20);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"run"), "run");
        assert_eq!(decode_line(b"do echo hi\r"), "do echo hi");
    }

    #[test]
    fn test_undefined_and_reserved_commands_keep_session() {
        let file = script(FIVE_LINES);
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(
            &mut debugger,
            "bogus arg\nnext\nhelp\nedit\nstep\nprint\nbacktrace\nbreak 2\n",
        );
        result.unwrap();

        assert!(out.contains("Undefined command: \"bogus\"\n"));
        assert_eq!(out.matches("Undefined command").count(), 1);
        // 予約語の後も入力を読み続ける
        assert!(out.contains("Breakpoint set at line 2\n"));
        // EOF は quit と同じ扱い
        assert!(out.ends_with("quit\n"));
        assert_eq!(debugger.breakpoints().iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_quit_stops_reading_input() {
        let file = script(FIVE_LINES);
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(&mut debugger, "quit\nbreak 2\n");
        result.unwrap();

        assert!(!out.contains("Breakpoint set"));
        assert!(debugger.breakpoints().iter().next().is_none());
    }

    #[test]
    fn test_last_line_without_newline_is_handled_at_eof() {
        let file = script(FIVE_LINES);
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(&mut debugger, "break 3");
        result.unwrap();

        assert!(out.contains("Breakpoint set at line 3\n"));
        assert!(out.ends_with("quit\n"));
    }

    #[test]
    fn test_per_command_errors_are_reported() {
        let file = script(FIVE_LINES);
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(&mut debugger, "do echo hi\ncontinue\nbreak nosuch\ndo\n");
        result.unwrap();

        assert_eq!(out.matches("The script is not running.").count(), 2);
        assert!(out.contains("keyword not found: nosuch\n"));
        assert!(out.contains("Argument required"));
    }

    #[test]
    fn test_run_and_continue_through_dispatcher() {
        let file = script(FIVE_LINES);
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(&mut debugger, "break 3\nrun\ndo : injected\ncontinue\n");
        result.unwrap();

        assert!(out.contains("Breakpoint, line 3: : two\n"));
        assert!(out.contains("End of script (5 lines sent).\n"));
        // 終了状態は通知経由か後片付けのどちらか一度だけ報告される
        assert_eq!(out.matches("shell terminated with").count(), 1);
        assert_eq!(debugger.state(), DebuggerState::Terminated);
        assert_eq!(debugger.channel_path(), None);
        assert_eq!(debugger.subshell_pid(), None);
    }

    #[test]
    fn test_fatal_error_ends_session() {
        let file = script("echo hello\n");
        let mut debugger = Debugger::new(file.path()).unwrap();

        let (out, result) = drive(&mut debugger, "run\nbreak 1\n");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("missing shebang"));
        // 致命的なエラーの後の入力は処理しない
        assert!(!out.contains("Breakpoint set"));
        assert_eq!(debugger.channel_path(), None);
        assert_eq!(debugger.subshell_pid(), None);
    }
}
