//! コマンドチャネル（名前付きパイプ）
//!
//! 実行ごとに専用の一時ディレクトリを作り、その中に FIFO を一つ置きます。
//! デバッガはここへスクリプトの行や `do` の入力を一行ずつ書き込み、
//! インタプリタ側がそれを読み取ります。

use nix::errno::Errno;
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::{mkdtemp, mkfifo};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// 一時ディレクトリ名のテンプレート（mkdtemp用）
const TEMPDIR_TEMPLATE: &str = "bgw-XXXXXX";

/// FIFO のファイル名
const FIFO_NAME: &str = "script";

/// 一時的な書き込みエラー時の待ち時間
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// コマンドチャネルのエラー
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 一時ディレクトリの作成に失敗
    #[error("failed to create temporary directory in {base:?}: {source}")]
    TempDir {
        base: PathBuf,
        #[source]
        source: Errno,
    },

    /// FIFO の作成に失敗
    #[error("failed to create fifo {path:?}: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    /// 書き込み用に FIFO を開けなかった
    #[error("failed to open fifo {path:?} for writing: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// FIFO への書き込みに失敗
    #[error("failed to write to command channel: {0}")]
    Write(#[source] io::Error),

    /// FIFO または一時ディレクトリの削除に失敗
    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 書き込み側がまだ開かれていない
    #[error("command channel is not open for writing")]
    NotOpen,
}

impl ChannelError {
    /// 一時ディレクトリや FIFO の作成・削除に関するエラーかどうか
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            ChannelError::TempDir { .. } | ChannelError::Fifo { .. } | ChannelError::Remove { .. }
        )
    }
}

/// 名前付きパイプによるコマンドチャネル
///
/// FIFO とそれを含む一時ディレクトリは常に一緒に削除されます。
pub struct CommandChannel {
    dir: PathBuf,
    path: PathBuf,
    writer: Option<File>,
    removed: bool,
}

impl CommandChannel {
    /// システムの一時ディレクトリの下にチャネルを作成する
    pub fn create() -> Result<Self, ChannelError> {
        Self::create_in(std::env::temp_dir())
    }

    /// 指定したディレクトリの下にチャネルを作成する
    ///
    /// mkdtemp で所有者のみアクセス可能なディレクトリを作り、その中に
    /// `script` という名前の FIFO を作成します。
    pub fn create_in<P: AsRef<Path>>(base: P) -> Result<Self, ChannelError> {
        let base = base.as_ref();
        let dir = mkdtemp(&base.join(TEMPDIR_TEMPLATE)).map_err(|source| ChannelError::TempDir {
            base: base.to_path_buf(),
            source,
        })?;

        let path = dir.join(FIFO_NAME);
        if let Err(source) = mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
            // ディレクトリだけが残らないように片付ける
            if let Err(e) = fs::remove_dir(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove temporary directory");
            }
            return Err(ChannelError::Fifo { path, source });
        }

        debug!(path = %path.display(), "command channel created");
        Ok(Self {
            dir,
            path,
            writer: None,
            removed: false,
        })
    }

    /// FIFO のパスを取得する
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// FIFO を含む一時ディレクトリのパスを取得する
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 書き込み側が開かれているか
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// 書き込み用に FIFO を開く
    ///
    /// 非ブロッキングで開くため、読み手がまだいない場合は `Ok(false)` を返します。
    /// 呼び出し側は読み手の状態を確認しながら再試行します。
    pub fn try_open_writer(&mut self) -> Result<bool, ChannelError> {
        if self.writer.is_some() {
            return Ok(true);
        }

        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
        {
            Ok(file) => {
                debug!(path = %self.path.display(), "command channel opened for writing");
                self.writer = Some(file);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => Ok(false),
            Err(source) => Err(ChannelError::Open {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// 一行を書き込む
    ///
    /// 末尾に改行を付けてバッファ全体を書き込み、その後データを読み手へ送り出します。
    /// 読み手が途中までの行を観測することはありません。
    pub fn write_line(&mut self, line: &[u8]) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::NotOpen)?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        write_all_retrying(writer, &buf).map_err(ChannelError::Write)?;

        // FIFO では fdatasync が EINVAL になるが、データは既にパイプに渡っている
        match writer.sync_data() {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(e) => Err(ChannelError::Write(e)),
        }
    }

    /// 書き込み側を閉じる（読み手は EOF を受け取る）
    pub fn close_writer(&mut self) {
        if self.writer.take().is_some() {
            debug!(path = %self.path.display(), "command channel writer closed");
        }
    }

    /// FIFO と一時ディレクトリを削除する
    pub fn destroy(mut self) -> Result<(), ChannelError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), ChannelError> {
        self.close_writer();
        self.removed = true;

        fs::remove_file(&self.path).map_err(|source| ChannelError::Remove {
            path: self.path.clone(),
            source,
        })?;
        fs::remove_dir(&self.dir).map_err(|source| ChannelError::Remove {
            path: self.dir.clone(),
            source,
        })?;

        debug!(dir = %self.dir.display(), "command channel removed");
        Ok(())
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = self.remove() {
                warn!(error = %e, "failed to clean up command channel");
            }
        }
    }
}

/// バッファ全体を書き込むまで再試行する
///
/// 部分書き込みの場合は残りから書き直し、EINTR / EAGAIN の場合は少し待ってから
/// 再試行します。それ以外のエラーは即座に返します。
pub fn write_all_retrying<W: Write + ?Sized>(writer: &mut W, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                debug!(error = %e, remaining = buf.len(), "transient write error, retrying");
                thread::sleep(WRITE_RETRY_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
