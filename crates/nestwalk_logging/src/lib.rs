//! Logging setup for nestwalk binaries.
//!
//! Log lines go to a size-rotated file under `$NESTWALK_HOME/logs` and to
//! stderr. `RUST_LOG` overrides the default filter for both.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const HOME_ENV: &str = "NESTWALK_HOME";
const DEFAULT_LOG_FILTER: &str = "nestwalk=info";
const QUIET_CONSOLE_FILTER: &str = "warn";
const KEEP_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// What to log and where.
#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    /// Base name of the log file.
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir()?;
    let file_writer = SharedLogWriter::open(&log_dir, config.app_name)?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new(QUIET_CONSOLE_FILTER)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

/// nestwalk home directory: `$NESTWALK_HOME`, else `~/.nestwalk`.
pub fn nestwalk_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".nestwalk"))
        .ok_or_else(|| anyhow!("Could not determine home directory; set {}", HOME_ENV))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(nestwalk_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file that shifts `name.log` to `name.log.1`, `.1` to
/// `.2` and so on once it would grow past `max_size`, keeping at most
/// `keep` files in total.
struct SizeRotatedFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    max_size: u64,
    file: Option<File>,
    written: u64,
}

impl SizeRotatedFile {
    fn open(dir: &Path, name: &str, keep: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(name),
            keep: keep.max(1),
            max_size,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written >= log.max_size {
            log.roll()?;
        }
        Ok(log)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn generation_path(&self, generation: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, generation))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let generations = self.keep - 1;
        if generations == 0 {
            fs::remove_file(self.active_path()).or_else(ignore_missing)?;
            return self.reopen();
        }

        fs::remove_file(self.generation_path(generations)).or_else(ignore_missing)?;
        for generation in (1..generations).rev() {
            fs::rename(self.generation_path(generation), self.generation_path(generation + 1))
                .or_else(ignore_missing)?;
        }
        fs::rename(self.active_path(), self.generation_path(1)).or_else(ignore_missing)?;
        self.reopen()
    }
}

fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

impl Write for SizeRotatedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file closed"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out handles to one shared rotated file.
#[derive(Clone)]
struct SharedLogWriter {
    inner: Arc<Mutex<SizeRotatedFile>>,
}

impl SharedLogWriter {
    fn open(dir: &Path, app_name: &str) -> Result<Self> {
        let file = SizeRotatedFile::open(dir, app_name, KEEP_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| {
                format!("Failed to open log file for {} in {}", app_name, dir.display())
            })?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogWriter {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        "nestwalk".to_string()
    } else {
        stem
    }
}
