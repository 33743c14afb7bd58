//! Logging setup for Dockhand binaries.
//!
//! Events go to two places: a size-rotated file under `~/.dockhand/logs`
//! and stderr. `RUST_LOG` overrides the default filter for both.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "dockhand=info,dockhand_orchestrator=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a Dockhand binary.
#[derive(Debug, Clone, Default)]
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only
    pub verbose: bool,
    /// Write nothing to stderr
    pub quiet: bool,
    /// Log directory; defaults to [`logs_dir`]
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rotating file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir()?,
    };
    let file_writer = SharedRotatingWriter::open(&log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter = default_filter();
    let console_filter = if config.quiet {
        EnvFilter::new("off")
    } else if config.verbose {
        default_filter()
    } else {
        EnvFilter::new("warn")
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
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Dockhand home directory: `$DOCKHAND_HOME` or `~/.dockhand`
pub fn dockhand_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("DOCKHAND_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".dockhand"))
}

/// Logs directory: `<home>/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(dockhand_home()?.join("logs"))
}

// =============================================================================
// Rotating file writer
// =============================================================================

/// Append-only log file that shifts `name.log` to `name.log.1` (and so on)
/// once it would grow past `max_size`, keeping at most `max_files` files.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: sanitize_name(name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written > log.max_size {
            log.rotate()?;
        }
        Ok(log)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{}", self.stem, n)),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let oldest = self.max_files - 1;
        if oldest == 0 {
            // Single-file mode: start over
            fs::remove_file(self.path(0)).or_else(ignore_missing)?;
        } else {
            fs::remove_file(self.path(oldest)).or_else(ignore_missing)?;
            for generation in (0..oldest).rev() {
                let from = self.path(generation);
                if from.exists() {
                    fs::rename(&from, self.path(generation + 1))?;
                }
            }
        }

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

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out handles to one shared [`RotatingFile`]
#[derive(Clone)]
struct SharedRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SharedRotatingWriter {
    fn open(dir: &Path, name: &str) -> Result<Self> {
        let file = RotatingFile::open(dir, name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {} in {}", name, dir.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct WriterHandle {
    inner: Arc<Mutex<RotatingFile>>,
}

impl WriterHandle {
    fn with<T>(&self, f: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut file)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRotatingWriter {
    type Writer = WriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        WriterHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for WriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|file| file.flush())
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "dockhand".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("dockhand"), "dockhand");
        assert_eq!(sanitize_name("my app/v1"), "my_app_v1");
        assert_eq!(sanitize_name(""), "dockhand");
    }

    #[test]
    fn test_rotates_when_full() {
        let dir = TempDir::new().unwrap();
        let mut log = RotatingFile::open(dir.path(), "cli", 3, 10).unwrap();

        log.write_all(b"0123456789").unwrap();
        log.write_all(b"abcdef").unwrap();
        log.flush().unwrap();

        assert_eq!(log_files(dir.path()), vec!["cli.log", "cli.log.1"]);
        assert_eq!(fs::read(dir.path().join("cli.log.1")).unwrap(), b"0123456789");
        assert_eq!(fs::read(dir.path().join("cli.log")).unwrap(), b"abcdef");
    }

    #[test]
    fn test_keeps_at_most_max_files() {
        let dir = TempDir::new().unwrap();
        let mut log = RotatingFile::open(dir.path(), "cli", 3, 4).unwrap();

        for chunk in [b"aaaa", b"bbbb", b"cccc", b"dddd", b"eeee"] {
            log.write_all(chunk).unwrap();
        }
        log.flush().unwrap();

        assert_eq!(log_files(dir.path()), vec!["cli.log", "cli.log.1", "cli.log.2"]);
        assert_eq!(fs::read(dir.path().join("cli.log")).unwrap(), b"eeee");
        assert_eq!(fs::read(dir.path().join("cli.log.2")).unwrap(), b"cccc");
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = RotatingFile::open(dir.path(), "cli", 2, 1024).unwrap();
            log.write_all(b"first\n").unwrap();
        }
        let mut log = RotatingFile::open(dir.path(), "cli", 2, 1024).unwrap();
        assert_eq!(log.written, 6);
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("cli.log")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn test_single_file_mode_truncates() {
        let dir = TempDir::new().unwrap();
        let mut log = RotatingFile::open(dir.path(), "cli", 1, 4).unwrap();
        log.write_all(b"aaaa").unwrap();
        log.write_all(b"bb").unwrap();
        log.flush().unwrap();

        assert_eq!(log_files(dir.path()), vec!["cli.log"]);
        assert_eq!(fs::read(dir.path().join("cli.log")).unwrap(), b"bb");
    }
}
