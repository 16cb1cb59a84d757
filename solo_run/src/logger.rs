//! Leveled logging with a console sink and a size-rotated file sink.
//!
//! Backend for the [`log`] facade: the runtime emits diagnostics through the usual `trace!` /
//! `debug!` / `info!` macros and never looks at the result. The global max level is the
//! severity threshold; records below it are suppressed before formatting.
//!
//! The console sink can be configured with or without timestamps and with or without ANSI
//! colors. The file sink rotates once the current file exceeds a byte threshold, keeping a
//! configured number of numbered backups (`log.txt.0` is the newest backup, the oldest is
//! evicted).

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const RESET_COLOR: &str = "\x1b[0m";

fn color_for_level(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m", // Red
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Info => "\x1b[32m",  // Green
        Level::Debug => "\x1b[34m", // Blue
        Level::Trace => "\x1b[90m", // Light Grey (or Bright Black)
    }
}

fn format_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

#[derive(Clone, Copy)]
struct ConsoleSink {
    timestamps: bool,
    colors: bool,
}

struct RotateConfig {
    path: PathBuf,
    max_size: u64,
    max_files: usize,
}

/// Configures and installs the process-wide logger.
pub struct Builder {
    level: LevelFilter,
    console: Option<ConsoleSink>,
    rotate: Option<RotateConfig>,
    flush_on_log: bool,
}

pub fn builder() -> Builder {
    Builder::default()
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: Some(ConsoleSink {
                timestamps: true,
                colors: true,
            }),
            rotate: None,
            flush_on_log: false,
        }
    }
}

impl Builder {
    /// Sets the global severity threshold.
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Enables the console sink, with or without timestamps and ANSI colors.
    pub fn console(mut self, timestamps: bool, colors: bool) -> Self {
        self.console = Some(ConsoleSink { timestamps, colors });
        self
    }

    pub fn no_console(mut self) -> Self {
        self.console = None;
        self
    }

    /// Enables the rotating file sink: rotate once the file exceeds `max_size` bytes, keeping
    /// `max_files` numbered backups.
    pub fn rotate_file(mut self, path: impl Into<PathBuf>, max_size: u64, max_files: usize) -> Self {
        self.rotate = Some(RotateConfig {
            path: path.into(),
            max_size,
            max_files,
        });
        self
    }

    pub fn flush_on_log(mut self, enable: bool) -> Self {
        self.flush_on_log = enable;
        self
    }

    /// Installs the logger. Fails if the log file cannot be opened or a logger is already set.
    pub fn init(self) -> io::Result<()> {
        let file = match self.rotate {
            Some(config) => {
                if let Some(parent) = config.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                Some(Mutex::new(RotateFile::open(config)?))
            }
            None => None,
        };

        let output = LoggerOutput {
            console: self.console,
            file,
            flush_on_log: self.flush_on_log,
        };
        log::set_boxed_logger(Box::new(output)).map_err(io::Error::other)?;
        log::set_max_level(self.level);
        Ok(())
    }
}

/// Routes formatted records to the enabled sinks.
struct LoggerOutput {
    console: Option<ConsoleSink>,
    file: Option<Mutex<RotateFile>>,
    flush_on_log: bool,
}

impl Log for LoggerOutput {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = format_timestamp();
        let level = record.level();
        let plain_level = format!("[{level:<5}]");
        let body = format!("[{}] {}", record.target(), record.args());

        if let Some(console) = self.console {
            let level_part = if console.colors {
                format!("[{}{level:<5}{RESET_COLOR}]", color_for_level(level))
            } else {
                plain_level.clone()
            };
            if console.timestamps {
                println!("[{timestamp}] {level_part}{body}");
            } else {
                println!("{level_part}{body}");
            }
            if self.flush_on_log {
                let _ = io::stdout().flush();
            }
        }

        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap();
            file.write_line(&format!("[{timestamp}] {plain_level}{body}"));
            if self.flush_on_log {
                file.flush();
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            file.lock().unwrap().flush();
        }
    }
}

struct RotateFile {
    path: PathBuf,
    max_size: u64,
    max_files: usize,
    file: File,
    written: u64,
}

impl RotateFile {
    fn open(config: RotateConfig) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: config.path,
            max_size: config.max_size,
            max_files: config.max_files,
            file,
            written,
        })
    }

    /// Sink failures are reported on stderr; the logger cannot log its own faults.
    fn write_line(&mut self, line: &str) {
        if let Err(err) = writeln!(self.file, "{line}") {
            eprintln!("log write to {} failed: {err}", self.path.display());
            return;
        }
        self.written += line.len() as u64 + 1;

        if self.max_size > 0 && self.written > self.max_size {
            if let Err(err) = self.rotate() {
                eprintln!("log rotation of {} failed: {err}", self.path.display());
            }
        }
    }

    /// Shifts the numbered backups up by one, evicting the oldest, and reopens the base file.
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = numbered(&self.path, self.max_files.saturating_sub(1));
        ignore_missing(fs::remove_file(&oldest))?;
        for index in (1..self.max_files).rev() {
            ignore_missing(fs::rename(
                numbered(&self.path, index - 1),
                numbered(&self.path, index),
            ))?;
        }
        ignore_missing(fs::rename(&self.path, numbered(&self.path, 0)))?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn flush(&mut self) {
        if let Err(err) = self.file.flush() {
            eprintln!("log flush of {} failed: {err}", self.path.display());
        }
    }
}

fn numbered(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("solo_run_logger_{tag}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn numbered_appends_the_index() {
        assert_eq!(
            numbered(Path::new("logs/log.txt"), 3),
            PathBuf::from("logs/log.txt.3")
        );
    }

    #[test]
    fn rotation_shifts_backups_and_evicts_the_oldest() {
        let dir = scratch_dir("rotate");
        let path = dir.join("log.txt");
        let mut sink = RotateFile::open(RotateConfig {
            path: path.clone(),
            max_size: 64,
            max_files: 2,
        })
        .expect("open sink");

        // Each line is 40 bytes; every other line pushes the file past the threshold.
        for i in 0..6 {
            sink.write_line(&format!("line {i} {:030}", i));
        }

        assert!(path.exists());
        assert!(numbered(&path, 0).exists());
        assert!(numbered(&path, 1).exists());
        assert!(!numbered(&path, 2).exists(), "oldest backup must be evicted");

        // The newest backup holds more recent lines than the older one.
        let newest = fs::read_to_string(numbered(&path, 0)).expect("read .0");
        let oldest = fs::read_to_string(numbered(&path, 1)).expect("read .1");
        assert!(newest.contains("line 4"));
        assert!(oldest.contains("line 2"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rotation_starts_the_base_file_fresh() {
        let dir = scratch_dir("fresh");
        let path = dir.join("log.txt");
        let mut sink = RotateFile::open(RotateConfig {
            path: path.clone(),
            max_size: 8,
            max_files: 1,
        })
        .expect("open sink");

        sink.write_line("0123456789");
        assert_eq!(sink.written, 0, "rotation resets the running size");
        sink.write_line("after");

        let base = fs::read_to_string(&path).expect("read base");
        assert_eq!(base, "after\n");
        let backup = fs::read_to_string(numbered(&path, 0)).expect("read backup");
        assert_eq!(backup, "0123456789\n");

        let _ = fs::remove_dir_all(&dir);
    }
}
