//! Logger setup
//!
//! Logs go to stderr, or to a size-rotated file when a log directory is
//! configured. The level defaults to `info` and can be changed with
//! `RUST_LOG`.

use std::fs;
use std::io;
use std::path::Path;

use env_logger::{Env, Target};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::*;

pub const LOG_FILE_NAME: &str = ".tvpaint-rpc.log";
/// Size past which the log file is rotated
pub const MAX_LOG_SIZE: usize = 1024 * 1024;
/// Number of rotated files kept next to the live one
pub const MAX_LOG_FILES: usize = 2;

/// Opens `path` as a log file rotated once it grows past `max_size` bytes.
///
/// `app.log` is the live file, `app.log.1` the most recent rotated one, up to
/// `app.log.<max_files>`. Records are never split across files.
pub fn rotating_file(path: &Path, max_size: usize, max_files: usize) -> FileRotate<AppendCount> {
    FileRotate::new(
        path,
        AppendCount::new(max_files),
        ContentLimit::BytesSurpassed(max_size),
        Compression::None,
        #[cfg(unix)]
        None,
    )
}

/// Opens the bridge log file inside `dir`, creating the directory if needed
pub fn open_log_file(dir: &Path) -> io::Result<FileRotate<AppendCount>> {
    fs::create_dir_all(dir)?;
    Ok(rotating_file(&dir.join(LOG_FILE_NAME), MAX_LOG_SIZE, MAX_LOG_FILES))
}

/// Installs the global logger.
///
/// Does nothing if a logger is already installed, so hosts reloading the
/// plugin can call this again.
pub fn init(log_dir: Option<&Path>) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));

    let mut file_error = None;
    if let Some(dir) = log_dir {
        match open_log_file(dir) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(e),
        }
    }

    if builder.try_init().is_err() {
        debug!("Logger already initialized");
        return;
    }
    if let (Some(dir), Some(e)) = (log_dir, file_error) {
        warn!("Cannot log to {}: {}, using stderr", dir.display(), e);
    }
}
