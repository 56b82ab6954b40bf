//! Logging for the resume run — timestamped lines to an optional log file.
//!
//! Every line carries the program tag (`argv0[pid]`) so interleaved runs in a
//! shared log file stay attributable. Errors always reach stderr; debug lines
//! are written only when debug logging is enabled, and only to the file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Logger {
    tag: String,
    file: Option<Mutex<std::fs::File>>,
    debug_enabled: bool,
}

impl Logger {
    /// Open a logger. A log file that cannot be opened is reported once on
    /// stderr and logging continues without it.
    pub fn new(tag: &str, log_file: Option<&Path>, debug_enabled: bool) -> Logger {
        let file = log_file.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    eprintln!("{}: cannot open log file {}: {}", tag, path.display(), e);
                    None
                }
            }
        });
        Logger {
            tag: tag.to_string(),
            file,
            debug_enabled,
        }
    }

    /// A logger with no file and no debug output, for tests and tools.
    pub fn stderr_only(tag: &str) -> Logger {
        Logger {
            tag: tag.to_string(),
            file: None,
            debug_enabled: false,
        }
    }

    pub fn error(&self, msg: &str) {
        let line = format!("[{}] {}: error: {}", epoch_secs(), self.tag, msg);
        eprintln!("{}", line);
        self.write_file(&line);
    }

    pub fn debug(&self, msg: &str) {
        if !self.debug_enabled {
            return;
        }
        let line = format!("[{}] {}: debug: {}", epoch_secs(), self.tag, msg);
        self.write_file(&line);
    }

    fn write_file(&self, line: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
