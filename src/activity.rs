//! Append-only log files.
//!
//! `activity.log` receives one snapshot line per interval; `error.log` receives
//! multi-line failure entries separated by a blank line.  Neither is read back.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::utils::time::{now_rfc3339, rfc3339};

/// A file that is only ever appended to.
#[derive(Clone, Debug)]
pub struct AppendLog {
    path: Arc<str>,
}

impl AppendLog {
    /// Creates a log at `path`; the file is created on first append.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: Arc::from(path.as_ref()),
        }
    }

    /// Where entries go.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends `entry` followed by a newline.
    pub fn append(&self, entry: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*self.path)
            .map_err(|err| Error::io(format!("cannot open {}", self.path), err))?;
        writeln!(file, "{entry}")
            .map_err(|err| Error::io(format!("cannot write {}", self.path), err))
    }

    /// Appends a failure entry for `err`, stamped now.
    pub fn record_failure(&self, context: &str, err: &dyn std::error::Error) -> Result<()> {
        self.append(&failure_entry(OffsetDateTime::now_utc(), context, err))
    }
}

/// Formats a failure with its full source chain.
pub fn failure_entry(at: OffsetDateTime, context: &str, err: &dyn std::error::Error) -> String {
    let mut entry = format!("[{}] {context}: {err}", rfc3339(at));
    let mut source = err.source();
    while let Some(cause) = source {
        entry.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    entry.push('\n');
    entry
}

/// Chains a panic hook that records the payload and location in `log`.
pub fn install_panic_hook(log: AppendLog) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let entry = format!(
            "[{}] Unhandled panic at {location}: {payload}\n",
            now_rfc3339()
        );
        if let Err(err) = log.append(&entry) {
            eprintln!("could not write {}: {err}", log.path());
        }
        previous(info);
    }));
}
