//! Day-rotating append log.
//!
//! One file per calendar day named `YYYY-MM-DD` inside the configured
//! directory, lines formatted `HH:MM <message>`. Every line is echoed to the
//! console stream whether or not a file is open. Rotation is lazy: every
//! [`RotatingLog::write`] first checks the line's date, so the open file's
//! date always matches the line being written. I/O failures are reported
//! through `tracing` and never propagate.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use time::{Date, OffsetDateTime};
use tracing::{error, info};

struct OpenLog {
    date: Date,
    path: PathBuf,
    writer: LineWriter<File>,
}

pub struct RotatingLog<W: Write = io::Stdout> {
    dir: Option<PathBuf>,
    file: Option<OpenLog>,
    console: W,
}

impl RotatingLog<io::Stdout> {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self::with_console(dir, io::stdout())
    }
}

impl<W: Write> RotatingLog<W> {
    pub fn with_console(dir: Option<PathBuf>, console: W) -> Self {
        Self {
            dir,
            file: None,
            console,
        }
    }

    /// Open the file for `now`'s date if it is not the one already open.
    pub fn check_rotate(&mut self, now: OffsetDateTime) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        let today = now.date();
        if self.file.as_ref().map(|f| f.date) == Some(today) {
            return;
        }

        self.close();

        let path = dir.join(day_file_name(today));
        match open_append(&path) {
            Ok(writer) => {
                info!(path = %path.display(), "log file opened");
                self.file = Some(OpenLog {
                    date: today,
                    path: path.clone(),
                    writer,
                });
                self.write_line(now, &format!("Opened log file: {}", path.display()));
            }
            Err(e) => error!(path = %path.display(), "failed to rotate log file: {e}"),
        }
    }

    /// Write one `HH:MM`-prefixed line to the console and to `now`'s day
    /// file, rotating first if the date changed.
    pub fn write(&mut self, now: OffsetDateTime, text: &str) {
        self.check_rotate(now);
        self.write_line(now, text);
    }

    fn write_line(&mut self, now: OffsetDateTime, text: &str) {
        let line = format!(
            "{:02}:{:02} {}\n",
            now.hour(),
            now.minute(),
            text.trim_end_matches('\n')
        );

        if let Err(e) = self.console.write_all(line.as_bytes()) {
            error!("failed to echo log line: {e}");
        }

        if let Some(open) = self.file.as_mut() {
            if let Err(e) = open.writer.write_all(line.as_bytes()) {
                error!(path = %open.path.display(), "failed to write to log file: {e}");
            }
        }
    }

    /// Flush and close the open file, if any.
    pub fn close(&mut self) {
        if let Some(mut open) = self.file.take() {
            if let Err(e) = open.writer.flush() {
                error!(path = %open.path.display(), "failed to flush log file: {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn current_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    #[cfg(test)]
    pub(crate) fn console(&self) -> &W {
        &self.console
    }
}

impl<W: Write> Drop for RotatingLog<W> {
    fn drop(&mut self) {
        self.close();
    }
}

/// `YYYY-MM-DD`
pub fn day_file_name(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

fn open_append(path: &Path) -> io::Result<LineWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LineWriter::new(file))
}

// ===========================================================================
// Tests
// ===========================================================================
