//! Run-scoped logging with secret redaction.
//!
//! Every record is written twice: a redacted, timestamped line appended to
//! the run log file (owner-only permissions), and an unredacted, color-coded
//! mirror on the console so the operator still sees generated credentials
//! exactly once. Redaction is a pure function of the message text and is
//! applied regardless of level.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::error::ProvisionError;

/// Known gap: only `password`/`passwd`/`pwd` key names are masked. Any other
/// secret-bearing key (an API token, say) goes to the log file unredacted.
static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|pwd)\b\s*[:=]\s*[^\s'\x22]+").expect("valid redaction pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    /// No level tag and no timestamp prefix on the console; used for the
    /// human summary blocks.
    Plain,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Plain => "PLAIN",
        }
    }

    fn color(self) -> Option<Color> {
        match self {
            Level::Info => Some(Color::Green),
            Level::Warn => Some(Color::Yellow),
            Level::Error => Some(Color::Red),
            Level::Plain => None,
        }
    }
}

/// Replace `key[:=]value` secrets with `key:[HIDDEN]`.
pub fn redact(message: &str) -> String {
    SECRET_PATTERN
        .replace_all(message, |caps: &regex::Captures<'_>| {
            format!("{}:[HIDDEN]", &caps[1])
        })
        .into_owned()
}

pub struct Logger {
    file: Mutex<File>,
    path: PathBuf,
    /// Suppress console mirroring (tests).
    quiet: bool,
}

impl Logger {
    /// Create the run log file with owner-only permissions. This runs before
    /// any other stage; failure here is fatal to the whole run.
    pub fn create(path: &Path) -> Result<Self, ProvisionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::write(path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProvisionError::write(path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms).map_err(|e| ProvisionError::write(path, e))?;
        }
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            quiet: false,
        })
    }

    /// Create a logger that never touches the console.
    pub fn create_quiet(path: &Path) -> Result<Self, ProvisionError> {
        let mut logger = Self::create(path)?;
        logger.quiet = true;
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, level: Level, message: &str) {
        self.append_record(level, message);
        if !self.quiet {
            self.mirror(level, message);
        }
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    pub fn plain(&self, message: &str) {
        self.log(Level::Plain, message);
    }

    fn append_record(&self, level: Level, message: &str) {
        let line = format!(
            "[{}][{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.tag(),
            redact(message)
        );
        // A log file that stops accepting writes invalidates the audit trail
        // of the run; treat it the same as the creation failure.
        let mut file = self.file.lock().expect("log file lock");
        if let Err(e) = file.write_all(line.as_bytes()) {
            panic!("log file {} no longer writable: {}", self.path.display(), e);
        }
    }

    fn mirror(&self, level: Level, message: &str) {
        let mut stream = match level {
            Level::Error => StandardStream::stderr(ColorChoice::Auto),
            _ => StandardStream::stdout(ColorChoice::Auto),
        };
        if let Some(color) = level.color() {
            let _ = stream.set_color(ColorSpec::new().set_fg(Some(color)));
            let _ = write!(stream, "[{}] ", level.tag());
            let _ = stream.reset();
        }
        let _ = writeln!(stream, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_assignments() {
        assert_eq!(redact("password=abc123"), "password:[HIDDEN]");
        assert_eq!(redact("pwd:XYZ"), "pwd:[HIDDEN]");
        assert_eq!(redact("Passwd: s3cret!"), "Passwd:[HIDDEN]");
    }

    #[test]
    fn masks_secret_inside_larger_message() {
        let msg = "creating role znuny with password=qqq111 on localhost";
        let redacted = redact(msg);
        assert!(redacted.contains("password:[HIDDEN]"));
        assert!(!redacted.contains("qqq111"));
        assert!(redacted.contains("creating role znuny"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let msg = "reloading postgresql cluster 15/main";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn other_secret_keys_are_not_masked() {
        // Documented gap: only password/passwd/pwd key names are in scope.
        let msg = "api_token=deadbeef";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn persisted_line_is_redacted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let logger = Logger::create_quiet(&path).expect("logger");
        logger.info("db password=supersecret generated");
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("password:[HIDDEN]"));
        assert!(!contents.contains("supersecret"));
        assert!(contents.contains("[INFO]"));
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let _logger = Logger::create_quiet(&path).expect("logger");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
