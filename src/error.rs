//! Error types
//!
//! Daemon failures arrive as a dotted D-Bus error name plus a message and are
//! classified by matching on those strings. Everything else the library can
//! fail with is a variant of [`Error`].

use thiserror::Error;

/// How the front-end should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Show the message and exit
    Fatal,
    /// Clear the daemon transaction, keep the queue, let the user retry
    Recoverable,
}

/// Classified daemon failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonErrorKind {
    /// Another client holds the daemon lock
    Locked,
    /// Polkit authorization declined
    NotAuthorized,
    /// Daemon not running, not activatable or not answering
    Unreachable,
    /// Any other error raised by a daemon method
    Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct DaemonError {
    pub kind: DaemonErrorKind,
    pub name: String,
    pub message: String,
}

impl DaemonError {
    /// Classify by the dotted error name. Only transport failures, which
    /// carry no name, are classified by their message.
    pub fn classify(name: &str, message: &str) -> Self {
        let kind = if name.is_empty() {
            classify_transport(message)
        } else {
            classify_name(name)
        };
        Self {
            kind,
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn locked() -> Self {
        Self {
            kind: DaemonErrorKind::Locked,
            name: String::from("org.baseurl.DnfSystem.LockedError"),
            message: String::from("the daemon is locked by another application"),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind != DaemonErrorKind::Other
    }
}

fn classify_name(name: &str) -> DaemonErrorKind {
    let name = name.to_lowercase();
    // The last component names the error; `Spawn.*` errors keep theirs in the middle
    let last = name.rsplit('.').next().unwrap_or_default();
    if last == "lockederror" {
        DaemonErrorKind::Locked
    } else if last.starts_with("accessdenied") || last.starts_with("notauthorized") || last == "authfailed" {
        DaemonErrorKind::NotAuthorized
    } else if matches!(
        last,
        "noreply" | "serviceunknown" | "namehasnoowner" | "timeout" | "timedout" | "disconnected"
    ) || name.contains(".spawn.")
    {
        DaemonErrorKind::Unreachable
    } else {
        DaemonErrorKind::Other
    }
}

/// A call that never reached the daemon is unreachable unless the bus
/// itself says the lock or authorization was refused
fn classify_transport(message: &str) -> DaemonErrorKind {
    let message = message.to_lowercase();
    if message.contains("locked by another") {
        DaemonErrorKind::Locked
    } else if message.contains("not authorized") || message.contains("access denied") {
        DaemonErrorKind::NotAuthorized
    } else {
        DaemonErrorKind::Unreachable
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Invalid package id: {0}")]
    InvalidPkgId(String),

    #[error("Unexpected daemon reply for {method}: {detail}")]
    Protocol { method: &'static str, detail: String },

    #[error("{0} is protected and cannot be removed")]
    Protected(String),

    #[error("Dependency resolution failed: {}", .0.join("; "))]
    Solve(Vec<String>),

    #[error("Could not build transaction: {}", .0.join("; "))]
    Build(Vec<String>),

    #[error("Download failed: {}", .0.join("; "))]
    Download(Vec<String>),

    #[error("Transaction failed: {}", .0.join("; "))]
    Transaction(Vec<String>),

    #[error("GPG key {0} was not accepted")]
    GpgDeclined(String),

    #[error("Nothing to do: {0}")]
    NothingToDo(String),

    #[error("No such package: {0}")]
    UnknownPackage(String),

    #[error("No such group: {0}")]
    UnknownGroup(String),

    #[error("The queue must be empty before undoing a transaction")]
    QueueNotEmpty,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Search index error: {0}")]
    Search(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(method: &'static str, detail: impl Into<String>) -> Self {
        Self::Protocol {
            method,
            detail: detail.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Daemon(e) if e.is_fatal() => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_errors_are_fatal() {
        let err = DaemonError::classify("org.baseurl.DnfSystem.LockedError", "busy");
        assert_eq!(err.kind, DaemonErrorKind::Locked);
        assert_eq!(Error::from(err).severity(), Severity::Fatal);
    }

    #[test]
    fn access_denied_is_not_authorized() {
        let err = DaemonError::classify("org.baseurl.DnfSystem.AccessDeniedError", "org.baseurl.DnfSystem");
        assert_eq!(err.kind, DaemonErrorKind::NotAuthorized);
        assert!(err.is_fatal());
    }

    #[test]
    fn unresponsive_daemon_is_unreachable() {
        let err = DaemonError::classify("org.freedesktop.DBus.Error.NoReply", "Did not receive a reply");
        assert_eq!(err.kind, DaemonErrorKind::Unreachable);

        let err = DaemonError::classify("", "I/O error: Connection refused (os error 111)");
        assert_eq!(err.kind, DaemonErrorKind::Unreachable);
    }

    #[test]
    fn messages_do_not_decide_named_errors() {
        let err = DaemonError::classify(
            "org.baseurl.DnfSystem.Error",
            "Failed to download metadata for repo 'updates': Curl error (28): Timeout was reached",
        );
        assert_eq!(err.kind, DaemonErrorKind::Other);
        assert_eq!(Error::from(err).severity(), Severity::Recoverable);

        let err = DaemonError::classify("org.baseurl.DnfSystem.Error", "Status code: 401, Authorization required");
        assert_eq!(err.kind, DaemonErrorKind::Other);

        let err = DaemonError::classify("org.freedesktop.DBus.Error.Spawn.ChildExited", "exited with status 1");
        assert_eq!(err.kind, DaemonErrorKind::Unreachable);
    }

    #[test]
    fn other_daemon_errors_are_recoverable() {
        let err = DaemonError::classify("org.baseurl.DnfSystem.Error", "no such package");
        assert_eq!(err.kind, DaemonErrorKind::Other);
        assert_eq!(Error::from(err).severity(), Severity::Recoverable);
        assert_eq!(Error::Solve(vec![String::from("x")]).severity(), Severity::Recoverable);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Solve(vec![String::from("nothing provides foo"), String::from("conflict")]);
        assert_eq!(err.to_string(), "Dependency resolution failed: nothing provides foo; conflict");

        let err = Error::Protected(String::from("dnf"));
        assert_eq!(err.to_string(), "dnf is protected and cannot be removed");
    }
}
