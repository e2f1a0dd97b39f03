use miette::Diagnostic;
use thiserror::Error;

/// Status reported for requests refused because the network is disabled.
pub const NETWORK_DISABLED_STATUS: u16 = 499;

#[derive(Error, Diagnostic, Debug)]
pub enum JobError {
    #[error("Transport failure for {url}: {message}")]
    #[diagnostic(
        code(depot_dl::transport),
        help("Check your internet connection or try again later")
    )]
    Transport { url: String, message: String },

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(depot_dl::http_error))]
    Http { status: u16, url: String },

    #[error("HTTP 499: network disabled, refusing to fetch {url}")]
    #[diagnostic(
        code(depot_dl::network_disabled),
        help("Unset DEPOT_DISABLE_NETWORK to allow network access")
    )]
    NetworkDisabled { url: String },

    #[error("Timed out: {target}")]
    #[diagnostic(code(depot_dl::timeout))]
    Timeout { target: String },

    #[error("Response from {url} exceeds the size limit of {limit} bytes")]
    #[diagnostic(code(depot_dl::too_large))]
    TooLarge { url: String, limit: u64 },

    #[error("Job {id} was cancelled")]
    #[diagnostic(code(depot_dl::cancelled))]
    Cancelled { id: u64 },

    #[error("Job {id} has not settled yet")]
    #[diagnostic(code(depot_dl::not_settled))]
    NotSettled { id: u64 },

    #[error("Asynchronous jobs are not enabled on this scheduler")]
    #[diagnostic(
        code(depot_dl::async_disabled),
        help("Call enable_async() or construct a Loop over the scheduler first")
    )]
    AsyncDisabled,

    #[error("Failed to {action}")]
    #[diagnostic(code(depot_dl::io))]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{command}'")]
    #[diagnostic(code(depot_dl::spawn), help("Check that the program is installed and on PATH"))]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::NetworkDisabled { .. } => Some(NETWORK_DISABLED_STATUS),
            _ => None,
        }
    }

    /// Whether the failure is transient (server side errors, timeouts,
    /// transport failures and the network-disabled status).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::NetworkDisabled { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == NETWORK_DISABLED_STATUS,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = JobError::Http {
            status: 404,
            url: "https://repo.test/p2/a/b.json".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("https://repo.test/p2/a/b.json"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_statuses() {
        let server = JobError::Http {
            status: 503,
            url: "u".into(),
        };
        assert!(server.is_retryable());

        let disabled = JobError::NetworkDisabled { url: "u".into() };
        assert!(disabled.is_retryable());
        assert_eq!(disabled.status(), Some(499));

        let forbidden = JobError::Http {
            status: 403,
            url: "u".into(),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn test_cancelled() {
        let err = JobError::Cancelled { id: 7 };
        assert!(err.is_cancelled());
        assert_eq!(err.status(), None);
    }
}
