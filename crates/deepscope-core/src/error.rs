// Error taxonomy for the analysis core
//
// Every failure that leaves the core is one of these variants, and every
// variant maps to exactly one (category, code) pair. The request boundary
// uses the classification to build transport-visible errors; nothing else
// is allowed to invent error shapes.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for analysis core operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised by the analysis core
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Session id is unknown or the session has been garbage collected
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Another operation currently holds the session lock
    #[error("session is locked by another operation: {0}")]
    SessionLocked(Uuid),

    /// Session exceeded its idle timeout
    #[error("session timed out: {0}")]
    SessionTimeout(Uuid),

    /// Remote service rejected our credentials
    #[error("remote authentication failed: {0}")]
    ApiAuth(String),

    /// Remote service throttled the request
    #[error("remote rate limit hit: {0}")]
    RateLimit(String),

    /// Remote response could not be parsed into the expected shape
    #[error("failed to parse remote response: {0}")]
    ApiParse(String),

    /// Resolved path escapes the project root
    #[error("path escapes project root: {0}")]
    PathTraversal(String),

    /// File extension is not on the allow-list
    #[error("file type not allowed: {0}")]
    InvalidFileType(String),

    /// Regular file exceeds the size cap
    #[error("file too large: {path} ({size} bytes)")]
    FileTooLarge { path: String, size: u64 },

    /// Path exists but is not a regular file
    #[error("not a regular file: {0}")]
    NotAFile(String),

    /// Any other filesystem failure
    #[error("filesystem error on {path}: {message}")]
    Fs { path: String, message: String },

    /// Anything that does not fit the closed taxonomy
    #[error("unexpected error: {0}")]
    Unknown(String),

    /// Internal error wrapper
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AnalysisError {
    /// Create a filesystem error
    pub fn fs(path: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Fs {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        AnalysisError::ApiParse(msg.into())
    }

    /// Create an unknown error
    pub fn unknown(msg: impl Into<String>) -> Self {
        AnalysisError::Unknown(msg.into())
    }

    /// Map a heterogeneous third-party error message onto the taxonomy by
    /// substring heuristics. Used for reqwest / io / serde errors whose
    /// structure we do not control.
    pub fn from_foreign(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota")
            || lower.contains("timed out")
            || lower.contains("timeout")
        {
            AnalysisError::RateLimit(message)
        } else if lower.contains("unauthorized")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("permission")
        {
            AnalysisError::ApiAuth(message)
        } else if lower.contains("json")
            || lower.contains("parse")
            || lower.contains("deserialize")
        {
            AnalysisError::ApiParse(message)
        } else if lower.contains("no such file")
            || lower.contains("not found")
            || lower.contains("denied")
        {
            AnalysisError::fs("<unknown>", message)
        } else {
            AnalysisError::Unknown(message)
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Category of a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Session,
    Api,
    Filesystem,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Api => write!(f, "api"),
            ErrorCategory::Filesystem => write!(f, "filesystem"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classified view of an [`AnalysisError`]: category, stable code,
/// retryability, and caller-facing next steps.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub code: &'static str,
    pub description: String,
    pub retryable: bool,
    pub next_steps: Vec<&'static str>,
}

impl ClassifiedError {
    /// Reconstruct an [`AnalysisError`] carrying the same code.
    ///
    /// Classification is idempotent: `classify(&c.as_error()).code == c.code`.
    pub fn as_error(&self) -> AnalysisError {
        match self.code {
            "SESSION_NOT_FOUND" => AnalysisError::SessionNotFound(Uuid::nil()),
            "SESSION_LOCKED" => AnalysisError::SessionLocked(Uuid::nil()),
            "SESSION_TIMEOUT" => AnalysisError::SessionTimeout(Uuid::nil()),
            "API_AUTH_ERROR" => AnalysisError::ApiAuth(self.description.clone()),
            "RATE_LIMIT_ERROR" => AnalysisError::RateLimit(self.description.clone()),
            "API_PARSE_ERROR" => AnalysisError::ApiParse(self.description.clone()),
            "PATH_TRAVERSAL" => AnalysisError::PathTraversal(self.description.clone()),
            "INVALID_FILE_TYPE" => AnalysisError::InvalidFileType(self.description.clone()),
            "FILE_TOO_LARGE" => AnalysisError::FileTooLarge {
                path: self.description.clone(),
                size: 0,
            },
            "NOT_A_FILE" => AnalysisError::NotAFile(self.description.clone()),
            "FS_ERROR" => AnalysisError::fs("<unknown>", self.description.clone()),
            _ => AnalysisError::Unknown(self.description.clone()),
        }
    }
}

/// Map an error onto the closed taxonomy.
///
/// Each variant classifies to exactly one code. Retryability: only
/// SESSION_LOCKED and RATE_LIMIT_ERROR may be retried by the caller.
pub fn classify(err: &AnalysisError) -> ClassifiedError {
    let (category, code, retryable, next_steps): (_, _, _, &[&'static str]) = match err {
        AnalysisError::SessionNotFound(_) => (
            ErrorCategory::Session,
            "SESSION_NOT_FOUND",
            false,
            &[
                "Check that the session id is correct",
                "Start a new conversation with start_conversation",
                "Sessions are deleted 30 minutes after their last activity",
            ],
        ),
        AnalysisError::SessionLocked(_) => (
            ErrorCategory::Session,
            "SESSION_LOCKED",
            true,
            &[
                "Another operation is using this session",
                "Retry after the current operation completes",
                "Use get_conversation_status to watch for the lock to clear",
            ],
        ),
        AnalysisError::SessionTimeout(_) => (
            ErrorCategory::Session,
            "SESSION_TIMEOUT",
            false,
            &[
                "The session was idle for longer than 30 minutes",
                "Start a new conversation with start_conversation",
            ],
        ),
        AnalysisError::ApiAuth(_) => (
            ErrorCategory::Api,
            "API_AUTH_ERROR",
            false,
            &[
                "Check that GEMINI_API_KEY is set and valid",
                "Verify the key has access to the configured model",
            ],
        ),
        AnalysisError::RateLimit(_) => (
            ErrorCategory::Api,
            "RATE_LIMIT_ERROR",
            true,
            &[
                "Wait before retrying",
                "Reduce tournament parallelism to lower request volume",
                "Check your API quota",
            ],
        ),
        AnalysisError::ApiParse(_) => (
            ErrorCategory::Api,
            "API_PARSE_ERROR",
            false,
            &[
                "The remote response did not match the expected shape",
                "Retry the operation once; persistent failures indicate a model change",
            ],
        ),
        AnalysisError::PathTraversal(_) => (
            ErrorCategory::Filesystem,
            "PATH_TRAVERSAL",
            false,
            &[
                "Use paths relative to the project root",
                "Remove any .. segments from the path",
            ],
        ),
        AnalysisError::InvalidFileType(_) => (
            ErrorCategory::Filesystem,
            "INVALID_FILE_TYPE",
            false,
            &["Only source, config, and documentation files can be read"],
        ),
        AnalysisError::FileTooLarge { .. } => (
            ErrorCategory::Filesystem,
            "FILE_TOO_LARGE",
            false,
            &[
                "Files larger than 10 MiB cannot be analyzed",
                "Point the analysis at specific smaller files instead",
            ],
        ),
        AnalysisError::NotAFile(_) => (
            ErrorCategory::Filesystem,
            "NOT_A_FILE",
            false,
            &["The path must refer to a regular file, not a directory or special file"],
        ),
        AnalysisError::Fs { .. } => (
            ErrorCategory::Filesystem,
            "FS_ERROR",
            false,
            &[
                "Check that the file exists and is readable",
                "Check filesystem permissions",
            ],
        ),
        AnalysisError::Unknown(_) | AnalysisError::Internal(_) => (
            ErrorCategory::Unknown,
            "UNKNOWN_ERROR",
            false,
            &[
                "This failure does not match a known condition",
                "Check the server logs for details",
            ],
        ),
    };

    ClassifiedError {
        category,
        code,
        description: err.to_string(),
        retryable,
        next_steps: next_steps.to_vec(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_locked_is_retryable() {
        let c = classify(&AnalysisError::SessionLocked(Uuid::nil()));
        assert_eq!(c.category, ErrorCategory::Session);
        assert_eq!(c.code, "SESSION_LOCKED");
        assert!(c.retryable);
    }

    #[test]
    fn rate_limit_is_retryable() {
        let c = classify(&AnalysisError::RateLimit("429".into()));
        assert_eq!(c.code, "RATE_LIMIT_ERROR");
        assert!(c.retryable);
    }

    #[test]
    fn path_errors_are_not_retryable() {
        for err in [
            AnalysisError::PathTraversal("../x".into()),
            AnalysisError::InvalidFileType("a.exe".into()),
            AnalysisError::FileTooLarge {
                path: "big".into(),
                size: 11 << 20,
            },
        ] {
            let c = classify(&err);
            assert_eq!(c.category, ErrorCategory::Filesystem);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn classification_is_idempotent() {
        let errors = [
            AnalysisError::SessionNotFound(Uuid::nil()),
            AnalysisError::SessionLocked(Uuid::nil()),
            AnalysisError::SessionTimeout(Uuid::nil()),
            AnalysisError::ApiAuth("k".into()),
            AnalysisError::RateLimit("r".into()),
            AnalysisError::ApiParse("p".into()),
            AnalysisError::PathTraversal("t".into()),
            AnalysisError::InvalidFileType("f".into()),
            AnalysisError::FileTooLarge {
                path: "p".into(),
                size: 1,
            },
            AnalysisError::NotAFile("n".into()),
            AnalysisError::fs("p", "m"),
            AnalysisError::Unknown("u".into()),
        ];
        for err in errors {
            let first = classify(&err);
            let second = classify(&first.as_error());
            assert_eq!(first.code, second.code);
            assert_eq!(first.category, second.category);
            assert_eq!(first.retryable, second.retryable);
        }
    }

    #[test]
    fn foreign_rate_limit_detected() {
        let err = AnalysisError::from_foreign("HTTP 429 Too Many Requests");
        assert_eq!(classify(&err).code, "RATE_LIMIT_ERROR");
    }

    #[test]
    fn foreign_auth_detected() {
        let err = AnalysisError::from_foreign("401 Unauthorized: bad API key");
        assert_eq!(classify(&err).code, "API_AUTH_ERROR");
    }

    #[test]
    fn foreign_timeout_is_retryable() {
        let err = AnalysisError::from_foreign("request timed out after 30s");
        assert!(classify(&err).retryable);
    }

    #[test]
    fn next_steps_capped_at_four() {
        for err in [
            AnalysisError::SessionNotFound(Uuid::nil()),
            AnalysisError::RateLimit("r".into()),
            AnalysisError::Unknown("u".into()),
        ] {
            assert!(classify(&err).next_steps.len() <= 4);
        }
    }
}
