use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Network,
    Http,
    Parse,
    NotFound,
}

/// Failure talking to the note store.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(e: impl std::fmt::Display) -> Self {
        Self::new(ApiErrorKind::Network, e.to_string())
    }

    pub fn parse(e: impl std::fmt::Display) -> Self {
        Self::new(ApiErrorKind::Parse, e.to_string())
    }

    pub fn unauthorized() -> Self {
        Self::new(ApiErrorKind::Unauthorized, "Unauthorized")
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ApiErrorKind::NotFound, format!("{what} not found"))
    }

    pub fn http(status: u16, body: String, ctx: &str) -> Self {
        Self::new(ApiErrorKind::Http, format!("{ctx} ({status}): {body}"))
    }

    /// Whether a later attempt with the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Network | ApiErrorKind::Http)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Cross-tab channel failures. Never fatal; the bridge logs and drops.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to encode bridge event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed bridge payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("bridge transport unavailable: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ApiError::network("offline").is_retryable());
        assert!(ApiError::http(503, "busy".to_string(), "Save failed").is_retryable());
        assert!(!ApiError::unauthorized().is_retryable());
        assert!(!ApiError::parse("bad json").is_retryable());
        assert!(!ApiError::not_found("note n-1").is_retryable());
    }

    #[test]
    fn test_http_error_message_includes_context() {
        let e = ApiError::http(500, "boom".to_string(), "Update note failed");
        assert_eq!(e.to_string(), "Update note failed (500): boom");
        assert_eq!(e.kind, ApiErrorKind::Http);
    }
}
