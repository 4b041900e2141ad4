pub mod discord;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Missing permissions: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited{}", .retry_after.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    RateLimited { retry_after: Option<f64> },
    #[error("Content too long: {actual_length} characters (max: {max_length})")]
    ContentTooLong { max_length: usize, actual_length: usize },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error{}: {message}", .code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    ApiError { code: Option<String>, message: String },
    #[error("Interaction already answered")]
    AlreadyResponded,
    #[error("Channel not configured")]
    NotConfigured,
}

impl ChannelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::ApiError {
                code: None,
                message: e.to_string(),
            }
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let err = ChannelError::RateLimited {
            retry_after: Some(1.5),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 1.5 seconds");
        assert!(err.is_rate_limited());
        assert_eq!(
            ChannelError::RateLimited { retry_after: None }.to_string(),
            "Rate limited"
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = ChannelError::ApiError {
            code: Some("400 Bad Request".to_string()),
            message: "Invalid Form Body".to_string(),
        };
        assert_eq!(err.to_string(), "API error [400 Bad Request]: Invalid Form Body");
        let err = ChannelError::ApiError {
            code: None,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error: boom");
    }
}
