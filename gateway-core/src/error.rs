use thiserror::Error;

/// Errors produced by a provider adapter or the client/dispatcher.
///
/// Adapter errors bubble up unaltered through the client: the client never
/// masks an upstream failure with a partial result, so a single failed
/// per-address fetch fails the whole transaction query.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `chain_id` is not present in the static chain registry or routing
    /// table.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    /// The upstream responded with a non-2xx status. Retryable for 5xx/429;
    /// surfaces to the caller after retries are exhausted.
    #[error("upstream HTTP error: status {0}")]
    UpstreamHttpError(u16),

    /// The upstream was reachable but its response body could not be
    /// decoded into the shape this adapter expects. Non-retryable.
    #[error("upstream decode error: {0}")]
    UpstreamDecodeError(String),

    /// The upstream rejected the request as rate-limited (HTTP 429).
    /// Treated as retryable.
    #[error("upstream rate limited")]
    UpstreamRateLimited,

    /// A request-level argument was invalid (bad heights, unrecognized
    /// address format, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The enclosing request was cancelled before completion; no response
    /// should be returned to the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The underlying HTTP transport failed outside of a well-formed
    /// upstream response (DNS, TCP, TLS).
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Per §5/§7: only non-2xx HTTP and network-transport failures are
    /// retryable. Decode errors, unsupported chains, and bad arguments are
    /// not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamHttpError(status) if is_retryable_status(*status)
        ) || matches!(
            self,
            GatewayError::UpstreamRateLimited | GatewayError::Transport(_)
        )
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Result alias used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_matches_spec() {
        assert!(GatewayError::UpstreamHttpError(503).is_retryable());
        assert!(GatewayError::UpstreamHttpError(429).is_retryable());
        assert!(!GatewayError::UpstreamHttpError(404).is_retryable());
        assert!(GatewayError::UpstreamRateLimited.is_retryable());
        assert!(!GatewayError::UpstreamDecodeError("bad json".into()).is_retryable());
        assert!(!GatewayError::UnsupportedChain("x".into()).is_retryable());
    }
}
