//! Shared outbound HTTP plumbing: one underlying [`reqwest::Client`] per
//! adapter, wrapped with the retry discipline from §5/§7 of the design --
//! exponential backoff, factor 2, max 3 attempts, retrying only transient
//! failure classes. Decode errors are never retried.
//!
//! This generalizes the naive-backoff shape of `RetryingProvider` from the
//! Ethereum JSON-RPC world to plain REST/JSON: the matcher closure decides
//! accept/retry/halt per response, exactly as there, but the transport below
//! it is `reqwest` instead of a `JsonRpcClient`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use gateway_core::{GatewayError, GatewayResult};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// An HTTP client with a simple exponential backoff built in, shared by all
/// adapters that speak a plain JSON REST API.
#[derive(Debug, Clone)]
pub struct RetryingHttpClient {
    inner: reqwest::Client,
}

impl Default for RetryingHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryingHttpClient {
    /// Build a client with sane connect/read timeouts for upstream explorer
    /// APIs.
    pub fn new() -> Self {
        let inner = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("static reqwest client config is valid");
        Self { inner }
    }

    /// GET `url` with `query`, decoding the response body as JSON.
    ///
    /// Non-2xx responses and network-transport failures are retried up to
    /// [`MAX_ATTEMPTS`] times with `BASE_BACKOFF_MS * 2^attempt` backoff;
    /// decode failures are returned immediately without retry.
    #[tracing::instrument(level = "debug", skip(self, query), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let mut attempt: u32 = 1;
        loop {
            let backoff_ms = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
            debug!(attempt, "dispatching upstream request");

            let result = self.inner.get(url).query(query).send().await;

            match classify(result).await {
                Outcome::Accept(body) => {
                    return serde_json::from_str(&body).map_err(|e| {
                        GatewayError::UpstreamDecodeError(format!("{e}: body={body:.200}"))
                    });
                }
                Outcome::Retry(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        warn!(attempt, error = %err, "upstream request exhausted retries");
                        return Err(err);
                    }
                    trace!(backoff_ms, attempt, error = %err, "retrying upstream request");
                    sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Outcome::Halt(err) => return Err(err),
            }
        }
    }
}

enum Outcome {
    Accept(String),
    Retry(GatewayError),
    Halt(GatewayError),
}

async fn classify(result: Result<reqwest::Response, reqwest::Error>) -> Outcome {
    match result {
        Ok(resp) => {
            let status = resp.status();
            if status.as_u16() == 429 {
                return Outcome::Retry(GatewayError::UpstreamRateLimited);
            }
            if status.is_server_error() {
                return Outcome::Retry(GatewayError::UpstreamHttpError(status.as_u16()));
            }
            if !status.is_success() {
                return Outcome::Halt(GatewayError::UpstreamHttpError(status.as_u16()));
            }
            match resp.text().await {
                Ok(body) => Outcome::Accept(body),
                Err(e) => Outcome::Retry(GatewayError::Transport(e.to_string())),
            }
        }
        Err(e) if e.is_timeout() || e.is_connect() => {
            Outcome::Retry(GatewayError::Transport(e.to_string()))
        }
        Err(e) => Outcome::Halt(GatewayError::Transport(e.to_string())),
    }
}

/// A per-provider concurrency gate, mirroring the source's
/// `asyncio.Semaphore` usage: every outbound request for a given upstream
/// acquires a permit before dispatching and releases it when the response
/// (or error) comes back.
#[derive(Debug)]
pub struct Gate {
    semaphore: Semaphore,
}

impl Gate {
    /// A gate that admits at most `permits` concurrent requests. `None`
    /// means unbounded (Tezos, BitGo).
    pub fn new(permits: Option<usize>) -> Self {
        Self {
            semaphore: Semaphore::new(permits.unwrap_or(Semaphore::MAX_PERMITS)),
        }
    }

    /// Run `fut` once a permit is available, releasing it when `fut`
    /// completes (success or failure) so cancellation never leaks a held
    /// permit.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_serializes_access_under_its_permit_count() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let gate = Arc::new(Gate::new(Some(1)));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let gate = gate.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                gate.run(async {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
