//! Shared HTTP client.
//!
//! Wraps two `ureq` agents: a probe agent with a short global timeout for
//! HEAD and metadata calls, and a transfer agent with only a connect
//! timeout, since artifact bodies can legitimately stream for many minutes.
//! The transfer agent is bounded by the caller's cancellation token alone.

use crate::error::{status_kind, CacheError, CacheResult, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a HEAD request told us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    pub status: u16,
    pub accepts_ranges: bool,
    pub content_length: Option<u64>,
}

impl HeadInfo {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct HttpClient {
    probe: Agent,
    transfer: Agent,
    bearer: Arc<Vec<(String, String)>>,
    deny_network: bool,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("deny_network", &self.deny_network)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Build a client. Network access is denied inside test binaries until
    /// [`HttpClient::allow_network`] is called.
    pub fn new(head_timeout: Duration) -> Self {
        let probe = Agent::new_with_config(
            Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(head_timeout))
                .build(),
        );
        let transfer = Agent::new_with_config(
            Agent::config_builder()
                .http_status_as_error(false)
                .timeout_connect(Some(CONNECT_TIMEOUT))
                .build(),
        );
        Self {
            probe,
            transfer,
            bearer: Arc::new(Vec::new()),
            deny_network: super::is_test_binary(),
        }
    }

    /// Lift the test-binary network guard.
    pub fn allow_network(mut self) -> Self {
        self.deny_network = false;
        self
    }

    /// Send `token` as bearer auth to every request for `host`.
    pub fn with_bearer(mut self, host: impl Into<String>, token: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.bearer).push((host.into(), token.into()));
        self
    }

    pub fn network_denied(&self) -> bool {
        self.deny_network
    }

    fn guard(&self, url: &str) -> CacheResult<()> {
        if self.deny_network {
            return Err(CacheError::UnmockedDownload {
                url: url.to_string(),
            });
        }
        Ok(())
    }

    fn bearer_for(&self, url: &str) -> Option<&str> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        self.bearer
            .iter()
            .find(|(h, _)| *h == host)
            .map(|(_, t)| t.as_str())
    }

    /// Issue a HEAD request. Non-success statuses are returned, not raised.
    pub fn head_blocking(&self, url: &str) -> CacheResult<HeadInfo> {
        self.guard(url)?;
        let mut req = self.probe.head(url);
        if let Some(token) = self.bearer_for(url) {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req.call().map_err(|e| CacheError::transport(url, e))?;
        let info = head_info(&resp);
        debug!(
            "HEAD {} -> {} (ranges: {}, length: {:?})",
            url, info.status, info.accepts_ranges, info.content_length
        );
        Ok(info)
    }

    /// GET a small text document, failing on any non-200 status.
    pub fn get_text_blocking(&self, url: &str, extra_headers: &[(&str, &str)]) -> CacheResult<String> {
        self.guard(url)?;
        let mut req = self.probe.get(url);
        if let Some(token) = self.bearer_for(url) {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        for (k, v) in extra_headers {
            req = req.header(*k, *v);
        }
        let mut resp = req.call().map_err(|e| CacheError::transport(url, e))?;
        let code = resp.status().as_u16();
        if code != 200 {
            return Err(CacheError::BadStatus {
                url: url.to_string(),
                code,
            });
        }
        resp.body_mut()
            .read_to_string()
            .map_err(|e| CacheError::transport(url, e))
    }

    /// Start a GET, optionally from byte `range_start`.
    pub fn get_blocking(&self, url: &str, range_start: Option<u64>) -> CacheResult<Response<Body>> {
        self.guard(url)?;
        let mut req = self.transfer.get(url);
        if let Some(token) = self.bearer_for(url) {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(start) = range_start {
            req = req.header("Range", format!("bytes={start}-"));
        }
        req.call().map_err(|e| CacheError::transport(url, e))
    }

    pub async fn head(&self, url: &str, cancel: &CancellationToken) -> CacheResult<HeadInfo> {
        let client = self.clone();
        let owned = url.to_string();
        run_blocking(cancel, move || client.head_blocking(&owned)).await
    }

    /// Start a GET off the runtime. Cancellation returns immediately, even
    /// while the server has not answered yet.
    pub async fn get(
        &self,
        url: &str,
        range_start: Option<u64>,
        cancel: &CancellationToken,
    ) -> CacheResult<Response<Body>> {
        let client = self.clone();
        let owned = url.to_string();
        run_blocking(cancel, move || client.get_blocking(&owned, range_start)).await
    }

    pub async fn get_text(
        &self,
        url: &str,
        extra_headers: Vec<(String, String)>,
        cancel: &CancellationToken,
    ) -> CacheResult<String> {
        let client = self.clone();
        let owned = url.to_string();
        run_blocking(cancel, move || {
            let headers: Vec<(&str, &str)> = extra_headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            client.get_text_blocking(&owned, &headers)
        })
        .await
    }
}

/// Error for an unexpected status on `url`.
pub fn status_error(url: &str, code: u16) -> CacheError {
    match status_kind(code) {
        ErrorKind::NotFound => CacheError::NotFound(url.to_string()),
        ErrorKind::AuthRequired => CacheError::AuthRequired {
            target: url.to_string(),
            reason: format!("server answered {code}"),
        },
        _ => CacheError::BadStatus {
            url: url.to_string(),
            code,
        },
    }
}

pub(crate) fn head_info(resp: &Response<Body>) -> HeadInfo {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };
    HeadInfo {
        status: resp.status().as_u16(),
        accepts_ranges: header("accept-ranges").is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
        content_length: header("content-length").and_then(|v| v.parse().ok()),
    }
}

/// Run blocking network work on a detached thread, abandoning it on cancel.
///
/// The thread is not part of the runtime's blocking pool: a socket that
/// never answers keeps only that thread alive, and runtime shutdown does
/// not wait for it.
pub(crate) async fn run_blocking<T, F>(cancel: &CancellationToken, f: F) -> CacheResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CacheResult<T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("minicache-net".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| CacheError::io("spawning network thread", e))?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        res = rx => res.map_err(|_| CacheError::Internal("network thread exited early".to_string()))?,
    }
}
