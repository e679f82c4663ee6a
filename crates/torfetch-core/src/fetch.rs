//! Fetch client: one anonymized HTTP GET per work item.
//!
//! The `Fetcher` trait is the seam between the queue driver and the network;
//! production uses `TorFetcher` (curl through the route's SOCKS proxy),
//! tests inject a scripted implementation. The client never retries; retry
//! policy belongs to the driver.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::circuit::{self, EgressConfig};

/// Response code recorded for local-evidence hits.
pub const HTTP_OK: u16 = 200;

/// True for the 2xx/3xx "ok" family. With redirects followed, terminal codes
/// are 2xx in practice.
pub fn is_ok_code(code: u16) -> bool {
    (200..400).contains(&code)
}

/// Result of one fetch attempt, classified for the driver:
/// transport-level failure, completed-but-not-ok response, or success.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Completed response in the ok family, body fully buffered.
    Ok { code: u16, body: Vec<u8> },
    /// Completed response with a non-ok status. No body kept.
    HttpError { code: u16 },
    /// Timeout, connection reset, or circuit/rotation failure.
    Transport { reason: String },
}

/// One GET with a bounded timeout. Implementations must not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome;
}

/// Production fetcher: curl GET through `socks5h://<host>:<route>`, with a
/// fresh circuit requested every `rotate_after` fetches.
pub struct TorFetcher {
    egress: EgressConfig,
    proxy: String,
    fetches: AtomicU32,
}

impl TorFetcher {
    pub fn new(route: u16, egress: EgressConfig) -> Self {
        let proxy = circuit::proxy_url(&egress, route);
        Self {
            egress,
            proxy,
            fetches: AtomicU32::new(0),
        }
    }

    /// True when this fetch should be preceded by an identity rotation.
    fn due_for_rotation(&self) -> bool {
        let n = self.fetches.fetch_add(1, Ordering::Relaxed);
        self.egress.rotate_after > 0 && n > 0 && n % self.egress.rotate_after == 0
    }
}

#[async_trait]
impl Fetcher for TorFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome {
        let rotate = self.due_for_rotation();
        let egress = self.egress.clone();
        let proxy = self.proxy.clone();
        let url = url.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            if rotate {
                if let Err(e) = circuit::rotate_identity(&egress) {
                    tracing::warn!("identity rotation failed: {:#}", e);
                    return FetchOutcome::Transport {
                        reason: format!("identity rotation failed: {:#}", e),
                    };
                }
                tracing::debug!("rotated egress identity");
            }
            match perform_get(&url, &proxy, timeout) {
                Ok(outcome) => outcome,
                Err(e) => FetchOutcome::Transport {
                    reason: e.to_string(),
                },
            }
        })
        .await;

        match joined {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::Transport {
                reason: format!("fetch task join: {}", e),
            },
        }
    }
}

/// Blocking GET via a fresh curl handle. Curl-level failures (timeout, DNS,
/// proxy, reset) surface as `Err`; completed responses are classified by
/// status code.
fn perform_get(url: &str, proxy: &str, timeout: Duration) -> Result<FetchOutcome, curl::Error> {
    let mut body: Vec<u8> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.proxy(proxy)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(timeout)?;
    easy.timeout(timeout)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()? as u16;
    if is_ok_code(code) {
        Ok(FetchOutcome::Ok { code, body })
    } else {
        Ok(FetchOutcome::HttpError { code })
    }
}
