use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::month::SnapshotMonth;

use super::locator::SourceRef;

/// Status code and body of a single HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    /// Timeouts and connection failures are worth retrying
    pub transient: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// One-shot HTTP access, without retries. Retrying is the fetcher's job.
pub trait Transport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
    fn head(&self, url: &str) -> Result<u16, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        (**self).get(url)
    }

    fn head(&self, url: &str) -> Result<u16, TransportError> {
        (**self).head(url)
    }
}

/// Blocking reqwest transport with a bounded per-request timeout
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        Self::new(&config.user_agent, config.request_timeout)
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    let transient = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
    TransportError {
        message: err.to_string(),
        transient,
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify)?;
        Ok(HttpResponse { status, body })
    }

    fn head(&self, url: &str) -> Result<u16, TransportError> {
        let response = self.client.head(url).send().map_err(classify)?;
        Ok(response.status().as_u16())
    }
}

/// Raw payload of one upstream resource, discarded after parsing
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub source: String,
    pub month: SnapshotMonth,
    pub format: String,
    pub body: String,
}

/// Retrieves snapshots with bounded exponential-backoff retries
pub struct SnapshotFetcher<T> {
    transport: T,
    config: PipelineConfig,
}

impl<T: Transport> SnapshotFetcher<T> {
    pub fn new(transport: T, config: PipelineConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// GET a resource body
    pub fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let body = self.send(url, |t| t.get(url).map(|r| (r.status, r.body)))?;
        debug!(url, size = %format_bytes(body.len() as u64), "fetched");
        Ok(body)
    }

    /// HEAD probe; `Ok(false)` for a definitive 404
    pub fn exists(&self, url: &str) -> Result<bool, FetchError> {
        match self.send(url, |t| t.head(url).map(|s| (s, ()))) {
            Ok(()) => Ok(true),
            Err(FetchError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// File names linked from a directory index page.
    ///
    /// `Ok(None)` when the server answers without a usable index. A 404 on
    /// the directory and exhausted transport retries are passed through.
    pub fn list_directory(&self, url: &str) -> Result<Option<Vec<String>>, FetchError> {
        match self.fetch(url) {
            Ok(html) => {
                let names = parse_index_links(&html);
                Ok((!names.is_empty()).then_some(names))
            }
            Err(e @ (FetchError::NotFound(_) | FetchError::Transport { .. })) => Err(e),
            Err(e) => {
                debug!(url, error = %e, "directory index unavailable");
                Ok(None)
            }
        }
    }

    pub fn fetch_detail(&self, source: &SourceRef) -> Result<RawSnapshot, FetchError> {
        let body = self.fetch(&source.detail_url)?;
        info!(url = %source.detail_url, size = %format_bytes(body.len() as u64), "downloaded detailed listing");
        Ok(RawSnapshot {
            source: source.detail_url.clone(),
            month: source.month,
            format: source.format.clone(),
            body,
        })
    }

    /// The ranking listing is optional; a missing file is `Ok(None)`
    pub fn fetch_ranking(&self, source: &SourceRef) -> Result<Option<RawSnapshot>, FetchError> {
        match self.fetch(&source.ranking_url) {
            Ok(body) => Ok(Some(RawSnapshot {
                source: source.ranking_url.clone(),
                month: source.month,
                format: source.format.clone(),
                body,
            })),
            Err(FetchError::NotFound(url)) => {
                debug!(url = %url, "no ranking listing, using detailed listing usage");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send<R>(
        &self,
        url: &str,
        mut op: impl FnMut(&T) -> Result<(u16, R), TransportError>,
    ) -> Result<R, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let failure = match op(&self.transport) {
                Ok((status, value)) if (200..300).contains(&status) => return Ok(value),
                Ok((404 | 410, _)) => return Err(FetchError::NotFound(url.to_string())),
                Ok((status, _)) if status == 429 || status >= 500 => format!("HTTP {}", status),
                Ok((status, _)) => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status,
                    })
                }
                Err(e) if e.transient => e.message,
                Err(e) => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        attempts: attempt,
                        message: e.message,
                    })
                }
            };

            if attempt > self.config.max_retries {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }

            let delay = self.config.backoff_for(attempt);
            warn!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient fetch failure, retrying"
            );
            std::thread::sleep(delay);
        }
    }
}

/// Extract the last path segment of every `href` in an index page
fn parse_index_links(html: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = html;

    while let Some(start) = rest.find("href=\"") {
        rest = &rest[start + 6..];
        let Some(end) = rest.find('"') else { break };
        let target = rest[..end].trim_end_matches('/');
        if let Some(name) = target.rsplit('/').next() {
            if !name.is_empty() && !name.starts_with('?') && name != ".." {
                names.push(name.to_string());
            }
        }
        rest = &rest[end..];
    }

    names
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}
