use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::cli::TlsMode;
use crate::config::DownloaderConfig;
use crate::error::TransportError;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Enabled,
    Disabled,
}

/// An open response body plus what the server told us about it.
pub struct StreamHandle {
    /// `Content-Length` as advertised. `None` when the server did not say.
    pub total_size: Option<u64>,
    /// False when the body was obtained with certificate checks turned off.
    pub verified: bool,
    pub body: ByteStream,
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("total_size", &self.total_size)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

/// Something that can answer a streaming GET.
///
/// Implementations must report a failed certificate check as
/// [`TransportError::Certificate`] so the client can decide on a fallback.
#[async_trait]
pub trait HttpSource: Send + Sync + 'static {
    async fn get(&self, url: &Url, verification: Verification)
        -> Result<StreamHandle, TransportError>;
}

/// Streaming GET with at most one retry, and only after a certificate failure.
pub struct TransportClient<S> {
    source: S,
    tls_mode: TlsMode,
}

impl<S: HttpSource> TransportClient<S> {
    pub fn new(source: S, tls_mode: TlsMode) -> Self {
        Self { source, tls_mode }
    }

    pub async fn fetch_stream(&self, url: &Url) -> Result<StreamHandle, TransportError> {
        match self.source.get(url, Verification::Enabled).await {
            Err(err) if err.is_certificate() && self.tls_mode == TlsMode::Fallback => {
                warn!(
                    %url,
                    error = %err,
                    "certificate verification failed, retrying without verification"
                );
                let handle = self.source.get(url, Verification::Disabled).await?;
                debug!(%url, total_size = ?handle.total_size, "unverified stream opened");
                Ok(handle)
            }
            other => other,
        }
    }
}

pub struct ReqwestSource {
    secure: Client,
    insecure: Option<Client>,
}

impl ReqwestSource {
    /// The unverified client only exists when the config allows the fallback.
    pub fn new(config: &DownloaderConfig) -> reqwest::Result<Self> {
        let builder = || {
            Client::builder()
                .user_agent(config.user_agent.as_str())
                .connect_timeout(config.connect_timeout)
        };

        let secure = builder().build()?;
        let insecure = match config.tls_mode {
            TlsMode::Fallback => Some(builder().danger_accept_invalid_certs(true).build()?),
            TlsMode::Strict => None,
        };

        Ok(Self { secure, insecure })
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get(
        &self,
        url: &Url,
        verification: Verification,
    ) -> Result<StreamHandle, TransportError> {
        let client = match verification {
            Verification::Enabled => &self.secure,
            Verification::Disabled => {
                self.insecure
                    .as_ref()
                    .ok_or_else(|| TransportError::Request {
                        url: url.to_string(),
                        source: "certificate verification is required in strict mode".into(),
                    })?
            }
        };

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| classify(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(StreamHandle {
            total_size: response.content_length(),
            verified: verification == Verification::Enabled,
            body: response
                .bytes_stream()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
                .boxed(),
        })
    }
}

fn classify(url: &Url, err: reqwest::Error) -> TransportError {
    // The top-level message repeats the request URL, so only causes are inspected.
    let certificate = std::error::Error::source(&err).map_or(false, is_certificate_error);
    if certificate {
        TransportError::Certificate {
            url: url.to_string(),
            source: Box::new(err),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            source: Box::new(err),
        }
    }
}

/// Walks the error chain looking for a TLS certificate rejection.
///
/// The TLS backends only expose these failures as nested, type-erased errors,
/// so the check is done on their rendered messages.
pub fn is_certificate_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        let message = err.to_string().to_ascii_lowercase();
        if message.contains("certificate") || message.contains("unknownissuer") {
            return true;
        }
        current = err.source();
    }
    false
}

/// Accepts absolute `http`/`https` URLs with a host.
pub fn parse_url(raw: &str) -> Result<Url, TransportError> {
    let raw = raw.trim();
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("empty".to_string()));
    }

    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(invalid(format!("unsupported scheme '{}'", scheme))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}
