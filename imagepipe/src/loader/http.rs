//! HTTP data loader built on reqwest.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::StatusCode;
use tracing::{debug, trace, warn};

use super::{DataLoader, DataRequest, LoadEvent};
use crate::error::DataLoadError;

/// User agent sent by the default loader.
pub const DEFAULT_USER_AGENT: &str = concat!("imagepipe/", env!("CARGO_PKG_VERSION"));

/// Settings for [`HttpDataLoader`].
#[derive(Debug, Clone)]
pub struct HttpLoaderConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            pool_max_idle_per_host: 16,
        }
    }
}

/// Streams response bodies chunk by chunk.
///
/// Partial downloads are resumed with `Range` + `If-Range`; a server that
/// ignores the range answers `200` and the load restarts from zero.
/// HTTP has no notion of request priority, so priority updates are only
/// traced.
#[derive(Clone)]
pub struct HttpDataLoader {
    client: reqwest::Client,
}

impl HttpDataLoader {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(&HttpLoaderConfig::default())
    }

    pub fn with_config(config: &HttpLoaderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

enum BodyState {
    Pending {
        client: reqwest::Client,
        request: DataRequest,
    },
    Streaming {
        url: String,
        response: reqwest::Response,
    },
}

impl DataLoader for HttpDataLoader {
    fn load(&self, request: DataRequest) -> BoxStream<'static, Result<LoadEvent, DataLoadError>> {
        let state = BodyState::Pending {
            client: self.client.clone(),
            request,
        };

        stream::try_unfold(state, next_event).boxed()
    }
}

async fn next_event(state: BodyState) -> Result<Option<(LoadEvent, BodyState)>, DataLoadError> {
    match state {
        BodyState::Pending { client, request } => {
            let (event, response) = send(&client, &request).await?;
            let url = request.url;
            Ok(Some((event, BodyState::Streaming { url, response })))
        }
        BodyState::Streaming { url, mut response } => match response.chunk().await {
            Ok(Some(chunk)) => {
                trace!(url = %url, len = chunk.len(), "HTTP chunk received");
                Ok(Some((LoadEvent::Chunk(chunk), BodyState::Streaming { url, response })))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(url = %url, error = %e, "HTTP body read failed");
                Err(transport_error(&url, e))
            }
        },
    }
}

async fn send(
    client: &reqwest::Client,
    request: &DataRequest,
) -> Result<(LoadEvent, reqwest::Response), DataLoadError> {
    trace!(
        url = %request.url,
        priority = request.priority.borrow().as_str(),
        resume_from = request.resume.as_ref().map(|r| r.data.len()),
        "HTTP GET request starting"
    );

    let mut builder = client.get(&request.url);
    if let Some(resume) = &request.resume {
        builder = builder
            .header(RANGE, format!("bytes={}-", resume.data.len()))
            .header(IF_RANGE, resume.validator.as_str());
    }

    let response = builder.send().await.map_err(|e| {
        warn!(
            url = %request.url,
            error = %e,
            is_connect = e.is_connect(),
            is_timeout = e.is_timeout(),
            "HTTP request failed"
        );
        transport_error(&request.url, e)
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!(url = %request.url, status = status.as_u16(), "HTTP error status");
        return Err(DataLoadError::Status {
            url: request.url.clone(),
            status: status.as_u16(),
        });
    }

    let offset = request.resume.as_ref().map(|r| r.data.len() as u64);
    let resumed = status == StatusCode::PARTIAL_CONTENT && offset.is_some();
    let expected_length = expected_length(response.content_length(), offset, resumed);
    let validator = validator(response.headers());

    debug!(
        url = %request.url,
        status = status.as_u16(),
        expected_length = expected_length,
        resumed = resumed,
        "HTTP response received"
    );

    Ok((
        LoadEvent::Response {
            expected_length,
            validator,
            resumed,
        },
        response,
    ))
}

fn transport_error(url: &str, error: reqwest::Error) -> DataLoadError {
    DataLoadError::Transport {
        url: url.to_string(),
        source: Arc::new(error),
    }
}

fn expected_length(content_length: Option<u64>, offset: Option<u64>, resumed: bool) -> Option<u64> {
    match (content_length, offset) {
        (Some(len), Some(offset)) if resumed => Some(len + offset),
        (len, _) => len,
    }
}

/// Strong validator for `If-Range`: the ETag, else Last-Modified.
fn validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
