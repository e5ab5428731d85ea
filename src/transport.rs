//! Tier-to-tier HTTP transport
//!
//! Calls toward the parent go through [`Upstream`], calls toward a registered
//! child through [`Downstream`]. Both are traits so the control plane can be
//! driven by in-memory fakes; [`HttpTransport`] is the reqwest implementation.
//! Every call returns a typed result and the caller decides whether to log and
//! continue or to propagate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::config::{EndpointDescriptor, ParentEndpoint, TierConfig};
use crate::reading::{Reading, Warning};
use crate::{Error, Result};

/// Answer to a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Parent knows us and refreshed our entry
    Alive,
    /// Parent has no entry for us
    Unknown,
}

/// Calls from a child to its parent
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Announce `snapshot` to the parent
    async fn register(&self, parent: &ParentEndpoint, snapshot: &TierConfig) -> Result<()>;

    /// Withdraw `snapshot` from the parent
    async fn unregister(&self, parent: &ParentEndpoint, snapshot: &TierConfig) -> Result<()>;

    /// Assert liveness for `id`
    async fn heartbeat(&self, parent: &ParentEndpoint, id: &str) -> Result<Liveness>;

    /// Push one reading
    async fn forward_reading(&self, parent: &ParentEndpoint, reading: &Reading) -> Result<()>;

    /// Push one warning
    async fn forward_warning(&self, parent: &ParentEndpoint, warning: &Warning) -> Result<()>;
}

/// Calls from a parent to one of its children
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Reading at `path` below the child's `/reading` route, as its raw JSON body
    ///
    /// A collector answers `[sensor_id]`, an aggregator `[collector_id, sensor_id]`.
    async fn fetch_reading(&self, child: &EndpointDescriptor, path: &[&str]) -> Result<String>;

    /// Current warning of `sensor_id`, if any
    async fn poll_warning(
        &self,
        child: &EndpointDescriptor,
        sensor_id: &str,
    ) -> Result<Option<Warning>>;

    /// Child's current snapshot, as its raw JSON body
    async fn fetch_config(&self, child: &EndpointDescriptor) -> Result<String>;

    /// Push a snapshot to the child and return its raw JSON answer
    async fn push_config(&self, child: &EndpointDescriptor, payload: String) -> Result<String>;
}

impl std::fmt::Debug for dyn Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Upstream")
    }
}

impl std::fmt::Debug for dyn Downstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Downstream")
    }
}

/// reqwest-backed transport with fixed connect and total timeouts
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("sensor-mesh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn get(&self, url: Url) -> Result<Response> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;
        check_status(url, response).await
    }

    async fn post_json<T: serde::Serialize + Sync + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<Response> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;
        check_status(url, response).await
    }

    async fn post_raw(&self, url: Url, body: String) -> Result<Response> {
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(url.as_str(), e))?;
        check_status(url, response).await
    }
}

/// Turn non-success answers into `Error::Upstream`
async fn check_status(url: Url, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Upstream {
        target: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn body_text(url: &Url, response: Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| Error::transport(url.as_str(), e))
}

/// Join path segments onto a base URL, escaping each segment
fn endpoint(base: Url, segments: &[&str]) -> Result<Url> {
    let mut url = base;
    let shown = url.to_string();
    url.path_segments_mut()
        .map_err(|()| Error::Validation(format!("cannot route through {shown}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl Upstream for HttpTransport {
    async fn register(&self, parent: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        let url = endpoint(parent.base_url()?, &["register"])?;
        self.post_json(url, snapshot).await?;
        Ok(())
    }

    async fn unregister(&self, parent: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        let url = endpoint(parent.base_url()?, &["unregister"])?;
        self.post_json(url, snapshot).await?;
        Ok(())
    }

    async fn heartbeat(&self, parent: &ParentEndpoint, id: &str) -> Result<Liveness> {
        let url = endpoint(parent.base_url()?, &["heartbeat", id])?;
        match self.get(url).await {
            Ok(_) => Ok(Liveness::Alive),
            Err(e) if e.is_unknown_entity() => Ok(Liveness::Unknown),
            Err(e) => Err(e),
        }
    }

    async fn forward_reading(&self, parent: &ParentEndpoint, reading: &Reading) -> Result<()> {
        let url = endpoint(parent.base_url()?, &["reading"])?;
        self.post_json(url, reading).await?;
        Ok(())
    }

    async fn forward_warning(&self, parent: &ParentEndpoint, warning: &Warning) -> Result<()> {
        let url = endpoint(parent.base_url()?, &["warning"])?;
        self.post_json(url, warning).await?;
        Ok(())
    }
}

#[async_trait]
impl Downstream for HttpTransport {
    async fn fetch_reading(&self, child: &EndpointDescriptor, path: &[&str]) -> Result<String> {
        let segments: Vec<&str> = std::iter::once("reading").chain(path.iter().copied()).collect();
        let url = endpoint(child.base_url()?, &segments)?;
        let response = self.get(url.clone()).await?;
        body_text(&url, response).await
    }

    async fn poll_warning(
        &self,
        child: &EndpointDescriptor,
        sensor_id: &str,
    ) -> Result<Option<Warning>> {
        let url = endpoint(child.base_url()?, &["warning", sensor_id])?;
        let response = self.get(url.clone()).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = body_text(&url, response).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let warning = serde_json::from_str(&body)
            .map_err(|e| Error::Validation(format!("bad warning from {url}: {e}")))?;
        Ok(Some(warning))
    }

    async fn fetch_config(&self, child: &EndpointDescriptor) -> Result<String> {
        let url = endpoint(child.base_url()?, &["config", child.id.as_str()])?;
        let response = self.get(url.clone()).await?;
        body_text(&url, response).await
    }

    async fn push_config(&self, child: &EndpointDescriptor, payload: String) -> Result<String> {
        let url = endpoint(child.base_url()?, &["config", child.id.as_str()])?;
        let response = self.post_raw(url.clone(), payload).await?;
        body_text(&url, response).await
    }
}
