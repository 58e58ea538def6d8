//! Retrieval of module sources.

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;

use crate::registry::ModuleRegistry;
use crate::types::Manifest;
use crate::wire;

/// Module name -> raw source text
pub type SourceMap = HashMap<String, String>;

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<SourceMap>> + 'a>>;

/// Returns the raw source text of a batch of modules.
///
/// A provider fails the whole batch if it does not know any of the names.
pub trait SourceProvider {
    fn fetch<'a>(&'a self, names: &'a [String]) -> SourceFuture<'a>;
}

/// Serves sources straight out of an in-process registry.
#[derive(Debug, Clone)]
pub struct RegistrySource {
    registry: Arc<ModuleRegistry>,
}

impl RegistrySource {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }
}

impl SourceProvider for RegistrySource {
    fn fetch<'a>(&'a self, names: &'a [String]) -> SourceFuture<'a> {
        Box::pin(async move { Ok(self.registry.sources(names)?) })
    }
}

/// Fetches sources from a serving boundary over HTTP/1.
#[derive(Debug, Clone)]
pub struct HttpSource {
    authority: String,
}

impl HttpSource {
    /// `authority` is `host:port` of the server
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }

    async fn get(&self, path_and_query: &str) -> Result<(StatusCode, Bytes)> {
        let stream = TcpStream::connect(&self.authority)
            .await
            .with_context(|| format!("Failed to connect to {}", self.authority))?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("Connection error: {e}");
            }
        });

        let request = Request::get(path_and_query)
            .header(hyper::header::HOST, &self.authority)
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    /// Retrieve the manifest that drives a remote runtime.
    pub async fn manifest(&self) -> Result<Manifest> {
        let (status, body) = self.get(wire::MANIFEST_PATH).await?;
        if !status.is_success() {
            anyhow::bail!("Manifest request failed with status {status}");
        }
        serde_json::from_slice(&body).context("Invalid manifest")
    }
}

impl SourceProvider for HttpSource {
    fn fetch<'a>(&'a self, names: &'a [String]) -> SourceFuture<'a> {
        Box::pin(async move {
            let (status, body) = self.get(&wire::load_request_path(names)).await?;
            if !status.is_success() {
                anyhow::bail!("Load request for {names:?} failed with status {status}");
            }
            serde_json::from_slice(&body).context("Invalid load response")
        })
    }
}
