//! HTTP access to a routines server.

use crate::error::{ConsoleError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use tracing::debug;
use url::Url;

/// Server address used when none is given.
pub const DEFAULT_URL: &str = "http://127.0.0.1:3000";

/// Raw body chunks of a run, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupListing {
    pub name: String,
    pub tasks: Vec<TaskListing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskListing {
    pub title: String,
    pub action: String,
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct RoutinesClient {
    client: reqwest::Client,
    base: Url,
}

impl RoutinesClient {
    pub fn new(mut base: Url) -> Self {
        // Keep a trailing slash so joins append instead of replacing the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    pub fn parse(base: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(base)?))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `{base}/routines?action=..&args=..`, with `args` as a JSON array.
    pub fn run_url(&self, action: &str, args: &[Value]) -> Result<Url> {
        let mut url = self.base.join("routines")?;
        url.query_pairs_mut()
            .append_pair("action", action)
            .append_pair("args", &Value::Array(args.to_vec()).to_string());
        Ok(url)
    }

    /// Starts a run and returns its body as it arrives.
    ///
    /// Fails with [`ConsoleError::Status`] if the server rejects the request.
    pub async fn run(&self, action: &str, args: &[Value]) -> Result<ByteStream> {
        let url = self.run_url(action, args)?;
        debug!(%url, "Starting run");
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ConsoleError::from)),
        ))
    }

    /// The server's task listing, grouped and in display order.
    pub async fn list(&self) -> Result<Vec<GroupListing>> {
        let response = self.client.get(self.base.join("tasks")?).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConsoleError::Status {
        status,
        body: body.trim().to_string(),
    })
}

/// Reads `--args` the way the server reads `args`: a JSON array spreads into
/// its elements, any other JSON value is one argument, and anything else is
/// passed as a single string.
pub fn parse_cli_args(raw: Option<&str>) -> Vec<Value> {
    match raw.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(text) => match serde_json::from_str(text) {
            Ok(Value::Array(items)) => items,
            Ok(value) => vec![value],
            Err(_) => vec![Value::String(text.to_string())],
        },
    }
}
