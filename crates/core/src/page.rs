//! Page surface abstraction consumed by the race and the attempt

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::insensitive;
use crate::error::Result;
use crate::types::NetworkResponse;

/// Live feed of completed network exchanges.
///
/// Responses are buffered from the moment the receiver is created, so a feed
/// obtained before the submit action is dispatched cannot miss the response.
pub type ResponseFeed = broadcast::Receiver<NetworkResponse>;

/// An element to wait for: a selector, optionally narrowed to elements whose
/// text matches a case-insensitive pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementQuery {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_text: Option<String>,
}

impl ElementQuery {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            has_text: None,
        }
    }

    pub fn with_text(mut self, pattern: impl Into<String>) -> Self {
        self.has_text = Some(pattern.into());
        self
    }

    /// Compiled text filter, if any
    pub fn text_filter(&self) -> Result<Option<Regex>> {
        self.has_text.as_deref().map(insensitive).transpose()
    }
}

/// The browser page as seen by the decision logic.
///
/// Waits are state based: they resolve immediately if the condition already
/// holds when first polled. Every wait is bounded by its `timeout` and returns
/// [`Error::Timeout`](crate::Error::Timeout) when it elapses.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Attach to the stream of completed responses
    async fn subscribe_responses(&self) -> Result<ResponseFeed>;

    /// Fetch the body text of a response seen on the feed
    async fn response_body(&self, response: &NetworkResponse) -> Result<String>;

    /// Wait until the page location matches `pattern`; returns the location
    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> Result<String>;

    /// Wait until an element matching `query` is visible; returns its text
    async fn wait_for_visible(&self, query: &ElementQuery, timeout: Duration) -> Result<String>;
}
