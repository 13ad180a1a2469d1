//! Scripted in-memory page
//!
//! A [`PageSurface`] whose network traffic, location changes and element
//! visibility follow a fixed script, timed from the moment the submit action
//! is dispatched. Used to rehearse completion races without a browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::page::{ElementQuery, PageSurface, ResponseFeed};
use crate::types::NetworkResponse;

/// A change applied to the page `at` after dispatch
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Response {
        at: Duration,
        response: NetworkResponse,
        body: String,
    },
    Navigate {
        at: Duration,
        url: String,
    },
    Show {
        at: Duration,
        selector: String,
        text: String,
    },
    Hide {
        at: Duration,
        selector: String,
    },
}

impl ScriptedEvent {
    fn at(&self) -> Duration {
        match self {
            ScriptedEvent::Response { at, .. }
            | ScriptedEvent::Navigate { at, .. }
            | ScriptedEvent::Show { at, .. }
            | ScriptedEvent::Hide { at, .. } => *at,
        }
    }
}

pub struct ScriptedPage {
    responses: broadcast::Sender<NetworkResponse>,
    bodies: Mutex<HashMap<u64, String>>,
    location: watch::Sender<String>,
    elements: watch::Sender<HashMap<String, String>>,
    script: Mutex<Vec<ScriptedEvent>>,
    dispatch_error: Option<String>,
    attach_error: Option<String>,
    dispatches: AtomicUsize,
    active_waits: Arc<AtomicUsize>,
}

impl ScriptedPage {
    pub fn new(url: impl Into<String>) -> Self {
        let (responses, _) = broadcast::channel(64);
        let (location, _) = watch::channel(url.into());
        let (elements, _) = watch::channel(HashMap::new());
        Self {
            responses,
            bodies: Mutex::new(HashMap::new()),
            location,
            elements,
            script: Mutex::new(Vec::new()),
            dispatch_error: None,
            attach_error: None,
            dispatches: AtomicUsize::new(0),
            active_waits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_event(self, event: ScriptedEvent) -> Self {
        self.script.lock().push(event);
        self
    }

    pub fn respond(self, at_ms: u64, response: NetworkResponse, body: impl Into<String>) -> Self {
        self.with_event(ScriptedEvent::Response {
            at: Duration::from_millis(at_ms),
            response,
            body: body.into(),
        })
    }

    pub fn navigate(self, at_ms: u64, url: impl Into<String>) -> Self {
        self.with_event(ScriptedEvent::Navigate {
            at: Duration::from_millis(at_ms),
            url: url.into(),
        })
    }

    pub fn show(self, at_ms: u64, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_event(ScriptedEvent::Show {
            at: Duration::from_millis(at_ms),
            selector: selector.into(),
            text: text.into(),
        })
    }

    pub fn hide(self, at_ms: u64, selector: impl Into<String>) -> Self {
        self.with_event(ScriptedEvent::Hide {
            at: Duration::from_millis(at_ms),
            selector: selector.into(),
        })
    }

    /// Make the submit action fail as if its control were unreachable
    pub fn failing_dispatch(mut self, reason: impl Into<String>) -> Self {
        self.dispatch_error = Some(reason.into());
        self
    }

    /// Make response subscription fail
    pub fn failing_attach(mut self, reason: impl Into<String>) -> Self {
        self.attach_error = Some(reason.into());
        self
    }

    /// Simulate the submit click: start playing the script
    pub async fn dispatch(self: Arc<Self>) -> Result<()> {
        if let Some(reason) = &self.dispatch_error {
            return Err(Error::DispatchFailure(reason.clone()));
        }
        self.dispatches.fetch_add(1, Ordering::SeqCst);

        let mut events = std::mem::take(&mut *self.script.lock());
        events.sort_by_key(ScriptedEvent::at);
        let start = Instant::now();
        let page = self.clone();

        tokio::spawn(async move {
            for event in events {
                sleep_until(start + event.at()).await;
                page.apply(event);
            }
        });
        Ok(())
    }

    fn apply(&self, event: ScriptedEvent) {
        match event {
            ScriptedEvent::Response { response, body, .. } => {
                debug!("Scripted response {} {}", response.status, response.url);
                self.bodies.lock().insert(response.id, body);
                let _ = self.responses.send(response);
            }
            ScriptedEvent::Navigate { url, .. } => {
                self.location.send_replace(url);
            }
            ScriptedEvent::Show { selector, text, .. } => {
                self.elements.send_modify(|elements| {
                    elements.insert(selector, text);
                });
            }
            ScriptedEvent::Hide { selector, .. } => {
                self.elements.send_modify(|elements| {
                    elements.remove(&selector);
                });
            }
        }
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Waits currently pending on this page
    pub fn active_waits(&self) -> usize {
        self.active_waits.load(Ordering::SeqCst)
    }

    pub fn current_url(&self) -> String {
        self.location.borrow().clone()
    }

    fn track_wait(&self) -> WaitGuard {
        self.active_waits.fetch_add(1, Ordering::SeqCst);
        WaitGuard(self.active_waits.clone())
    }
}

struct WaitGuard(Arc<AtomicUsize>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageSurface for ScriptedPage {
    async fn subscribe_responses(&self) -> Result<ResponseFeed> {
        match &self.attach_error {
            Some(reason) => Err(Error::ListenerSetup(reason.clone())),
            None => Ok(self.responses.subscribe()),
        }
    }

    async fn response_body(&self, response: &NetworkResponse) -> Result<String> {
        self.bodies
            .lock()
            .get(&response.id)
            .cloned()
            .ok_or_else(|| Error::Page(format!("no body recorded for response {}", response.id)))
    }

    async fn wait_for_url(&self, pattern: &Regex, wait: Duration) -> Result<String> {
        let _guard = self.track_wait();
        let mut rx = self.location.subscribe();
        let waited = timeout(wait, async {
            rx.wait_for(|url| pattern.is_match(url))
                .await
                .map(|url| (*url).clone())
        })
        .await;

        match waited {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(_)) => Err(Error::Page("page closed".to_string())),
            Err(_) => Err(Error::Timeout(format!("url matching '{}'", pattern))),
        }
    }

    async fn wait_for_visible(&self, query: &ElementQuery, wait: Duration) -> Result<String> {
        let _guard = self.track_wait();
        let filter = query.text_filter()?;
        let matches = |elements: &HashMap<String, String>| -> Option<String> {
            elements
                .get(&query.selector)
                .filter(|text| filter.as_ref().map_or(true, |f| f.is_match(text)))
                .cloned()
        };

        let mut rx = self.elements.subscribe();
        let waited = timeout(wait, async {
            rx.wait_for(|elements| matches(elements).is_some())
                .await
                .map(|elements| matches(&*elements))
        })
        .await;

        match waited {
            Ok(Ok(Some(text))) => Ok(text),
            Ok(Ok(None)) | Ok(Err(_)) => Err(Error::Page("page closed".to_string())),
            Err(_) => Err(Error::Timeout(format!("element '{}'", query.selector))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_script_plays_from_dispatch() {
        let page = Arc::new(ScriptedPage::new("https://example.org/pay").navigate(500, "https://example.org/thanks"));
        page.clone().dispatch().await.unwrap();

        let pattern = Regex::new("thanks").unwrap();
        let url = page.wait_for_url(&pattern, Duration::from_secs(1)).await.unwrap();
        assert_eq!(url, "https://example.org/thanks");
        assert_eq!(page.dispatches(), 1);
        assert_eq!(page.active_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let page = ScriptedPage::new("https://example.org/pay");
        let query = ElementQuery::new("#missing");
        let result = page.wait_for_visible(&query, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_filter_applies() {
        let page = Arc::new(
            ScriptedPage::new("https://example.org/pay")
                .show(10, "[role=\"alert\"]", "Please fill in all fields"),
        );
        page.clone().dispatch().await.unwrap();

        let query = ElementQuery::new("[role=\"alert\"]").with_text("sorry");
        let result = page.wait_for_visible(&query, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));

        let any = ElementQuery::new("[role=\"alert\"]");
        let text = page.wait_for_visible(&any, Duration::from_millis(100)).await.unwrap();
        assert_eq!(text, "Please fill in all fields");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_element_is_not_visible() {
        let page = Arc::new(
            ScriptedPage::new("https://example.org/pay")
                .show(10, "#spinner", "Processing")
                .hide(20, "#spinner")
                .navigate(30, "https://example.org/thanks"),
        );
        page.clone().dispatch().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let query = ElementQuery::new("#spinner");
        let result = page.wait_for_visible(&query, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(page.current_url(), "https://example.org/thanks");
    }

    #[tokio::test]
    async fn test_failing_dispatch() {
        let page = Arc::new(ScriptedPage::new("about:blank").failing_dispatch("button detached"));
        let result = page.clone().dispatch().await;
        assert!(matches!(result, Err(Error::DispatchFailure(_))));
        assert_eq!(page.dispatches(), 0);
    }
}
