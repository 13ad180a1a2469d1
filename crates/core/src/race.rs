//! Completion race
//!
//! After a submit action the outcome can show up three ways, in any order: the
//! transaction response on the network, a navigation to the success page, or
//! the inline error banner. The race attaches a listener for each before the
//! action is dispatched, takes whichever resolves first within the deadline,
//! and cancels the rest.
//!
//! Navigation alone does not prove success, so once the race has resolved to
//! a navigation or a timeout the error banner is polled briefly and, when
//! present, replaces that outcome. A transaction outcome is final.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::ResponseClassifier;
use crate::config::{insensitive, CorrelationConfig};
use crate::error::{Error, Result};
use crate::page::{ElementQuery, PageSurface};
use crate::types::{NetworkResponse, RaceOutcome};

/// Result of one completion race
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceReport {
    pub outcome: RaceOutcome,

    /// The post-race error poll replaced a navigation or timeout outcome
    pub overridden: bool,

    /// The transaction response: the winning signal's, or the strict-tier
    /// response captured before a navigation win
    pub transaction: Option<NetworkResponse>,

    /// Responses observed while the race was open
    pub captured: usize,

    pub deadline_ms: u64,
    pub elapsed_ms: u64,
}

pub struct CompletionRace {
    surface: Arc<dyn PageSurface>,
    classifier: ResponseClassifier,
    success_url: Regex,
    error_indicator: ElementQuery,
    deadline: Duration,
    short_poll: Duration,
}

impl CompletionRace {
    pub fn new(surface: Arc<dyn PageSurface>, config: &CorrelationConfig) -> Result<Self> {
        let mut error_indicator = ElementQuery::new(&config.race.error_selector);
        if let Some(pattern) = &config.race.error_text_pattern {
            error_indicator = error_indicator.with_text(pattern);
        }
        error_indicator.text_filter()?;

        Ok(Self {
            surface,
            classifier: ResponseClassifier::new(&config.api),
            success_url: insensitive(&config.race.success_url_pattern)?,
            error_indicator,
            deadline: config.race.deadline(),
            short_poll: config.race.short_poll(),
        })
    }

    /// Dispatch `submit` and resolve the race.
    ///
    /// An error from `submit` is returned as is and no race takes place.
    pub async fn run<F, Fut>(&self, submit: F) -> Result<RaceReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut feed = self
            .surface
            .subscribe_responses()
            .await
            .map_err(|e| Error::ListenerSetup(e.to_string()))?;

        let mut listeners = Listeners::new();
        let (tx, mut rx) = mpsc::channel::<RaceOutcome>(2);
        let (window_tx, window_rx) = watch::channel::<Option<Instant>>(None);

        // Signal 2: success navigation
        {
            let token = listeners.token.clone();
            let surface = self.surface.clone();
            let pattern = self.success_url.clone();
            let deadline = self.deadline;
            let window = window_rx.clone();
            let tx = tx.clone();
            listeners.tasks.spawn(async move {
                let wait = within_window(window, deadline, |budget| {
                    let surface = surface.clone();
                    let pattern = pattern.clone();
                    async move { surface.wait_for_url(&pattern, budget).await }
                });
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = wait => match result {
                        Ok(url) => {
                            debug!("Reached success destination {}", url);
                            let _ = tx.send(RaceOutcome::Navigation).await;
                        }
                        Err(e) => debug!("Navigation listener ended: {}", e),
                    },
                }
            });
        }

        // Signal 3: error indicator
        {
            let token = listeners.token.clone();
            let surface = self.surface.clone();
            let query = self.error_indicator.clone();
            let deadline = self.deadline;
            let window = window_rx;
            listeners.tasks.spawn(async move {
                let wait = within_window(window, deadline, |budget| {
                    let surface = surface.clone();
                    let query = query.clone();
                    async move { surface.wait_for_visible(&query, budget).await }
                });
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = wait => match result {
                        Ok(text) => {
                            let text = text.trim().to_string();
                            let _ = tx.send(RaceOutcome::Error { text }).await;
                        }
                        Err(e) => debug!("Error listener ended: {}", e),
                    },
                }
            });
        }

        submit().await?;

        let started = Instant::now();
        let _ = window_tx.send(Some(started + self.deadline));
        let expired = sleep(self.deadline);
        tokio::pin!(expired);

        // Signal 1 (transaction response) is read here, ahead of the others.
        let mut captured = Vec::new();
        let mut feed_open = true;
        let mut signals_open = true;
        let mut outcome = loop {
            tokio::select! {
                biased;
                received = feed.recv(), if feed_open => match received {
                    Ok(response) => {
                        captured.push(response.clone());
                        let classification = self.classifier.classify(&response);
                        if classification.is_target_api {
                            debug!(
                                "Transaction response {} {} ({})",
                                response.status, response.url, classification.reason
                            );
                            break RaceOutcome::Transaction { response };
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Response listener lagged, {} responses skipped", skipped);
                    }
                    Err(RecvError::Closed) => feed_open = false,
                },
                signal = rx.recv(), if signals_open => match signal {
                    Some(outcome) => break outcome,
                    None => signals_open = false,
                },
                _ = &mut expired => break RaceOutcome::Timeout,
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        listeners.shutdown().await;
        drop(rx);

        // Responses already delivered when the race closed still count as captured.
        loop {
            match feed.try_recv() {
                Ok(response) => captured.push(response),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        info!("Completion race resolved: {}", outcome.kind());

        let mut overridden = false;
        if outcome.is_overridable() {
            // The feed stays open while the banner is polled so a transaction
            // response trailing the navigation is still captured.
            let poll = self
                .surface
                .wait_for_visible(&self.error_indicator, self.short_poll);
            tokio::pin!(poll);
            let banner = loop {
                tokio::select! {
                    biased;
                    result = &mut poll => break result,
                    received = feed.recv(), if feed_open => match received {
                        Ok(response) => captured.push(response),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Response listener lagged, {} responses skipped", skipped);
                        }
                        Err(RecvError::Closed) => feed_open = false,
                    },
                }
            };
            match banner {
                Ok(text) => {
                    warn!("Error indicator overrides {} outcome", outcome.kind());
                    outcome = RaceOutcome::Error {
                        text: text.trim().to_string(),
                    };
                    overridden = true;
                }
                Err(e) => debug!("No error indicator after race: {}", e),
            }
        }

        let transaction = match &outcome {
            RaceOutcome::Transaction { response } => Some(response.clone()),
            RaceOutcome::Navigation => captured
                .iter()
                .find(|response| self.classifier.is_transaction_endpoint(&response.url))
                .cloned(),
            _ => None,
        };
        drop(feed);

        Ok(RaceReport {
            outcome,
            overridden,
            transaction,
            captured: captured.len(),
            deadline_ms: self.deadline.as_millis() as u64,
            elapsed_ms,
        })
    }
}

/// Run a state-based wait until it resolves or the race window closes.
///
/// The window only opens once the submit action returns, so a wait that times
/// out before then is re-armed for whatever is left of it.
async fn within_window<T, F, Fut>(
    mut window: watch::Receiver<Option<Instant>>,
    first: Duration,
    mut wait: F,
) -> Result<T>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut budget = first;
    loop {
        match wait(budget).await {
            Err(Error::Timeout(what)) => {
                let closes = match window.wait_for(|closes| closes.is_some()).await {
                    Ok(closes) => *closes,
                    Err(_) => None,
                };
                let remaining = closes
                    .map(|closes| closes.saturating_duration_since(Instant::now()))
                    .unwrap_or_default();
                if remaining.is_zero() {
                    return Err(Error::Timeout(what));
                }
                budget = remaining;
            }
            other => return other,
        }
    }
}

/// Listener tasks of one race, cancelled on every exit path
struct Listeners {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

impl Listeners {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    async fn shutdown(&mut self) {
        self.token.cancel();
        self.tasks.shutdown().await;
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        // Remaining tasks are aborted when the JoinSet drops.
        self.token.cancel();
    }
}
