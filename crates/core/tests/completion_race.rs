use std::sync::Arc;
use std::time::Duration;

use refcheck_core::{
    CompletionRace, CorrelationConfig, Error, NetworkResponse, RaceOutcome, ScriptedEvent,
    ScriptedPage,
};

const PAYMENT_URL: &str = "https://app.pws.int.cruk.org/support-us/payment";
const THANKS_URL: &str = "https://app.pws.int.cruk.org/support-us/thanks";
const ALERT: &str = "[role=\"alert\"]";
const PAYMENT_BLOCKED: &str = "Sorry, we can't process your payment";

fn config() -> CorrelationConfig {
    let mut config = CorrelationConfig::default();
    config.race.deadline_ms = 5_000;
    config.race.short_poll_ms = 1_000;
    config
}

fn transaction_response(id: u64, status: u16) -> NetworkResponse {
    NetworkResponse::new(id, "POST", "https://api.cruk.org/transaction/confirm", status)
}

/// Transaction response inside the window resolves the race with that response.
#[tokio::test(start_paused = true)]
async fn transaction_response_wins() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL).respond(1_000, transaction_response(1, 200), r#"{"reference":"XY123456"}"#),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(
        report.outcome,
        RaceOutcome::Transaction {
            response: transaction_response(1, 200)
        }
    );
    assert_eq!(report.transaction, Some(transaction_response(1, 200)));
    assert!(!report.overridden);
    assert_eq!(page.active_waits(), 0, "losing listeners must be detached");
}

/// A failed call to the transaction endpoint is still the response of interest.
#[tokio::test(start_paused = true)]
async fn non_success_transaction_response_is_surfaced() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).respond(800, transaction_response(3, 502), "Bad Gateway"));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome.kind(), "transaction");
    assert_eq!(report.transaction.map(|r| r.status), Some(502));
}

/// Success navigation with no qualifying response resolves to navigation.
#[tokio::test(start_paused = true)]
async fn navigation_wins_without_response() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .respond(300, NetworkResponse::new(1, "GET", "https://cdn.example.com/app.js", 200), "")
            .navigate(2_000, THANKS_URL),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome, RaceOutcome::Navigation);
    assert_eq!(report.captured, 1);
    assert_eq!(report.transaction, None);
}

/// Heuristic tier only accepts successful responses.
#[tokio::test(start_paused = true)]
async fn failed_heuristic_response_is_ignored() {
    let donation = |id, status| NetworkResponse::new(id, "POST", "https://pay.example.com/donation/submit", status);
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .respond(300, donation(1, 500), "{}")
            .respond(600, donation(2, 200), r#"{"id":"DN000042"}"#),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.transaction.map(|r| r.id), Some(2));
    assert_eq!(report.captured, 2);
}

/// Error banner inside the window resolves to an error carrying its text.
#[tokio::test(start_paused = true)]
async fn error_indicator_wins() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).show(1_500, ALERT, format!("  {}  ", PAYMENT_BLOCKED)));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(
        report.outcome,
        RaceOutcome::Error {
            text: PAYMENT_BLOCKED.to_string()
        }
    );
    assert!(!report.overridden);
}

/// Alerts that are not the payment error do not resolve the race.
#[tokio::test(start_paused = true)]
async fn unrelated_alert_is_not_an_error_signal() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .show(200, ALERT, "Please check your postcode")
            .navigate(1_000, THANKS_URL),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome, RaceOutcome::Navigation);
}

/// Nothing before the deadline and no banner afterwards stays a timeout.
#[tokio::test(start_paused = true)]
async fn nothing_resolves_to_timeout() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome, RaceOutcome::Timeout);
    assert!(!report.overridden);
    assert_eq!(report.elapsed_ms, 5_000, "the post-race poll is not part of the race");
    assert_eq!(page.active_waits(), 0);
}

/// A banner that shows up after a navigation win overrides it.
#[tokio::test(start_paused = true)]
async fn late_error_overrides_navigation() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .navigate(1_000, THANKS_URL)
            .show(1_200, ALERT, PAYMENT_BLOCKED),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(
        report.outcome,
        RaceOutcome::Error {
            text: PAYMENT_BLOCKED.to_string()
        }
    );
    assert!(report.overridden);
}

/// Navigation and banner at the same instant always end as an error.
#[tokio::test(start_paused = true)]
async fn simultaneous_navigation_and_error_resolve_to_error() {
    for navigate_first in [true, false] {
        let mut page = ScriptedPage::new(PAYMENT_URL);
        let navigate = ScriptedEvent::Navigate {
            at: Duration::from_millis(700),
            url: THANKS_URL.to_string(),
        };
        let show = ScriptedEvent::Show {
            at: Duration::from_millis(700),
            selector: ALERT.to_string(),
            text: PAYMENT_BLOCKED.to_string(),
        };
        if navigate_first {
            page = page.with_event(navigate).with_event(show);
        } else {
            page = page.with_event(show).with_event(navigate);
        }
        let page = Arc::new(page);
        let race = CompletionRace::new(page.clone(), &config()).unwrap();

        let report = race.run(|| page.clone().dispatch()).await.unwrap();

        assert_eq!(report.outcome.kind(), "error", "navigate_first={}", navigate_first);
    }
}

/// A late banner after a timeout overrides the timeout.
#[tokio::test(start_paused = true)]
async fn error_after_deadline_overrides_timeout() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).show(5_500, ALERT, PAYMENT_BLOCKED));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome.kind(), "error");
    assert!(report.overridden);
}

/// A resolved transaction signal is final.
#[tokio::test(start_paused = true)]
async fn transaction_is_not_overridden() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .respond(500, transaction_response(1, 200), r#"{"reference":"XY123456"}"#)
            .show(600, ALERT, PAYMENT_BLOCKED),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome.kind(), "transaction");
    assert!(!report.overridden);
}

/// A response emitted as soon as the action runs is not lost.
#[tokio::test(start_paused = true)]
async fn response_during_dispatch_is_not_lost() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).respond(0, transaction_response(9, 200), "{}"));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.transaction.map(|r| r.id), Some(9));
}

/// A transaction response trailing a navigation win is still recovered.
#[tokio::test(start_paused = true)]
async fn transaction_response_survives_navigation_win() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .navigate(400, THANKS_URL)
            .respond(700, transaction_response(4, 200), r#"{"reference":"XY123456"}"#),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome, RaceOutcome::Navigation);
    assert!(!report.overridden);
    assert_eq!(report.transaction.map(|r| r.id), Some(4));
    assert_eq!(report.captured, 1);
}

/// Only the strict tier is recovered after a navigation win.
#[tokio::test(start_paused = true)]
async fn heuristic_response_is_not_recovered_after_navigation() {
    let page = Arc::new(
        ScriptedPage::new(PAYMENT_URL)
            .navigate(400, THANKS_URL)
            .respond(
                700,
                NetworkResponse::new(5, "POST", "https://pay.example.com/donation/submit", 200),
                "{}",
            ),
    );
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race.run(|| page.clone().dispatch()).await.unwrap();

    assert_eq!(report.outcome, RaceOutcome::Navigation);
    assert_eq!(report.transaction, None);
    assert_eq!(report.captured, 1);
}

/// A slow submit action does not shorten the window the listeners get.
#[tokio::test(start_paused = true)]
async fn slow_submit_keeps_full_window_for_navigation() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).navigate(4_000, THANKS_URL));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race
        .run(|| {
            let page = page.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                page.dispatch().await
            }
        })
        .await
        .unwrap();

    assert_eq!(report.outcome, RaceOutcome::Navigation);
    assert_eq!(report.elapsed_ms, 4_000);
    assert_eq!(page.active_waits(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_submit_keeps_full_window_for_error() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).show(4_500, ALERT, PAYMENT_BLOCKED));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let report = race
        .run(|| {
            let page = page.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                page.dispatch().await
            }
        })
        .await
        .unwrap();

    assert_eq!(report.outcome.kind(), "error");
    assert!(!report.overridden, "the banner is a race signal, not a late override");
}

/// A submit action that fails is reported as is and no race runs.
#[tokio::test(start_paused = true)]
async fn dispatch_failure_propagates() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).failing_dispatch("Complete donation button not clickable"));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let result = race.run(|| page.clone().dispatch()).await;

    match result {
        Err(Error::DispatchFailure(reason)) => assert!(reason.contains("not clickable")),
        other => panic!("expected dispatch failure, got {:?}", other),
    }
    assert_eq!(page.dispatches(), 0);
}

/// Failing to attach the response listener is fatal and nothing is dispatched.
#[tokio::test(start_paused = true)]
async fn listener_setup_failure_is_fatal() {
    let page = Arc::new(ScriptedPage::new(PAYMENT_URL).failing_attach("page closed"));
    let race = CompletionRace::new(page.clone(), &config()).unwrap();

    let result = race.run(|| page.clone().dispatch()).await;

    assert!(matches!(result, Err(Error::ListenerSetup(_))));
    assert_eq!(page.dispatches(), 0);
}

/// Concurrent attempts on separate pages do not see each other's signals.
#[tokio::test(start_paused = true)]
async fn concurrent_races_are_isolated() {
    let config = config();
    let blocked = Arc::new(ScriptedPage::new(PAYMENT_URL).show(1_000, ALERT, PAYMENT_BLOCKED));
    let confirmed = Arc::new(
        ScriptedPage::new(PAYMENT_URL).respond(1_000, transaction_response(1, 200), r#"{"reference":"XY123456"}"#),
    );
    let blocked_race = CompletionRace::new(blocked.clone(), &config).unwrap();
    let confirmed_race = CompletionRace::new(confirmed.clone(), &config).unwrap();

    let (blocked_report, confirmed_report) = tokio::join!(
        blocked_race.run(|| blocked.clone().dispatch()),
        confirmed_race.run(|| confirmed.clone().dispatch()),
    );

    assert_eq!(blocked_report.unwrap().outcome.kind(), "error");
    assert_eq!(confirmed_report.unwrap().outcome.kind(), "transaction");
}
