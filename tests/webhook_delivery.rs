use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use restatic::application::clock::{Clock, ManualClock};
use restatic::application::notify::{
    Notifier, NotifierConfig, NotifyError, NotifyMode, NotifyOutcome,
};
use serde_json::json;
use time::macros::datetime;
use url::Url;

const INSTALL_ID: &str = "3f1c2b9e-install";

fn notifier(server: &MockServer, mode: NotifyMode) -> Arc<Notifier> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(datetime!(2026-06-01 09:00 UTC)));
    Arc::new(Notifier::new(
        reqwest::Client::new(),
        NotifierConfig {
            endpoint: Some(Url::parse(&server.url("/hooks/site")).expect("hook url")),
            mode,
            site: "https://shop.example.com/".to_string(),
            install_id: INSTALL_ID.to_string(),
            timeout: Duration::from_secs(2),
        },
        clock,
    ))
}

fn page() -> Url {
    Url::parse("https://shop.example.com/shop/widget/").expect("page url")
}

#[tokio::test]
async fn debounced_mode_coalesces_a_burst_into_one_delivery() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site").json_body(json!({
                "event": "site.updated",
                "site": "https://shop.example.com/",
                "installId": INSTALL_ID,
                "timestamp": "2026-06-01T09:00:00Z",
            }));
            then.status(204);
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Debounced(Duration::from_millis(300)));

    let first = notifier.notify(Some(&page()));
    assert!(matches!(first, NotifyOutcome::Scheduled { .. }));
    for _ in 0..4 {
        assert!(matches!(
            notifier.notify(Some(&page())),
            NotifyOutcome::Coalesced { .. }
        ));
    }
    assert!(notifier.pending_delivery().is_some());

    tokio::time::sleep(Duration::from_millis(700)).await;

    hook.assert_async().await;
    assert!(notifier.pending_delivery().is_none());
}

#[tokio::test]
async fn immediate_mode_posts_build_completed_with_url() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site").json_body(json!({
                "event": "build.completed",
                "site": "https://shop.example.com/",
                "installId": INSTALL_ID,
                "url": "https://shop.example.com/shop/widget/",
                "timestamp": "2026-06-01T09:00:00Z",
            }));
            then.status(200);
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Immediate);
    assert_eq!(notifier.notify(Some(&page())), NotifyOutcome::Dispatched);

    tokio::time::sleep(Duration::from_millis(300)).await;
    hook.assert_async().await;
}

#[tokio::test]
async fn off_mode_sends_nothing() {
    let server = MockServer::start_async().await;
    let notifier = notifier(&server, NotifyMode::Off);

    assert_eq!(notifier.notify(Some(&page())), NotifyOutcome::Disabled);
    assert!(notifier.pending_delivery().is_none());
}

#[tokio::test]
async fn ping_reports_endpoint_status() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site");
            then.status(502);
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Off);
    let err = notifier.ping().await.expect_err("502 is a failure");

    assert!(matches!(err, NotifyError::Status(502)));
    hook.assert_async().await;
}

#[tokio::test]
async fn flush_delivers_an_open_window_right_away() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site");
            then.status(200);
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Debounced(Duration::from_secs(60)));
    assert!(!notifier.flush().await.expect("nothing to flush"));

    notifier.notify(None);
    assert!(notifier.flush().await.expect("flush delivers"));
    assert!(notifier.pending_delivery().is_none());
    hook.assert_async().await;
}

#[tokio::test]
async fn flush_waits_for_immediate_deliveries() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site");
            then.status(200).delay(Duration::from_millis(200));
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Immediate);
    assert_eq!(notifier.notify(Some(&page())), NotifyOutcome::Dispatched);

    assert!(notifier.flush().await.expect("flush waits"));
    hook.assert_async().await;
    assert!(!notifier.flush().await.expect("nothing left"));
}

#[tokio::test]
async fn cancelled_window_never_fires() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/site");
            then.status(200);
        })
        .await;

    let notifier = notifier(&server, NotifyMode::Debounced(Duration::from_millis(100)));
    notifier.notify(None);
    assert!(notifier.cancel_pending());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hook.calls_async().await, 0);
}
