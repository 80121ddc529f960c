use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::common::{TestApp, WEBHOOK_SECRET, routes};

fn signed(event: &str, body: &[u8]) -> Vec<(&'static str, String)> {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    vec![
        ("x-github-event", event.to_string()),
        (
            "x-hub-signature-256",
            format!("sha256={}", hex::encode(mac.finalize().into_bytes())),
        ),
    ]
}

#[tokio::test]
async fn unsigned_deliveries_are_rejected() {
    let app = TestApp::spawn().await;
    let body = br#"{"zen":"Keep it logically awesome."}"#.to_vec();

    let res = app
        .post_raw(routes::WEBHOOK, body, &[("x-github-event", "ping".into())])
        .await;

    assert_eq!(res.status, 401);
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let app = TestApp::spawn().await;
    let headers = signed("ping", b"{}");

    let res = app.post_raw(routes::WEBHOOK, b"{ }".to_vec(), &headers).await;

    assert_eq!(res.status, 401);
}

#[tokio::test]
async fn ping_is_acknowledged() {
    let app = TestApp::spawn().await;
    let body = br#"{"zen":"hi"}"#.to_vec();

    let res = app
        .post_raw(routes::WEBHOOK, body.clone(), &signed("ping", &body))
        .await;

    assert_eq!(res.status, 200);
    assert_eq!(res.body["status"], "pong");
}

#[tokio::test]
async fn irrelevant_events_are_ignored() {
    let app = TestApp::spawn().await;
    let push = json!({
        "ref": "refs/heads/feature",
        "after": "a".repeat(40),
        "repository": {
            "clone_url": "https://github.com/aixcc/libpng.git",
            "default_branch": "main"
        }
    })
    .to_string()
    .into_bytes();
    let issue = br#"{"action":"opened"}"#.to_vec();

    let branch = app
        .post_raw(routes::WEBHOOK, push.clone(), &signed("push", &push))
        .await;
    let other = app
        .post_raw(routes::WEBHOOK, issue.clone(), &signed("issues", &issue))
        .await;

    for res in [branch, other] {
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "ignored");
    }
    assert!(app.state.runner.is_empty());
}

#[tokio::test]
async fn empty_secret_rejects_even_signed_deliveries() {
    let app = TestApp::spawn_with(|config| config.tasking.webhook_secret.clear()).await;
    let body = br#"{"zen":"hi"}"#.to_vec();

    let res = app
        .post_raw(routes::WEBHOOK, body.clone(), &signed("ping", &body))
        .await;

    assert_eq!(res.status, 401);
}
