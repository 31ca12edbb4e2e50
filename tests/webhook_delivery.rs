//! End-to-end delivery tests against a mock platform.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gradebridge::config::{WEBHOOK_PATH, WebhookSettings};
use gradebridge::persistence::{DeliveryStore, MemoryStore};
use gradebridge::signing;
use gradebridge::webhook::{
    DeliveryProcessor, Forwarder, MAX_RESPONSE_BODY_CHARS, ProcessOutcome, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};

const SECRET: &str = "s3cret-shared";

fn processor(store: &MemoryStore, base_url: String) -> DeliveryProcessor {
    let Ok(forwarder) = Forwarder::new(Duration::from_secs(2), Duration::from_secs(5)) else {
        panic!("client build failed");
    };
    DeliveryProcessor::new(
        Arc::new(store.clone()),
        forwarder,
        WebhookSettings {
            api_base_url: Some(base_url),
            shared_secret: Some(SECRET.to_string()),
            enabled: true,
        },
        chrono::Duration::seconds(60),
    )
}

#[tokio::test]
async fn delivers_signed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(header("Content-Type", "application/json"))
        .and(header_exists(TIMESTAMP_HEADER))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let payload = json!({"user_id": 7, "item_id": 3, "grade": "88"});
    let Ok(id) = store.enqueue("grade.updated", &payload).await else {
        panic!("enqueue failed");
    };

    let outcome = processor(&store, server.uri()).process_one(5).await;
    assert_eq!(
        outcome,
        Ok(ProcessOutcome::Delivered {
            delivery_id: id,
            http_status: 200
        })
    );

    let Some(received) = server.received_requests().await else {
        panic!("request recording disabled");
    };
    let Some(request) = received.first() else {
        panic!("no request received");
    };
    let header_str = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default()
    };
    let timestamp = header_str(TIMESTAMP_HEADER);
    let signature = header_str(SIGNATURE_HEADER);

    assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
    assert!(signing::verify(SECRET, &timestamp, &request.body, &signature));
    assert!(!signing::verify("other", &timestamp, &request.body, &signature));

    let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) else {
        panic!("body is not JSON");
    };
    assert_eq!(body, payload);

    let Ok(Some(stored)) = store.get(id).await else {
        panic!("delivery missing");
    };
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.last_http_status, 200);
    assert_eq!(stored.last_response_body, "accepted");
    assert_eq!(stored.payload, payload);
}

#[tokio::test]
async fn rejected_deliveries_exhaust_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let Ok(id) = store.enqueue("grade.updated", &json!({"n": 1})).await else {
        panic!("enqueue failed");
    };
    let p = processor(&store, server.uri());

    let mut previous = 0;
    for _ in 0..3 {
        let Ok(outcome) = p.process_one(3).await else {
            panic!("store error");
        };
        assert!(outcome.attempted());
        let Ok(Some(d)) = store.get(id).await else {
            panic!("delivery missing");
        };
        assert_eq!(d.attempts, previous + 1);
        assert_eq!(d.last_http_status, 500);
        assert_eq!(d.last_response_body, "boom");
        previous = d.attempts;
    }

    assert_eq!(p.process_one(3).await, Ok(ProcessOutcome::Idle));
    let Ok(Some(d)) = store.get(id).await else {
        panic!("delivery missing");
    };
    assert_eq!(d.attempts, 3);
}

#[tokio::test]
async fn batch_drains_queue_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    for n in 0..3 {
        let _ = store.enqueue("grade.updated", &json!({"n": n})).await;
    }

    let p = processor(&store, server.uri());
    let Ok(report) = p.process_batch(2, 1).await else {
        panic!("store error");
    };
    assert_eq!(report.attempted, 2);
    assert_eq!(report.stopped_on, None);

    let Ok(Some(last)) = store.get(3).await else {
        panic!("delivery missing");
    };
    assert_eq!(last.attempts, 0);

    let Ok(report) = p.process_batch(2, 1).await else {
        panic!("store error");
    };
    assert_eq!(report.attempted, 1);
    assert_eq!(report.stopped_on, Some(ProcessOutcome::Idle));

    let Some(received) = server.received_requests().await else {
        panic!("request recording disabled");
    };
    let order: Vec<serde_json::Value> = received
        .iter()
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .filter_map(|v| v.get("n").cloned())
        .collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn unreachable_endpoint_records_transport_failure() {
    let store = MemoryStore::new();
    let Ok(id) = store.enqueue("test.event", &json!({"x": 1})).await else {
        panic!("enqueue failed");
    };
    assert!(id > 0);

    let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    drop(listener);

    let Ok(outcome) = processor(&store, format!("http://{addr}"))
        .process_one(1)
        .await
    else {
        panic!("store error");
    };
    assert!(!outcome.attempted());

    let Ok(Some(d)) = store.get(id).await else {
        panic!("delivery missing");
    };
    assert_eq!(d.attempts, 1);
    assert_eq!(d.last_http_status, 0);
    assert!(!d.last_response_body.is_empty());
}

#[tokio::test]
async fn requeue_revives_dead_letter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let Ok(id) = store.enqueue("test.event", &json!({})).await else {
        panic!("enqueue failed");
    };
    let p = processor(&store, server.uri());
    let _ = p.process_one(1).await;
    assert_eq!(p.process_one(1).await, Ok(ProcessOutcome::Idle));

    tokio_test::assert_ok!(store.requeue(id).await);
    let Ok(outcome) = p.process_one(1).await else {
        panic!("store error");
    };
    assert!(outcome.attempted());
}

#[tokio::test]
async fn long_response_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let Ok(id) = store.enqueue("test.event", &json!({})).await else {
        panic!("enqueue failed");
    };
    let _ = processor(&store, server.uri()).process_one(5).await;

    let Ok(Some(d)) = store.get(id).await else {
        panic!("delivery missing");
    };
    assert_eq!(d.last_http_status, 502);
    assert_eq!(d.last_response_body.chars().count(), MAX_RESPONSE_BODY_CHARS);
}
