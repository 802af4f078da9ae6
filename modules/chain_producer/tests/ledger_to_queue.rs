//! Producer draining a mocked ledger node over HTTP

use quarry_common::{CounterRegistry, EventType, IndexType, IndexedChain, MetricsSink};
use quarry_module_chain_producer::{
    configuration::ChainProducerConfig,
    ledger_client::{index_endpoint, IndexClient},
    producer::{ChainProducer, PollOutcome, ProducerContext},
};
use quarry_test_utils::{topic, RecordingNotifier, TestDb};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn container_json(index: u64) -> Value {
    json!({
        "id": format!("tx-{index}"),
        "bytes": format!("0x{:02x}{:02x}", index, index),
        "timestamp": format!("2021-09-23T12:00:0{index}Z"),
        "encoding": "hex",
        "index": index.to_string(),
    })
}

async fn mount_range(server: &MockServer, start: u64, indices: &[u64]) {
    let containers: Vec<Value> = indices.iter().map(|i| container_json(*i)).collect();
    Mock::given(method("POST"))
        .and(path("/ext/index/X/tx"))
        .and(body_partial_json(json!({ "params": { "startIndex": start.to_string() } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "containers": containers },
        })))
        .mount(server)
        .await;
}

async fn mount_not_ready(server: &MockServer, start: u64, last: u64) {
    Mock::given(method("POST"))
        .and(path("/ext/index/X/tx"))
        .and(body_partial_json(json!({ "params": { "startIndex": start.to_string() } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": -32000,
                "message": format!("start index ({start}) > last accepted index ({last})"),
            },
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn producer_drains_node_into_queue() {
    let server = MockServer::start().await;
    mount_range(&server, 0, &[0, 1]).await;
    mount_range(&server, 2, &[2]).await;
    mount_not_ready(&server, 3, 2).await;

    let db = TestDb::new().await;
    let notifier = RecordingNotifier::default();
    let metrics = Arc::new(CounterRegistry::new());
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    let ledger = IndexClient::new(
        index_endpoint(&server.uri(), IndexedChain::X, IndexType::Transactions),
        Duration::from_secs(5),
    )
    .unwrap();

    let ctx = ProducerContext {
        checkpoints: db.checkpoints(),
        queue: db.queue(),
        notifier: Arc::new(notifier.clone()),
        metrics: sink,
    };
    let cfg = ChainProducerConfig {
        max_batch: 2,
        ..ChainProducerConfig::default()
    };
    let mut producer = ChainProducer::new(
        "node-1",
        topic("X", EventType::Decisions),
        IndexedChain::X,
        Arc::new(ledger),
        ctx,
        cfg,
    );
    producer.init().await.unwrap();

    assert_eq!(
        producer.poll_once().await.unwrap(),
        PollOutcome::Drained { count: 2, inserted: 2 }
    );
    assert_eq!(
        producer.poll_once().await.unwrap(),
        PollOutcome::Drained { count: 1, inserted: 1 }
    );
    assert_eq!(producer.poll_once().await.unwrap(), PollOutcome::NotReady);

    assert_eq!(producer.checkpoint().index, 2);
    assert_eq!(db.queue().depth("12345-X-decisions").await.unwrap(), 3);
    assert_eq!(
        notifier.events(),
        vec![
            ("12345-X-decisions".to_string(), 2),
            ("12345-X-decisions".to_string(), 1),
        ]
    );
    assert_eq!(metrics.get("produce_records_processed_X_decisions"), 3);
    assert_eq!(metrics.get("produce_records_success_X_decisions"), 2);
}
