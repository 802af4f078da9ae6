//! JSON-RPC client for the ledger node's index API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_common::{Container, IndexType, IndexedChain, LedgerError, LedgerReader};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const GET_CONTAINER_RANGE: &str = "index.getContainerRange";

/// Index endpoint of one chain, e.g. `{node_url}/ext/index/X/tx`
pub fn index_endpoint(node_url: &str, chain: IndexedChain, index_type: IndexType) -> String {
    format!("{}/ext/index/{chain}/{index_type}", node_url.trim_end_matches('/'))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<ContainerRange>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContainerRange {
    #[serde(default)]
    containers: Vec<FormattedContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonU64 {
    Str(String),
    Num(u64),
}

impl JsonU64 {
    fn value(&self) -> Result<u64, LedgerError> {
        match self {
            JsonU64::Num(n) => Ok(*n),
            JsonU64::Str(s) => s
                .parse()
                .map_err(|_| LedgerError::Malformed(format!("invalid index '{s}'"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FormattedContainer {
    id: String,
    bytes: String,
    timestamp: DateTime<Utc>,
    index: JsonU64,
}

impl TryFrom<FormattedContainer> for Container {
    type Error = LedgerError;

    fn try_from(c: FormattedContainer) -> Result<Self, Self::Error> {
        let raw = c.bytes.strip_prefix("0x").unwrap_or(&c.bytes);
        let bytes = hex::decode(raw)
            .map_err(|e| LedgerError::Malformed(format!("container {}: {e}", c.id)))?;
        Ok(Container {
            index: c.index.value()?,
            id: c.id,
            bytes,
            timestamp: c.timestamp,
        })
    }
}

pub struct IndexClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl IndexClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

fn transport_error(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::Transport(err.to_string())
    }
}

#[async_trait]
impl LedgerReader for IndexClient {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn get_container_range(
        &self,
        start_index: u64,
        max_count: usize,
    ) -> Result<Vec<Container>, LedgerError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": GET_CONTAINER_RANGE,
            "params": {
                "startIndex": start_index.to_string(),
                "numToFetch": max_count.to_string(),
                "encoding": "hex",
            },
        });

        let response =
            self.client.post(&self.endpoint).json(&request).send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::from_message(format!(
                "received status code '{}'",
                status.as_u16()
            )));
        }

        let body: RpcResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                LedgerError::Malformed(e.to_string())
            } else {
                transport_error(e)
            }
        })?;

        if let Some(err) = body.error {
            return Err(LedgerError::from_message(err.message));
        }
        let range = body
            .result
            .ok_or_else(|| LedgerError::Malformed("response without result".to_string()))?;

        range.containers.into_iter().map(Container::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> IndexClient {
        let endpoint = index_endpoint(&server.uri(), IndexedChain::X, IndexType::Transactions);
        IndexClient::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    fn container_json(index: u64) -> Value {
        json!({
            "id": format!("id-{index}"),
            "bytes": format!("0x{:02x}ff", index),
            "timestamp": "2021-09-23T12:00:00Z",
            "encoding": "hex",
            "index": index.to_string(),
        })
    }

    #[test]
    fn endpoint_joins_chain_and_index_type() {
        assert_eq!(
            index_endpoint("http://node:9650/", IndexedChain::C, IndexType::Blocks),
            "http://node:9650/ext/index/C/block"
        );
        assert_eq!(
            index_endpoint("http://node:9650", IndexedChain::X, IndexType::Vertices),
            "http://node:9650/ext/index/X/vtx"
        );
    }

    #[tokio::test]
    async fn test_range_request_and_decode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ext/index/X/tx"))
            .and(body_partial_json(json!({
                "method": "index.getContainerRange",
                "params": { "startIndex": "2", "numToFetch": "2", "encoding": "hex" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "containers": [container_json(2), container_json(3)] },
            })))
            .mount(&server)
            .await;

        let containers = client(&server).get_container_range(2, 2).await.unwrap();

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].index, 2);
        assert_eq!(containers[0].id, "id-2");
        assert_eq!(containers[1].bytes, vec![0x03, 0xff]);
        assert_eq!(containers[1].timestamp.to_rfc3339(), "2021-09-23T12:00:00+00:00");
    }

    #[tokio::test]
    async fn test_past_last_accepted_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "start index (5) > last accepted index (4)" },
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_container_range(5, 2).await.unwrap_err();
        assert!(err.is_not_ready(), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_index_endpoint_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).get_container_range(0, 10).await.unwrap_err();
        assert!(err.is_not_ready(), "{err:?}");
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).get_container_range(0, 10).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::Transport("received status code '500'".to_string())
        );
    }

    #[tokio::test]
    async fn test_slow_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(json!({ "result": { "containers": [] } })),
            )
            .mount(&server)
            .await;

        let endpoint = index_endpoint(&server.uri(), IndexedChain::X, IndexType::Transactions);
        let client = IndexClient::new(endpoint, Duration::from_millis(100)).unwrap();
        let err = client.get_container_range(0, 10).await.unwrap_err();
        assert_eq!(err, LedgerError::Timeout);
    }

    #[tokio::test]
    async fn test_bad_hex_is_malformed() {
        let server = MockServer::start().await;
        let mut bad = container_json(0);
        bad["bytes"] = json!("0xzz");
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "result": { "containers": [bad] } })),
            )
            .mount(&server)
            .await;

        let err = client(&server).get_container_range(0, 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::Malformed(_)));
    }
}
