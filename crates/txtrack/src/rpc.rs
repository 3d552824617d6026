//! [ChainApi] over HTTP JSON-RPC.
//!
//! Methods: `chain_getBody(block) -> [tx]`, `chain_isTxValid(block, tx) -> bool`,
//! `chain_isTxSuccessful(block, tx) -> bool`, `chain_unpin([block]) -> any`.

use crate::api::{ApiError, ChainApi};
use crate::types::{BlockHash, TxKey};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// HTTP endpoint settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub http_url: String,
    pub request_timeout_secs: u64,
}

impl RpcConfig {
    pub fn new(http_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            request_timeout_secs: 30,
        }
    }
}

pub struct RpcChain {
    client: reqwest::Client,
    http_url: String,
    next_id: AtomicU64,
}

impl RpcChain {
    pub fn new(config: RpcConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            http_url: config.http_url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(method, params, id);
        let resp = self
            .client
            .post(&self.http_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let json: Value = resp.json().await?;
        tracing::trace!(method, id, "rpc response");
        take_result(json)
    }
}

fn request_body(method: &str, params: Value, id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

fn take_result(mut json: Value) -> Result<Value, ApiError> {
    if let Some(err) = json.get("error") {
        return Err(ApiError::Rpc(err.to_string()));
    }
    json.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| ApiError::Decode("Missing result".into()))
}

fn decode_bool(v: &Value) -> Result<bool, ApiError> {
    v.as_bool()
        .ok_or_else(|| ApiError::Decode(format!("expected bool, got {v}")))
}

fn decode_body(v: Value) -> Result<Vec<TxKey>, ApiError> {
    serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string()))
}

impl ChainApi for RpcChain {
    async fn get_body(&self, block: &BlockHash) -> Result<Vec<TxKey>, ApiError> {
        let result = self.call("chain_getBody", json!([block])).await?;
        if result.is_null() {
            return Err(ApiError::UnknownBlock(block.clone()));
        }
        decode_body(result)
    }

    async fn is_tx_valid(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        let result = self.call("chain_isTxValid", json!([block, tx])).await?;
        decode_bool(&result)
    }

    async fn is_tx_successful(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        let result = self.call("chain_isTxSuccessful", json!([block, tx])).await?;
        decode_bool(&result)
    }

    async fn unpin(&self, blocks: &[BlockHash]) -> Result<(), ApiError> {
        self.call("chain_unpin", json!([blocks])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape() {
        let b = BlockHash::from("0xb1");
        let t = TxKey::from("0xt1");
        let body = request_body("chain_isTxValid", json!([b, t]), 7);
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 7);
        assert_eq!(body["params"], json!(["0xb1", "0xt1"]));
    }

    #[test]
    fn take_result_ok_and_error() {
        let v = take_result(json!({"jsonrpc":"2.0","id":1,"result":["a","b"]})).unwrap();
        assert_eq!(decode_body(v).unwrap(), vec![TxKey::from("a"), TxKey::from("b")]);

        let err = take_result(json!({"jsonrpc":"2.0","id":1,"error":{"code":-1}})).unwrap_err();
        assert!(matches!(err, ApiError::Rpc(_)));
        let err = take_result(json!({"jsonrpc":"2.0","id":1})).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn decode_bool_rejects_other_types() {
        assert!(decode_bool(&json!(true)).unwrap());
        assert!(matches!(decode_bool(&json!("yes")), Err(ApiError::Decode(_))));
    }

    /// Serves one connection with `response`, after reading the full request.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_error_status_is_reported_as_http() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbusy",
        )
        .await;
        let chain = RpcChain::new(RpcConfig::new(url)).unwrap();
        let err = chain.get_body(&BlockHash::from("0xb1")).await.unwrap_err();
        match err {
            ApiError::Http(e) => {
                assert_eq!(e.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE))
            }
            other => panic!("expected http status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_decoded_from_server_result() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 42\r\nconnection: close\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":[\"0xt1\"]}",
        )
        .await;
        let chain = RpcChain::new(RpcConfig::new(url)).unwrap();
        let body = chain.get_body(&BlockHash::from("0xb1")).await.unwrap();
        assert_eq!(body, vec![TxKey::from("0xt1")]);
    }

    #[tokio::test]
    async fn rpc_config_default_timeout() {
        let c = RpcConfig::new("http://127.0.0.1:8545");
        assert_eq!(c.request_timeout_secs, 30);
        assert!(RpcChain::new(c).is_ok());
    }
}
