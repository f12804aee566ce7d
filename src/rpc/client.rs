//! HTTP JSON-RPC client with an optional websocket endpoint for `newHeads`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::types::{parse_hex_u64, Block, Receipt};
use super::pool::ClientFactory;
use super::{ChainClient, HeadStream, RpcError};

pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    ws_url: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, ws_url: Option<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, url: url.into(), ws_url, next_id: AtomicU64::new(1) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{method}: {e}")))?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{method}: invalid JSON response: {e}")))?;

        if !status.is_success() {
            return Err(RpcError::Transport(format!("{method}: HTTP {status}: {value}")));
        }
        if let Some(err) = value.get("error") {
            return Err(rpc_error(err));
        }

        let result = value
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode(format!("{method}: missing result field")))?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}

fn rpc_error(err: &Value) -> RpcError {
    RpcError::Rpc {
        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    }
}

fn block_tag(at: Option<u64>) -> Value {
    match at {
        Some(h) => Value::String(format!("{h:#x}")),
        None => Value::String("latest".to_string()),
    }
}

/// Head height out of an `eth_subscription` notification, if it is one.
pub(crate) fn parse_head_notification(text: &str) -> Option<u64> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let number = v.get("params")?.get("result")?.get("number")?.as_str()?;
    parse_hex_u64(number).ok()
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_hex_u64(&raw).map_err(RpcError::Decode)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw).map_err(RpcError::Decode)
    }

    async fn block_by_number(&self, height: u64) -> Result<Block, RpcError> {
        let block: Option<Block> = self.call("eth_getBlockByNumber", json!([format!("{height:#x}"), true])).await?;
        block.ok_or(RpcError::BlockNotFound(height))
    }

    async fn block_receipts(&self, height: u64) -> Result<Vec<Receipt>, RpcError> {
        let receipts: Option<Vec<Receipt>> = self.call("eth_getBlockReceipts", json!([format!("{height:#x}")])).await?;
        receipts.ok_or(RpcError::BlockNotFound(height))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, RpcError> {
        let ws_url = self
            .ws_url
            .as_deref()
            .ok_or_else(|| RpcError::Subscription("no websocket endpoint configured".to_string()))?;
        let (mut ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| RpcError::Subscription(e.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        ws.send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| RpcError::Subscription(e.to_string()))?;

        // 等待订阅确认
        loop {
            let msg = ws
                .next()
                .await
                .ok_or_else(|| RpcError::Subscription("closed before subscription ack".to_string()))?
                .map_err(|e| RpcError::Subscription(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let v: Value = serde_json::from_str(&text.to_string()).map_err(|e| RpcError::Decode(e.to_string()))?;
            if v.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(err) = v.get("error") {
                return Err(rpc_error(err));
            }
            log::debug!("newHeads subscription {} on {ws_url}", v.get("result").unwrap_or(&Value::Null));
            break;
        }

        let stream = futures::stream::unfold(ws, |mut ws| async move {
            loop {
                match ws.next().await? {
                    Ok(Message::Text(text)) => {
                        if let Some(height) = parse_head_notification(&text.to_string()) {
                            return Some((Ok(height), ws));
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => {}
                    Err(e) => return Some((Err(RpcError::Transport(e.to_string())), ws)),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn call_contract(&self, to: Address, data: Bytes, at: Option<u64>) -> Result<Bytes, RpcError> {
        let params = json!([{ "to": format!("{to:#x}"), "data": data }, block_tag(at)]);
        self.call("eth_call", params).await
    }
}

/// Dials [`JsonRpcClient`]s against one endpoint for every pool slot.
pub struct JsonRpcFactory {
    pub url: String,
    pub ws_url: Option<String>,
    pub timeout: Duration,
}

#[async_trait]
impl ClientFactory for JsonRpcFactory {
    async fn connect(&self, index: usize) -> Result<Arc<dyn ChainClient>, RpcError> {
        let client = JsonRpcClient::new(self.url.clone(), self.ws_url.clone(), self.timeout)?;
        let chain_id = client.chain_id().await?;
        log::debug!("slot {index}: connected to {} (chain {chain_id})", self.url);
        Ok(Arc::new(client))
    }
}
