//! Ethereum JSON-RPC transport and the HTTP-backed wallet provider.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy_primitives::{hex, B256, U256};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared::{
    domain::{Address, NetworkId, Wei},
    error::{RemoteError, RemoteErrorKind},
    protocol::{LogEntry, ProviderEvent, TransactionReceipt, TransactionRequest},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::{abi, WalletProvider};

pub const JSONRPC_VERSION: &str = "2.0";
/// EIP-1193 code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;
const METHOD_NOT_FOUND_CODE: i64 = -32601;
/// Code geth-style nodes attach to reverted calls.
const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("RPC JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC transport error: HTTP status {0}")]
    HttpStatus(StatusCode),
    #[error("RPC returned an empty response")]
    EmptyResponse,
    #[error("invalid hex value from RPC: {0}")]
    InvalidHex(String),
    #[error("RPC error [{code}]: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl From<RpcError> for RemoteError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Rpc {
                code,
                message,
                data,
            } => classify_rpc_error(code, &message, data.as_ref()),
            RpcError::Transport(err) if err.is_timeout() => {
                RemoteError::new(RemoteErrorKind::Timeout, err.to_string())
            }
            RpcError::Transport(_) | RpcError::HttpStatus(_) | RpcError::InvalidEndpoint(_) => {
                RemoteError::new(RemoteErrorKind::Transport, value.to_string())
            }
            other => RemoteError::new(RemoteErrorKind::Unclassified, other.to_string()),
        }
    }
}

/// Maps a node/wallet error object onto the structured remote error kinds.
pub fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> RemoteError {
    let lower = message.to_ascii_lowercase();
    if code == USER_REJECTED_CODE || lower.contains("user rejected") || lower.contains("user denied")
    {
        return RemoteError::new(RemoteErrorKind::UserRejected, message);
    }
    if let Some(reason) = revert_reason(code, message, data) {
        return RemoteError::reverted(reason);
    }
    if lower.contains("out of gas") {
        return RemoteError::new(RemoteErrorKind::OutOfGas, message);
    }
    if lower.contains("insufficient funds") || lower.contains("enough funds") {
        return RemoteError::new(RemoteErrorKind::InsufficientFunds, message);
    }
    RemoteError::new(RemoteErrorKind::Unclassified, message)
}

fn revert_reason(code: i64, message: &str, data: Option<&Value>) -> Option<String> {
    if let Some(reason) = data.and_then(reason_from_data) {
        return Some(reason);
    }
    let lower = message.to_ascii_lowercase();
    if let Some(idx) = lower.find("reverted:") {
        return Some(message[idx + "reverted:".len()..].trim().to_string());
    }
    if let Some(idx) = lower.find("revert ") {
        return Some(message[idx + "revert ".len()..].trim().to_string());
    }
    if code == EXECUTION_REVERTED_CODE || lower.contains("revert") {
        return Some(String::new());
    }
    None
}

fn reason_from_data(data: &Value) -> Option<String> {
    match data {
        Value::String(raw) => decode_hex(raw)
            .ok()
            .and_then(|bytes| abi::decode_revert_reason(&bytes)),
        Value::Object(map) => {
            if let Some(Value::String(reason)) = map.get("reason") {
                return Some(reason.clone());
            }
            map.get("data").and_then(reason_from_data)
        }
        _ => None,
    }
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(raw).map_err(|_| RpcError::InvalidHex(raw.to_string()))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

pub fn parse_quantity(raw: &str) -> Result<U256, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::InvalidHex(raw.to_string()))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|_| RpcError::InvalidHex(raw.to_string()))
}

pub fn format_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

fn parse_topic(raw: &str) -> Result<B256, RpcError> {
    let bytes = decode_hex(raw)?;
    B256::try_from(bytes.as_slice()).map_err(|_| RpcError::InvalidHex(raw.to_string()))
}

fn transaction_params(tx: &TransactionRequest) -> Value {
    let mut obj = Map::new();
    if let Some(from) = &tx.from {
        obj.insert("from".into(), json!(encode_hex(from.as_slice())));
    }
    if let Some(to) = &tx.to {
        obj.insert("to".into(), json!(encode_hex(to.as_slice())));
    }
    if !tx.data.is_empty() {
        obj.insert("data".into(), json!(encode_hex(&tx.data)));
    }
    if let Some(value) = tx.value {
        obj.insert("value".into(), json!(format_quantity(value)));
    }
    if let Some(gas) = tx.gas {
        obj.insert("gas".into(), json!(format_quantity(U256::from(gas))));
    }
    if let Some(gas_price) = tx.gas_price {
        obj.insert("gasPrice".into(), json!(format_quantity(gas_price)));
    }
    Value::Object(obj)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    address: Address,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

impl RawReceipt {
    fn into_receipt(self) -> Result<TransactionReceipt, RpcError> {
        let status = match self.status.as_deref() {
            Some(raw) => parse_quantity(raw)? == U256::from(1u8),
            None => true,
        };
        let gas_used = self
            .gas_used
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .map(|gas| u64::try_from(gas).unwrap_or(u64::MAX));
        let logs = self
            .logs
            .into_iter()
            .map(|log| {
                Ok(LogEntry {
                    address: log.address,
                    topics: log
                        .topics
                        .iter()
                        .map(|topic| parse_topic(topic))
                        .collect::<Result<Vec<_>, _>>()?,
                    data: decode_hex(&log.data)?,
                })
            })
            .collect::<Result<Vec<_>, RpcError>>()?;
        Ok(TransactionReceipt {
            transaction_hash: self.transaction_hash,
            status,
            gas_used,
            logs,
        })
    }
}

/// Typed JSON-RPC 2.0 client over HTTP.
pub struct EthRpcClient {
    http: Client,
    url: Url,
    next_id: AtomicU64,
}

impl EthRpcClient {
    pub fn from_endpoint(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let url =
            Url::parse(endpoint).map_err(|err| RpcError::InvalidEndpoint(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RpcError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {endpoint}",
                url.scheme()
            )));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issues a raw call returning the untyped result payload.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        };
        debug!(method, id, "rpc: request");

        let response = self.http.post(self.url.clone()).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(RpcError::HttpStatus(response.status()));
        }

        let response: JsonRpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        response.result.ok_or(RpcError::EmptyResponse)
    }

    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<U256, RpcError> {
        let raw: String = self.call(method, params).await?;
        parse_quantity(&raw)
    }
}

/// Wallet provider backed by a node's JSON-RPC endpoint with unlocked accounts.
pub struct EthRpcProvider {
    client: EthRpcClient,
    receipt_poll_interval: Duration,
    events: broadcast::Sender<ProviderEvent>,
}

impl EthRpcProvider {
    pub fn new(client: EthRpcClient, receipt_poll_interval: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            client,
            receipt_poll_interval,
            events,
        })
    }

    /// Polls accounts and network id and broadcasts whenever either changes.
    pub fn spawn_change_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_accounts: Option<Vec<Address>> = None;
            let mut last_network: Option<NetworkId> = None;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                match provider.accounts().await {
                    Ok(accounts) => {
                        if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                            info!(count = accounts.len(), "rpc: accounts changed");
                            let _ = provider
                                .events
                                .send(ProviderEvent::AccountsChanged(accounts.clone()));
                        }
                        last_accounts = Some(accounts);
                    }
                    Err(err) => warn!("rpc: account poll failed: {err}"),
                }

                match provider.network_id().await {
                    Ok(network_id) => {
                        if last_network.is_some_and(|prev| prev != network_id) {
                            info!(network_id = network_id.0, "rpc: network changed");
                            let _ = provider
                                .events
                                .send(ProviderEvent::NetworkChanged(network_id));
                        }
                        last_network = Some(network_id);
                    }
                    Err(err) => warn!("rpc: network poll failed: {err}"),
                }
            }
        })
    }

    async fn wait_for_receipt(&self, hash: &str) -> Result<TransactionReceipt, RpcError> {
        loop {
            let raw: Option<RawReceipt> = self
                .client
                .call("eth_getTransactionReceipt", json!([hash]))
                .await?;
            if let Some(raw) = raw {
                return raw.into_receipt();
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl WalletProvider for EthRpcProvider {
    fn is_available(&self) -> bool {
        true
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteError> {
        match self.client.call("eth_requestAccounts", json!([])).await {
            Ok(accounts) => Ok(accounts),
            Err(RpcError::Rpc { code, .. }) if code == METHOD_NOT_FOUND_CODE => {
                debug!("rpc: eth_requestAccounts unsupported, falling back to eth_accounts");
                self.accounts().await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, RemoteError> {
        Ok(self.client.call("eth_accounts", json!([])).await?)
    }

    async fn network_id(&self) -> Result<NetworkId, RemoteError> {
        let raw: String = self.client.call("net_version", json!([])).await?;
        let parsed = if raw.starts_with("0x") {
            parse_quantity(&raw)
                .ok()
                .and_then(|value| u64::try_from(value).ok())
        } else {
            raw.parse::<u64>().ok()
        };
        parsed.map(NetworkId).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Unclassified,
                format!("invalid network id from provider: {raw}"),
            )
        })
    }

    async fn gas_price(&self) -> Result<Wei, RemoteError> {
        Ok(self.client.quantity("eth_gasPrice", json!([])).await?)
    }

    async fn balance(&self, address: &Address) -> Result<Wei, RemoteError> {
        Ok(self
            .client
            .quantity("eth_getBalance", json!([encode_hex(address.as_slice()), "latest"]))
            .await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RemoteError> {
        let gas = self
            .client
            .quantity("eth_estimateGas", json!([transaction_params(tx)]))
            .await?;
        u64::try_from(gas).map_err(|_| {
            RemoteError::new(
                RemoteErrorKind::Unclassified,
                format!("gas estimate out of range: {gas}"),
            )
        })
    }

    async fn send_transaction(
        &self,
        tx: &TransactionRequest,
    ) -> Result<TransactionReceipt, RemoteError> {
        let hash: String = self
            .client
            .call("eth_sendTransaction", json!([transaction_params(tx)]))
            .await?;
        info!(tx_hash = %hash, "rpc: transaction submitted");
        let receipt = self.wait_for_receipt(&hash).await?;
        if !receipt.status {
            return Err(RemoteError::reverted(format!(
                "transaction {} failed on chain",
                receipt.transaction_hash
            )));
        }
        Ok(receipt)
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Vec<u8>, RemoteError> {
        let raw: String = self
            .client
            .call("eth_call", json!([transaction_params(tx), "latest"]))
            .await?;
        Ok(decode_hex(&raw)?)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
