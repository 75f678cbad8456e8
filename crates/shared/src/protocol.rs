use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use alloy_primitives::B256;

use crate::domain::{Address, NetworkId, Wei};

/// Compiled contract artifact: ABI plus one deployment per network id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDescriptor {
    #[serde(default, rename = "contractName", skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    pub abi: Vec<AbiEntry>,
    #[serde(default)]
    pub networks: HashMap<String, NetworkDeployment>,
}

impl ContractDescriptor {
    pub fn deployment(&self, network_id: NetworkId) -> Option<&NetworkDeployment> {
        self.networks.get(&network_id.0.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDeployment {
    pub address: Address,
    #[serde(
        default,
        rename = "transactionHash",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiEntryKind {
    Function,
    Event,
    Constructor,
    Fallback,
    Receive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: AbiEntryKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    #[serde(
        default,
        rename = "stateMutability",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_mutability: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
}

/// Read-only projection of one policy as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePolicy {
    pub holder: Address,
    pub premium_wei: Wei,
    pub payout_wei: Wei,
    pub active: bool,
    pub claimed: bool,
}

/// Unsubmitted buy form, autosaved between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub payout: String,
    pub premium: String,
    pub timestamp: DateTime<Utc>,
}

/// Change notification pushed by the wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    NetworkChanged(NetworkId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub data: Vec<u8>,
    pub value: Option<Wei>,
    pub gas: Option<u64>,
    pub gas_price: Option<Wei>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub status: bool,
    pub gas_used: Option<u64>,
    pub logs: Vec<LogEntry>,
}
