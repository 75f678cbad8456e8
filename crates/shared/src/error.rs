use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage at which a policy operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserInputInvalid,
    ProviderUnavailable,
    NetworkMismatch,
    UserRejected,
    RemoteRevert,
    RemoteInsufficientFunds,
    Timeout,
    Busy,
    Unclassified,
}

/// Terminal failure of a workflow operation. `message` is what the status line shows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Business rule the contract reported when it reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertReason {
    NotHolder,
    AlreadyClaimed,
    NotActive,
    ContractInsufficientFunds,
    InvalidPolicy,
    Other(String),
}

impl RevertReason {
    pub fn from_reason(reason: &str) -> Self {
        let lower = reason.to_ascii_lowercase();
        if lower.contains("only policy holder")
            || lower.contains("not the policy holder")
            || lower.contains("not policy holder")
        {
            Self::NotHolder
        } else if lower.contains("already been claimed") || lower.contains("already claimed") {
            Self::AlreadyClaimed
        } else if lower.contains("not active") {
            Self::NotActive
        } else if lower.contains("insufficient contract balance")
            || lower.contains("contract has insufficient")
            || lower.contains("insufficient funds in contract")
            || lower.contains("insufficient balance")
        {
            Self::ContractInsufficientFunds
        } else if lower.contains("invalid policy")
            || lower.contains("does not exist")
            || lower.contains("nonexistent")
        {
            Self::InvalidPolicy
        } else {
            Self::Other(reason.trim().to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    UserRejected,
    InsufficientFunds,
    Reverted(RevertReason),
    OutOfGas,
    Timeout,
    Transport,
    Unclassified,
}

/// Failure of a call to the wallet provider or the contract, classified at the RPC layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let message = if reason.trim().is_empty() {
            "execution reverted".to_string()
        } else {
            format!("execution reverted: {}", reason.trim())
        };
        Self::new(
            RemoteErrorKind::Reverted(RevertReason::from_reason(&reason)),
            message,
        )
    }

    pub fn is_revert(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Reverted(_))
    }
}
