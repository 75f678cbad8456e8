use std::sync::Arc;

use alloy_primitives::U256;
use shared::{
    domain::{Address, NetworkId, PolicyId, Wei},
    error::{RemoteError, RemoteErrorKind},
    protocol::{ContractDescriptor, RemotePolicy, TransactionReceipt, TransactionRequest},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    abi::{self, AbiError, ContractAbi, Token},
    WalletProvider,
};

pub const BUY_POLICY: &str = "buyPolicy";
pub const CLAIM_POLICY: &str = "claimPolicy";
pub const FUND_CONTRACT: &str = "fundContract";
pub const POLICY_COUNT: &str = "policyCount";
pub const GET_POLICY: &str = "getPolicy";
pub const INSURER: &str = "insurer";
pub const POLICY_PURCHASED: &str = "PolicyPurchased";
const POLICY_ID_FIELD: &str = "policyId";

const REQUIRED_FUNCTIONS: [&str; 4] = [BUY_POLICY, CLAIM_POLICY, POLICY_COUNT, GET_POLICY];

#[derive(Debug, Error)]
pub enum BindError {
    #[error("Smart contract not deployed on network {0}.")]
    NotDeployed(NetworkId),
    #[error("contract ABI is missing function `{0}`")]
    MissingFunction(&'static str),
    #[error("contract ABI is missing event `{0}`")]
    MissingEvent(&'static str),
}

/// Encoded call to one contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub method: &'static str,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub gas: u64,
    pub gas_price: Wei,
    pub value: Wei,
}

/// Insurance contract bound to one deployment address, reached through the wallet provider.
pub struct ContractHandle {
    address: Address,
    abi: ContractAbi,
    provider: Arc<dyn WalletProvider>,
}

impl ContractHandle {
    pub fn bind(
        descriptor: &ContractDescriptor,
        network_id: NetworkId,
        provider: Arc<dyn WalletProvider>,
    ) -> Result<Self, BindError> {
        let deployment = descriptor
            .deployment(network_id)
            .ok_or(BindError::NotDeployed(network_id))?;
        let abi = ContractAbi::from_entries(&descriptor.abi);
        for name in REQUIRED_FUNCTIONS {
            if abi.function(name).is_none() {
                return Err(BindError::MissingFunction(name));
            }
        }
        if abi.event(POLICY_PURCHASED).is_none() {
            return Err(BindError::MissingEvent(POLICY_PURCHASED));
        }
        Ok(Self {
            address: deployment.address,
            abi,
            provider,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn encode(&self, method: &'static str, tokens: &[Token]) -> Result<ContractCall, RemoteError> {
        let function = self.abi.function(method).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Unclassified,
                format!("contract ABI does not declare `{method}`"),
            )
        })?;
        let data = function
            .encode(tokens)
            .map_err(|err| RemoteError::new(RemoteErrorKind::Unclassified, err.to_string()))?;
        Ok(ContractCall { method, data })
    }

    pub fn buy_policy(&self, payout: Wei) -> Result<ContractCall, RemoteError> {
        self.encode(BUY_POLICY, &[Token::Uint(payout)])
    }

    pub fn claim_policy(&self, policy_id: PolicyId) -> Result<ContractCall, RemoteError> {
        self.encode(CLAIM_POLICY, &[Token::Uint(U256::from(policy_id.0))])
    }

    pub fn fund_contract(&self) -> Result<ContractCall, RemoteError> {
        self.encode(FUND_CONTRACT, &[])
    }

    async fn read(&self, call: ContractCall) -> Result<Vec<u8>, RemoteError> {
        debug!(method = call.method, "contract: read-only call");
        self.provider
            .call(&TransactionRequest {
                to: Some(self.address),
                data: call.data,
                ..TransactionRequest::default()
            })
            .await
    }

    pub async fn policy_count(&self) -> Result<u64, RemoteError> {
        let data = self.read(self.encode(POLICY_COUNT, &[])?).await?;
        let words = abi::expect_words(&data, 1).map_err(|err| decode_error(POLICY_COUNT, err))?;
        abi::decode_u64(&words[0]).map_err(|err| decode_error(POLICY_COUNT, err))
    }

    pub async fn get_policy(&self, policy_id: PolicyId) -> Result<RemotePolicy, RemoteError> {
        let call = self.encode(GET_POLICY, &[Token::Uint(U256::from(policy_id.0))])?;
        let data = self.read(call).await?;
        decode_policy(&data).map_err(|err| decode_error(GET_POLICY, err))
    }

    /// Insurer address, when the ABI exposes it.
    pub async fn insurer(&self) -> Result<Option<Address>, RemoteError> {
        if self.abi.function(INSURER).is_none() {
            return Ok(None);
        }
        let data = self.read(self.encode(INSURER, &[])?).await?;
        let words = abi::expect_words(&data, 1).map_err(|err| decode_error(INSURER, err))?;
        abi::decode_address(&words[0])
            .map(Some)
            .map_err(|err| decode_error(INSURER, err))
    }

    pub async fn balance(&self) -> Result<Wei, RemoteError> {
        self.provider.balance(&self.address).await
    }

    pub async fn estimate_gas(
        &self,
        from: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<u64, RemoteError> {
        self.provider
            .estimate_gas(&TransactionRequest {
                from: Some(*from),
                to: Some(self.address),
                data: call.data.clone(),
                value: (!value.is_zero()).then_some(value),
                ..TransactionRequest::default()
            })
            .await
    }

    pub async fn send(
        &self,
        from: &Address,
        call: &ContractCall,
        options: SendOptions,
    ) -> Result<TransactionReceipt, RemoteError> {
        debug!(
            method = call.method,
            gas = options.gas,
            gas_price = %options.gas_price,
            value = %options.value,
            "contract: submitting transaction"
        );
        self.provider
            .send_transaction(&TransactionRequest {
                from: Some(*from),
                to: Some(self.address),
                data: call.data.clone(),
                value: (!options.value.is_zero()).then_some(options.value),
                gas: Some(options.gas),
                gas_price: Some(options.gas_price),
            })
            .await
    }

    /// Policy id assigned by the `PolicyPurchased` event in a buy receipt.
    pub fn purchased_policy_id(&self, receipt: &TransactionReceipt) -> Option<PolicyId> {
        let event = self.abi.event(POLICY_PURCHASED)?;
        let log = receipt
            .logs
            .iter()
            .find(|log| log.address == self.address && event.matches(log))?;
        let field = event
            .inputs
            .iter()
            .find(|param| param.name.eq_ignore_ascii_case(POLICY_ID_FIELD))
            .or_else(|| event.inputs.iter().find(|param| param.kind == "uint256"))?;
        match event.decode_uint_field(log, &field.name) {
            Ok(id) => u64::try_from(id).ok().map(PolicyId),
            Err(err) => {
                warn!("contract: could not decode {POLICY_PURCHASED} log: {err}");
                None
            }
        }
    }
}

fn decode_policy(data: &[u8]) -> Result<RemotePolicy, AbiError> {
    let words = abi::expect_words(data, 5)?;
    Ok(RemotePolicy {
        holder: abi::decode_address(&words[0])?,
        premium_wei: abi::decode_uint(&words[1]),
        payout_wei: abi::decode_uint(&words[2]),
        active: abi::decode_bool(&words[3])?,
        claimed: abi::decode_bool(&words[4])?,
    })
}

fn decode_error(method: &str, err: AbiError) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Unclassified,
        format!("invalid return data from {method}: {err}"),
    )
}
