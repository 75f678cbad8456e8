use super::*;
use crate::{
    abi::{ContractAbi, Token},
    contract::{BUY_POLICY, CLAIM_POLICY, FUND_CONTRACT, GET_POLICY, INSURER, POLICY_COUNT, POLICY_PURCHASED},
};
use alloy_primitives::{B256, U256};
use shared::protocol::{ContractDescriptor, LogEntry};
use std::sync::{Mutex as StdMutex, MutexGuard};
use tokio::sync::Notify;

const CONTRACT: &str = "0x1111111111111111111111111111111111111111";
const HOLDER: &str = "0x2222222222222222222222222222222222222222";
const OTHER: &str = "0x3333333333333333333333333333333333333333";
const INSURER_ADDR: &str = "0x4444444444444444444444444444444444444444";
const NETWORK: u64 = 5777;
const GAS_ESTIMATE: u64 = 100_000;
const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

fn addr(raw: &str) -> Address {
    raw.parse().expect("address")
}

fn wei(value: u128) -> Wei {
    Wei::from(value)
}

fn insurance_descriptor() -> ContractDescriptor {
    serde_json::from_value(serde_json::json!({
        "contractName": "Insurance",
        "abi": [
            {"type": "function", "name": "buyPolicy", "stateMutability": "payable",
             "inputs": [{"name": "_payout", "type": "uint256"}], "outputs": []},
            {"type": "function", "name": "claimPolicy", "stateMutability": "nonpayable",
             "inputs": [{"name": "_policyId", "type": "uint256"}], "outputs": []},
            {"type": "function", "name": "fundContract", "stateMutability": "payable",
             "inputs": [], "outputs": []},
            {"type": "function", "name": "policyCount", "stateMutability": "view",
             "inputs": [], "outputs": [{"name": "", "type": "uint256"}]},
            {"type": "function", "name": "getPolicy", "stateMutability": "view",
             "inputs": [{"name": "_policyId", "type": "uint256"}],
             "outputs": [
                {"name": "holder", "type": "address"},
                {"name": "premium", "type": "uint256"},
                {"name": "payout", "type": "uint256"},
                {"name": "active", "type": "bool"},
                {"name": "claimed", "type": "bool"}
             ]},
            {"type": "function", "name": "insurer", "stateMutability": "view",
             "inputs": [], "outputs": [{"name": "", "type": "address"}]},
            {"type": "event", "name": "PolicyPurchased", "anonymous": false,
             "inputs": [
                {"name": "policyId", "type": "uint256", "indexed": true},
                {"name": "holder", "type": "address", "indexed": true},
                {"name": "premium", "type": "uint256", "indexed": false},
                {"name": "payout", "type": "uint256", "indexed": false}
             ]}
        ],
        "networks": {
            "5777": {"address": CONTRACT}
        }
    }))
    .expect("descriptor")
}

struct StaticDescriptor(ContractDescriptor);

#[async_trait]
impl DescriptorSource for StaticDescriptor {
    async fn load(&self) -> Result<shared::protocol::ContractDescriptor, RemoteError> {
        Ok(self.0.clone())
    }
}

struct ChainState {
    accounts: Vec<Address>,
    network_id: u64,
    authorize_error: Option<RemoteError>,
    policies: Vec<RemotePolicy>,
    contract_balance: Wei,
    sender_insufficient: bool,
    reject_sends: bool,
    emit_purchase_event: bool,
    stall_gas_price: bool,
    calls: Vec<String>,
    last_send: Option<TransactionRequest>,
    tx_counter: u64,
}

/// In-memory insurance contract behind a wallet provider.
struct FakeChain {
    abi: ContractAbi,
    contract: Address,
    state: StdMutex<ChainState>,
    send_gate: Option<Arc<Notify>>,
    send_started: Arc<Notify>,
    events: broadcast::Sender<ProviderEvent>,
}

impl FakeChain {
    fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            abi: ContractAbi::from_entries(&insurance_descriptor().abi),
            contract: addr(CONTRACT),
            state: StdMutex::new(ChainState {
                accounts: vec![addr(HOLDER)],
                network_id: NETWORK,
                authorize_error: None,
                policies: Vec::new(),
                contract_balance: Wei::ZERO,
                sender_insufficient: false,
                reject_sends: false,
                emit_purchase_event: true,
                stall_gas_price: false,
                calls: Vec::new(),
                last_send: None,
                tx_counter: 0,
            }),
            send_gate: None,
            send_started: Arc::new(Notify::new()),
            events,
        }
    }

    fn with_send_gate(mut self) -> Self {
        self.send_gate = Some(Arc::new(Notify::new()));
        self
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("chain state")
    }

    fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn release_send(&self) {
        if let Some(gate) = &self.send_gate {
            gate.notify_one();
        }
    }

    fn seed_policy(&self, holder: &str, premium: u128, payout: u128) {
        self.state().policies.push(RemotePolicy {
            holder: addr(holder),
            premium_wei: wei(premium),
            payout_wei: wei(payout),
            active: true,
            claimed: false,
        });
    }

    fn method(&self, data: &[u8]) -> &'static str {
        [BUY_POLICY, CLAIM_POLICY, FUND_CONTRACT, POLICY_COUNT, GET_POLICY, INSURER]
            .into_iter()
            .find(|name| {
                self.abi
                    .function(name)
                    .is_some_and(|function| data.len() >= 4 && function.selector[..] == data[..4])
            })
            .unwrap_or("unknown")
    }

    fn uint_arg(data: &[u8]) -> U256 {
        let words = abi::expect_words(&data[4..], 1).expect("argument");
        abi::decode_uint(&words[0])
    }

    fn id_arg(data: &[u8]) -> usize {
        let words = abi::expect_words(&data[4..], 1).expect("argument");
        usize::try_from(abi::decode_u64(&words[0]).expect("id argument")).expect("usize id")
    }

    fn execute(
        &self,
        state: &mut ChainState,
        tx: &TransactionRequest,
        commit: bool,
    ) -> Result<Vec<LogEntry>, RemoteError> {
        let from = tx.from.expect("sender");
        let value = tx.value.unwrap_or_default();
        if state.sender_insufficient {
            return Err(RemoteError::new(
                RemoteErrorKind::InsufficientFunds,
                "sender doesn't have enough funds to send tx",
            ));
        }
        match self.method(&tx.data) {
            BUY_POLICY => {
                let payout = Self::uint_arg(&tx.data);
                if value.is_zero() {
                    return Err(RemoteError::reverted("Premium must be greater than zero"));
                }
                if !commit {
                    return Ok(Vec::new());
                }
                state.policies.push(RemotePolicy {
                    holder: from,
                    premium_wei: value,
                    payout_wei: payout,
                    active: true,
                    claimed: false,
                });
                state.contract_balance += value;
                let id = U256::from(state.policies.len());
                let event = self.abi.event(POLICY_PURCHASED).expect("event");
                let mut data = abi::encode_word(&Token::Uint(value)).to_vec();
                data.extend_from_slice(&abi::encode_word(&Token::Uint(payout)));
                Ok(vec![LogEntry {
                    address: self.contract,
                    topics: vec![
                        event.topic,
                        B256::from(abi::encode_word(&Token::Uint(id))),
                        B256::from(abi::encode_word(&Token::Address(from))),
                    ],
                    data,
                }])
            }
            CLAIM_POLICY => {
                let id = Self::id_arg(&tx.data);
                let balance = state.contract_balance;
                let policy = id
                    .checked_sub(1)
                    .and_then(|index| state.policies.get_mut(index))
                    .ok_or_else(|| RemoteError::reverted("Invalid policy ID"))?;
                if policy.holder != from {
                    return Err(RemoteError::reverted("Only policy holder can claim"));
                }
                if policy.claimed {
                    return Err(RemoteError::reverted("Policy has already been claimed"));
                }
                if !policy.active {
                    return Err(RemoteError::reverted("Policy is not active"));
                }
                if balance < policy.payout_wei {
                    return Err(RemoteError::reverted("Insufficient contract balance"));
                }
                if commit {
                    policy.claimed = true;
                    policy.active = false;
                    state.contract_balance -= policy.payout_wei;
                }
                Ok(Vec::new())
            }
            FUND_CONTRACT => {
                if commit {
                    state.contract_balance += value;
                }
                Ok(Vec::new())
            }
            other => Err(RemoteError::reverted(format!("no fallback for {other}"))),
        }
    }
}

#[async_trait]
impl WalletProvider for FakeChain {
    fn is_available(&self) -> bool {
        true
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteError> {
        let mut state = self.state();
        state.calls.push("eth_requestAccounts".into());
        match state.authorize_error.clone() {
            Some(err) => Err(err),
            None => Ok(state.accounts.clone()),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, RemoteError> {
        let mut state = self.state();
        state.calls.push("eth_accounts".into());
        Ok(state.accounts.clone())
    }

    async fn network_id(&self) -> Result<NetworkId, RemoteError> {
        let mut state = self.state();
        state.calls.push("net_version".into());
        Ok(NetworkId(state.network_id))
    }

    async fn gas_price(&self) -> Result<Wei, RemoteError> {
        let stall = {
            let mut state = self.state();
            state.calls.push("eth_gasPrice".into());
            state.stall_gas_price
        };
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(wei(20_000_000_000))
    }

    async fn balance(&self, address: &Address) -> Result<Wei, RemoteError> {
        let mut state = self.state();
        state.calls.push("eth_getBalance".into());
        if *address == self.contract {
            Ok(state.contract_balance)
        } else {
            Ok(wei(100 * ONE_ETHER))
        }
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RemoteError> {
        let mut state = self.state();
        let method = self.method(&tx.data);
        state.calls.push(format!("estimate:{method}"));
        self.execute(&mut state, tx, false)?;
        Ok(GAS_ESTIMATE)
    }

    async fn send_transaction(
        &self,
        tx: &TransactionRequest,
    ) -> Result<TransactionReceipt, RemoteError> {
        self.send_started.notify_one();
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        let mut state = self.state();
        let method = self.method(&tx.data);
        state.calls.push(format!("send:{method}"));
        state.last_send = Some(tx.clone());
        if state.reject_sends {
            return Err(RemoteError::new(
                RemoteErrorKind::UserRejected,
                "MetaMask Tx Signature: User denied transaction signature.",
            ));
        }
        let logs = self.execute(&mut state, tx, true)?;
        state.tx_counter += 1;
        let logs = if state.emit_purchase_event {
            logs
        } else {
            Vec::new()
        };
        Ok(TransactionReceipt {
            transaction_hash: format!("0x{:064x}", state.tx_counter),
            status: true,
            gas_used: Some(GAS_ESTIMATE),
            logs,
        })
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.state();
        let method = self.method(&tx.data);
        state.calls.push(format!("call:{method}"));
        match method {
            POLICY_COUNT => {
                Ok(abi::encode_word(&Token::Uint(U256::from(state.policies.len()))).to_vec())
            }
            GET_POLICY => {
                let id = Self::id_arg(&tx.data);
                let policy = id
                    .checked_sub(1)
                    .and_then(|index| state.policies.get(index))
                    .ok_or_else(|| RemoteError::reverted("Invalid policy ID"))?;
                let mut data = Vec::new();
                for token in [
                    Token::Address(policy.holder),
                    Token::Uint(policy.premium_wei),
                    Token::Uint(policy.payout_wei),
                    Token::Bool(policy.active),
                    Token::Bool(policy.claimed),
                ] {
                    data.extend_from_slice(&abi::encode_word(&token));
                }
                Ok(data)
            }
            INSURER => Ok(abi::encode_word(&Token::Address(addr(INSURER_ADDR))).to_vec()),
            other => Err(RemoteError::reverted(format!("unknown view {other}"))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn controller_for(chain: &Arc<FakeChain>) -> Arc<PolicyController> {
    PolicyController::new(
        Arc::clone(chain) as Arc<dyn WalletProvider>,
        Arc::new(StaticDescriptor(insurance_descriptor())),
    )
}

async fn connected(chain: &Arc<FakeChain>) -> (Arc<PolicyController>, Arc<SessionContext>) {
    let controller = controller_for(chain);
    let session = controller.bootstrap().await.expect("bootstrap");
    (controller, session)
}

fn drain_statuses(
    rx: &mut broadcast::Receiver<ControllerEvent>,
    kind: OperationKind,
) -> Vec<OperationStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ControllerEvent::OperationChanged { kind: seen, snapshot } = event {
            if seen == kind {
                statuses.push(snapshot.status);
            }
        }
    }
    statuses
}

fn assert_processing_before_terminal(statuses: &[OperationStatus]) {
    let first = statuses.first().expect("at least one status");
    assert!(first.is_processing(), "first status was {first:?}");
    let last = statuses.last().expect("terminal status");
    assert!(last.is_terminal(), "last status was {last:?}");
    assert_eq!(
        statuses.iter().filter(|status| status.is_terminal()).count(),
        1,
        "exactly one terminal status expected: {statuses:?}"
    );
}

#[tokio::test]
async fn bootstrap_without_provider_asks_for_wallet_install() {
    let controller = PolicyController::new(
        Arc::new(MissingWalletProvider),
        Arc::new(StaticDescriptor(insurance_descriptor())),
    );

    let err = controller.bootstrap().await.err().expect("must fail");
    assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
    assert_eq!(err.message, INSTALL_WALLET_MESSAGE);
    assert_eq!(
        controller.operation(OperationKind::Connect).status,
        OperationStatus::Error(INSTALL_WALLET_MESSAGE.to_string())
    );
}

#[tokio::test]
async fn bootstrap_binds_contract_and_loads_policy_count() {
    let chain = Arc::new(FakeChain::new());
    chain.seed_policy(HOLDER, ONE_ETHER / 10, ONE_ETHER);
    let (controller, session) = connected(&chain).await;

    assert_eq!(session.account(), Some(addr(HOLDER)));
    assert_eq!(session.network_id(), NetworkId(NETWORK));
    assert_eq!(session.contract().address(), addr(CONTRACT));
    assert_eq!(session.policy_count(), Some(1));
    assert!(matches!(
        controller.operation(OperationKind::Connect).status,
        OperationStatus::Success(_)
    ));
    assert_eq!(
        chain.calls(),
        vec![
            "eth_requestAccounts",
            "eth_accounts",
            "net_version",
            "call:policyCount"
        ]
    );
}

#[tokio::test]
async fn rejected_authorization_stops_bootstrap() {
    let chain = Arc::new(FakeChain::new());
    chain.state().authorize_error = Some(RemoteError::new(
        RemoteErrorKind::UserRejected,
        "User rejected the request.",
    ));
    let controller = controller_for(&chain);

    let err = controller.bootstrap().await.err().expect("must fail");
    assert_eq!(err.kind, ErrorKind::UserRejected);
    assert_eq!(chain.calls(), vec!["eth_requestAccounts"]);
    assert!(matches!(
        controller.operation(OperationKind::Connect).status,
        OperationStatus::Error(_)
    ));
}

#[tokio::test]
async fn bootstrap_on_undeployed_network_reports_mismatch() {
    let chain = Arc::new(FakeChain::new());
    chain.state().network_id = 1;
    let controller = controller_for(&chain);

    let err = controller.bootstrap().await.err().expect("must fail");
    assert_eq!(err.kind, ErrorKind::NetworkMismatch);
    assert_eq!(err.message, "Smart contract not deployed on network 1.");
    assert!(!chain.calls().iter().any(|call| call.starts_with("call:")));
}

#[tokio::test]
async fn bootstrap_with_no_authorized_accounts_has_no_active_address() {
    let chain = Arc::new(FakeChain::new());
    chain.state().accounts.clear();
    let (controller, session) = connected(&chain).await;
    assert_eq!(session.account(), None);

    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;
    let err = controller.buy_policy(&session).await.err().expect("must fail");
    assert_eq!(err.message, NO_ACCOUNT_MESSAGE);
    assert!(!chain.calls().iter().any(|call| call.starts_with("estimate:")));
}

#[tokio::test]
async fn buy_policy_succeeds_and_increments_count() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    let mut events = controller.subscribe_events();
    assert_eq!(session.policy_count(), Some(0));

    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;
    let outcome = controller.buy_policy(&session).await.expect("buy");

    assert_eq!(outcome.policy_id, Some(PolicyId(1)));
    assert_eq!(outcome.policy_count, Some(1));
    assert_eq!(session.policy_count(), Some(1));
    assert_eq!(
        controller.operation(OperationKind::Buy).status,
        OperationStatus::Success("Policy purchased successfully! Policy ID: 1".to_string())
    );
    assert_eq!(controller.field(FormField::Payout).await, "");
    assert_eq!(controller.field(FormField::Premium).await, "");

    let sent = chain.state().last_send.clone().expect("transaction sent");
    assert_eq!(sent.gas, Some(GAS_ESTIMATE * 120 / 100));
    assert_eq!(sent.value, Some(wei(ONE_ETHER / 10)));
    assert_eq!(sent.gas_price, Some(wei(20_000_000_000)));

    let statuses = drain_statuses(&mut events, OperationKind::Buy);
    assert_processing_before_terminal(&statuses);
    assert_eq!(
        statuses[..3],
        [
            OperationStatus::Processing(VALIDATING_INPUT.to_string()),
            OperationStatus::Processing(ESTIMATING_GAS.to_string()),
            OperationStatus::Processing(AWAITING_CONFIRMATION.to_string()),
        ]
    );
}

#[tokio::test]
async fn buy_policy_with_premium_above_payout_never_touches_network() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    let mut events = controller.subscribe_events();
    let calls_before = chain.calls().len();

    for (payout, premium) in [("0.1", "1"), ("1", "1.000000000000000001"), ("0", "0.5")] {
        controller.set_field(FormField::Payout, payout).await;
        controller.set_field(FormField::Premium, premium).await;
        let err = controller.buy_policy(&session).await.err().expect("must fail");
        assert_eq!(err.kind, ErrorKind::UserInputInvalid);
        assert_eq!(
            err.message,
            "Payout amount must be greater than or equal to the premium."
        );
        let statuses = drain_statuses(&mut events, OperationKind::Buy);
        assert_processing_before_terminal(&statuses);
    }
    assert_eq!(chain.calls().len(), calls_before);
}

#[tokio::test]
async fn buy_policy_requires_both_amounts() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::Payout, "1").await;
    let err = controller.buy_policy(&session).await.err().expect("must fail");
    assert_eq!(err.message, "Please enter both payout and premium amounts.");

    controller.set_field(FormField::Premium, "lots").await;
    let err = controller.buy_policy(&session).await.err().expect("must fail");
    assert_eq!(err.kind, ErrorKind::UserInputInvalid);
    assert!(err.message.starts_with("Invalid premium amount"), "{}", err.message);
}

#[tokio::test]
async fn buy_policy_maps_wallet_failures() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;

    chain.state().reject_sends = true;
    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;
    let err = controller.buy_policy(&session).await.err().expect("rejected");
    assert_eq!(err.kind, ErrorKind::UserRejected);
    assert_eq!(err.message, "Transaction cancelled by user.");
    // fields survive a failed purchase
    assert_eq!(controller.field(FormField::Payout).await, "1");

    {
        let mut state = chain.state();
        state.reject_sends = false;
        state.sender_insufficient = true;
    }
    let err = controller.buy_policy(&session).await.err().expect("no funds");
    assert_eq!(err.kind, ErrorKind::RemoteInsufficientFunds);
    assert_eq!(err.message, "Insufficient funds to pay the premium and gas.");
    assert!(controller.operation(OperationKind::Buy).control_enabled);
}

#[tokio::test]
async fn buy_policy_without_event_reports_success_without_id() {
    let chain = Arc::new(FakeChain::new());
    chain.state().emit_purchase_event = false;
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::Payout, "2").await;
    controller.set_field(FormField::Premium, "0.2").await;
    let outcome = controller.buy_policy(&session).await.expect("buy");
    assert_eq!(outcome.policy_id, None);
    assert_eq!(
        controller.operation(OperationKind::Buy).status,
        OperationStatus::Success("Policy purchased successfully!".to_string())
    );
}

#[tokio::test]
async fn control_stays_disabled_while_submission_is_pending() {
    let chain = Arc::new(FakeChain::new().with_send_gate());
    let (controller, session) = connected(&chain).await;
    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;

    let task = tokio::spawn({
        let controller = Arc::clone(&controller);
        let session = Arc::clone(&session);
        async move { controller.buy_policy(&session).await }
    });
    chain.send_started.notified().await;

    let snapshot = controller.operation(OperationKind::Buy);
    assert!(!snapshot.control_enabled);
    assert_eq!(
        snapshot.status,
        OperationStatus::Processing(AWAITING_CONFIRMATION.to_string())
    );

    let err = controller.buy_policy(&session).await.err().expect("busy");
    assert_eq!(err.kind, ErrorKind::Busy);
    assert!(!controller.operation(OperationKind::Buy).control_enabled);

    chain.release_send();
    let outcome = task.await.expect("join").expect("buy");
    assert_eq!(outcome.policy_id, Some(PolicyId(1)));
    assert!(controller.operation(OperationKind::Buy).control_enabled);
    assert_eq!(
        chain
            .calls()
            .iter()
            .filter(|call| call.as_str() == "send:buyPolicy")
            .count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buys_on_worker_threads_submit_once() {
    let chain = Arc::new(FakeChain::new().with_send_gate());
    let (controller, session) = connected(&chain).await;
    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;

    let spawn_buy = || {
        let controller = Arc::clone(&controller);
        let session = Arc::clone(&session);
        tokio::spawn(async move { controller.buy_policy(&session).await })
    };
    let first = spawn_buy();
    let second = spawn_buy();

    // the admitted buy parks on the send gate, so whichever finishes first was rejected
    while !first.is_finished() && !second.is_finished() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    chain.release_send();
    let results = [first.await.expect("join"), second.await.expect("join")];

    let busy = results
        .iter()
        .filter(|result| matches!(result, Err(err) if err.kind == ErrorKind::Busy))
        .count();
    assert_eq!(busy, 1);
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert_eq!(
        chain
            .calls()
            .iter()
            .filter(|call| call.as_str() == "send:buyPolicy")
            .count(),
        1
    );
    assert_eq!(chain.state().policies.len(), 1);
}

#[tokio::test]
async fn stalled_provider_call_times_out() {
    let chain = Arc::new(FakeChain::new());
    chain.state().stall_gas_price = true;
    let controller = PolicyController::new_with_dependencies(
        Arc::clone(&chain) as Arc<dyn WalletProvider>,
        Arc::new(StaticDescriptor(insurance_descriptor())),
        Arc::new(MemoryDraftStore::default()),
        ControllerConfig {
            call_timeout: Duration::from_millis(50),
            ..ControllerConfig::default()
        },
    );
    let session = controller.bootstrap().await.expect("bootstrap");

    controller.set_field(FormField::Payout, "1").await;
    controller.set_field(FormField::Premium, "0.1").await;
    let err = controller.buy_policy(&session).await.err().expect("timeout");
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(
        err.message.starts_with("Transaction failed: gas price query timed out"),
        "{}",
        err.message
    );
    assert!(controller.operation(OperationKind::Buy).control_enabled);
}

#[tokio::test]
async fn claim_policy_pays_out_once() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    chain.state().contract_balance = wei(5 * ONE_ETHER);
    chain.seed_policy(HOLDER, ONE_ETHER / 10, ONE_ETHER);
    let mut events = controller.subscribe_events();

    controller.set_field(FormField::ClaimPolicyId, "1").await;
    let claimed = controller.claim_policy(&session).await.expect("claim");
    assert_eq!(claimed, PolicyId(1));
    assert_eq!(
        controller.operation(OperationKind::Claim).status,
        OperationStatus::Success("Policy 1 claimed successfully!".to_string())
    );
    assert_eq!(controller.field(FormField::ClaimPolicyId).await, "");
    assert_eq!(chain.state().contract_balance, wei(4 * ONE_ETHER));
    assert_processing_before_terminal(&drain_statuses(&mut events, OperationKind::Claim));

    controller.set_field(FormField::ClaimPolicyId, "1").await;
    let err = controller.claim_policy(&session).await.err().expect("second claim");
    assert_eq!(err.kind, ErrorKind::RemoteRevert);
    assert!(err.message.contains("already been claimed"), "{}", err.message);
    assert_processing_before_terminal(&drain_statuses(&mut events, OperationKind::Claim));
}

#[tokio::test]
async fn claim_policy_maps_contract_rules() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    chain.seed_policy(OTHER, ONE_ETHER / 10, ONE_ETHER);
    chain.seed_policy(HOLDER, ONE_ETHER / 10, ONE_ETHER);

    controller.set_field(FormField::ClaimPolicyId, "1").await;
    let err = controller.claim_policy(&session).await.err().expect("not holder");
    assert_eq!(err.message, "Only the policy holder can claim this policy.");

    controller.set_field(FormField::ClaimPolicyId, "2").await;
    let err = controller.claim_policy(&session).await.err().expect("unfunded");
    assert_eq!(err.kind, ErrorKind::RemoteInsufficientFunds);
    assert_eq!(
        err.message,
        "The contract does not have enough funds to pay this claim."
    );

    chain.state().contract_balance = wei(ONE_ETHER);
    chain.state().policies[1].active = false;
    let err = controller.claim_policy(&session).await.err().expect("inactive");
    assert_eq!(err.message, "This policy is not active.");

    chain.state().policies[1].active = true;
    chain.state().reject_sends = true;
    let err = controller.claim_policy(&session).await.err().expect("rejected");
    assert_eq!(err.message, "Claim cancelled by user.");
}

#[tokio::test]
async fn claim_policy_validates_identifier_before_any_call() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    let calls_before = chain.calls().len();

    let err = controller.claim_policy(&session).await.err().expect("empty");
    assert_eq!(err.message, "Please enter a policy ID.");
    for raw in ["0", "-3", "1.5", "abc"] {
        controller.set_field(FormField::ClaimPolicyId, raw).await;
        let err = controller.claim_policy(&session).await.err().expect("invalid");
        assert_eq!(err.kind, ErrorKind::UserInputInvalid);
        assert_eq!(
            err.message,
            "Please enter a valid policy ID (a positive whole number)."
        );
    }
    assert_eq!(chain.calls().len(), calls_before);
}

#[tokio::test]
async fn view_policy_outside_range_skips_detail_call() {
    let chain = Arc::new(FakeChain::new());
    for _ in 0..3 {
        chain.seed_policy(HOLDER, ONE_ETHER / 10, ONE_ETHER);
    }
    let (controller, session) = connected(&chain).await;

    for raw in ["0", "4"] {
        controller.set_field(FormField::ViewPolicyId, raw).await;
        let err = controller.view_policy(&session).await.err().expect("out of range");
        assert!(err.message.contains("Valid range: 1-3"), "{}", err.message);
    }
    assert!(!chain.calls().contains(&"call:getPolicy".to_string()));
}

#[tokio::test]
async fn view_policy_with_no_policies_says_so() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::ViewPolicyId, "1").await;
    let err = controller.view_policy(&session).await.err().expect("empty");
    assert_eq!(err.message, "No policies have been purchased yet.");
}

#[tokio::test]
async fn view_policy_renders_policy_in_ether() {
    let chain = Arc::new(FakeChain::new());
    chain.seed_policy(HOLDER, ONE_ETHER / 10, ONE_ETHER);
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::ViewPolicyId, " 1 ").await;
    let policy = controller.view_policy(&session).await.expect("view");
    assert_eq!(policy.holder, addr(HOLDER));
    assert_eq!(
        controller.operation(OperationKind::View).status,
        OperationStatus::Success(format!(
            "Policy ID: 1\nHolder: {HOLDER}\nPremium: 0.1 ETH\nPayout: 1 ETH\nActive: true\nClaimed: false"
        ))
    );
}

#[tokio::test]
async fn view_policy_renders_amounts_wider_than_128_bits() {
    let chain = Arc::new(FakeChain::new());
    let premium = parse_ether("1000000000000000000000").expect("premium");
    let payout = parse_ether("2000000000000000000000").expect("payout");
    assert!(premium > Wei::from(u128::MAX));
    chain.state().policies.push(RemotePolicy {
        holder: addr(HOLDER),
        premium_wei: premium,
        payout_wei: payout,
        active: true,
        claimed: false,
    });
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::ViewPolicyId, "1").await;
    let policy = controller.view_policy(&session).await.expect("view");
    assert_eq!(policy.premium_wei, premium);
    assert_eq!(
        controller.operation(OperationKind::View).status.message(),
        Some(
            format!(
                "Policy ID: 1\nHolder: {HOLDER}\nPremium: 1000000000000000000000 ETH\nPayout: 2000000000000000000000 ETH\nActive: true\nClaimed: false"
            )
            .as_str()
        )
    );
}

#[test]
fn view_failures_are_classified() {
    assert_eq!(
        view_failure(RemoteError::reverted("")).message,
        "Invalid or nonexistent policy ID."
    );
    assert_eq!(
        view_failure(RemoteError::new(RemoteErrorKind::OutOfGas, "out of gas")).message,
        "Request ran out of gas. Please retry."
    );
    assert_eq!(
        view_failure(RemoteError::unavailable("connection refused")).message,
        "Error: connection refused"
    );
}

#[test]
fn gas_margin_rounds_down_and_saturates() {
    assert_eq!(with_margin(21_000, 20), 25_200);
    assert_eq!(with_margin(7, 20), 8);
    assert_eq!(with_margin(u64::MAX, 20), u64::MAX);
}

#[tokio::test]
async fn fund_contract_and_overview() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;

    controller.set_field(FormField::FundAmount, "0").await;
    let err = controller.fund_contract(&session).await.err().expect("zero");
    assert_eq!(err.message, "Please enter an amount greater than zero.");

    controller.set_field(FormField::FundAmount, "2.5").await;
    let amount = controller.fund_contract(&session).await.expect("fund");
    assert_eq!(amount, wei(5 * ONE_ETHER / 2));
    assert_eq!(
        controller.operation(OperationKind::Fund).status,
        OperationStatus::Success("Contract funded with 2.5 ETH.".to_string())
    );

    let overview = controller.contract_overview(&session).await.expect("overview");
    assert_eq!(
        overview,
        ContractOverview {
            address: addr(CONTRACT),
            policy_count: 0,
            balance: wei(5 * ONE_ETHER / 2),
            insurer: Some(addr(INSURER_ADDR)),
        }
    );
}

#[tokio::test]
async fn provider_events_update_and_end_session() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;
    let mut events = controller.subscribe_events();

    let follower = tokio::spawn({
        let controller = Arc::clone(&controller);
        let session = Arc::clone(&session);
        async move { controller.follow_session(&session).await }
    });

    let next_view = |events: &mut broadcast::Receiver<ControllerEvent>| {
        let mut events = events.resubscribe();
        async move {
            loop {
                if let ControllerEvent::SessionChanged(view) = events.recv().await.expect("event") {
                    return view;
                }
            }
        }
    };

    let pending = next_view(&mut events);
    chain
        .events
        .send(ProviderEvent::AccountsChanged(vec![addr(OTHER)]))
        .expect("send");
    let view = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("view");
    assert_eq!(view.account, Some(addr(OTHER)));
    assert_eq!(session.account(), Some(addr(OTHER)));

    let pending = next_view(&mut events);
    chain
        .events
        .send(ProviderEvent::AccountsChanged(Vec::new()))
        .expect("send");
    let view = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("view");
    assert_eq!(view.account, None);

    chain
        .events
        .send(ProviderEvent::NetworkChanged(NetworkId(1)))
        .expect("send");
    let end = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower finished")
        .expect("join");
    assert_eq!(end, SessionEnd::ReloadRequired(NetworkId(1)));
    assert_eq!(
        controller.operation(OperationKind::Connect).status,
        OperationStatus::Idle
    );
    assert!(session.take_event_stream().is_none());
}

#[tokio::test]
async fn lagged_event_stream_rereads_network() {
    let chain = Arc::new(FakeChain::new());
    let (controller, session) = connected(&chain).await;

    // the network change is pushed out of the 16-slot buffer by later account events
    chain.state().network_id = 1337;
    chain
        .events
        .send(ProviderEvent::NetworkChanged(NetworkId(1337)))
        .expect("send");
    for _ in 0..20 {
        chain
            .events
            .send(ProviderEvent::AccountsChanged(vec![addr(OTHER)]))
            .expect("send");
    }

    let end = tokio::time::timeout(Duration::from_secs(5), controller.follow_session(&session))
        .await
        .expect("follower finished");
    assert_eq!(end, SessionEnd::ReloadRequired(NetworkId(1337)));
    assert_eq!(
        controller.operation(OperationKind::Connect).status,
        OperationStatus::Idle
    );
}

#[tokio::test]
async fn draft_is_saved_restored_and_cleared_after_purchase() {
    let chain = Arc::new(FakeChain::new());
    let drafts = Arc::new(MemoryDraftStore::default());
    let make = || {
        PolicyController::new_with_dependencies(
            Arc::clone(&chain) as Arc<dyn WalletProvider>,
            Arc::new(StaticDescriptor(insurance_descriptor())),
            Arc::clone(&drafts) as Arc<dyn DraftStore>,
            ControllerConfig::default(),
        )
    };

    let first = make();
    first.set_field(FormField::Payout, "3").await;
    first.set_field(FormField::Premium, "0.3").await;
    let saved = drafts.load_draft().await.expect("load").expect("draft");
    assert_eq!((saved.payout.as_str(), saved.premium.as_str()), ("3", "0.3"));

    let second = make();
    let restored = second.restore_draft().await.expect("restore").expect("draft");
    assert_eq!(restored.payout, "3");
    assert_eq!(second.field(FormField::Premium).await, "0.3");

    let session = second.bootstrap().await.expect("bootstrap");
    second.buy_policy(&session).await.expect("buy");
    assert_eq!(drafts.load_draft().await.expect("load"), None);
}

#[tokio::test]
async fn expired_draft_is_discarded() {
    let chain = Arc::new(FakeChain::new());
    let drafts = Arc::new(MemoryDraftStore::default());
    drafts
        .save_draft(&PolicyDraft {
            payout: "1".into(),
            premium: "0.1".into(),
            timestamp: Utc::now() - chrono::Duration::hours(2),
        })
        .await
        .expect("save");
    let controller = PolicyController::new_with_dependencies(
        chain as Arc<dyn WalletProvider>,
        Arc::new(StaticDescriptor(insurance_descriptor())),
        Arc::clone(&drafts) as Arc<dyn DraftStore>,
        ControllerConfig::default(),
    );

    assert_eq!(controller.restore_draft().await.expect("restore"), None);
    assert_eq!(controller.field(FormField::Payout).await, "");
    assert_eq!(drafts.load_draft().await.expect("load"), None);
}

#[tokio::test]
async fn sqlite_storage_keeps_policy_draft() {
    let storage = storage::Storage::new("sqlite::memory:").await.expect("storage");
    assert_eq!(storage.load_draft().await.expect("load"), None);

    let draft = PolicyDraft {
        payout: "1".into(),
        premium: "0.1".into(),
        timestamp: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    };
    storage.save_draft(&draft).await.expect("save");
    assert_eq!(storage.load_draft().await.expect("load"), Some(draft));
    assert!(storage.load_blob(DRAFT_KEY).await.expect("blob").is_some());

    storage.clear_draft().await.expect("clear");
    assert_eq!(storage.load_draft().await.expect("load"), None);
}
