use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use shared::{
    domain::{Address, NetworkId, PolicyId, Wei},
    error::{ErrorKind, RemoteError, RemoteErrorKind, RevertReason, WorkflowError},
    protocol::{PolicyDraft, ProviderEvent, RemotePolicy, TransactionReceipt, TransactionRequest},
    units::{format_ether, parse_ether},
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{error, info, warn};

pub mod abi;
pub mod contract;
pub mod descriptor;
pub mod drafts;
pub mod rpc;
pub mod session;
pub mod status;

pub use contract::{BindError, ContractHandle};
pub use descriptor::{DescriptorLocation, DescriptorSource};
pub use drafts::{DraftStore, MemoryDraftStore, DRAFT_KEY};
pub use rpc::{EthRpcClient, EthRpcProvider};
pub use session::{SessionChange, SessionContext, SessionEnd, SessionView};
pub use status::{OperationBoard, OperationKind, OperationSnapshot, OperationStatus};

use contract::{ContractCall, SendOptions};
use status::OperationGuard;

pub const INSTALL_WALLET_MESSAGE: &str =
    "Please install a wallet provider to use this application.";
const VALIDATING_INPUT: &str = "Validating input...";
const ESTIMATING_GAS: &str = "Estimating gas...";
const AWAITING_CONFIRMATION: &str = "Please confirm the transaction in your wallet...";
const NO_ACCOUNT_MESSAGE: &str = "No wallet account connected.";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_GAS_MARGIN_PERCENT: u64 = 20;
const DEFAULT_DRAFT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Wallet-side access to accounts, the network and the chain.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn is_available(&self) -> bool;
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteError>;
    async fn accounts(&self) -> Result<Vec<Address>, RemoteError>;
    async fn network_id(&self) -> Result<NetworkId, RemoteError>;
    async fn gas_price(&self) -> Result<Wei, RemoteError>;
    async fn balance(&self, address: &Address) -> Result<Wei, RemoteError>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RemoteError>;
    /// Submits `tx` and resolves once it is mined.
    async fn send_transaction(&self, tx: &TransactionRequest)
        -> Result<TransactionReceipt, RemoteError>;
    async fn call(&self, tx: &TransactionRequest) -> Result<Vec<u8>, RemoteError>;
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

pub struct MissingWalletProvider;

fn missing_provider() -> RemoteError {
    RemoteError::unavailable("no wallet provider available")
}

#[async_trait]
impl WalletProvider for MissingWalletProvider {
    fn is_available(&self) -> bool {
        false
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteError> {
        Err(missing_provider())
    }

    async fn accounts(&self) -> Result<Vec<Address>, RemoteError> {
        Err(missing_provider())
    }

    async fn network_id(&self) -> Result<NetworkId, RemoteError> {
        Err(missing_provider())
    }

    async fn gas_price(&self) -> Result<Wei, RemoteError> {
        Err(missing_provider())
    }

    async fn balance(&self, _address: &Address) -> Result<Wei, RemoteError> {
        Err(missing_provider())
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, RemoteError> {
        Err(missing_provider())
    }

    async fn send_transaction(
        &self,
        _tx: &TransactionRequest,
    ) -> Result<TransactionReceipt, RemoteError> {
        Err(missing_provider())
    }

    async fn call(&self, _tx: &TransactionRequest) -> Result<Vec<u8>, RemoteError> {
        Err(missing_provider())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        broadcast::channel(1).1
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Limit for read-only calls and gas estimates.
    pub call_timeout: Duration,
    /// Limit for a submission, covering wallet confirmation and mining.
    pub confirmation_timeout: Duration,
    pub gas_margin_percent: u64,
    pub draft_max_age: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            gas_margin_percent: DEFAULT_GAS_MARGIN_PERCENT,
            draft_max_age: DEFAULT_DRAFT_MAX_AGE,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    OperationChanged {
        kind: OperationKind,
        snapshot: OperationSnapshot,
    },
    SessionChanged(SessionView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Payout,
    Premium,
    ClaimPolicyId,
    ViewPolicyId,
    FundAmount,
}

impl FormField {
    fn is_draft_field(self) -> bool {
        matches!(self, FormField::Payout | FormField::Premium)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOutcome {
    /// Absent when the receipt carried no `PolicyPurchased` event.
    pub policy_id: Option<PolicyId>,
    pub transaction_hash: String,
    pub policy_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractOverview {
    pub address: Address,
    pub policy_count: u64,
    pub balance: Wei,
    pub insurer: Option<Address>,
}

/// Drives the connect, buy, claim, view and fund workflows and their status lines.
pub struct PolicyController {
    provider: Arc<dyn WalletProvider>,
    descriptors: Arc<dyn DescriptorSource>,
    drafts: Arc<dyn DraftStore>,
    config: ControllerConfig,
    board: OperationBoard,
    form: Mutex<HashMap<FormField, String>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl PolicyController {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        descriptors: Arc<dyn DescriptorSource>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            provider,
            descriptors,
            Arc::new(MemoryDraftStore::default()),
            ControllerConfig::default(),
        )
    }

    pub fn new_with_dependencies(
        provider: Arc<dyn WalletProvider>,
        descriptors: Arc<dyn DescriptorSource>,
        drafts: Arc<dyn DraftStore>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            provider,
            descriptors,
            drafts,
            config,
            board: OperationBoard::new(events.clone()),
            form: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn operation(&self, kind: OperationKind) -> OperationSnapshot {
        self.board.snapshot(kind)
    }

    async fn remote<T>(
        &self,
        limit: Duration,
        what: &str,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(what, limit_secs = limit.as_secs(), "remote call timed out");
                Err(RemoteError::new(
                    RemoteErrorKind::Timeout,
                    format!("{what} timed out after {}s", limit.as_secs()),
                ))
            }
        }
    }

    fn publish_session(&self, session: &SessionContext) {
        let _ = self
            .events
            .send(ControllerEvent::SessionChanged(session.view()));
    }

    /// Connects the wallet, binds the contract and loads the policy count.
    pub async fn bootstrap(&self) -> Result<Arc<SessionContext>, WorkflowError> {
        let mut op = self.board.try_begin(OperationKind::Connect)?;
        if !self.provider.is_available() {
            warn!("bootstrap: no wallet provider present");
            return Err(op.fail(WorkflowError::new(
                ErrorKind::ProviderUnavailable,
                INSTALL_WALLET_MESSAGE,
            )));
        }

        op.processing("Requesting wallet authorization...");
        if let Err(err) = self
            .remote(
                self.config.call_timeout,
                "account authorization",
                self.provider.request_accounts(),
            )
            .await
        {
            warn!("bootstrap: account authorization failed: {err}");
            return Err(op.fail(connect_failure(err)));
        }
        let accounts = match self
            .remote(self.config.call_timeout, "account query", self.provider.accounts())
            .await
        {
            Ok(accounts) => accounts,
            Err(err) => return Err(op.fail(connect_failure(err))),
        };
        let account = accounts.into_iter().next();

        op.processing("Loading contract...");
        let descriptor = match self
            .remote(
                self.config.call_timeout,
                "contract descriptor load",
                self.descriptors.load(),
            )
            .await
        {
            Ok(descriptor) => descriptor,
            Err(err) => return Err(op.fail(connect_failure(err))),
        };
        let network_id = match self
            .remote(self.config.call_timeout, "network query", self.provider.network_id())
            .await
        {
            Ok(network_id) => network_id,
            Err(err) => return Err(op.fail(connect_failure(err))),
        };
        let contract =
            match ContractHandle::bind(&descriptor, network_id, Arc::clone(&self.provider)) {
                Ok(contract) => contract,
                Err(err @ BindError::NotDeployed(_)) => {
                    warn!(network_id = network_id.0, "bootstrap: {err}");
                    return Err(op.fail(WorkflowError::new(
                        ErrorKind::NetworkMismatch,
                        err.to_string(),
                    )));
                }
                Err(err) => {
                    error!("bootstrap: contract descriptor rejected: {err}");
                    return Err(op.fail(WorkflowError::new(
                        ErrorKind::Unclassified,
                        format!("Error connecting to wallet: {err}"),
                    )));
                }
            };

        let events = BroadcastStream::new(self.provider.subscribe());
        let session = Arc::new(SessionContext::new(
            account,
            network_id,
            contract,
            events,
        ));
        self.refresh_policy_count(&session).await;

        info!(
            account = ?account,
            network_id = network_id.0,
            contract = %session.contract().address(),
            policy_count = ?session.policy_count(),
            "bootstrap: session ready"
        );
        op.succeed(match &account {
            Some(account) => format!("Connected as {account}."),
            None => "Connected, but no wallet account is authorized.".to_string(),
        });
        self.publish_session(&session);
        Ok(session)
    }

    /// Applies provider events to `session` until the network changes or the provider goes away.
    pub async fn follow_session(&self, session: &SessionContext) -> SessionEnd {
        let Some(mut stream) = session.take_event_stream() else {
            warn!("session: provider events already consumed");
            return SessionEnd::ProviderClosed;
        };
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "session: provider event stream lagged; re-reading provider state");
                    match self.resync_event(session).await {
                        Some(event) => event,
                        None => {
                            self.board.reset();
                            return SessionEnd::ReloadRequired(session.network_id());
                        }
                    }
                }
            };
            match session.apply_event(&event) {
                SessionChange::ReloadRequired(network_id) => {
                    self.board.reset();
                    return SessionEnd::ReloadRequired(network_id);
                }
                SessionChange::AccountChanged(_) | SessionChange::Disconnected => {
                    self.publish_session(session);
                }
            }
        }
        SessionEnd::ProviderClosed
    }

    /// Provider state that may have been lost with skipped events. `None` when it cannot be read.
    async fn resync_event(&self, session: &SessionContext) -> Option<ProviderEvent> {
        let limit = self.config.call_timeout;
        let network_id = self
            .remote(limit, "network id", self.provider.network_id())
            .await
            .ok()?;
        if network_id != session.network_id() {
            return Some(ProviderEvent::NetworkChanged(network_id));
        }
        let accounts = self
            .remote(limit, "accounts", self.provider.accounts())
            .await
            .ok()?;
        Some(ProviderEvent::AccountsChanged(accounts))
    }

    pub async fn set_field(&self, field: FormField, value: impl Into<String>) {
        let draft = {
            let mut form = self.form.lock().await;
            form.insert(field, value.into());
            field.is_draft_field().then(|| PolicyDraft {
                payout: form.get(&FormField::Payout).cloned().unwrap_or_default(),
                premium: form.get(&FormField::Premium).cloned().unwrap_or_default(),
                timestamp: Utc::now(),
            })
        };
        if let Some(draft) = draft {
            if let Err(err) = self.drafts.save_draft(&draft).await {
                warn!("draft: failed to persist policy draft: {err:#}");
            }
        }
    }

    pub async fn field(&self, field: FormField) -> String {
        self.form
            .lock()
            .await
            .get(&field)
            .cloned()
            .unwrap_or_default()
    }

    async fn clear_fields(&self, fields: &[FormField]) {
        let mut form = self.form.lock().await;
        for field in fields {
            form.remove(field);
        }
    }

    /// Refills the buy form from a saved draft younger than the configured max age.
    pub async fn restore_draft(&self) -> anyhow::Result<Option<PolicyDraft>> {
        let Some(draft) = self.drafts.load_draft().await? else {
            return Ok(None);
        };
        let expired = Utc::now()
            .signed_duration_since(draft.timestamp)
            .to_std()
            .map(|age| age > self.config.draft_max_age)
            .unwrap_or(false);
        if expired {
            info!(saved_at = %draft.timestamp, "draft: discarding expired policy draft");
            self.drafts.clear_draft().await?;
            return Ok(None);
        }

        let mut form = self.form.lock().await;
        form.insert(FormField::Payout, draft.payout.clone());
        form.insert(FormField::Premium, draft.premium.clone());
        Ok(Some(draft))
    }

    async fn refresh_policy_count(&self, session: &SessionContext) -> Option<u64> {
        match self
            .remote(
                self.config.call_timeout,
                "policy count",
                session.contract().policy_count(),
            )
            .await
        {
            Ok(count) => {
                session.set_policy_count(count);
                Some(count)
            }
            Err(err) => {
                warn!("failed to load policy count: {err}");
                None
            }
        }
    }

    async fn submit(
        &self,
        op: &mut OperationGuard<'_>,
        session: &SessionContext,
        from: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<TransactionReceipt, RemoteError> {
        op.processing(ESTIMATING_GAS);
        let gas_price = self
            .remote(self.config.call_timeout, "gas price query", self.provider.gas_price())
            .await?;
        let estimate = self
            .remote(
                self.config.call_timeout,
                "gas estimate",
                session.contract().estimate_gas(from, call, value),
            )
            .await?;
        let gas = with_margin(estimate, self.config.gas_margin_percent);

        op.processing(AWAITING_CONFIRMATION);
        let receipt = self
            .remote(
                self.config.confirmation_timeout,
                "transaction confirmation",
                session.contract().send(
                    from,
                    call,
                    SendOptions {
                        gas,
                        gas_price,
                        value,
                    },
                ),
            )
            .await?;
        info!(
            method = call.method,
            tx_hash = %receipt.transaction_hash,
            gas_used = ?receipt.gas_used,
            "transaction mined"
        );
        Ok(receipt)
    }

    pub async fn buy_policy(&self, session: &SessionContext) -> Result<BuyOutcome, WorkflowError> {
        let mut op = self.board.try_begin(OperationKind::Buy)?;
        op.processing(VALIDATING_INPUT);
        let payout = self.field(FormField::Payout).await;
        let premium = self.field(FormField::Premium).await;
        let (payout, premium) = match validate_buy(&payout, &premium) {
            Ok(amounts) => amounts,
            Err(err) => return Err(op.fail(err)),
        };
        let Some(from) = session.account() else {
            return Err(op.fail(no_account()));
        };

        let receipt = match session.contract().buy_policy(payout) {
            Ok(call) => self.submit(&mut op, session, &from, &call, premium).await,
            Err(err) => Err(err),
        };
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!("buy: transaction failed: {err}");
                return Err(op.fail(transaction_failure(err)));
            }
        };

        let policy_id = session.contract().purchased_policy_id(&receipt);
        if policy_id.is_none() {
            warn!(tx_hash = %receipt.transaction_hash, "buy: receipt has no PolicyPurchased event");
        }
        let policy_count = self.refresh_policy_count(session).await;
        self.clear_fields(&[FormField::Payout, FormField::Premium])
            .await;
        if let Err(err) = self.drafts.clear_draft().await {
            warn!("draft: failed to delete policy draft: {err:#}");
        }

        op.succeed(match policy_id {
            Some(id) => format!("Policy purchased successfully! Policy ID: {id}"),
            None => "Policy purchased successfully!".to_string(),
        });
        self.publish_session(session);
        Ok(BuyOutcome {
            policy_id,
            transaction_hash: receipt.transaction_hash,
            policy_count,
        })
    }

    pub async fn claim_policy(&self, session: &SessionContext) -> Result<PolicyId, WorkflowError> {
        let mut op = self.board.try_begin(OperationKind::Claim)?;
        op.processing(VALIDATING_INPUT);
        let raw = self.field(FormField::ClaimPolicyId).await;
        let policy_id = match parse_policy_id(&raw) {
            Ok(policy_id) => policy_id,
            Err(err) => return Err(op.fail(err)),
        };
        let Some(from) = session.account() else {
            return Err(op.fail(no_account()));
        };

        let result = match session.contract().claim_policy(policy_id) {
            Ok(call) => {
                self.submit(&mut op, session, &from, &call, Wei::ZERO)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(policy_id = policy_id.0, "claim: transaction failed: {err}");
            return Err(op.fail(claim_failure(err)));
        }

        self.clear_fields(&[FormField::ClaimPolicyId]).await;
        op.succeed(format!("Policy {policy_id} claimed successfully!"));
        Ok(policy_id)
    }

    pub async fn view_policy(&self, session: &SessionContext) -> Result<RemotePolicy, WorkflowError> {
        let mut op = self.board.try_begin(OperationKind::View)?;
        op.processing(VALIDATING_INPUT);
        let raw = self.field(FormField::ViewPolicyId).await;
        let requested = match parse_policy_number(&raw) {
            Ok(requested) => requested,
            Err(err) => return Err(op.fail(err)),
        };

        op.processing("Loading policy...");
        let count = match self
            .remote(
                self.config.call_timeout,
                "policy count",
                session.contract().policy_count(),
            )
            .await
        {
            Ok(count) => count,
            Err(err) => return Err(op.fail(view_failure(err))),
        };
        session.set_policy_count(count);
        if count == 0 {
            return Err(op.fail(invalid_input("No policies have been purchased yet.")));
        }
        if requested == 0 || requested > count {
            return Err(op.fail(invalid_input(format!(
                "Invalid policy ID. Valid range: 1-{count}"
            ))));
        }

        let policy_id = PolicyId(requested);
        let policy = match self
            .remote(
                self.config.call_timeout,
                "policy lookup",
                session.contract().get_policy(policy_id),
            )
            .await
        {
            Ok(policy) => policy,
            Err(err) => {
                warn!(policy_id = requested, "view: policy lookup failed: {err}");
                return Err(op.fail(view_failure(err)));
            }
        };
        op.succeed(render_policy(policy_id, &policy));
        Ok(policy)
    }

    pub async fn fund_contract(&self, session: &SessionContext) -> Result<Wei, WorkflowError> {
        let mut op = self.board.try_begin(OperationKind::Fund)?;
        op.processing(VALIDATING_INPUT);
        let raw = self.field(FormField::FundAmount).await;
        let amount = match validate_fund_amount(&raw) {
            Ok(amount) => amount,
            Err(err) => return Err(op.fail(err)),
        };
        let Some(from) = session.account() else {
            return Err(op.fail(no_account()));
        };

        let result = match session.contract().fund_contract() {
            Ok(call) => self.submit(&mut op, session, &from, &call, amount).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("fund: transaction failed: {err}");
            return Err(op.fail(transaction_failure(err)));
        }

        self.clear_fields(&[FormField::FundAmount]).await;
        op.succeed(format!("Contract funded with {} ETH.", format_ether(amount)));
        Ok(amount)
    }

    /// Policy count, contract balance and insurer, read without touching any status line.
    pub async fn contract_overview(
        &self,
        session: &SessionContext,
    ) -> Result<ContractOverview, WorkflowError> {
        let contract = session.contract();
        let limit = self.config.call_timeout;
        let policy_count = self
            .remote(limit, "policy count", contract.policy_count())
            .await
            .map_err(read_failure)?;
        session.set_policy_count(policy_count);
        let balance = self
            .remote(limit, "contract balance", contract.balance())
            .await
            .map_err(read_failure)?;
        let insurer = self
            .remote(limit, "insurer lookup", contract.insurer())
            .await
            .map_err(read_failure)?;
        Ok(ContractOverview {
            address: contract.address(),
            policy_count,
            balance,
            insurer,
        })
    }
}

pub fn render_policy(policy_id: PolicyId, policy: &RemotePolicy) -> String {
    format!(
        "Policy ID: {policy_id}\nHolder: {}\nPremium: {} ETH\nPayout: {} ETH\nActive: {}\nClaimed: {}",
        policy.holder,
        format_ether(policy.premium_wei),
        format_ether(policy.payout_wei),
        policy.active,
        policy.claimed,
    )
}

fn with_margin(estimate: u64, margin_percent: u64) -> u64 {
    let padded = u128::from(estimate) * u128::from(100 + margin_percent) / 100;
    u64::try_from(padded).unwrap_or(u64::MAX)
}

fn invalid_input(message: impl Into<String>) -> WorkflowError {
    WorkflowError::new(ErrorKind::UserInputInvalid, message)
}

fn no_account() -> WorkflowError {
    WorkflowError::new(ErrorKind::UserInputInvalid, NO_ACCOUNT_MESSAGE)
}

fn validate_buy(payout: &str, premium: &str) -> Result<(Wei, Wei), WorkflowError> {
    if payout.trim().is_empty() || premium.trim().is_empty() {
        return Err(invalid_input("Please enter both payout and premium amounts."));
    }
    let payout = parse_ether(payout)
        .map_err(|err| invalid_input(format!("Invalid payout amount: {err}.")))?;
    let premium = parse_ether(premium)
        .map_err(|err| invalid_input(format!("Invalid premium amount: {err}.")))?;
    if payout < premium {
        return Err(invalid_input(
            "Payout amount must be greater than or equal to the premium.",
        ));
    }
    Ok((payout, premium))
}

fn validate_fund_amount(raw: &str) -> Result<Wei, WorkflowError> {
    let amount = parse_ether(raw)
        .map_err(|_| invalid_input("Please enter an amount greater than zero."))?;
    if amount.is_zero() {
        return Err(invalid_input("Please enter an amount greater than zero."));
    }
    Ok(amount)
}

fn parse_policy_number(raw: &str) -> Result<u64, WorkflowError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid_input("Please enter a policy ID."));
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| invalid_input("Please enter a valid policy ID (a positive whole number)."))
}

fn parse_policy_id(raw: &str) -> Result<PolicyId, WorkflowError> {
    match parse_policy_number(raw)? {
        0 => Err(invalid_input(
            "Please enter a valid policy ID (a positive whole number).",
        )),
        id => Ok(PolicyId(id)),
    }
}

fn error_kind(kind: &RemoteErrorKind) -> ErrorKind {
    match kind {
        RemoteErrorKind::UserRejected => ErrorKind::UserRejected,
        RemoteErrorKind::InsufficientFunds
        | RemoteErrorKind::Reverted(RevertReason::ContractInsufficientFunds) => {
            ErrorKind::RemoteInsufficientFunds
        }
        RemoteErrorKind::Reverted(_) => ErrorKind::RemoteRevert,
        RemoteErrorKind::Timeout => ErrorKind::Timeout,
        RemoteErrorKind::OutOfGas | RemoteErrorKind::Transport | RemoteErrorKind::Unclassified => {
            ErrorKind::Unclassified
        }
    }
}

fn connect_failure(err: RemoteError) -> WorkflowError {
    let message = match err.kind {
        RemoteErrorKind::UserRejected => "Wallet authorization was rejected.".to_string(),
        _ => format!("Error connecting to wallet: {}", err.message),
    };
    WorkflowError::new(error_kind(&err.kind), message)
}

fn transaction_failure(err: RemoteError) -> WorkflowError {
    let message = match err.kind {
        RemoteErrorKind::UserRejected => "Transaction cancelled by user.".to_string(),
        RemoteErrorKind::InsufficientFunds => {
            "Insufficient funds to pay the premium and gas.".to_string()
        }
        _ => format!("Transaction failed: {}", err.message),
    };
    WorkflowError::new(error_kind(&err.kind), message)
}

fn claim_failure(err: RemoteError) -> WorkflowError {
    let message = match &err.kind {
        RemoteErrorKind::UserRejected => "Claim cancelled by user.".to_string(),
        RemoteErrorKind::Reverted(RevertReason::NotHolder) => {
            "Only the policy holder can claim this policy.".to_string()
        }
        RemoteErrorKind::Reverted(RevertReason::AlreadyClaimed) => {
            "This policy has already been claimed.".to_string()
        }
        RemoteErrorKind::Reverted(RevertReason::NotActive) => {
            "This policy is not active.".to_string()
        }
        RemoteErrorKind::Reverted(RevertReason::ContractInsufficientFunds) => {
            "The contract does not have enough funds to pay this claim.".to_string()
        }
        _ => format!("Claim failed: {}", err.message),
    };
    WorkflowError::new(error_kind(&err.kind), message)
}

fn view_failure(err: RemoteError) -> WorkflowError {
    let message = match err.kind {
        RemoteErrorKind::Reverted(_) => "Invalid or nonexistent policy ID.".to_string(),
        RemoteErrorKind::OutOfGas => "Request ran out of gas. Please retry.".to_string(),
        _ => format!("Error: {}", err.message),
    };
    WorkflowError::new(error_kind(&err.kind), message)
}

fn read_failure(err: RemoteError) -> WorkflowError {
    WorkflowError::new(error_kind(&err.kind), format!("Error: {}", err.message))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
