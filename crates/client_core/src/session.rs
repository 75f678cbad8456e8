use std::sync::{Mutex, PoisonError, RwLock};

use serde::Serialize;
use shared::{
    domain::{Address, NetworkId},
    protocol::ProviderEvent,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::contract::ContractHandle;

/// Effect of one provider event on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    AccountChanged(Address),
    Disconnected,
    /// The network moved; the session must be discarded and rebuilt.
    ReloadRequired(NetworkId),
}

/// How `PolicyController::follow_session` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    ReloadRequired(NetworkId),
    ProviderClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub account: Option<Address>,
    pub network_id: NetworkId,
    pub contract: Address,
    pub policy_count: Option<u64>,
}

/// Connected wallet session, passed explicitly to every policy operation.
pub struct SessionContext {
    account: RwLock<Option<Address>>,
    network_id: NetworkId,
    contract: ContractHandle,
    policy_count: RwLock<Option<u64>>,
    events: Mutex<Option<BroadcastStream<ProviderEvent>>>,
}

impl SessionContext {
    pub(crate) fn new(
        account: Option<Address>,
        network_id: NetworkId,
        contract: ContractHandle,
        events: BroadcastStream<ProviderEvent>,
    ) -> Self {
        Self {
            account: RwLock::new(account),
            network_id,
            contract,
            policy_count: RwLock::new(None),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn account(&self) -> Option<Address> {
        *self.account.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn policy_count(&self) -> Option<u64> {
        *self
            .policy_count
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_policy_count(&self, count: u64) {
        *self
            .policy_count
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(count);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            account: self.account(),
            network_id: self.network_id,
            contract: self.contract.address(),
            policy_count: self.policy_count(),
        }
    }

    /// Provider notifications for this session. Yields the stream once.
    pub fn take_event_stream(&self) -> Option<BroadcastStream<ProviderEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn apply_event(&self, event: &ProviderEvent) -> SessionChange {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let next = accounts.first().copied();
                *self.account.write().unwrap_or_else(PoisonError::into_inner) = next;
                match next {
                    Some(account) => {
                        info!(account = %account, "session: active account changed");
                        SessionChange::AccountChanged(account)
                    }
                    None => {
                        info!("session: wallet disconnected");
                        SessionChange::Disconnected
                    }
                }
            }
            ProviderEvent::NetworkChanged(network_id) => {
                info!(
                    from = self.network_id.0,
                    to = network_id.0,
                    "session: network changed, reload required"
                );
                SessionChange::ReloadRequired(*network_id)
            }
        }
    }
}
