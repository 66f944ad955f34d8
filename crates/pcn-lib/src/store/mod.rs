//! The node's channel state: immutable snapshots produced by a single
//! serialized writer and read concurrently by any number of callers.

mod state_change;
mod transition;
pub use state_change::StateChange;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use crate::{
    channel::{ChannelState, ChannelStatus, NetworkStatus},
    events::EventLog,
    types::{Address, BlockNumber, ChannelId, TokenAddress},
    Error, Result,
};

/// Entry point of the state-change application pipeline. Submission is
/// fire-and-forget: the effect is observed later through a snapshot.
pub trait StateChangeSink: Send + Sync {
    fn submit(&self, state_change: StateChange);
}

#[derive(Clone, Debug)]
pub struct TokenNetworkState {
    pub token: TokenAddress,
    pub manager_address: Address,
    pub channels: BTreeMap<ChannelId, ChannelState>,
}

impl TokenNetworkState {
    pub fn new(token: TokenAddress, manager_address: Address) -> Self {
        Self {
            token,
            manager_address,
            channels: BTreeMap::new(),
        }
    }

    /// The channel with `partner`. A settled channel is only returned when
    /// no newer channel with the same partner exists.
    pub fn channel_with_partner(&self, partner: &Address) -> Option<&ChannelState> {
        let mut matching = self
            .channels
            .values()
            .filter(|channel| &channel.partner() == partner);
        let first = matching.next()?;
        if first.status != ChannelStatus::Settled {
            return Some(first);
        }
        matching.next().or(Some(first))
    }

    fn channel_with_partner_mut(&mut self, partner: &Address) -> Option<&mut ChannelState> {
        let channel_id = self.channel_with_partner(partner)?.channel_id;
        self.channels.get_mut(&channel_id)
    }

    /// Drops records with `partner` that a new channel supersedes: settled
    /// channels and opens that never confirmed.
    fn remove_stale_channels(&mut self, partner: &Address) {
        self.channels.retain(|_, channel| {
            &channel.partner() != partner
                || !matches!(channel.status, ChannelStatus::Opening | ChannelStatus::Settled)
        });
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeSnapshot {
    our_address: Address,
    default_reveal_timeout: BlockNumber,
    block_number: BlockNumber,
    token_networks: BTreeMap<TokenAddress, TokenNetworkState>,
    network_statuses: HashMap<Address, NetworkStatus>,
}

impl NodeSnapshot {
    pub fn new(our_address: Address, default_reveal_timeout: BlockNumber) -> Self {
        Self {
            our_address,
            default_reveal_timeout,
            ..Default::default()
        }
    }

    pub fn our_address(&self) -> Address {
        self.our_address
    }

    /// The latest block whose ledger events have been applied.
    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn token_network(&self, token: &TokenAddress) -> Option<&TokenNetworkState> {
        self.token_networks.get(token)
    }

    pub fn is_token_registered(&self, token: &TokenAddress) -> bool {
        self.token_networks.contains_key(token)
    }

    pub fn registered_tokens(&self) -> Vec<TokenAddress> {
        self.token_networks.keys().copied().collect()
    }

    /// Tokens the node has at least one channel for.
    pub fn known_tokens(&self) -> BTreeSet<TokenAddress> {
        self.token_networks
            .values()
            .filter(|network| !network.channels.is_empty())
            .map(|network| network.token)
            .collect()
    }

    /// Channels narrowed by token, partner, both or neither.
    pub fn channels(
        &self,
        token: Option<&TokenAddress>,
        partner: Option<&Address>,
    ) -> Vec<ChannelState> {
        self.token_networks
            .values()
            .filter(|network| token.map_or(true, |token| &network.token == token))
            .flat_map(|network| match partner {
                Some(partner) => network.channel_with_partner(partner).into_iter().collect(),
                None => network.channels.values().collect::<Vec<_>>(),
            })
            .cloned()
            .collect()
    }

    pub fn channel_by_id(&self, channel_id: &ChannelId) -> Option<&ChannelState> {
        self.token_networks
            .values()
            .find_map(|network| network.channels.get(channel_id))
    }

    pub fn channel_by_partner(
        &self,
        token: &TokenAddress,
        partner: &Address,
    ) -> Option<&ChannelState> {
        self.token_networks
            .get(token)
            .and_then(|network| network.channel_with_partner(partner))
    }

    pub fn network_status(&self, node: &Address) -> NetworkStatus {
        self.network_statuses.get(node).copied().unwrap_or_default()
    }

    fn channel_mut(
        &mut self,
        token: &TokenAddress,
        channel_id: &ChannelId,
    ) -> Option<&mut ChannelState> {
        self.token_networks
            .get_mut(token)
            .and_then(|network| network.channels.get_mut(channel_id))
    }
}

pub struct ChannelStateStore {
    snapshot: watch::Sender<Arc<NodeSnapshot>>,
    writer: Mutex<()>,
    event_log: Arc<EventLog>,
}

impl ChannelStateStore {
    pub fn new(our_address: Address, default_reveal_timeout: BlockNumber) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(NodeSnapshot::new(
            our_address,
            default_reveal_timeout,
        )));
        Self {
            snapshot,
            writer: Mutex::new(()),
            event_log: Arc::new(EventLog::new()),
        }
    }

    pub fn event_log(&self) -> Arc<EventLog> {
        self.event_log.clone()
    }

    /// The current snapshot. It never changes after it is returned.
    pub fn snapshot(&self) -> Arc<NodeSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<NodeSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn our_address(&self) -> Address {
        self.snapshot().our_address()
    }

    pub fn block_number(&self) -> BlockNumber {
        self.snapshot().block_number()
    }

    pub fn channels(
        &self,
        token: Option<&TokenAddress>,
        partner: Option<&Address>,
    ) -> Vec<ChannelState> {
        self.snapshot().channels(token, partner)
    }

    pub fn channel_by_id(&self, channel_id: &ChannelId) -> Result<ChannelState> {
        self.snapshot()
            .channel_by_id(channel_id)
            .cloned()
            .ok_or(Error::ChannelNotFound(*channel_id))
    }

    pub fn known_tokens(&self) -> BTreeSet<TokenAddress> {
        self.snapshot().known_tokens()
    }
}

impl StateChangeSink for ChannelStateStore {
    fn submit(&self, state_change: StateChange) {
        let _writer = self.writer.lock().expect("state writer poisoned");
        let mut events = Vec::new();
        self.snapshot.send_modify(|snapshot| {
            events = Arc::make_mut(snapshot).apply(state_change);
        });
        self.event_log.record(events);
    }
}
