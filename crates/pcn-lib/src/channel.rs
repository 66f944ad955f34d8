use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::{AsRefStr, Display};

use crate::{
    serde_utils::{U128Hex, U64Hex},
    types::{Address, BlockNumber, ChannelId, Hash256, TokenAddress, TokenAmount},
};

/// Lifecycle of a channel. Variants are declared in lifecycle order and a
/// channel only ever moves to a later variant.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    /// The open transaction was submitted but its ledger event is not processed yet.
    Opening,
    Open,
    /// A close was requested locally. The ledger has not confirmed it yet.
    Closing,
    Closed,
    Settled,
}

impl ChannelStatus {
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        next > self
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ChannelStatus::Closed | ChannelStatus::Settled)
    }
}

/// A hash-locked amount waiting for its secret.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTimeLock {
    #[serde_as(as = "U128Hex")]
    pub amount: TokenAmount,
    #[serde_as(as = "U64Hex")]
    pub expiration: BlockNumber,
    pub hashlock: Hash256,
}

/// One participant's side of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEndState {
    pub address: Address,
    /// Total amount deposited into the channel contract. Never decreases
    /// while the channel is open.
    pub contract_balance: TokenAmount,
    pub nonce: u64,
    /// Sum of everything this participant has sent off-chain so far.
    pub transferred_amount: TokenAmount,
    pub locks: BTreeMap<Hash256, HashTimeLock>,
}

impl ChannelEndState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            contract_balance: 0,
            nonce: 0,
            transferred_amount: 0,
            locks: BTreeMap::new(),
        }
    }

    pub fn locked_amount(&self) -> TokenAmount {
        self.locks.values().map(|lock| lock.amount).sum()
    }

    /// Off-chain balance of this side, given what the other side has sent us.
    pub fn balance(&self, other: &ChannelEndState) -> TokenAmount {
        (self.contract_balance + other.transferred_amount).saturating_sub(self.transferred_amount)
    }

    /// What this side can still send without touching locked amounts.
    pub fn distributable(&self, other: &ChannelEndState) -> TokenAmount {
        self.balance(other).saturating_sub(self.locked_amount())
    }
}

/// Binds a channel to its ledger contract: the observed lifecycle blocks.
/// The contract itself is reached through the channel id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelExternalState {
    pub opened_block: Option<BlockNumber>,
    pub closed_block: Option<BlockNumber>,
    pub closing_address: Option<Address>,
    pub settle_requested_block: Option<BlockNumber>,
    pub settled_block: Option<BlockNumber>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub token: TokenAddress,
    pub our_state: ChannelEndState,
    pub partner_state: ChannelEndState,
    pub reveal_timeout: BlockNumber,
    pub settle_timeout: BlockNumber,
    pub status: ChannelStatus,
    pub external_state: ChannelExternalState,
}

impl ChannelState {
    pub fn new(
        channel_id: ChannelId,
        token: TokenAddress,
        our_address: Address,
        partner: Address,
        settle_timeout: BlockNumber,
        reveal_timeout: BlockNumber,
        status: ChannelStatus,
    ) -> Self {
        Self {
            channel_id,
            token,
            our_state: ChannelEndState::new(our_address),
            partner_state: ChannelEndState::new(partner),
            reveal_timeout,
            settle_timeout,
            status,
            external_state: ChannelExternalState::default(),
        }
    }

    pub fn partner(&self) -> Address {
        self.partner_state.address
    }

    pub fn end_state(&self, participant: &Address) -> Option<&ChannelEndState> {
        if &self.our_state.address == participant {
            Some(&self.our_state)
        } else if &self.partner_state.address == participant {
            Some(&self.partner_state)
        } else {
            None
        }
    }

    pub fn end_state_mut(&mut self, participant: &Address) -> Option<&mut ChannelEndState> {
        if &self.our_state.address == participant {
            Some(&mut self.our_state)
        } else if &self.partner_state.address == participant {
            Some(&mut self.partner_state)
        } else {
            None
        }
    }

    pub fn our_balance(&self) -> TokenAmount {
        self.our_state.balance(&self.partner_state)
    }

    pub fn partner_balance(&self) -> TokenAmount {
        self.partner_state.balance(&self.our_state)
    }

    pub fn our_distributable(&self) -> TokenAmount {
        self.our_state.distributable(&self.partner_state)
    }

    pub fn outstanding_locks(&self) -> usize {
        self.our_state.locks.len() + self.partner_state.locks.len()
    }

    /// Moves the channel forward in its lifecycle. Returns false, leaving the
    /// channel untouched, when `next` is not ahead of the current status.
    pub fn advance(&mut self, next: ChannelStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// The block from which a settle transaction is accepted by the ledger.
    pub fn settle_window_end(&self) -> Option<BlockNumber> {
        self.external_state
            .closed_block
            .map(|closed| closed.saturating_add(self.settle_timeout))
    }

    pub fn is_settle_window_expired(&self, block_number: BlockNumber) -> bool {
        self.status == ChannelStatus::Closed
            && self
                .settle_window_end()
                .is_some_and(|end| block_number >= end)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}
