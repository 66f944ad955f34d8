//! The settlement ledger as seen by the node: contract mutations, a block
//! number oracle and event queries by block range.

pub mod dev;
mod error;
pub use error::LedgerError;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::IntoStaticStr;

use crate::{
    serde_utils::{U128Hex, U64Hex},
    types::{Address, BlockNumber, ChannelId, Hash256, TokenAddress, TokenAmount},
};

/// Which contract's events to query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// The token registry: one event per registered token.
    Registry,
    /// The channel manager of one token network: channel creations.
    TokenNetwork(TokenAddress),
    /// One channel contract: deposits, close, settle and secret reveals.
    Channel(ChannelId),
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "event")]
pub enum LedgerEventKind {
    TokenAdded {
        token_address: TokenAddress,
        channel_manager_address: Address,
    },
    ChannelNew {
        token_address: TokenAddress,
        channel_id: ChannelId,
        participant1: Address,
        participant2: Address,
        #[serde_as(as = "U64Hex")]
        settle_timeout: BlockNumber,
    },
    ChannelNewBalance {
        token_address: TokenAddress,
        channel_id: ChannelId,
        participant: Address,
        #[serde_as(as = "U128Hex")]
        balance: TokenAmount,
    },
    ChannelClosed {
        token_address: TokenAddress,
        channel_id: ChannelId,
        closing_address: Address,
    },
    ChannelSettled {
        token_address: TokenAddress,
        channel_id: ChannelId,
    },
    ChannelSecretRevealed {
        token_address: TokenAddress,
        channel_id: ChannelId,
        secrethash: Hash256,
        receiver: Address,
    },
}

impl LedgerEventKind {
    pub fn in_scope(&self, scope: &EventScope) -> bool {
        match (scope, self) {
            (EventScope::Registry, LedgerEventKind::TokenAdded { .. }) => true,
            (
                EventScope::TokenNetwork(token),
                LedgerEventKind::ChannelNew { token_address, .. },
            ) => token == token_address,
            (
                EventScope::Channel(id),
                LedgerEventKind::ChannelNewBalance { channel_id, .. }
                | LedgerEventKind::ChannelClosed { channel_id, .. }
                | LedgerEventKind::ChannelSettled { channel_id, .. }
                | LedgerEventKind::ChannelSecretRevealed { channel_id, .. },
            ) => id == channel_id,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEvent {
    pub block_number: BlockNumber,
    pub kind: LedgerEventKind,
}

/// Ledger operations used by the node. Mutations resolve once the ledger
/// has included the transaction, and fail if it was rejected.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// The account that signs our transactions.
    fn address(&self) -> Address;

    async fn current_block_number(&self) -> Result<BlockNumber, LedgerError>;

    /// Registers a token network. Returns its channel manager address.
    async fn register_token(&self, token: TokenAddress) -> Result<Address, LedgerError>;

    /// Opens a channel with `partner`. Returns the channel contract address.
    async fn open_channel(
        &self,
        token: TokenAddress,
        partner: Address,
        settle_timeout: BlockNumber,
    ) -> Result<ChannelId, LedgerError>;

    async fn token_balance_of(
        &self,
        token: TokenAddress,
        holder: Address,
    ) -> Result<TokenAmount, LedgerError>;

    async fn approve(
        &self,
        token: TokenAddress,
        spender: Address,
        amount: TokenAmount,
    ) -> Result<(), LedgerError>;

    /// Adds `amount` to our deposit in the channel.
    async fn deposit(&self, channel_id: ChannelId, amount: TokenAmount)
        -> Result<(), LedgerError>;

    async fn close(&self, channel_id: ChannelId) -> Result<(), LedgerError>;

    async fn settle(&self, channel_id: ChannelId) -> Result<(), LedgerError>;

    /// Events of `scope` mined in `from_block..=to_block`, in block order.
    async fn events(
        &self,
        scope: &EventScope,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;
}
