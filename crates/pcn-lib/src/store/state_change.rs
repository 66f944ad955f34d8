use crate::{
    channel::{HashTimeLock, NetworkStatus},
    ledger::{LedgerEvent, LedgerEventKind},
    types::{Address, BlockNumber, ChannelId, Hash256, PaymentIdentifier, TokenAddress, TokenAmount},
};

/// Inputs of the state-change application pipeline. `Action*` variants come
/// from local requests, `ContractReceive*` from mined ledger events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    Block {
        block_number: BlockNumber,
    },
    ContractReceiveNewTokenNetwork {
        token: TokenAddress,
        manager_address: Address,
    },
    ActionChannelOpen {
        token: TokenAddress,
        partner: Address,
        channel_id: ChannelId,
        settle_timeout: BlockNumber,
        reveal_timeout: BlockNumber,
    },
    ContractReceiveChannelNew {
        token: TokenAddress,
        channel_id: ChannelId,
        participant1: Address,
        participant2: Address,
        settle_timeout: BlockNumber,
        block_number: BlockNumber,
    },
    ContractReceiveChannelNewBalance {
        token: TokenAddress,
        channel_id: ChannelId,
        participant: Address,
        balance: TokenAmount,
        block_number: BlockNumber,
    },
    ActionChannelClose {
        token: TokenAddress,
        channel_id: ChannelId,
    },
    ContractReceiveChannelClosed {
        token: TokenAddress,
        channel_id: ChannelId,
        closing_address: Address,
        block_number: BlockNumber,
    },
    ActionChannelSettleRequested {
        token: TokenAddress,
        channel_id: ChannelId,
        block_number: BlockNumber,
    },
    ContractReceiveChannelSettled {
        token: TokenAddress,
        channel_id: ChannelId,
        block_number: BlockNumber,
    },
    ActionLockCreated {
        token: TokenAddress,
        channel_id: ChannelId,
        sender: Address,
        lock: HashTimeLock,
    },
    ActionLockResolved {
        token: TokenAddress,
        channel_id: ChannelId,
        hashlock: Hash256,
    },
    ContractReceiveSecretReveal {
        token: TokenAddress,
        channel_id: ChannelId,
        hashlock: Hash256,
        block_number: BlockNumber,
    },
    ActionTransferDirect {
        token: TokenAddress,
        receiver: Address,
        amount: TokenAmount,
        identifier: PaymentIdentifier,
    },
    ReceiveTransferDirect {
        token: TokenAddress,
        sender: Address,
        amount: TokenAmount,
        identifier: PaymentIdentifier,
    },
    ActionChangeNodeNetworkState {
        node: Address,
        status: NetworkStatus,
    },
}

impl From<LedgerEvent> for StateChange {
    fn from(event: LedgerEvent) -> Self {
        let block_number = event.block_number;
        match event.kind {
            LedgerEventKind::TokenAdded {
                token_address,
                channel_manager_address,
            } => StateChange::ContractReceiveNewTokenNetwork {
                token: token_address,
                manager_address: channel_manager_address,
            },
            LedgerEventKind::ChannelNew {
                token_address,
                channel_id,
                participant1,
                participant2,
                settle_timeout,
            } => StateChange::ContractReceiveChannelNew {
                token: token_address,
                channel_id,
                participant1,
                participant2,
                settle_timeout,
                block_number,
            },
            LedgerEventKind::ChannelNewBalance {
                token_address,
                channel_id,
                participant,
                balance,
            } => StateChange::ContractReceiveChannelNewBalance {
                token: token_address,
                channel_id,
                participant,
                balance,
                block_number,
            },
            LedgerEventKind::ChannelClosed {
                token_address,
                channel_id,
                closing_address,
            } => StateChange::ContractReceiveChannelClosed {
                token: token_address,
                channel_id,
                closing_address,
                block_number,
            },
            LedgerEventKind::ChannelSettled {
                token_address,
                channel_id,
            } => StateChange::ContractReceiveChannelSettled {
                token: token_address,
                channel_id,
                block_number,
            },
            LedgerEventKind::ChannelSecretRevealed {
                token_address,
                channel_id,
                secrethash,
                ..
            } => StateChange::ContractReceiveSecretReveal {
                token: token_address,
                channel_id,
                hashlock: secrethash,
                block_number,
            },
        }
    }
}
