use std::time::Duration;

use thiserror::Error;

use crate::{
    channel::ChannelStatus,
    ledger::LedgerError,
    types::{Address, BlockNumber, ChannelId, PaymentIdentifier, TokenAddress, TokenAmount},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid address: {0}")]
    InvalidAddress(Address),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error(
        "Invalid settle timeout: settle_timeout {settle_timeout} must be larger than reveal_timeout {reveal_timeout}"
    )]
    InvalidSettleTimeout {
        settle_timeout: BlockNumber,
        reveal_timeout: BlockNumber,
    },
    #[error("Invalid settle timeout: settle_timeout {settle_timeout} exceeds the maximum of {maximum}")]
    SettleTimeoutTooLarge {
        settle_timeout: BlockNumber,
        maximum: BlockNumber,
    },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Unknown token address: {0}")]
    UnknownTokenAddress(TokenAddress),
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),
    #[error("No channel with partner {partner} for token {token}")]
    NoChannelWithPartner {
        token: TokenAddress,
        partner: Address,
    },
    #[error("Channel {channel_id} with partner {partner} already exists for token {token}")]
    ChannelAlreadyExists {
        token: TokenAddress,
        partner: Address,
        channel_id: ChannelId,
    },
    #[error("Channel {0} is busy with another operation")]
    ChannelBusy(ChannelId),
    #[error("Insufficient funds of token {token}: available {available}, requested {requested}")]
    InsufficientFunds {
        token: TokenAddress,
        available: TokenAmount,
        requested: TokenAmount,
    },
    #[error("Channel {channel_id} is {status}")]
    InvalidChannelState {
        channel_id: ChannelId,
        status: ChannelStatus,
    },
    #[error("Token {0} is already registered")]
    AlreadyRegisteredToken(TokenAddress),
    #[error("Ledger communication timed out after {elapsed:?} waiting for {operation}")]
    LedgerCommunicationTimeout {
        operation: &'static str,
        elapsed: Duration,
    },
    #[error("Transfer {identifier} failed: {reason}")]
    TransferFailed {
        identifier: PaymentIdentifier,
        reason: String,
    },
    #[error("Transfer {identifier} did not complete within {elapsed:?}")]
    TransferTimeout {
        identifier: PaymentIdentifier,
        elapsed: Duration,
    },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(anyhow::Error),
}

impl Error {
    /// Errors raised before anything was submitted to the ledger.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress(_)
                | Error::InvalidAmount(_)
                | Error::InvalidSettleTimeout { .. }
                | Error::SettleTimeoutTooLarge { .. }
                | Error::InvalidParameter(_)
                | Error::UnknownTokenAddress(_)
                | Error::ChannelNotFound(_)
                | Error::NoChannelWithPartner { .. }
                | Error::ChannelAlreadyExists { .. }
                | Error::ChannelBusy(_)
                | Error::InsufficientFunds { .. }
                | Error::InvalidChannelState { .. }
        )
    }

    /// The ledger mutation was submitted but its confirmation was not
    /// observed. It may still land later.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, Error::LedgerCommunicationTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
