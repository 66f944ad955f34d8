use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    channel::ChannelStatus,
    events::{EventLog, InternalEvent},
    serde_utils::{U128Hex, U64Hex},
    store::{StateChange, StateChangeSink},
    types::{Address, ChannelId, PaymentIdentifier, TokenAddress, TokenAmount},
    Error, Result,
};

/// Why a transfer could not be carried by any channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("no route to {target}")]
    NoRoute { target: Address },
    #[error("channel {channel_id} is {status}")]
    ChannelNotOpen {
        channel_id: ChannelId,
        status: ChannelStatus,
    },
    #[error("insufficient capacity: available {available}, requested {requested}")]
    InsufficientCapacity {
        available: TokenAmount,
        requested: TokenAmount,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: TokenAddress,
    pub amount: TokenAmount,
    pub target: Address,
    pub identifier: PaymentIdentifier,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    #[serde_as(as = "U64Hex")]
    pub identifier: PaymentIdentifier,
    pub token: TokenAddress,
    pub target: Address,
    #[serde_as(as = "U128Hex")]
    pub amount: TokenAmount,
}

/// Carries a payment to its target. Routing over multiple hops lives behind
/// this seam.
#[async_trait::async_trait]
pub trait TransferService: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome>;
}

/// A transfer still in flight. Resolves once the outcome is recorded.
pub struct TransferHandle {
    identifier: PaymentIdentifier,
    receiver: oneshot::Receiver<Result<TransferOutcome>>,
}

impl TransferHandle {
    pub fn spawn(service: Arc<dyn TransferService>, request: TransferRequest) -> Self {
        let identifier = request.identifier;
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            // The caller may have dropped the handle.
            let _ = sender.send(service.transfer(request).await);
        });
        Self {
            identifier,
            receiver,
        }
    }

    pub fn identifier(&self) -> PaymentIdentifier {
        self.identifier
    }

    pub async fn wait(self) -> Result<TransferOutcome> {
        let identifier = self.identifier;
        self.receiver.await.map_err(|_| {
            Error::InternalError(anyhow::anyhow!(
                "transfer {} task ended without a result",
                identifier
            ))
        })?
    }
}

/// Single-hop transfers over a channel held directly with the target.
pub struct DirectTransferService {
    pipeline: Arc<dyn StateChangeSink>,
    event_log: Arc<EventLog>,
}

impl DirectTransferService {
    pub fn new(pipeline: Arc<dyn StateChangeSink>, event_log: Arc<EventLog>) -> Self {
        Self {
            pipeline,
            event_log,
        }
    }
}

#[async_trait::async_trait]
impl TransferService for DirectTransferService {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let TransferRequest {
            token,
            amount,
            target,
            identifier,
        } = request;
        debug!(identifier, target = %target, amount, "Sending direct transfer");
        let recorded_before = self.event_log.len();
        self.pipeline.submit(StateChange::ActionTransferDirect {
            token,
            receiver: target,
            amount,
            identifier,
        });
        let outcome = self
            .event_log
            .wait_for(recorded_before, |recorded| match &recorded.event {
                InternalEvent::EventTransferSentSuccess {
                    identifier: id, ..
                } if *id == identifier => Some(Ok(())),
                InternalEvent::EventTransferSentFailed {
                    identifier: id,
                    reason,
                    ..
                } if *id == identifier => Some(Err(reason.clone())),
                _ => None,
            })
            .await;
        match outcome {
            Ok(()) => {
                info!(identifier, target = %target, amount, "Direct transfer sent");
                Ok(TransferOutcome {
                    identifier,
                    token,
                    target,
                    amount,
                })
            }
            Err(reason) => Err(Error::TransferFailed { identifier, reason }),
        }
    }
}
