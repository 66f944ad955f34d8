use std::sync::Arc;

use ractor::{concurrency::Duration, Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelStatus,
    ledger::{EventScope, LedgerClient, LedgerError},
    store::{ChannelStateStore, StateChange, StateChangeSink},
    tasks::TaskSupervisor,
    types::{BlockNumber, ChannelId},
    waiting::BlockNotifier,
};

/// Follows the ledger: turns mined events into state changes, announces
/// every processed block and settles channels whose settle window expired.
pub struct ChainWatcherActor;

pub struct ChainWatcherArguments {
    pub ledger: Arc<dyn LedgerClient>,
    pub pipeline: Arc<dyn StateChangeSink>,
    pub store: Arc<ChannelStateStore>,
    pub notifier: BlockNotifier,
    pub supervisor: TaskSupervisor,
    /// The watcher polls the ledger; there is no push subscription.
    pub polling_interval: Duration,
}

pub struct ChainWatcherState {
    ledger: Arc<dyn LedgerClient>,
    pipeline: Arc<dyn StateChangeSink>,
    store: Arc<ChannelStateStore>,
    notifier: BlockNotifier,
    supervisor: TaskSupervisor,
    last_processed_block: BlockNumber,
}

#[derive(Debug)]
pub enum ChainWatcherMessage {
    Poll,
    GetLastProcessedBlock(RpcReplyPort<BlockNumber>),
}

#[ractor::async_trait]
impl Actor for ChainWatcherActor {
    type Msg = ChainWatcherMessage;
    type State = ChainWatcherState;
    type Arguments = ChainWatcherArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        arguments: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        myself.send_interval(arguments.polling_interval, || ChainWatcherMessage::Poll);
        Ok(ChainWatcherState {
            ledger: arguments.ledger,
            pipeline: arguments.pipeline,
            store: arguments.store,
            notifier: arguments.notifier,
            supervisor: arguments.supervisor,
            last_processed_block: 0,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ChainWatcherMessage::Poll => {
                if let Err(err) = state.poll().await {
                    // Nothing is marked processed, the next poll retries the range.
                    warn!("Failed to poll ledger events: {}", err);
                }
            }
            ChainWatcherMessage::GetLastProcessedBlock(reply) => {
                let _ = reply.send(state.last_processed_block);
            }
        }
        Ok(())
    }
}

impl ChainWatcherState {
    async fn poll(&mut self) -> Result<(), LedgerError> {
        let current = self.ledger.current_block_number().await?;
        if current <= self.last_processed_block {
            return Ok(());
        }
        let from = self.last_processed_block + 1;

        // Registry first so that new token networks are known before their
        // channels, and channels before their balances.
        self.submit_events(&EventScope::Registry, from, current)
            .await?;
        for token in self.store.snapshot().registered_tokens() {
            self.submit_events(&EventScope::TokenNetwork(token), from, current)
                .await?;
        }
        let channel_ids: Vec<ChannelId> = self
            .store
            .channels(None, None)
            .into_iter()
            .filter(|channel| channel.status != ChannelStatus::Settled)
            .map(|channel| channel.channel_id)
            .collect();
        for channel_id in channel_ids {
            self.submit_events(&EventScope::Channel(channel_id), from, current)
                .await?;
        }

        self.pipeline.submit(StateChange::Block {
            block_number: current,
        });
        self.last_processed_block = current;
        self.notifier.notify(current);
        debug!(block_number = current, "Processed block");
        self.on_new_block(current);
        Ok(())
    }

    async fn submit_events(
        &self,
        scope: &EventScope,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<(), LedgerError> {
        for event in self.ledger.events(scope, from, to).await? {
            debug!(block_number = event.block_number, ?scope, "Ledger event: {:?}", event.kind);
            self.pipeline.submit(event.into());
        }
        Ok(())
    }

    /// Block tick of every channel: settle the ones whose window is over.
    fn on_new_block(&self, block_number: BlockNumber) {
        let expired = self
            .store
            .channels(None, None)
            .into_iter()
            .filter(|channel| {
                channel.is_settle_window_expired(block_number)
                    && channel.external_state.settle_requested_block.is_none()
            });
        for channel in expired {
            let channel_id = channel.channel_id;
            self.pipeline.submit(StateChange::ActionChannelSettleRequested {
                token: channel.token,
                channel_id,
                block_number,
            });
            let ledger = self.ledger.clone();
            self.supervisor.spawn("settle-channel", async move {
                match ledger.settle(channel_id).await {
                    Ok(()) => info!(channel_id = %channel_id, "Channel settle mined"),
                    Err(err) => error!(channel_id = %channel_id, "Failed to settle channel: {}", err),
                }
            });
        }
    }
}
