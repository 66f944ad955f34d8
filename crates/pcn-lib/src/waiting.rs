//! Waiting for ledger mutations to show up in the local state.
//!
//! A wait re-evaluates its predicate against the latest snapshot each time a
//! new block is announced, and on a fixed safety tick in case the block
//! source stalls. Timing out only abandons the wait; whatever was submitted
//! to the ledger stays submitted.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    channel::ChannelStatus,
    store::{ChannelStateStore, NodeSnapshot},
    types::{Address, BlockNumber, ChannelId, TokenAddress, TokenAmount},
    Error, Result,
};

/// Broadcasts the number of each block once its events are applied.
#[derive(Clone, Debug)]
pub struct BlockNotifier {
    sender: Arc<watch::Sender<BlockNumber>>,
}

impl Default for BlockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockNotifier {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn notify(&self, block_number: BlockNumber) {
        self.sender.send_replace(block_number);
    }

    pub fn subscribe(&self) -> watch::Receiver<BlockNumber> {
        self.sender.subscribe()
    }
}

/// The point in time an operation must be confirmed by.
#[derive(Copy, Clone, Debug)]
pub struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started + timeout,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn timed_out(&self, operation: &'static str) -> Error {
        Error::LedgerCommunicationTimeout {
            operation,
            elapsed: self.at.saturating_duration_since(self.started),
        }
    }

    /// Runs `fut` to completion unless the deadline passes first.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.at, fut).await.map_err(|_| {
            warn!(operation, "Ledger call did not complete in time");
            self.timed_out(operation)
        })
    }
}

#[derive(Clone)]
pub struct ConfirmationWaiter {
    store: Arc<ChannelStateStore>,
    blocks: watch::Receiver<BlockNumber>,
    poll_interval: Duration,
}

impl ConfirmationWaiter {
    pub fn new(
        store: Arc<ChannelStateStore>,
        blocks: watch::Receiver<BlockNumber>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            blocks,
            poll_interval,
        }
    }

    pub async fn wait_for<P>(
        &self,
        operation: &'static str,
        timeout: Duration,
        predicate: P,
    ) -> Result<()>
    where
        P: Fn(&NodeSnapshot) -> bool,
    {
        self.wait_until(operation, Deadline::after(timeout), predicate)
            .await
    }

    pub async fn wait_until<P>(
        &self,
        operation: &'static str,
        deadline: Deadline,
        predicate: P,
    ) -> Result<()>
    where
        P: Fn(&NodeSnapshot) -> bool,
    {
        match tokio::time::timeout_at(deadline.instant(), self.confirmed(predicate)).await {
            Ok(()) => {
                debug!(operation, "Confirmed");
                Ok(())
            }
            Err(_) => {
                warn!(operation, "Confirmation not observed before the deadline");
                Err(deadline.timed_out(operation))
            }
        }
    }

    /// Waits for `predicate` with no time bound. Only for conditions the
    /// chain itself is guaranteed to reach, like a block height.
    pub async fn wait_unbounded<P>(&self, operation: &'static str, predicate: P)
    where
        P: Fn(&NodeSnapshot) -> bool,
    {
        self.confirmed(predicate).await;
        debug!(operation, "Confirmed");
    }

    async fn confirmed<P>(&self, predicate: P)
    where
        P: Fn(&NodeSnapshot) -> bool,
    {
        let mut blocks = self.blocks.clone();
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut block_source_alive = true;
        loop {
            if predicate(&self.store.snapshot()) {
                return;
            }
            tokio::select! {
                changed = blocks.changed(), if block_source_alive => {
                    if changed.is_err() {
                        // Fall back to the safety tick alone.
                        block_source_alive = false;
                    }
                }
                _ = tick.tick() => {}
            }
        }
    }
}

/// The open of a channel with `partner` has been confirmed by the ledger.
pub fn channel_exists(
    token: TokenAddress,
    partner: Address,
) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| {
        snapshot
            .channel_by_partner(&token, &partner)
            .is_some_and(|channel| channel.status >= ChannelStatus::Open)
    }
}

pub fn participant_balance_at_least(
    token: TokenAddress,
    partner: Address,
    target_address: Address,
    target_balance: TokenAmount,
) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| {
        snapshot
            .channel_by_partner(&token, &partner)
            .and_then(|channel| channel.end_state(&target_address))
            .is_some_and(|end| end.contract_balance >= target_balance)
    }
}

/// Every channel is closed or settled. A channel the store no longer knows
/// counts as closed.
pub fn channel_closed(channel_ids: Vec<ChannelId>) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| {
        channel_ids.iter().all(|channel_id| {
            snapshot
                .channel_by_id(channel_id)
                .map_or(true, |channel| channel.status.is_closed())
        })
    }
}

pub fn channel_settled(channel_ids: Vec<ChannelId>) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| {
        channel_ids.iter().all(|channel_id| {
            snapshot
                .channel_by_id(channel_id)
                .map_or(true, |channel| channel.status == ChannelStatus::Settled)
        })
    }
}

pub fn token_registered(token: TokenAddress) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| snapshot.is_token_registered(&token)
}

pub fn block_at_least(block_number: BlockNumber) -> impl Fn(&NodeSnapshot) -> bool {
    move |snapshot| snapshot.block_number() >= block_number
}
