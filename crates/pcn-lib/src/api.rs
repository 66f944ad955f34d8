//! The node's public operations. Every mutating call validates against the
//! local state, takes the locks of the channels it touches, submits the
//! ledger transaction and then waits until the chain watcher has reconciled
//! the result into the store.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelState, ChannelStatus, NetworkStatus},
    connection::ConnectionManager,
    events::{EventProjection, EventRecord},
    ledger::{EventScope, LedgerClient},
    lock_manager::ChannelLockManager,
    store::{ChannelStateStore, NodeSnapshot, StateChange, StateChangeSink},
    transfer::{TransferHandle, TransferOutcome, TransferRequest, TransferService},
    types::{Address, BlockNumber, ChannelId, PaymentIdentifier, TokenAddress, TokenAmount},
    waiting::{self, ConfirmationWaiter, Deadline},
    Error, NodeConfig, Result, MAX_SETTLE_TIMEOUT,
};

pub struct NodeApi {
    config: NodeConfig,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<ChannelStateStore>,
    pipeline: Arc<dyn StateChangeSink>,
    locks: ChannelLockManager,
    waiter: ConfirmationWaiter,
    transfers: Arc<dyn TransferService>,
    events: EventProjection,
    connections: ConnectionManager,
}

impl NodeApi {
    pub fn new(
        config: &NodeConfig,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<ChannelStateStore>,
        pipeline: Arc<dyn StateChangeSink>,
        locks: ChannelLockManager,
        waiter: ConfirmationWaiter,
        transfers: Arc<dyn TransferService>,
    ) -> Self {
        let events = EventProjection::new(ledger.clone(), store.event_log());
        Self {
            config: config.clone(),
            ledger,
            store,
            pipeline,
            locks,
            waiter,
            transfers,
            events,
            connections: ConnectionManager::default(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn our_address(&self) -> Address {
        self.store.our_address()
    }

    pub fn store(&self) -> &Arc<ChannelStateStore> {
        &self.store
    }

    pub fn locks(&self) -> &ChannelLockManager {
        &self.locks
    }

    pub(crate) fn waiter(&self) -> &ConfirmationWaiter {
        &self.waiter
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.poll_timeout())
    }

    /// Registers the token network of `token` and returns its channel
    /// manager address.
    pub async fn register_token(&self, token: TokenAddress) -> Result<Address> {
        ensure_address(&token)?;
        if self.store.snapshot().is_token_registered(&token) {
            return Err(Error::AlreadyRegisteredToken(token));
        }
        info!(token = %token, "Registering token");
        let deadline = self.deadline();
        match deadline
            .run("register_token", self.ledger.register_token(token))
            .await?
        {
            Ok(manager_address) => {
                self.waiter
                    .wait_until("register_token", deadline, waiting::token_registered(token))
                    .await?;
                info!(token = %token, manager = %manager_address, "Token registered");
                Ok(manager_address)
            }
            Err(err) => {
                // A concurrent registration of the same token also makes ours
                // fail. Give its event one block to be processed.
                warn!(token = %token, "Token registration failed: {}", err);
                let next_block = self.store.block_number() + 1;
                self.waiter
                    .wait_for(
                        "register_token",
                        self.config.poll_timeout(),
                        waiting::block_at_least(next_block),
                    )
                    .await?;
                if self.store.snapshot().is_token_registered(&token) {
                    Err(Error::AlreadyRegisteredToken(token))
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Opens a channel with `partner`. Timeouts fall back to the configured
    /// defaults.
    pub async fn open(
        &self,
        token: TokenAddress,
        partner: Address,
        settle_timeout: Option<BlockNumber>,
        reveal_timeout: Option<BlockNumber>,
    ) -> Result<ChannelState> {
        let settle_timeout = settle_timeout.unwrap_or(self.config.settle_timeout());
        let reveal_timeout = reveal_timeout.unwrap_or(self.config.reveal_timeout());
        ensure_address(&token)?;
        ensure_address(&partner)?;
        if partner == self.our_address() {
            return Err(Error::InvalidAddress(partner));
        }
        if reveal_timeout >= settle_timeout {
            return Err(Error::InvalidSettleTimeout {
                settle_timeout,
                reveal_timeout,
            });
        }
        if settle_timeout > MAX_SETTLE_TIMEOUT {
            return Err(Error::SettleTimeoutTooLarge {
                settle_timeout,
                maximum: MAX_SETTLE_TIMEOUT,
            });
        }
        let snapshot = self.store.snapshot();
        ensure_registered(&snapshot, &token)?;
        if let Some(existing) = snapshot.channel_by_partner(&token, &partner) {
            if !matches!(existing.status, ChannelStatus::Opening | ChannelStatus::Settled) {
                return Err(Error::ChannelAlreadyExists {
                    token,
                    partner,
                    channel_id: existing.channel_id,
                });
            }
        }

        info!(token = %token, partner = %partner, settle_timeout, reveal_timeout, "Opening channel");
        let deadline = self.deadline();
        let channel_id = deadline
            .run(
                "open_channel",
                self.ledger.open_channel(token, partner, settle_timeout),
            )
            .await??;
        self.pipeline.submit(StateChange::ActionChannelOpen {
            token,
            partner,
            channel_id,
            settle_timeout,
            reveal_timeout,
        });
        self.waiter
            .wait_until(
                "open_channel",
                deadline,
                waiting::channel_exists(token, partner),
            )
            .await?;
        info!(channel_id = %channel_id, "Channel opened");
        self.store.channel_by_id(&channel_id)
    }

    /// Adds `amount` to our deposit in the channel with `partner`.
    pub async fn deposit(
        &self,
        token: TokenAddress,
        partner: Address,
        amount: TokenAmount,
    ) -> Result<ChannelState> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "deposit amount must be positive".to_string(),
            ));
        }
        let channel = self.channel_with_partner(&token, &partner)?;
        ensure_open(&channel)?;
        let our_address = self.our_address();
        let deadline = self.deadline();
        let available = deadline
            .run(
                "token_balance_of",
                self.ledger.token_balance_of(token, our_address),
            )
            .await??;
        if available < amount {
            return Err(Error::InsufficientFunds {
                token,
                available,
                requested: amount,
            });
        }

        let _guard = self.locks.try_lock(&channel.channel_id)?;
        // Someone may have closed the channel while we queried the balance.
        let channel = self.store.channel_by_id(&channel.channel_id)?;
        ensure_open(&channel)?;
        let target_balance = channel
            .our_state
            .contract_balance
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount(format!("deposit amount {} overflows", amount)))?;

        info!(channel_id = %channel.channel_id, amount, "Depositing into channel");
        deadline
            .run(
                "approve",
                self.ledger.approve(token, channel.channel_id, amount),
            )
            .await??;
        deadline
            .run("deposit", self.ledger.deposit(channel.channel_id, amount))
            .await??;
        self.waiter
            .wait_until(
                "deposit",
                deadline,
                waiting::participant_balance_at_least(token, partner, our_address, target_balance),
            )
            .await?;
        info!(channel_id = %channel.channel_id, balance = target_balance, "Deposit confirmed");
        self.store.channel_by_id(&channel.channel_id)
    }

    pub async fn close(&self, token: TokenAddress, partner: Address) -> Result<ChannelState> {
        let channel = self.channel_with_partner(&token, &partner)?;
        let _guard = self.locks.try_lock(&channel.channel_id)?;
        let mut closed = self.close_locked(token, &[channel.channel_id]).await?;
        closed.pop().ok_or(Error::ChannelNotFound(channel.channel_id))
    }

    /// Closes the channels with every partner in `partners`. Either all of
    /// them are locked and closed, or none is touched.
    pub async fn batch_close(
        &self,
        token: TokenAddress,
        partners: Vec<Address>,
    ) -> Result<Vec<ChannelState>> {
        let snapshot = self.store.snapshot();
        ensure_registered(&snapshot, &token)?;
        let mut seen = HashSet::new();
        let channel_ids = partners
            .iter()
            .map(|partner| {
                snapshot
                    .channel_by_partner(&token, partner)
                    .map(|channel| channel.channel_id)
                    .ok_or(Error::NoChannelWithPartner {
                        token,
                        partner: *partner,
                    })
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|channel_id| seen.insert(*channel_id))
            .collect::<Vec<_>>();
        let _guard = self.locks.acquire_all_or_none(&channel_ids)?;
        self.close_locked(token, &channel_ids).await
    }

    /// Closes channels whose locks the caller holds. A channel left CLOSING
    /// by an earlier failed or unconfirmed close can be closed again.
    async fn close_locked(
        &self,
        token: TokenAddress,
        channel_ids: &[ChannelId],
    ) -> Result<Vec<ChannelState>> {
        let mut open_ids = Vec::new();
        for channel_id in channel_ids {
            let channel = self.store.channel_by_id(channel_id)?;
            ensure_closable(&channel)?;
            if channel.status == ChannelStatus::Open {
                open_ids.push(*channel_id);
            }
        }
        for channel_id in open_ids {
            info!(channel_id = %channel_id, "Closing channel");
            self.pipeline.submit(StateChange::ActionChannelClose { token, channel_id });
        }
        let deadline = self.deadline();
        let results = deadline
            .run(
                "close_channel",
                join_all(channel_ids.iter().map(|channel_id| self.ledger.close(*channel_id))),
            )
            .await?;
        let failed = channel_ids
            .iter()
            .zip(results)
            .find_map(|(channel_id, result)| result.err().map(|err| (*channel_id, err)));
        if let Some((channel_id, err)) = failed {
            // An earlier close of ours may have been mined meanwhile. Give
            // its event one block to be processed.
            warn!(channel_id = %channel_id, "Failed to close channel: {}", err);
            let next_block = self.store.block_number() + 1;
            self.waiter
                .wait_until(
                    "close_channel",
                    deadline,
                    waiting::block_at_least(next_block),
                )
                .await?;
            if !waiting::channel_closed(channel_ids.to_vec())(&self.store.snapshot()) {
                return Err(err.into());
            }
        }
        self.waiter
            .wait_until(
                "close_channel",
                deadline,
                waiting::channel_closed(channel_ids.to_vec()),
            )
            .await?;
        channel_ids
            .iter()
            .map(|channel_id| self.store.channel_by_id(channel_id))
            .collect()
    }

    /// Opens channels in the token network of `token` with up to
    /// `initial_channel_target` partners and funds them from `funds`.
    pub async fn connect(
        &self,
        token: TokenAddress,
        funds: TokenAmount,
        initial_channel_target: Option<usize>,
        joinable_funds_target: Option<f64>,
    ) -> Result<Vec<ChannelState>> {
        let initial_channel_target =
            initial_channel_target.unwrap_or(self.config.initial_channel_target());
        let joinable_funds_target =
            joinable_funds_target.unwrap_or(self.config.joinable_funds_target());
        self.connections
            .connect(self, token, funds, initial_channel_target, joinable_funds_target)
            .await
    }

    /// Closes the open channels of `token` and waits for them to settle.
    pub async fn leave(&self, token: TokenAddress, only_receiving: bool) -> Result<Vec<ChannelState>> {
        self.connections.leave(self, token, only_receiving).await
    }

    pub fn channel_list(
        &self,
        token: Option<&TokenAddress>,
        partner: Option<&Address>,
    ) -> Vec<ChannelState> {
        self.store.channels(token, partner)
    }

    pub fn get_channel(&self, channel_id: &ChannelId) -> Result<ChannelState> {
        self.store.channel_by_id(channel_id)
    }

    /// Tokens with a registered token network.
    pub fn token_list(&self) -> Vec<TokenAddress> {
        self.store.snapshot().registered_tokens()
    }

    pub fn network_status(&self, node: &Address) -> NetworkStatus {
        self.store.snapshot().network_status(node)
    }

    /// Starts a transfer and returns without waiting for its outcome.
    pub fn transfer_async(
        &self,
        token: TokenAddress,
        amount: TokenAmount,
        target: Address,
        identifier: Option<PaymentIdentifier>,
    ) -> Result<TransferHandle> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "transfer amount must be positive".to_string(),
            ));
        }
        ensure_address(&target)?;
        ensure_registered(&self.store.snapshot(), &token)?;
        let identifier = identifier.unwrap_or_else(rand::random);
        debug!(identifier, token = %token, target = %target, amount, "Starting transfer");
        Ok(TransferHandle::spawn(
            self.transfers.clone(),
            TransferRequest {
                token,
                amount,
                target,
                identifier,
            },
        ))
    }

    pub async fn transfer_and_wait(
        &self,
        token: TokenAddress,
        amount: TokenAmount,
        target: Address,
        identifier: Option<PaymentIdentifier>,
        timeout: Option<Duration>,
    ) -> Result<TransferOutcome> {
        let handle = self.transfer_async(token, amount, target, identifier)?;
        let identifier = handle.identifier();
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, handle.wait())
                .await
                .map_err(|_| Error::TransferTimeout {
                    identifier,
                    elapsed: timeout,
                })?,
            None => handle.wait().await,
        }
    }

    /// Token registrations in `from_block..=to_block`. `to_block` defaults to
    /// the latest processed block.
    pub async fn network_events(
        &self,
        from_block: BlockNumber,
        to_block: Option<BlockNumber>,
    ) -> Result<Vec<EventRecord>> {
        self.events_for(&EventScope::Registry, from_block, to_block)
            .await
    }

    pub async fn token_network_events(
        &self,
        token: TokenAddress,
        from_block: BlockNumber,
        to_block: Option<BlockNumber>,
    ) -> Result<Vec<EventRecord>> {
        ensure_registered(&self.store.snapshot(), &token)?;
        self.events_for(&EventScope::TokenNetwork(token), from_block, to_block)
            .await
    }

    pub async fn channel_events(
        &self,
        channel_id: ChannelId,
        from_block: BlockNumber,
        to_block: Option<BlockNumber>,
    ) -> Result<Vec<EventRecord>> {
        ensure_address(&channel_id)?;
        self.events_for(&EventScope::Channel(channel_id), from_block, to_block)
            .await
    }

    async fn events_for(
        &self,
        scope: &EventScope,
        from_block: BlockNumber,
        to_block: Option<BlockNumber>,
    ) -> Result<Vec<EventRecord>> {
        let to_block = to_block.unwrap_or_else(|| self.store.block_number());
        self.events.events_for(scope, from_block, to_block).await
    }

    pub(crate) fn ensure_registered(&self, token: &TokenAddress) -> Result<()> {
        ensure_registered(&self.store.snapshot(), token)
    }

    fn channel_with_partner(&self, token: &TokenAddress, partner: &Address) -> Result<ChannelState> {
        let snapshot = self.store.snapshot();
        ensure_registered(&snapshot, token)?;
        snapshot
            .channel_by_partner(token, partner)
            .cloned()
            .ok_or(Error::NoChannelWithPartner {
                token: *token,
                partner: *partner,
            })
    }
}

fn ensure_address(address: &Address) -> Result<()> {
    if address.is_zero() {
        return Err(Error::InvalidAddress(*address));
    }
    Ok(())
}

fn ensure_registered(snapshot: &NodeSnapshot, token: &TokenAddress) -> Result<()> {
    ensure_address(token)?;
    if !snapshot.is_token_registered(token) {
        return Err(Error::UnknownTokenAddress(*token));
    }
    Ok(())
}

fn ensure_closable(channel: &ChannelState) -> Result<()> {
    if !matches!(channel.status, ChannelStatus::Open | ChannelStatus::Closing) {
        return Err(Error::InvalidChannelState {
            channel_id: channel.channel_id,
            status: channel.status,
        });
    }
    Ok(())
}

fn ensure_open(channel: &ChannelState) -> Result<()> {
    if channel.status != ChannelStatus::Open {
        return Err(Error::InvalidChannelState {
            channel_id: channel.channel_id,
            status: channel.status,
        });
    }
    Ok(())
}
