use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use rand::seq::SliceRandom;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    api::NodeApi,
    channel::{ChannelState, ChannelStatus},
    events::EventPayload,
    ledger::LedgerEventKind,
    types::{Address, TokenAddress, TokenAmount},
    waiting, Error, Result,
};

/// Joins and leaves token networks. Calls for the same token run one at a
/// time, calls for different tokens do not wait for each other.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<TokenAddress, Arc<AsyncMutex<()>>>>,
}

/// The deposit `connect` makes into each channel it opens.
pub fn funds_per_channel(
    funds: TokenAmount,
    initial_channel_target: usize,
    joinable_funds_target: f64,
) -> TokenAmount {
    if initial_channel_target == 0 {
        return 0;
    }
    let usable = funds as f64 * (1.0 - joinable_funds_target);
    (usable / initial_channel_target as f64).floor() as TokenAmount
}

impl ConnectionManager {
    fn token_lock(&self, token: &TokenAddress) -> Arc<AsyncMutex<()>> {
        self.connections
            .lock()
            .expect("connection table poisoned")
            .entry(*token)
            .or_default()
            .clone()
    }

    pub async fn connect(
        &self,
        api: &NodeApi,
        token: TokenAddress,
        funds: TokenAmount,
        initial_channel_target: usize,
        joinable_funds_target: f64,
    ) -> Result<Vec<ChannelState>> {
        if funds == 0 {
            return Err(Error::InvalidAmount(
                "connect funds must be positive".to_string(),
            ));
        }
        if initial_channel_target == 0 {
            return Err(Error::InvalidParameter(
                "initial_channel_target must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&joinable_funds_target) {
            return Err(Error::InvalidParameter(format!(
                "joinable_funds_target {} must be between 0 and 1",
                joinable_funds_target
            )));
        }
        api.ensure_registered(&token)?;

        let lock = self.token_lock(&token);
        let _connecting = lock.lock().await;

        let partners: BTreeSet<Address> = api
            .channel_list(Some(&token), None)
            .into_iter()
            .filter(|channel| matches!(channel.status, ChannelStatus::Opening | ChannelStatus::Open))
            .map(|channel| channel.partner())
            .collect();
        let missing = initial_channel_target.saturating_sub(partners.len());
        if missing == 0 {
            info!(token = %token, channels = partners.len(), "Already connected");
            return Ok(vec![]);
        }

        let mut candidates = self.partner_candidates(api, token, &partners).await?;
        candidates.shuffle(&mut rand::thread_rng());
        let deposit = funds_per_channel(funds, initial_channel_target, joinable_funds_target);
        info!(
            token = %token,
            candidates = candidates.len(),
            missing,
            deposit,
            "Connecting to token network"
        );

        let mut opened = Vec::new();
        for partner in candidates.into_iter().take(missing) {
            let channel = match api.open(token, partner, None, None).await {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(partner = %partner, "Failed to open channel while connecting: {}", err);
                    continue;
                }
            };
            let channel = if deposit == 0 {
                channel
            } else {
                match api.deposit(token, partner, deposit).await {
                    Ok(channel) => channel,
                    Err(err) => {
                        warn!(channel_id = %channel.channel_id, "Failed to fund channel: {}", err);
                        channel
                    }
                }
            };
            opened.push(channel);
        }
        Ok(opened)
    }

    /// Participants of the token network we have no channel with yet.
    async fn partner_candidates(
        &self,
        api: &NodeApi,
        token: TokenAddress,
        partners: &BTreeSet<Address>,
    ) -> Result<Vec<Address>> {
        let our_address = api.our_address();
        let mut participants = BTreeSet::new();
        for record in api.token_network_events(token, 0, None).await? {
            if let EventPayload::Ledger(LedgerEventKind::ChannelNew {
                participant1,
                participant2,
                ..
            }) = record.event
            {
                participants.insert(participant1);
                participants.insert(participant2);
            }
        }
        Ok(participants
            .into_iter()
            .filter(|participant| {
                participant != &our_address && !participant.is_zero() && !partners.contains(participant)
            })
            .collect())
    }

    /// Closes the open channels of `token`, only those the partner has funds
    /// in when `only_receiving` is set, and waits until they are settled.
    /// The wait for the settle window is bounded by block height, not by the
    /// poll timeout, which only applies to the settlement itself.
    pub async fn leave(
        &self,
        api: &NodeApi,
        token: TokenAddress,
        only_receiving: bool,
    ) -> Result<Vec<ChannelState>> {
        api.ensure_registered(&token)?;
        let lock = self.token_lock(&token);
        let _leaving = lock.lock().await;

        let partners: Vec<Address> = api
            .channel_list(Some(&token), None)
            .into_iter()
            .filter(|channel| channel.status == ChannelStatus::Open)
            .filter(|channel| !only_receiving || channel.partner_state.contract_balance > 0)
            .map(|channel| channel.partner())
            .collect();
        if partners.is_empty() {
            debug!(token = %token, "No channel to leave");
            return Ok(vec![]);
        }

        info!(token = %token, channels = partners.len(), "Leaving token network");
        let closed = api.batch_close(token, partners).await?;
        let channel_ids = closed.iter().map(|channel| channel.channel_id).collect();
        let window_end = closed
            .iter()
            .filter_map(ChannelState::settle_window_end)
            .max()
            .unwrap_or_default();
        debug!(token = %token, window_end, "Waiting for the settle window to pass");
        api.waiter()
            .wait_unbounded("leave", waiting::block_at_least(window_end))
            .await;
        api.waiter()
            .wait_for(
                "leave",
                api.config().poll_timeout(),
                waiting::channel_settled(channel_ids),
            )
            .await?;
        closed
            .iter()
            .map(|channel| api.get_channel(&channel.channel_id))
            .collect()
    }
}
