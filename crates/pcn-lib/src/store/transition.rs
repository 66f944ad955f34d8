use tracing::{debug, warn};

use super::{NodeSnapshot, StateChange, TokenNetworkState};
use crate::{
    channel::{ChannelState, ChannelStatus},
    events::{InternalEvent, RecordedEvent},
    transfer::TransferError,
    types::{Address, ChannelId, Hash256, PaymentIdentifier, TokenAddress, TokenAmount},
};

impl NodeSnapshot {
    /// Applies one state change, returning the events it produced. Changes
    /// that do not fit the current state are logged and ignored.
    pub(crate) fn apply(&mut self, state_change: StateChange) -> Vec<RecordedEvent> {
        let mut events = Vec::new();
        match state_change {
            StateChange::Block { block_number } => {
                if block_number > self.block_number {
                    self.block_number = block_number;
                }
            }
            StateChange::ContractReceiveNewTokenNetwork {
                token,
                manager_address,
            } => {
                self.token_networks
                    .entry(token)
                    .or_insert_with(|| TokenNetworkState::new(token, manager_address));
            }
            StateChange::ActionChannelOpen {
                token,
                partner,
                channel_id,
                settle_timeout,
                reveal_timeout,
            } => self.handle_channel_open(token, partner, channel_id, settle_timeout, reveal_timeout),
            StateChange::ContractReceiveChannelNew {
                token,
                channel_id,
                participant1,
                participant2,
                settle_timeout,
                block_number,
            } => {
                let partner = if participant1 == self.our_address {
                    participant2
                } else if participant2 == self.our_address {
                    participant1
                } else {
                    return events;
                };
                self.handle_channel_new(token, channel_id, partner, settle_timeout, block_number);
            }
            StateChange::ContractReceiveChannelNewBalance {
                token,
                channel_id,
                participant,
                balance,
                ..
            } => {
                let Some(channel) = self.channel_mut(&token, &channel_id) else {
                    return events;
                };
                if channel.status >= ChannelStatus::Closed {
                    warn!(channel_id = %channel_id, "Ignoring deposit on a closed channel");
                    return events;
                }
                if let Some(end) = channel.end_state_mut(&participant) {
                    if balance > end.contract_balance {
                        end.contract_balance = balance;
                    }
                }
            }
            StateChange::ActionChannelClose { token, channel_id } => {
                let Some(channel) = self.channel_mut(&token, &channel_id) else {
                    return events;
                };
                if channel.status == ChannelStatus::Open && channel.advance(ChannelStatus::Closing) {
                    events.push(self.record(
                        token,
                        Some(channel_id),
                        InternalEvent::ContractSendChannelClose { channel_id },
                    ));
                } else {
                    warn!(channel_id = %channel_id, status = %channel.status, "Ignoring close request");
                }
            }
            StateChange::ContractReceiveChannelClosed {
                token,
                channel_id,
                closing_address,
                block_number,
            } => {
                if let Some(channel) = self.channel_mut(&token, &channel_id) {
                    if channel.advance(ChannelStatus::Closed) {
                        channel.external_state.closed_block = Some(block_number);
                        channel.external_state.closing_address = Some(closing_address);
                    }
                }
            }
            StateChange::ActionChannelSettleRequested {
                token,
                channel_id,
                block_number,
            } => {
                let Some(channel) = self.channel_mut(&token, &channel_id) else {
                    return events;
                };
                if channel.status == ChannelStatus::Closed
                    && channel.external_state.settle_requested_block.is_none()
                {
                    channel.external_state.settle_requested_block = Some(block_number);
                    events.push(self.record(
                        token,
                        Some(channel_id),
                        InternalEvent::ContractSendChannelSettle { channel_id },
                    ));
                }
            }
            StateChange::ContractReceiveChannelSettled {
                token,
                channel_id,
                block_number,
            } => {
                if let Some(channel) = self.channel_mut(&token, &channel_id) {
                    if channel.advance(ChannelStatus::Settled) {
                        channel.external_state.settled_block = Some(block_number);
                    }
                }
            }
            StateChange::ActionLockCreated {
                token,
                channel_id,
                sender,
                lock,
            } => {
                let Some(channel) = self.channel_mut(&token, &channel_id) else {
                    return events;
                };
                if channel.status != ChannelStatus::Open {
                    warn!(channel_id = %channel_id, status = %channel.status, "Ignoring lock");
                    return events;
                }
                if let Some(end) = channel.end_state_mut(&sender) {
                    end.locks.insert(lock.hashlock, lock);
                }
            }
            StateChange::ActionLockResolved {
                token,
                channel_id,
                hashlock,
            }
            | StateChange::ContractReceiveSecretReveal {
                token,
                channel_id,
                hashlock,
                ..
            } => {
                if let Some(channel) = self.channel_mut(&token, &channel_id) {
                    resolve_lock(channel, &hashlock);
                }
            }
            StateChange::ActionTransferDirect {
                token,
                receiver,
                amount,
                identifier,
            } => {
                let channel_id = self
                    .channel_by_partner(&token, &receiver)
                    .map(|channel| channel.channel_id);
                let event = match self.send_direct(&token, &receiver, amount) {
                    Ok((transferred_amount, nonce)) => {
                        events.push(self.record(
                            token,
                            channel_id,
                            InternalEvent::SendDirectTransfer {
                                identifier,
                                recipient: receiver,
                                transferred_amount,
                                nonce,
                            },
                        ));
                        InternalEvent::EventTransferSentSuccess {
                            identifier,
                            amount,
                            target: receiver,
                        }
                    }
                    Err(err) => InternalEvent::EventTransferSentFailed {
                        identifier,
                        target: receiver,
                        reason: err.to_string(),
                    },
                };
                events.push(self.record(token, channel_id, event));
            }
            StateChange::ReceiveTransferDirect {
                token,
                sender,
                amount,
                identifier,
            } => {
                if let Some(event) = self.receive_direct(&token, &sender, amount, identifier) {
                    events.push(event);
                }
            }
            StateChange::ActionChangeNodeNetworkState { node, status } => {
                self.network_statuses.insert(node, status);
            }
        }
        events
    }

    fn record(
        &self,
        token: TokenAddress,
        channel_id: Option<ChannelId>,
        event: InternalEvent,
    ) -> RecordedEvent {
        RecordedEvent {
            block_number: self.block_number,
            token: Some(token),
            channel_id,
            event,
        }
    }

    fn handle_channel_open(
        &mut self,
        token: TokenAddress,
        partner: Address,
        channel_id: ChannelId,
        settle_timeout: u64,
        reveal_timeout: u64,
    ) {
        let our_address = self.our_address;
        let Some(network) = self.token_networks.get_mut(&token) else {
            warn!(token = %token, "Ignoring open for an unknown token network");
            return;
        };
        // The ledger event may already have been processed.
        if let Some(channel) = network.channels.get_mut(&channel_id) {
            if reveal_timeout < channel.settle_timeout {
                channel.reveal_timeout = reveal_timeout;
            }
            return;
        }
        network.remove_stale_channels(&partner);
        if let Some(existing) = network.channel_with_partner(&partner) {
            warn!(
                channel_id = %existing.channel_id,
                partner = %partner,
                "Ignoring open, a channel with this partner already exists"
            );
            return;
        }
        network.channels.insert(
            channel_id,
            ChannelState::new(
                channel_id,
                token,
                our_address,
                partner,
                settle_timeout,
                reveal_timeout,
                ChannelStatus::Opening,
            ),
        );
    }

    fn handle_channel_new(
        &mut self,
        token: TokenAddress,
        channel_id: ChannelId,
        partner: Address,
        settle_timeout: u64,
        block_number: u64,
    ) {
        let our_address = self.our_address;
        let reveal_timeout = if self.default_reveal_timeout < settle_timeout {
            self.default_reveal_timeout
        } else {
            settle_timeout.saturating_sub(1)
        };
        let Some(network) = self.token_networks.get_mut(&token) else {
            warn!(token = %token, "Ignoring channel of an unknown token network");
            return;
        };
        if let Some(channel) = network.channels.get_mut(&channel_id) {
            if channel.advance(ChannelStatus::Open) {
                channel.settle_timeout = settle_timeout;
                channel.external_state.opened_block = Some(block_number);
            }
            return;
        }
        network.remove_stale_channels(&partner);
        if let Some(existing) = network.channel_with_partner(&partner) {
            warn!(
                channel_id = %existing.channel_id,
                partner = %partner,
                "Ignoring second channel with the same partner"
            );
            return;
        }
        let mut channel = ChannelState::new(
            channel_id,
            token,
            our_address,
            partner,
            settle_timeout,
            reveal_timeout,
            ChannelStatus::Open,
        );
        channel.external_state.opened_block = Some(block_number);
        network.channels.insert(channel_id, channel);
    }

    /// Moves `amount` to the partner. Returns the new transferred amount and nonce.
    fn send_direct(
        &mut self,
        token: &TokenAddress,
        receiver: &Address,
        amount: TokenAmount,
    ) -> Result<(TokenAmount, u64), TransferError> {
        let channel = self
            .token_networks
            .get_mut(token)
            .and_then(|network| network.channel_with_partner_mut(receiver))
            .ok_or(TransferError::NoRoute { target: *receiver })?;
        if channel.status != ChannelStatus::Open {
            return Err(TransferError::ChannelNotOpen {
                channel_id: channel.channel_id,
                status: channel.status,
            });
        }
        let available = channel.our_distributable();
        if available < amount {
            return Err(TransferError::InsufficientCapacity {
                available,
                requested: amount,
            });
        }
        channel.our_state.transferred_amount += amount;
        channel.our_state.nonce += 1;
        Ok((channel.our_state.transferred_amount, channel.our_state.nonce))
    }

    fn receive_direct(
        &mut self,
        token: &TokenAddress,
        sender: &Address,
        amount: TokenAmount,
        identifier: PaymentIdentifier,
    ) -> Option<RecordedEvent> {
        let channel = self
            .token_networks
            .get_mut(token)
            .and_then(|network| network.channel_with_partner_mut(sender))?;
        if channel.status != ChannelStatus::Open {
            warn!(channel_id = %channel.channel_id, "Dropping transfer on a channel that is not open");
            return None;
        }
        let available = channel.partner_state.distributable(&channel.our_state);
        if available < amount {
            warn!(
                channel_id = %channel.channel_id,
                available,
                amount,
                "Dropping transfer exceeding the partner's balance"
            );
            return None;
        }
        channel.partner_state.transferred_amount += amount;
        channel.partner_state.nonce += 1;
        let channel_id = channel.channel_id;
        debug!(channel_id = %channel_id, amount, "Received direct transfer");
        Some(self.record(
            *token,
            Some(channel_id),
            InternalEvent::EventTransferReceivedSuccess {
                identifier,
                amount,
                initiator: *sender,
            },
        ))
    }
}

/// Unlocks `hashlock` on whichever side holds it, crediting the locked
/// amount to that side's transferred total.
fn resolve_lock(channel: &mut ChannelState, hashlock: &Hash256) {
    if channel.status == ChannelStatus::Settled {
        return;
    }
    for end in [&mut channel.our_state, &mut channel.partner_state] {
        if let Some(lock) = end.locks.remove(hashlock) {
            end.transferred_amount += lock.amount;
        }
    }
}
