//! An in-process ledger for development nodes and tests. Transactions wait
//! in a mempool until the next block is mined, then execute in submission
//! order; a transaction rejected at execution time resolves its submitter
//! with an error and leaves no trace on the chain.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use strum::IntoStaticStr;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{EventScope, LedgerClient, LedgerError, LedgerEvent, LedgerEventKind};
use crate::{
    tasks::TaskSupervisor,
    types::{Address, BlockNumber, ChannelId, Hash256, TokenAddress, TokenAmount},
};

#[derive(Clone, Debug, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
enum Call {
    RegisterToken {
        token: TokenAddress,
        manager: Address,
    },
    OpenChannel {
        token: TokenAddress,
        partner: Address,
        settle_timeout: BlockNumber,
        channel_id: ChannelId,
    },
    Approve {
        token: TokenAddress,
        spender: Address,
        amount: TokenAmount,
    },
    Deposit {
        channel_id: ChannelId,
        amount: TokenAmount,
    },
    Close {
        channel_id: ChannelId,
    },
    Settle {
        channel_id: ChannelId,
    },
    RevealSecret {
        channel_id: ChannelId,
        secrethash: Hash256,
        receiver: Address,
    },
}

impl Call {
    fn name(&self) -> &'static str {
        self.into()
    }
}

type Receipt = oneshot::Sender<Result<(), LedgerError>>;

struct PendingTransaction {
    sender: Address,
    call: Call,
    receipt: Receipt,
}

#[derive(Clone, Debug)]
struct DevChannel {
    token: TokenAddress,
    participants: [Address; 2],
    deposits: [TokenAmount; 2],
    settle_timeout: BlockNumber,
    closed_block: Option<BlockNumber>,
    settled: bool,
}

impl DevChannel {
    fn index_of(&self, participant: &Address) -> Option<usize> {
        self.participants.iter().position(|p| p == participant)
    }

    fn connects(&self, a: &Address, b: &Address) -> bool {
        self.index_of(a).is_some() && self.index_of(b).is_some()
    }
}

#[derive(Default)]
struct DevChainState {
    block_number: BlockNumber,
    nonce: u64,
    transaction_count: u64,
    mempool: Vec<PendingTransaction>,
    balances: HashMap<(TokenAddress, Address), TokenAmount>,
    allowances: HashMap<(TokenAddress, Address, Address), TokenAmount>,
    registry: BTreeMap<TokenAddress, Address>,
    channels: HashMap<ChannelId, DevChannel>,
    events: Vec<LedgerEvent>,
}

impl DevChainState {
    fn channel(&self, channel_id: &ChannelId) -> Result<&DevChannel, LedgerError> {
        self.channels
            .get(channel_id)
            .ok_or(LedgerError::AddressWithoutCode(*channel_id))
    }

    fn participant_channel(
        &self,
        sender: &Address,
        channel_id: &ChannelId,
        operation: &'static str,
    ) -> Result<&DevChannel, LedgerError> {
        let channel = self.channel(channel_id)?;
        if channel.index_of(sender).is_none() {
            return Err(LedgerError::threw(operation, "sender is not a participant"));
        }
        Ok(channel)
    }

    /// Checks that do not depend on other pending transactions. Run when a
    /// transaction is submitted and again when it executes.
    fn check(
        &self,
        sender: &Address,
        call: &Call,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        let operation = call.name();
        match call {
            Call::RegisterToken { token, .. } => {
                if self.registry.contains_key(token) {
                    return Err(LedgerError::threw(operation, "token already registered"));
                }
            }
            Call::OpenChannel {
                token,
                partner,
                settle_timeout,
                ..
            } => {
                if !self.registry.contains_key(token) {
                    return Err(LedgerError::threw(operation, "token not registered"));
                }
                if partner == sender || partner.is_zero() {
                    return Err(LedgerError::threw(operation, "invalid partner"));
                }
                if *settle_timeout == 0 {
                    return Err(LedgerError::threw(operation, "settle timeout is zero"));
                }
                if self.channels.values().any(|channel| {
                    &channel.token == token && !channel.settled && channel.connects(sender, partner)
                }) {
                    return Err(LedgerError::threw(operation, "channel already exists"));
                }
            }
            Call::Approve { .. } => {}
            Call::Deposit { channel_id, .. } => {
                let channel = self.participant_channel(sender, channel_id, operation)?;
                if channel.closed_block.is_some() {
                    return Err(LedgerError::threw(operation, "channel is closed"));
                }
            }
            Call::Close { channel_id } => {
                let channel = self.participant_channel(sender, channel_id, operation)?;
                if channel.closed_block.is_some() {
                    return Err(LedgerError::threw(operation, "channel is already closed"));
                }
            }
            Call::Settle { channel_id } => {
                let channel = self.participant_channel(sender, channel_id, operation)?;
                if channel.settled {
                    return Err(LedgerError::threw(operation, "channel is already settled"));
                }
                match channel.closed_block {
                    None => return Err(LedgerError::threw(operation, "channel is not closed")),
                    Some(closed) if block_number < closed.saturating_add(channel.settle_timeout) => {
                        return Err(LedgerError::threw(operation, "settle timeout not expired"))
                    }
                    Some(_) => {}
                }
            }
            Call::RevealSecret { channel_id, .. } => {
                self.channel(channel_id)?;
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        sender: Address,
        call: &Call,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        self.check(&sender, call, block_number)?;
        let operation = call.name();
        let kind = match call.clone() {
            Call::RegisterToken { token, manager } => {
                self.registry.insert(token, manager);
                Some(LedgerEventKind::TokenAdded {
                    token_address: token,
                    channel_manager_address: manager,
                })
            }
            Call::OpenChannel {
                token,
                partner,
                settle_timeout,
                channel_id,
            } => {
                self.channels.insert(
                    channel_id,
                    DevChannel {
                        token,
                        participants: [sender, partner],
                        deposits: [0, 0],
                        settle_timeout,
                        closed_block: None,
                        settled: false,
                    },
                );
                Some(LedgerEventKind::ChannelNew {
                    token_address: token,
                    channel_id,
                    participant1: sender,
                    participant2: partner,
                    settle_timeout,
                })
            }
            Call::Approve {
                token,
                spender,
                amount,
            } => {
                self.allowances.insert((token, sender, spender), amount);
                None
            }
            Call::Deposit { channel_id, amount } => {
                let channel = self.channel(&channel_id)?.clone();
                let token = channel.token;
                let allowance = self
                    .allowances
                    .get(&(token, sender, channel_id))
                    .copied()
                    .unwrap_or_default();
                if allowance < amount {
                    return Err(LedgerError::threw(operation, "allowance too low"));
                }
                let balance = self.balance_of(&token, &sender);
                if balance < amount {
                    return Err(LedgerError::threw(operation, "insufficient token balance"));
                }
                self.allowances
                    .insert((token, sender, channel_id), allowance - amount);
                self.balances.insert((token, sender), balance - amount);
                let index = channel
                    .index_of(&sender)
                    .ok_or_else(|| LedgerError::threw(operation, "sender is not a participant"))?;
                let channel = self
                    .channels
                    .get_mut(&channel_id)
                    .ok_or(LedgerError::AddressWithoutCode(channel_id))?;
                channel.deposits[index] += amount;
                Some(LedgerEventKind::ChannelNewBalance {
                    token_address: token,
                    channel_id,
                    participant: sender,
                    balance: channel.deposits[index],
                })
            }
            Call::Close { channel_id } => {
                let channel = self
                    .channels
                    .get_mut(&channel_id)
                    .ok_or(LedgerError::AddressWithoutCode(channel_id))?;
                channel.closed_block = Some(block_number);
                Some(LedgerEventKind::ChannelClosed {
                    token_address: channel.token,
                    channel_id,
                    closing_address: sender,
                })
            }
            Call::Settle { channel_id } => {
                let channel = self
                    .channels
                    .get_mut(&channel_id)
                    .ok_or(LedgerError::AddressWithoutCode(channel_id))?;
                channel.settled = true;
                let channel = channel.clone();
                for (participant, deposit) in channel.participants.iter().zip(channel.deposits) {
                    *self
                        .balances
                        .entry((channel.token, *participant))
                        .or_default() += deposit;
                }
                Some(LedgerEventKind::ChannelSettled {
                    token_address: channel.token,
                    channel_id,
                })
            }
            Call::RevealSecret {
                channel_id,
                secrethash,
                receiver,
            } => Some(LedgerEventKind::ChannelSecretRevealed {
                token_address: self.channel(&channel_id)?.token,
                channel_id,
                secrethash,
                receiver,
            }),
        };
        if let Some(kind) = kind {
            self.events.push(LedgerEvent { block_number, kind });
        }
        Ok(())
    }

    fn balance_of(&self, token: &TokenAddress, holder: &Address) -> TokenAmount {
        self.balances
            .get(&(*token, *holder))
            .copied()
            .unwrap_or_default()
    }
}

/// A shared handle to the simulated chain.
#[derive(Clone, Default)]
pub struct DevChain {
    state: Arc<Mutex<DevChainState>>,
}

impl DevChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DevChainState> {
        self.state.lock().expect("dev chain state poisoned")
    }

    /// A ledger client signing transactions as `address`.
    pub fn account(&self, address: Address) -> DevAccount {
        DevAccount {
            chain: self.clone(),
            address,
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.state().block_number
    }

    pub fn mint(&self, token: TokenAddress, holder: Address, amount: TokenAmount) {
        *self.state().balances.entry((token, holder)).or_default() += amount;
    }

    pub fn balance_of(&self, token: &TokenAddress, holder: &Address) -> TokenAmount {
        self.state().balance_of(token, holder)
    }

    /// Number of transactions accepted into the mempool so far.
    pub fn transaction_count(&self) -> u64 {
        self.state().transaction_count
    }

    pub fn pending_transaction_count(&self) -> usize {
        self.state().mempool.len()
    }

    /// Mines one block, executing every pending transaction.
    pub fn mine_block(&self) -> BlockNumber {
        let (block_number, receipts) = {
            let mut state = self.state();
            state.block_number += 1;
            let block_number = state.block_number;
            let pending = std::mem::take(&mut state.mempool);
            let receipts: Vec<_> = pending
                .into_iter()
                .map(|tx| {
                    let result = state.execute(tx.sender, &tx.call, block_number);
                    if let Err(err) = &result {
                        warn!(
                            block_number,
                            sender = %tx.sender,
                            operation = tx.call.name(),
                            "Transaction failed: {}",
                            err
                        );
                    }
                    (tx.receipt, result)
                })
                .collect();
            (block_number, receipts)
        };
        for (receipt, result) in receipts {
            // The submitter may have stopped waiting.
            let _ = receipt.send(result);
        }
        trace!(block_number, "Mined block");
        block_number
    }

    pub fn mine_blocks(&self, count: u64) -> BlockNumber {
        (0..count).fold(self.block_number(), |_, _| self.mine_block())
    }

    /// Mines a block every `interval` until the supervisor shuts down.
    pub fn start_mining(&self, supervisor: &TaskSupervisor, interval: Duration) {
        let chain = self.clone();
        supervisor.spawn("dev-chain-miner", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                chain.mine_block();
            }
        });
    }

    fn derive_channel_id(&self, token: &TokenAddress, sender: &Address, partner: &Address) -> ChannelId {
        let mut state = self.state();
        state.nonce += 1;
        let data = [
            token.as_ref(),
            sender.as_ref(),
            partner.as_ref(),
            &state.nonce.to_le_bytes(),
        ]
        .concat();
        Address::derive(&data)
    }

    fn submit(
        &self,
        sender: Address,
        call: Call,
    ) -> Result<oneshot::Receiver<Result<(), LedgerError>>, LedgerError> {
        let mut state = self.state();
        let including_block = state.block_number + 1;
        state.check(&sender, &call, including_block)?;
        debug!(sender = %sender, operation = call.name(), "Transaction accepted");
        let (receipt, receiver) = oneshot::channel();
        state.transaction_count += 1;
        state.mempool.push(PendingTransaction {
            sender,
            call,
            receipt,
        });
        Ok(receiver)
    }

    fn events(&self, scope: &EventScope, from_block: BlockNumber, to_block: BlockNumber) -> Vec<LedgerEvent> {
        self.state()
            .events
            .iter()
            .filter(|event| {
                (from_block..=to_block).contains(&event.block_number) && event.kind.in_scope(scope)
            })
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
pub struct DevAccount {
    chain: DevChain,
    address: Address,
}

impl DevAccount {
    pub fn chain(&self) -> &DevChain {
        &self.chain
    }

    async fn transact(&self, call: Call) -> Result<(), LedgerError> {
        let operation = call.name();
        let receipt = self.chain.submit(self.address, call)?;
        receipt
            .await
            .map_err(|_| LedgerError::Rpc(format!("{} transaction was dropped", operation)))?
    }

    /// Publishes a hash-lock secret on the channel contract.
    pub async fn reveal_secret(
        &self,
        channel_id: ChannelId,
        secrethash: Hash256,
        receiver: Address,
    ) -> Result<(), LedgerError> {
        self.transact(Call::RevealSecret {
            channel_id,
            secrethash,
            receiver,
        })
        .await
    }
}

#[async_trait::async_trait]
impl LedgerClient for DevAccount {
    fn address(&self) -> Address {
        self.address
    }

    async fn current_block_number(&self) -> Result<BlockNumber, LedgerError> {
        Ok(self.chain.block_number())
    }

    async fn register_token(&self, token: TokenAddress) -> Result<Address, LedgerError> {
        let manager = Address::derive(&[b"channel-manager".as_slice(), token.as_ref()].concat());
        self.transact(Call::RegisterToken { token, manager }).await?;
        Ok(manager)
    }

    async fn open_channel(
        &self,
        token: TokenAddress,
        partner: Address,
        settle_timeout: BlockNumber,
    ) -> Result<ChannelId, LedgerError> {
        let channel_id = self.chain.derive_channel_id(&token, &self.address, &partner);
        self.transact(Call::OpenChannel {
            token,
            partner,
            settle_timeout,
            channel_id,
        })
        .await?;
        Ok(channel_id)
    }

    async fn token_balance_of(
        &self,
        token: TokenAddress,
        holder: Address,
    ) -> Result<TokenAmount, LedgerError> {
        Ok(self.chain.balance_of(&token, &holder))
    }

    async fn approve(
        &self,
        token: TokenAddress,
        spender: Address,
        amount: TokenAmount,
    ) -> Result<(), LedgerError> {
        self.transact(Call::Approve {
            token,
            spender,
            amount,
        })
        .await
    }

    async fn deposit(
        &self,
        channel_id: ChannelId,
        amount: TokenAmount,
    ) -> Result<(), LedgerError> {
        self.transact(Call::Deposit { channel_id, amount }).await
    }

    async fn close(&self, channel_id: ChannelId) -> Result<(), LedgerError> {
        self.transact(Call::Close { channel_id }).await
    }

    async fn settle(&self, channel_id: ChannelId) -> Result<(), LedgerError> {
        self.transact(Call::Settle { channel_id }).await
    }

    async fn events(
        &self,
        scope: &EventScope,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        Ok(self.chain.events(scope, from_block, to_block))
    }
}
