use std::{sync::Arc, time::Duration};

use ractor::{Actor, ActorRef};

use crate::{
    chain::{ChainWatcherActor, ChainWatcherArguments, ChainWatcherMessage},
    channel::ChannelState,
    ledger::dev::{DevAccount, DevChain},
    lock_manager::ChannelLockManager,
    store::ChannelStateStore,
    tasks::TaskSupervisor,
    transfer::DirectTransferService,
    types::{Address, TokenAddress, TokenAmount},
    waiting::{self, BlockNotifier, ConfirmationWaiter},
    NodeApi, NodeConfig,
};

pub const TEST_BLOCK_INTERVAL: Duration = Duration::from_millis(10);
pub const TEST_POLLING_INTERVAL: Duration = Duration::from_millis(5);

pub fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .pretty()
            .init();
    });
}

pub fn gen_rand_address() -> Address {
    Address::random()
}

pub fn test_node_config() -> NodeConfig {
    NodeConfig {
        address: None,
        settle_timeout: Some(40),
        reveal_timeout: Some(5),
        poll_timeout_seconds: Some(10),
        poll_interval_ms: Some(50),
        initial_channel_target: None,
        joinable_funds_target: None,
    }
}

/// A dev chain mining a block every [`TEST_BLOCK_INTERVAL`].
pub fn start_test_chain() -> (DevChain, TaskSupervisor) {
    let chain = DevChain::new();
    let supervisor = TaskSupervisor::new();
    chain.start_mining(&supervisor, TEST_BLOCK_INTERVAL);
    (chain, supervisor)
}

/// A complete node on a dev chain, following it with a running chain watcher.
pub struct TestNode {
    pub address: Address,
    pub chain: DevChain,
    pub ledger: Arc<DevAccount>,
    pub store: Arc<ChannelStateStore>,
    pub locks: ChannelLockManager,
    pub notifier: BlockNotifier,
    pub api: Arc<NodeApi>,
    pub watcher: ActorRef<ChainWatcherMessage>,
}

impl TestNode {
    /// A node on a fresh chain of its own.
    pub async fn new() -> Self {
        let (chain, supervisor) = start_test_chain();
        Self::with_chain(&chain, &supervisor).await
    }

    pub async fn with_chain(chain: &DevChain, supervisor: &TaskSupervisor) -> Self {
        Self::with_config(chain, supervisor, test_node_config()).await
    }

    pub async fn with_config(
        chain: &DevChain,
        supervisor: &TaskSupervisor,
        config: NodeConfig,
    ) -> Self {
        init_tracing();
        let address = config.address.unwrap_or_else(gen_rand_address);
        let ledger = Arc::new(chain.account(address));
        let store = Arc::new(ChannelStateStore::new(address, config.reveal_timeout()));
        let notifier = BlockNotifier::new();
        let locks = ChannelLockManager::new();
        let waiter =
            ConfirmationWaiter::new(store.clone(), notifier.subscribe(), config.poll_interval());
        let (watcher, _) = Actor::spawn(
            None,
            ChainWatcherActor,
            ChainWatcherArguments {
                ledger: ledger.clone(),
                pipeline: store.clone(),
                store: store.clone(),
                notifier: notifier.clone(),
                supervisor: supervisor.clone(),
                polling_interval: TEST_POLLING_INTERVAL,
            },
        )
        .await
        .expect("start chain watcher");
        let transfers = Arc::new(DirectTransferService::new(store.clone(), store.event_log()));
        let api = Arc::new(NodeApi::new(
            &config,
            ledger.clone(),
            store.clone(),
            store.clone(),
            locks.clone(),
            waiter,
            transfers,
        ));
        Self {
            address,
            chain: chain.clone(),
            ledger,
            store,
            locks,
            notifier,
            api,
            watcher,
        }
    }

    /// Registers a fresh token and funds this node with `balance` of it.
    pub async fn register_funded_token(&self, balance: TokenAmount) -> TokenAddress {
        let token = gen_rand_address();
        self.api
            .register_token(token)
            .await
            .expect("register token");
        if balance > 0 {
            self.chain.mint(token, self.address, balance);
        }
        token
    }

    /// Waits until this node's store knows the token network of `token`.
    pub async fn wait_for_token(&self, token: TokenAddress) {
        self.api
            .waiter()
            .wait_for(
                "test_wait_for_token",
                Duration::from_secs(5),
                waiting::token_registered(token),
            )
            .await
            .expect("token known");
    }

    pub async fn wait_for_block(&self, block_number: u64) {
        self.api
            .waiter()
            .wait_for(
                "test_wait_for_block",
                Duration::from_secs(5),
                waiting::block_at_least(block_number),
            )
            .await
            .expect("block processed");
    }

    pub async fn open_and_fund(
        &self,
        token: TokenAddress,
        partner: Address,
        amount: TokenAmount,
    ) -> ChannelState {
        self.api
            .open(token, partner, None, None)
            .await
            .expect("open channel");
        self.api
            .deposit(token, partner, amount)
            .await
            .expect("deposit")
    }

    pub fn token_balance(&self, token: &TokenAddress) -> TokenAmount {
        self.chain.balance_of(token, &self.address)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.watcher.stop(None);
    }
}
