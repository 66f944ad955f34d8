use std::fmt::Debug;
use std::sync::Arc;

use pcn::chain::{ChainWatcherActor, ChainWatcherArguments};
use pcn::ledger::dev::DevChain;
use pcn::lock_manager::ChannelLockManager;
use pcn::rpc::server::start_rpc;
use pcn::store::ChannelStateStore;
use pcn::tasks::TaskSupervisor;
use pcn::transfer::DirectTransferService;
use pcn::types::Address;
use pcn::waiting::{BlockNotifier, ConfirmationWaiter};
use pcn::{Config, NodeApi};
use ractor::Actor;
use tracing::{info, info_span};
use tracing_subscriber::{field::MakeExt, fmt, fmt::format, EnvFilter};

pub struct ExitMessage(String);

#[tokio::main]
pub async fn main() -> Result<(), ExitMessage> {
    // ractor sets "id" for each actor, tag it with the node prefix
    let node_formatter = format::debug_fn(|writer, field, value| {
        let prefix = if field.name() == "id" {
            let r = pcn::get_node_prefix();
            if !r.is_empty() {
                format!(" on {}", r)
            } else {
                "".to_string()
            }
        } else {
            "".to_string()
        };
        write!(writer, "{}: {:?}{}", field, value, prefix)
    })
    .delimited(", ");
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .fmt_fields(node_formatter)
        .try_init()
        .map_err(|err| ExitMessage(format!("failed to initialize logger: {}", err)))?;

    info!("Starting node with git version {}", pcn::get_git_version());

    let _span = info_span!("node", node = pcn::get_node_prefix()).entered();

    let config = Config::parse();
    let address = config.node.address.unwrap_or_else(Address::random);
    info!(address = %address, base_dir = ?config.base_dir, "Node address");

    let supervisor = TaskSupervisor::new();
    let chain = DevChain::new();
    for token in &config.chain.funded_tokens {
        chain.mint(*token, address, config.chain.initial_token_balance());
        info!(token = %token, amount = config.chain.initial_token_balance(), "Funded token");
    }
    chain.start_mining(&supervisor, config.chain.block_interval());
    let ledger = Arc::new(chain.account(address));

    let store = Arc::new(ChannelStateStore::new(
        address,
        config.node.reveal_timeout(),
    ));
    let notifier = BlockNotifier::new();
    let waiter = ConfirmationWaiter::new(
        store.clone(),
        notifier.subscribe(),
        config.node.poll_interval(),
    );

    let (watcher, _) = Actor::spawn(
        Some("chain-watcher".to_string()),
        ChainWatcherActor,
        ChainWatcherArguments {
            ledger: ledger.clone(),
            pipeline: store.clone(),
            store: store.clone(),
            notifier,
            supervisor: supervisor.clone(),
            polling_interval: config.chain.polling_interval(),
        },
    )
    .await
    .map_err(|err| ExitMessage(format!("failed to start chain watcher: {}", err)))?;

    let transfers = Arc::new(DirectTransferService::new(
        store.clone(),
        store.event_log(),
    ));
    let api = Arc::new(NodeApi::new(
        &config.node,
        ledger,
        store.clone(),
        store,
        ChannelLockManager::new(),
        waiter,
        transfers,
    ));

    let rpc_server = match config.rpc.listening_addr {
        Some(_) => {
            let (handle, addr) = start_rpc(&config.rpc, api)
                .await
                .map_err(|err| ExitMessage(format!("rpc server failed to start: {}", err)))?;
            info!("RPC server listening on {}", addr);
            Some(handle)
        }
        None => {
            info!("RPC server disabled, no listening address configured");
            None
        }
    };

    signal_listener().await;
    if let Some(handle) = rpc_server {
        handle
            .stop()
            .map_err(|err| ExitMessage(format!("failed to stop rpc server: {}", err)))?;
        handle.stopped().await;
    }
    watcher.stop(None);
    supervisor.shutdown().await;
    info!("Node stopped");

    Ok(())
}

impl Debug for ExitMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Exit because {}", self.0)
    }
}

#[cfg(target_family = "unix")]
async fn signal_listener() {
    use tokio::signal::unix::{signal, SignalKind};
    // SIGTERM is commonly sent for graceful shutdown of applications,
    // followed by 30 seconds of grace time, then a SIGKILL.
    let mut sigterm = signal(SignalKind::terminate()).expect("listen for SIGTERM");
    // SIGINT is usually sent due to ctrl-c in the terminal.
    let mut sigint = signal(SignalKind::interrupt()).expect("listen for SIGINT");

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    };
}

#[cfg(not(target_family = "unix"))]
async fn signal_listener() {
    tokio::signal::ctrl_c()
        .await
        .expect("listen for Ctrl-c signal");
    info!("Ctrl-c received, shutting down");
}
