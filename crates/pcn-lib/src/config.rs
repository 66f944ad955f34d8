use std::{
    ffi::OsString,
    fs::File,
    io::{BufReader, ErrorKind},
    path::PathBuf,
    process::exit,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::CommandFactory;
use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use home::home_dir;
use serde::Deserialize;
use tracing::error;

use crate::{
    rpc::config::RpcConfig,
    types::{Address, BlockNumber, TokenAmount},
};

const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";

pub const DEFAULT_SETTLE_TIMEOUT: BlockNumber = 500;
pub const DEFAULT_REVEAL_TIMEOUT: BlockNumber = 50;
/// Largest settle timeout a channel may be opened with, in blocks.
pub const MAX_SETTLE_TIMEOUT: BlockNumber = 555_428;
pub const DEFAULT_POLL_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_INITIAL_CHANNEL_TARGET: usize = 3;
pub const DEFAULT_JOINABLE_FUNDS_TARGET: f64 = 0.4;

pub const DEFAULT_BLOCK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CHAIN_POLLING_INTERVAL_MS: u64 = 250;
pub const DEFAULT_INITIAL_TOKEN_BALANCE: TokenAmount = 1_000_000;

fn get_base_dir() -> PathBuf {
    let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".pcn-node");
    path
}

fn get_default_config_file() -> PathBuf {
    let mut path = get_base_dir();
    path.push(DEFAULT_CONFIG_FILE_NAME);
    path
}

// Every field carries both `name` and `long` with a `node-`/`NODE_` prefix,
// so that flags and env vars of different sections never collide.
#[derive(ClapSerde, Debug, Clone)]
pub struct NodeConfig {
    /// address of this node on the ledger, a random one is used if unset
    #[arg(name = "NODE_ADDRESS", long = "node-address", env)]
    pub address: Option<Address>,

    /// default settle timeout of opened channels, in blocks [default: 500]
    #[arg(name = "NODE_SETTLE_TIMEOUT", long = "node-settle-timeout", env)]
    pub settle_timeout: Option<BlockNumber>,

    /// default reveal timeout of opened channels, in blocks [default: 50]
    #[arg(name = "NODE_REVEAL_TIMEOUT", long = "node-reveal-timeout", env)]
    pub reveal_timeout: Option<BlockNumber>,

    /// how long to wait for a ledger mutation to be confirmed, in seconds [default: 180]
    #[arg(
        name = "NODE_POLL_TIMEOUT_SECONDS",
        long = "node-poll-timeout-seconds",
        env
    )]
    pub poll_timeout_seconds: Option<u64>,

    /// safety tick of confirmation waits, in milliseconds [default: 500]
    #[arg(name = "NODE_POLL_INTERVAL_MS", long = "node-poll-interval-ms", env)]
    pub poll_interval_ms: Option<u64>,

    /// number of channels `connect` opens in a token network [default: 3]
    #[arg(
        name = "NODE_INITIAL_CHANNEL_TARGET",
        long = "node-initial-channel-target",
        env
    )]
    pub initial_channel_target: Option<usize>,

    /// share of `connect` funds kept back for channels opened by others [default: 0.4]
    #[arg(
        name = "NODE_JOINABLE_FUNDS_TARGET",
        long = "node-joinable-funds-target",
        env
    )]
    pub joinable_funds_target: Option<f64>,
}

impl NodeConfig {
    pub fn settle_timeout(&self) -> BlockNumber {
        self.settle_timeout.unwrap_or(DEFAULT_SETTLE_TIMEOUT)
    }

    pub fn reveal_timeout(&self) -> BlockNumber {
        self.reveal_timeout.unwrap_or(DEFAULT_REVEAL_TIMEOUT)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(
            self.poll_timeout_seconds
                .unwrap_or(DEFAULT_POLL_TIMEOUT_SECONDS),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn initial_channel_target(&self) -> usize {
        self.initial_channel_target
            .unwrap_or(DEFAULT_INITIAL_CHANNEL_TARGET)
    }

    pub fn joinable_funds_target(&self) -> f64 {
        self.joinable_funds_target
            .unwrap_or(DEFAULT_JOINABLE_FUNDS_TARGET)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settle_timeout() > MAX_SETTLE_TIMEOUT {
            bail!(
                "settle_timeout {} exceeds the maximum of {}",
                self.settle_timeout(),
                MAX_SETTLE_TIMEOUT
            );
        }
        if self.reveal_timeout() >= self.settle_timeout() {
            bail!(
                "reveal_timeout {} must be smaller than settle_timeout {}",
                self.reveal_timeout(),
                self.settle_timeout()
            );
        }
        if !(0.0..=1.0).contains(&self.joinable_funds_target()) {
            bail!(
                "joinable_funds_target {} must be between 0 and 1",
                self.joinable_funds_target()
            );
        }
        Ok(())
    }
}

#[derive(ClapSerde, Debug, Clone)]
pub struct ChainConfig {
    /// block interval of the development ledger, in milliseconds [default: 1000]
    #[arg(name = "CHAIN_BLOCK_INTERVAL_MS", long = "chain-block-interval-ms", env)]
    pub block_interval_ms: Option<u64>,

    /// how often the ledger is polled for new blocks, in milliseconds [default: 250]
    #[arg(
        name = "CHAIN_POLLING_INTERVAL_MS",
        long = "chain-polling-interval-ms",
        env
    )]
    pub polling_interval_ms: Option<u64>,

    /// tokens minted to this node on the development ledger (separated by `,`)
    #[arg(name = "CHAIN_FUNDED_TOKENS", long = "chain-funded-tokens", env, value_parser, num_args = 0.., value_delimiter = ',')]
    pub funded_tokens: Vec<Address>,

    /// amount of each funded token minted at startup [default: 1000000]
    #[arg(
        name = "CHAIN_INITIAL_TOKEN_BALANCE",
        long = "chain-initial-token-balance",
        env
    )]
    pub initial_token_balance: Option<TokenAmount>,
}

impl ChainConfig {
    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms.unwrap_or(DEFAULT_BLOCK_INTERVAL_MS))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(
            self.polling_interval_ms
                .unwrap_or(DEFAULT_CHAIN_POLLING_INTERVAL_MS),
        )
    }

    pub fn initial_token_balance(&self) -> TokenAmount {
        self.initial_token_balance
            .unwrap_or(DEFAULT_INITIAL_TOKEN_BALANCE)
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    // Left unset unless given, so that `$BASE_DIR/config.yml` can be used
    // when only the base dir is passed.
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: {:?} or $BASE_DIR/config.yml]", get_default_config_file()))]
    config_path: Option<PathBuf>,

    /// base directory
    #[arg(short = 'd', long = "dir", help = format!("base directory for all [default: {:?}]", get_base_dir()))]
    base_dir: Option<PathBuf>,

    #[command(flatten)]
    pub node: <NodeConfig as ClapSerde>::Opt,

    #[command(flatten)]
    pub chain: <ChainConfig as ClapSerde>::Opt,

    #[command(flatten)]
    pub rpc: <RpcConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
struct SerializedConfig {
    node: Option<<NodeConfig as ClapSerde>::Opt>,
    chain: Option<<ChainConfig as ClapSerde>::Opt>,
    rpc: Option<<RpcConfig as ClapSerde>::Opt>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub node: NodeConfig,
    pub chain: ChainConfig,
    pub rpc: RpcConfig,
}

pub(crate) fn print_help_and_exit(code: i32) -> ! {
    use std::io::IsTerminal;
    if std::io::stdout().is_terminal() {
        let mut cmd = Args::command();
        let _ = cmd.print_help();
    }
    exit(code);
}

impl Config {
    /// Loads the config from the process arguments, exiting on failure.
    pub fn parse() -> Self {
        match Self::from_args(Args::parse()) {
            Ok(config) => config,
            Err(err) => {
                error!("Invalid config: {:#}", err);
                print_help_and_exit(1)
            }
        }
    }

    pub fn try_parse_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_args(Args::try_parse_from(args)?)
    }

    fn from_args(mut args: Args) -> anyhow::Result<Self> {
        let base_dir = args.base_dir.clone().unwrap_or_else(get_base_dir);
        let config_file = args
            .config_path
            .clone()
            .or(args.base_dir.as_ref().map(|x| x.join(DEFAULT_CONFIG_FILE_NAME)))
            .unwrap_or_else(get_default_config_file);

        // A missing config file is fine, everything has a default.
        let from_file = match File::open(&config_file) {
            Ok(file) => Some(
                serde_yaml::from_reader::<_, SerializedConfig>(BufReader::new(file))
                    .with_context(|| format!("invalid config file {:?}", config_file))?,
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("read config file {:?}", config_file))
            }
        };
        let (node, chain, rpc) = match from_file {
            Some(SerializedConfig { node, chain, rpc }) => (node, chain, rpc),
            None => (None, None, None),
        };

        let node = match node {
            Some(node) => NodeConfig::from(node).merge(&mut args.node),
            None => NodeConfig::from(&mut args.node),
        };
        let chain = match chain {
            Some(chain) => ChainConfig::from(chain).merge(&mut args.chain),
            None => ChainConfig::from(&mut args.chain),
        };
        let rpc = match rpc {
            Some(rpc) => RpcConfig::from(rpc).merge(&mut args.rpc),
            None => RpcConfig::from(&mut args.rpc),
        };
        node.validate()?;
        rpc.validate()?;

        Ok(Self {
            base_dir,
            node,
            chain,
            rpc,
        })
    }
}
