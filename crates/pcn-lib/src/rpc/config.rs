use anyhow::bail;
use clap_serde_derive::ClapSerde;

/// Every module the RPC server knows how to serve.
pub const RPC_MODULES: [&str; 5] = ["channel", "token", "payment", "events", "info"];

const DEFAULT_ENABLED_MODULES: &str = "channel,token,payment,events,info";

#[derive(ClapSerde, Debug, Clone)]
pub struct RpcConfig {
    // Don't use default_value here. Otherwise the default value will override config from file
    /// listening address of the json-rpc server, no server is started if unset
    #[arg(name = "RPC_LISTENING_ADDR", long = "rpc-listening-addr", env)]
    pub listening_addr: Option<String>,

    /// rpc modules served (separated by `,`) [default: channel,token,payment,events,info]
    #[default(DEFAULT_ENABLED_MODULES.split(',').map(ToString::to_string).collect())]
    #[arg(name = "RPC_ENABLED_MODULES", long = "rpc-enabled-modules", env, value_parser, num_args = 0.., value_delimiter = ',')]
    pub enabled_modules: Vec<String>,
}

impl RpcConfig {
    pub fn is_module_enabled(&self, module: &str) -> bool {
        self.enabled_modules.iter().any(|m| m == module)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(unknown) = self
            .enabled_modules
            .iter()
            .find(|module| !RPC_MODULES.contains(&module.as_str()))
        {
            bail!(
                "unknown rpc module {:?}, expected one of {:?}",
                unknown,
                RPC_MODULES
            );
        }
        Ok(())
    }
}
