pub mod channel;
pub mod config;
pub mod events;
pub mod info;
pub mod payment;
pub mod token;
pub mod utils;

pub mod server {
    use std::{net::SocketAddr, sync::Arc};

    use jsonrpsee::{
        server::{Server, ServerHandle},
        Methods, RpcModule,
    };
    use tracing::info;

    pub use crate::rpc::config::RpcConfig;
    use crate::{
        rpc::{
            channel::{ChannelRpcServer, ChannelRpcServerImpl},
            events::{EventsRpcServer, EventsRpcServerImpl},
            info::{InfoRpcServer, InfoRpcServerImpl},
            payment::{PaymentRpcServer, PaymentRpcServerImpl},
            token::{TokenRpcServer, TokenRpcServerImpl},
        },
        Error, NodeApi, Result,
    };

    fn merge(modules: &mut RpcModule<()>, other: impl Into<Methods>) -> Result<()> {
        modules
            .merge(other)
            .map_err(|err| Error::InternalError(err.into()))
    }

    /// Serves the enabled modules on the configured address, or on a random
    /// port if none is set.
    pub async fn start_rpc(
        config: &RpcConfig,
        api: Arc<NodeApi>,
    ) -> Result<(ServerHandle, SocketAddr)> {
        let listening_addr = config.listening_addr.as_deref().unwrap_or("[::]:0");
        let server = Server::builder().build(listening_addr).await?;
        let sockaddr = server.local_addr()?;

        let mut modules = RpcModule::new(());
        if config.is_module_enabled("channel") {
            merge(&mut modules, ChannelRpcServerImpl::new(api.clone()).into_rpc())?;
        }
        if config.is_module_enabled("token") {
            merge(&mut modules, TokenRpcServerImpl::new(api.clone()).into_rpc())?;
        }
        if config.is_module_enabled("payment") {
            merge(&mut modules, PaymentRpcServerImpl::new(api.clone()).into_rpc())?;
        }
        if config.is_module_enabled("events") {
            merge(&mut modules, EventsRpcServerImpl::new(api.clone()).into_rpc())?;
        }
        if config.is_module_enabled("info") {
            merge(&mut modules, InfoRpcServerImpl::new(api).into_rpc())?;
        }
        info!(
            "Starting RPC server at {} with modules {:?}",
            sockaddr, config.enabled_modules
        );
        Ok((server.start(modules), sockaddr))
    }
}
