use std::sync::Arc;

use jsonrpsee::{proc_macros::rpc, types::ErrorObjectOwned};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    channel::{ChannelStatus, NetworkStatus},
    serde_utils::{U32Hex, U64Hex},
    types::{Address, BlockNumber},
    NodeApi,
};

#[serde_as]
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NodeInfoResult {
    /// The version of the node software.
    pub version: String,

    /// The commit hash of the node software.
    pub commit_hash: String,

    /// The ledger address of the node.
    pub address: Address,

    /// The latest block whose events the node has processed.
    #[serde_as(as = "U64Hex")]
    pub block_number: BlockNumber,

    /// The number of registered token networks.
    #[serde_as(as = "U32Hex")]
    pub token_count: u32,

    /// The number of channels that are not settled yet.
    #[serde_as(as = "U32Hex")]
    pub channel_count: u32,

    /// The number of channels whose open is not confirmed yet.
    #[serde_as(as = "U32Hex")]
    pub pending_channel_count: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NetworkStatusParams {
    pub address: Address,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NetworkStatusResult {
    pub status: NetworkStatus,
}

/// The RPC module for node information.
#[rpc(server)]
trait InfoRpc {
    /// Get the node information.
    #[method(name = "node_info")]
    async fn node_info(&self) -> Result<NodeInfoResult, ErrorObjectOwned>;

    /// Whether a node is known to be reachable.
    #[method(name = "network_status")]
    async fn network_status(
        &self,
        params: NetworkStatusParams,
    ) -> Result<NetworkStatusResult, ErrorObjectOwned>;
}

pub struct InfoRpcServerImpl {
    api: Arc<NodeApi>,
}

impl InfoRpcServerImpl {
    pub fn new(api: Arc<NodeApi>) -> Self {
        InfoRpcServerImpl { api }
    }
}

#[async_trait::async_trait]
impl InfoRpcServer for InfoRpcServerImpl {
    async fn node_info(&self) -> Result<NodeInfoResult, ErrorObjectOwned> {
        let snapshot = self.api.store().snapshot();
        let channels = snapshot.channels(None, None);
        let count = |status: fn(&ChannelStatus) -> bool| {
            channels
                .iter()
                .filter(|channel| status(&channel.status))
                .count() as u32
        };
        Ok(NodeInfoResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit_hash: crate::get_git_version().to_string(),
            address: snapshot.our_address(),
            block_number: snapshot.block_number(),
            token_count: snapshot.registered_tokens().len() as u32,
            channel_count: count(|status| *status != ChannelStatus::Settled),
            pending_channel_count: count(|status| *status == ChannelStatus::Opening),
        })
    }

    async fn network_status(
        &self,
        params: NetworkStatusParams,
    ) -> Result<NetworkStatusResult, ErrorObjectOwned> {
        Ok(NetworkStatusResult {
            status: self.api.network_status(&params.address),
        })
    }
}
