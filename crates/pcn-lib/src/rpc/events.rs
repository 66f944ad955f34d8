use std::sync::Arc;

use jsonrpsee::{
    proc_macros::rpc,
    types::{error::CALL_EXECUTION_FAILED_CODE, ErrorObjectOwned},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    events::EventRecord,
    log_and_error,
    serde_utils::U64Hex,
    types::{BlockNumber, ChannelId, TokenAddress},
    NodeApi,
};

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NetworkEventsParams {
    /// First block of the range, the genesis if not set.
    #[serde_as(as = "Option<U64Hex>")]
    pub from_block: Option<BlockNumber>,
    /// Last block of the range, the latest processed block if not set.
    #[serde_as(as = "Option<U64Hex>")]
    pub to_block: Option<BlockNumber>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenNetworkEventsParams {
    pub token_address: TokenAddress,
    #[serde_as(as = "Option<U64Hex>")]
    pub from_block: Option<BlockNumber>,
    #[serde_as(as = "Option<U64Hex>")]
    pub to_block: Option<BlockNumber>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChannelEventsParams {
    pub channel_id: ChannelId,
    #[serde_as(as = "Option<U64Hex>")]
    pub from_block: Option<BlockNumber>,
    #[serde_as(as = "Option<U64Hex>")]
    pub to_block: Option<BlockNumber>,
}

/// RPC module for ledger and payment events, sorted by block.
#[rpc(server)]
trait EventsRpc {
    /// Token registrations.
    #[method(name = "network_events")]
    async fn network_events(
        &self,
        params: NetworkEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned>;

    /// Channel creations and payments of one token network.
    #[method(name = "token_network_events")]
    async fn token_network_events(
        &self,
        params: TokenNetworkEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned>;

    /// Deposits, close, settle and payments of one channel.
    #[method(name = "channel_events")]
    async fn channel_events(
        &self,
        params: ChannelEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned>;
}

pub struct EventsRpcServerImpl {
    api: Arc<NodeApi>,
}

impl EventsRpcServerImpl {
    pub fn new(api: Arc<NodeApi>) -> Self {
        EventsRpcServerImpl { api }
    }
}

#[async_trait::async_trait]
impl EventsRpcServer for EventsRpcServerImpl {
    async fn network_events(
        &self,
        params: NetworkEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned> {
        match self
            .api
            .network_events(params.from_block.unwrap_or_default(), params.to_block)
            .await
        {
            Ok(events) => Ok(events),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn token_network_events(
        &self,
        params: TokenNetworkEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned> {
        match self
            .api
            .token_network_events(
                params.token_address,
                params.from_block.unwrap_or_default(),
                params.to_block,
            )
            .await
        {
            Ok(events) => Ok(events),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn channel_events(
        &self,
        params: ChannelEventsParams,
    ) -> Result<Vec<EventRecord>, ErrorObjectOwned> {
        match self
            .api
            .channel_events(
                params.channel_id,
                params.from_block.unwrap_or_default(),
                params.to_block,
            )
            .await
        {
            Ok(events) => Ok(events),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }
}
