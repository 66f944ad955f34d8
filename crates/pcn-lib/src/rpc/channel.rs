use std::sync::Arc;

use jsonrpsee::{
    proc_macros::rpc,
    types::{error::CALL_EXECUTION_FAILED_CODE, ErrorObjectOwned},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    channel::{ChannelState, ChannelStatus},
    log_and_error,
    serde_utils::{U128Hex, U64Hex},
    types::{Address, BlockNumber, ChannelId, TokenAddress, TokenAmount},
    NodeApi,
};

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OpenChannelParams {
    /// The token of the channel.
    pub token_address: TokenAddress,
    /// The address of the partner.
    pub partner_address: Address,
    /// Blocks between close and settle, the node's default if not set.
    #[serde_as(as = "Option<U64Hex>")]
    pub settle_timeout: Option<BlockNumber>,
    /// Blocks a secret must be revealed before a lock expires, the node's default if not set.
    #[serde_as(as = "Option<U64Hex>")]
    pub reveal_timeout: Option<BlockNumber>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DepositParams {
    pub token_address: TokenAddress,
    pub partner_address: Address,
    /// The amount added to our deposit.
    #[serde_as(as = "U128Hex")]
    pub amount: TokenAmount,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CloseChannelParams {
    pub token_address: TokenAddress,
    pub partner_address: Address,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchCloseChannelsParams {
    pub token_address: TokenAddress,
    /// Partners whose channels are closed together. Nothing is closed if any
    /// of them is busy.
    pub partner_addresses: Vec<Address>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListChannelsParams {
    /// Only list channels of this token.
    pub token_address: Option<TokenAddress>,
    /// Only list the channel with this partner.
    pub partner_address: Option<Address>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetChannelParams {
    pub channel_id: ChannelId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListChannelsResult {
    pub channels: Vec<Channel>,
}

/// The channel data structure
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// The channel ID, which is also its contract address
    pub channel_id: ChannelId,
    pub token_address: TokenAddress,
    pub partner_address: Address,
    pub status: ChannelStatus,
    /// Our deposit in the channel contract
    #[serde_as(as = "U128Hex")]
    pub balance: TokenAmount,
    /// The partner's deposit in the channel contract
    #[serde_as(as = "U128Hex")]
    pub partner_deposit: TokenAmount,
    /// What we can still send off-chain
    #[serde_as(as = "U128Hex")]
    pub distributable: TokenAmount,
    /// Number of pending hash-time locks on both sides
    #[serde_as(as = "U64Hex")]
    pub outstanding_locks: u64,
    #[serde_as(as = "U64Hex")]
    pub settle_timeout: BlockNumber,
    #[serde_as(as = "U64Hex")]
    pub reveal_timeout: BlockNumber,
    #[serde_as(as = "Option<U64Hex>")]
    pub opened_block: Option<BlockNumber>,
    #[serde_as(as = "Option<U64Hex>")]
    pub closed_block: Option<BlockNumber>,
    #[serde_as(as = "Option<U64Hex>")]
    pub settled_block: Option<BlockNumber>,
}

impl From<ChannelState> for Channel {
    fn from(channel: ChannelState) -> Self {
        Channel {
            channel_id: channel.channel_id,
            token_address: channel.token,
            partner_address: channel.partner(),
            status: channel.status,
            balance: channel.our_state.contract_balance,
            partner_deposit: channel.partner_state.contract_balance,
            distributable: channel.our_distributable(),
            outstanding_locks: channel.outstanding_locks() as u64,
            settle_timeout: channel.settle_timeout,
            reveal_timeout: channel.reveal_timeout,
            opened_block: channel.external_state.opened_block,
            closed_block: channel.external_state.closed_block,
            settled_block: channel.external_state.settled_block,
        }
    }
}

pub(crate) fn into_channels(channels: Vec<ChannelState>) -> ListChannelsResult {
    ListChannelsResult {
        channels: channels.into_iter().map(Into::into).collect(),
    }
}

/// RPC module for channel management.
#[rpc(server)]
trait ChannelRpc {
    /// Opens a channel and waits until the ledger has confirmed it.
    #[method(name = "open_channel")]
    async fn open_channel(&self, params: OpenChannelParams) -> Result<Channel, ErrorObjectOwned>;

    /// Adds to our deposit in a channel.
    #[method(name = "deposit")]
    async fn deposit(&self, params: DepositParams) -> Result<Channel, ErrorObjectOwned>;

    /// Closes a channel and waits until the close is mined.
    #[method(name = "close_channel")]
    async fn close_channel(&self, params: CloseChannelParams) -> Result<Channel, ErrorObjectOwned>;

    /// Closes several channels of one token at once.
    #[method(name = "batch_close_channels")]
    async fn batch_close_channels(
        &self,
        params: BatchCloseChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned>;

    /// Lists channels, optionally narrowed by token and partner.
    #[method(name = "list_channels")]
    async fn list_channels(
        &self,
        params: ListChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned>;

    #[method(name = "get_channel")]
    async fn get_channel(&self, params: GetChannelParams) -> Result<Channel, ErrorObjectOwned>;
}

pub struct ChannelRpcServerImpl {
    api: Arc<NodeApi>,
}

impl ChannelRpcServerImpl {
    pub fn new(api: Arc<NodeApi>) -> Self {
        ChannelRpcServerImpl { api }
    }
}

#[async_trait::async_trait]
impl ChannelRpcServer for ChannelRpcServerImpl {
    async fn open_channel(&self, params: OpenChannelParams) -> Result<Channel, ErrorObjectOwned> {
        match self
            .api
            .open(
                params.token_address,
                params.partner_address,
                params.settle_timeout,
                params.reveal_timeout,
            )
            .await
        {
            Ok(channel) => Ok(channel.into()),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn deposit(&self, params: DepositParams) -> Result<Channel, ErrorObjectOwned> {
        match self
            .api
            .deposit(params.token_address, params.partner_address, params.amount)
            .await
        {
            Ok(channel) => Ok(channel.into()),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn close_channel(&self, params: CloseChannelParams) -> Result<Channel, ErrorObjectOwned> {
        match self
            .api
            .close(params.token_address, params.partner_address)
            .await
        {
            Ok(channel) => Ok(channel.into()),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn batch_close_channels(
        &self,
        params: BatchCloseChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned> {
        match self
            .api
            .batch_close(params.token_address, params.partner_addresses.clone())
            .await
        {
            Ok(channels) => Ok(into_channels(channels)),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn list_channels(
        &self,
        params: ListChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned> {
        Ok(into_channels(self.api.channel_list(
            params.token_address.as_ref(),
            params.partner_address.as_ref(),
        )))
    }

    async fn get_channel(&self, params: GetChannelParams) -> Result<Channel, ErrorObjectOwned> {
        match self.api.get_channel(&params.channel_id) {
            Ok(channel) => Ok(channel.into()),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }
}
