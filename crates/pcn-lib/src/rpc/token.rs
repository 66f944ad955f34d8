use std::sync::Arc;

use jsonrpsee::{
    proc_macros::rpc,
    types::{error::CALL_EXECUTION_FAILED_CODE, ErrorObjectOwned},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    log_and_error,
    rpc::channel::{into_channels, ListChannelsResult},
    serde_utils::{U128Hex, U32Hex},
    types::{Address, TokenAddress, TokenAmount},
    NodeApi,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterTokenParams {
    pub token_address: TokenAddress,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterTokenResult {
    /// The contract managing the channels of the new token network.
    pub channel_manager_address: Address,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListTokensResult {
    pub tokens: Vec<TokenAddress>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectParams {
    pub token_address: TokenAddress,
    /// Total funds to commit to the token network.
    #[serde_as(as = "U128Hex")]
    pub funds: TokenAmount,
    /// Number of channels to open, the node's default if not set.
    #[serde_as(as = "Option<U32Hex>")]
    pub initial_channel_target: Option<u32>,
    /// Share of `funds` kept back, the node's default if not set.
    pub joinable_funds_target: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LeaveParams {
    pub token_address: TokenAddress,
    /// Only leave channels the partner has deposited into.
    pub only_receiving: Option<bool>,
}

/// RPC module for token networks.
#[rpc(server)]
trait TokenRpc {
    /// Registers a token network on the ledger.
    #[method(name = "register_token")]
    async fn register_token(
        &self,
        params: RegisterTokenParams,
    ) -> Result<RegisterTokenResult, ErrorObjectOwned>;

    /// Lists registered tokens.
    #[method(name = "list_tokens")]
    async fn list_tokens(&self) -> Result<ListTokensResult, ErrorObjectOwned>;

    /// Opens and funds channels in a token network.
    #[method(name = "connect")]
    async fn connect(&self, params: ConnectParams) -> Result<ListChannelsResult, ErrorObjectOwned>;

    /// Closes and settles the channels of a token network.
    #[method(name = "leave")]
    async fn leave(&self, params: LeaveParams) -> Result<ListChannelsResult, ErrorObjectOwned>;
}

pub struct TokenRpcServerImpl {
    api: Arc<NodeApi>,
}

impl TokenRpcServerImpl {
    pub fn new(api: Arc<NodeApi>) -> Self {
        TokenRpcServerImpl { api }
    }
}

#[async_trait::async_trait]
impl TokenRpcServer for TokenRpcServerImpl {
    async fn register_token(
        &self,
        params: RegisterTokenParams,
    ) -> Result<RegisterTokenResult, ErrorObjectOwned> {
        match self.api.register_token(params.token_address).await {
            Ok(channel_manager_address) => Ok(RegisterTokenResult {
                channel_manager_address,
            }),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn list_tokens(&self) -> Result<ListTokensResult, ErrorObjectOwned> {
        Ok(ListTokensResult {
            tokens: self.api.token_list(),
        })
    }

    async fn connect(&self, params: ConnectParams) -> Result<ListChannelsResult, ErrorObjectOwned> {
        match self
            .api
            .connect(
                params.token_address,
                params.funds,
                params.initial_channel_target.map(|target| target as usize),
                params.joinable_funds_target,
            )
            .await
        {
            Ok(channels) => Ok(into_channels(channels)),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }

    async fn leave(&self, params: LeaveParams) -> Result<ListChannelsResult, ErrorObjectOwned> {
        match self
            .api
            .leave(params.token_address, params.only_receiving.unwrap_or(false))
            .await
        {
            Ok(channels) => Ok(into_channels(channels)),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }
}
