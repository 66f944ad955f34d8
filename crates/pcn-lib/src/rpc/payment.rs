use std::{sync::Arc, time::Duration};

use jsonrpsee::{
    proc_macros::rpc,
    types::{error::CALL_EXECUTION_FAILED_CODE, ErrorObjectOwned},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    log_and_error,
    serde_utils::{U128Hex, U64Hex},
    transfer::TransferOutcome,
    types::{Address, PaymentIdentifier, TokenAddress, TokenAmount},
    NodeApi,
};

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferParams {
    pub token_address: TokenAddress,
    pub target_address: Address,
    #[serde_as(as = "U128Hex")]
    pub amount: TokenAmount,
    /// Identifier of the payment, a random one if not set.
    #[serde_as(as = "Option<U64Hex>")]
    pub identifier: Option<PaymentIdentifier>,
    /// Give up waiting for the outcome after this many milliseconds.
    #[serde_as(as = "Option<U64Hex>")]
    pub timeout_ms: Option<u64>,
}

/// RPC module for payments.
#[rpc(server)]
trait PaymentRpc {
    /// Sends a transfer and waits for its outcome.
    #[method(name = "transfer")]
    async fn transfer(&self, params: TransferParams) -> Result<TransferOutcome, ErrorObjectOwned>;
}

pub struct PaymentRpcServerImpl {
    api: Arc<NodeApi>,
}

impl PaymentRpcServerImpl {
    pub fn new(api: Arc<NodeApi>) -> Self {
        PaymentRpcServerImpl { api }
    }
}

#[async_trait::async_trait]
impl PaymentRpcServer for PaymentRpcServerImpl {
    async fn transfer(&self, params: TransferParams) -> Result<TransferOutcome, ErrorObjectOwned> {
        match self
            .api
            .transfer_and_wait(
                params.token_address,
                params.amount,
                params.target_address,
                params.identifier,
                params.timeout_ms.map(Duration::from_millis),
            )
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => log_and_error!(params, err.to_string()),
        }
    }
}
