use thiserror::Error;

use crate::types::Address;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transaction {operation} threw: {reason}")]
    TransactionThrew {
        operation: &'static str,
        reason: String,
    },
    #[error("No contract code at address {0}")]
    AddressWithoutCode(Address),
    #[error("Ledger rpc error: {0}")]
    Rpc(String),
}

impl LedgerError {
    pub fn threw(operation: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::TransactionThrew {
            operation,
            reason: reason.into(),
        }
    }
}
