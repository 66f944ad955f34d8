/// Logs a failed request and turns the error into a JSON-RPC error object
/// carrying the request params.
#[macro_export]
macro_rules! log_and_error {
    ($params:expr, $err:expr) => {{
        tracing::error!("rpc request params {:?} => error: {:?}", $params, $err);
        Err(jsonrpsee::types::ErrorObjectOwned::owned(
            CALL_EXECUTION_FAILED_CODE,
            $err,
            Some($params),
        ))
    }};
}
