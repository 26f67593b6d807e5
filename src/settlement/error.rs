use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, timeout or non-success HTTP status
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// Remote rejected the game account (bad login, unknown account)
    #[error("Account invalid (code {code}): {message}")]
    AccountInvalid { code: i64, message: String },

    /// Remote explicitly denied the transfer
    #[error("Settlement rejected (code {code}): {message}")]
    SettlementRejected { code: i64, message: String },

    /// Success code but missing or unparsable payload
    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),
}
