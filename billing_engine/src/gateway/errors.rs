use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidDescriptor(String),
    #[error("Cannot call the gateway: {0}")]
    InvalidRequest(String),
    #[error("The channel has no {0} operation configured")]
    NotConfigured(&'static str),
    #[error("Gateway transport error: {0}")]
    Transport(String),
    #[error("Gateway request timed out")]
    Timeout,
    #[error("Gateway responded with HTTP {status}")]
    HttpStatus { status: u16, body: String },
    #[error("Gateway rejected the operation: {0}")]
    Rejected(String),
    #[error("Webhook signature is missing or invalid")]
    InvalidSignature,
}

impl GatewayError {
    /// True for failures of the remote side or the network, as opposed to problems with our request or configuration.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::HttpStatus { .. })
    }
}
