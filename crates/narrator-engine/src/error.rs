use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credential absent or too short; raised before any request is sent.
    #[error("Need an api-key")]
    MissingCredential,

    /// The endpoint answered with an `error` payload.
    #[error("{message} (openai.com)")]
    RemoteApi { message: String },

    /// A success payload without the expected text or image item.
    #[error("{0}")]
    MalformedResponse(&'static str),

    #[error("{endpoint} request failed: {message}")]
    Transport { endpoint: String, message: String },
}

impl GatewayError {
    pub fn is_missing_credential(&self) -> bool {
        matches!(self, GatewayError::MissingCredential)
    }
}
