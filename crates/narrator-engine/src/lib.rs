mod error;
mod gateway;
mod orchestrator;
mod transport;

#[cfg(test)]
mod testing;

pub use error::GatewayError;
pub use gateway::{
    default_text_params, Gateway, GatewayConfig, CONTINUITY_INSTRUCTION, DEFAULT_API_BASE,
    DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_SIZE, DEFAULT_TEXT_MODEL,
};
pub use orchestrator::{SceneSink, TurnOrchestrator, TurnOutcome, GAME_PREAMBLE};
pub use transport::{AlertSink, HttpReply, HttpTransport, LogAlert, ReqwestTransport};
