use thiserror::Error;

use crate::controller::RunState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Network failure before or while reading a response body.
    #[error("transport error: {0}")]
    Transport(String),
    /// One frame or payload failed to parse or validate.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// HTTP status >= 400, or an explicit error event from the engine.
    /// Displays the server text verbatim.
    #[error("{message}")]
    Server { status: Option<u16>, message: String },
    #[error("cannot {action} while run is {state}")]
    Precondition {
        action: &'static str,
        state: RunState,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub(crate) fn precondition(action: &'static str, state: RunState) -> Self {
        Self::Precondition { action, state }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
