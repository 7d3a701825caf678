use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqError {
    #[error("Unrecognized termination policy code {0}")]
    InvalidTerminationPolicy(u8),
    #[error("Unrecognized length computation policy code {0}")]
    InvalidLengthPolicy(u8),
    #[error("Initial state {state} for context {context} is outside the probability table")]
    InvalidInitialState { context: usize, state: u8 },
    #[error("A coder needs at least one context")]
    NoContexts,
}
