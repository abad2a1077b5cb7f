//! Business-logic services. The API layer stays thin and delegates here.

pub mod commands;
pub mod queue_service;

pub use commands::{parse_command, ChatCommand};
pub use queue_service::{
    BatchOutcome, QueueService, QueueState, SubmissionLimits, SubmitOutcome,
};
