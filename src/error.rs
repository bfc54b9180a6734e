//! Failure taxonomy for a streaming session.
//!
//! Every fallible call in the crate returns `anyhow::Result`. The classes
//! below are raised at the point of failure and carried inside the
//! `anyhow::Error`, so the ingestion loop can recover the class with
//! [`PipelineError::classify`] and decide whether to skip a frame or end
//! the session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Device unreachable, listener bind failure, stream refused, accept timeout.
    #[error("connect error: {0}")]
    Connect(String),

    /// Bad magic, invalid length, short read, undecodable payload.
    #[error("frame protocol error: {0}")]
    FrameProtocol(String),

    /// A single detector or classifier call failed.
    #[error("detector error: {0}")]
    Detector(String),

    /// A teardown step failed. Logged, never propagated.
    #[error("cleanup error: {0}")]
    Cleanup(String),
}

/// Coarse class of a failure, recovered from an `anyhow::Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Connect,
    FrameProtocol,
    Detector,
    Cleanup,
    Other,
}

impl PipelineError {
    pub fn connect(msg: impl Into<String>) -> anyhow::Error {
        PipelineError::Connect(msg.into()).into()
    }

    pub fn protocol(msg: impl Into<String>) -> anyhow::Error {
        PipelineError::FrameProtocol(msg.into()).into()
    }

    pub fn detector(msg: impl Into<String>) -> anyhow::Error {
        PipelineError::Detector(msg.into()).into()
    }

    pub fn class(&self) -> FailureClass {
        match self {
            PipelineError::Connect(_) => FailureClass::Connect,
            PipelineError::FrameProtocol(_) => FailureClass::FrameProtocol,
            PipelineError::Detector(_) => FailureClass::Detector,
            PipelineError::Cleanup(_) => FailureClass::Cleanup,
        }
    }

    /// Finds the first `PipelineError` in the chain.
    pub fn classify(err: &anyhow::Error) -> FailureClass {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>())
            .map(PipelineError::class)
            .unwrap_or(FailureClass::Other)
    }
}
