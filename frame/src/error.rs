//! Error types for the frame execution core.

use crate::shader::ShaderStage;

/// A shader source rejected by the compiler.
///
/// `line` is 1-based; it is 0 when the compiler could not attribute the
/// diagnostic to a source location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage:?} shader, line {line}: {message}")]
pub struct CompileError {
    pub stage: ShaderStage,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(stage: ShaderStage, line: u32, message: impl Into<String>) -> Self {
        Self {
            stage,
            line,
            message: message.into(),
        }
    }
}

/// Errors that can occur in the frame execution core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// No adapter, device or API satisfies the request.
    #[error("graphics unavailable: {0}")]
    Unavailable(String),
    /// The shader compiler rejected a source.
    #[error("shader compilation failed: {0}")]
    Compile(#[from] CompileError),
    /// A pipeline, bind group, attachment or copy does not match what it is
    /// used with.
    #[error("validation failed: {0}")]
    Validation(String),
    /// An operation was issued out of its legal order.
    #[error("invalid usage sequence: {0}")]
    UsageSequence(String),
    /// The queue timeline stopped accepting work.
    #[error("GPU device lost")]
    DeviceLost,
}

impl GraphicsError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::UsageSequence(message.into())
    }

    /// Returns `true` for errors raised by validation of descriptors or
    /// recorded commands.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` for out-of-order usage errors.
    pub fn is_usage_sequence(&self) -> bool {
        matches!(self, Self::UsageSequence(_))
    }
}
