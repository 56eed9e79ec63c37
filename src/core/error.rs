// This module defines the error types of the cssa backend using the thiserror crate. The
// backend has two error classes: textual IR parse failures, which are ordinary user errors,
// and internal invariant violations, which signal a bug in an earlier pass (a variable with two
// definitions, a register file running dry, a phi whose argument count disagrees with its
// block's predecessors, a dominance query on a block outside the walked graph). Each invariant
// variant carries the offending variable, block or register so the failure can be traced back
// to the pass that broke the contract. Nothing in the pipeline retries or patches around these
// errors; a procedure either compiles completely or compilation aborts with one of them.
// CompileResult<T> is the convenience alias used by every pass.

//! Error types for the cssa backend.
//!
//! Using thiserror for structured, context-carrying errors.

use thiserror::Error;

/// Main error type for the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid backend configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("jump to unknown label {label} in {procedure}")]
    UnknownLabel { procedure: String, label: String },

    #[error("variable {var} has multiple definitions")]
    MultipleDefinitions { var: String },

    #[error("block {block} is not reachable from the entry of {procedure}")]
    DisconnectedBlock { procedure: String, block: String },

    #[error("phi for {var} in block {block} has {args} arguments but {preds} predecessors")]
    PhiArgumentMismatch {
        var: String,
        block: String,
        args: usize,
        preds: usize,
    },

    #[error("ran out of registers assigning {var} in block {block}")]
    RegistersExhausted { var: String, block: String },

    #[error("live-in variable {var} of block {block} has no register")]
    UncoloredLiveIn { var: String, block: String },

    #[error("register {reg} holds two live-in variables of block {block}")]
    DuplicateLiveInRegister { reg: String, block: String },

    #[error("variable {var} has no assigned register")]
    UnassignedRegister { var: String },

    #[error("variable {var} needs a stack slot but has no phi-web")]
    MissingPhiWeb { var: String },

    #[error("parallel copy writes register {reg} twice")]
    ParallelCopyConflict { reg: String },

    #[error("{value} is not a valid rotated immediate")]
    InvalidImmediate { value: i32 },

    #[error("malformed instruction: {reason}")]
    MalformedInstruction { reason: String },

    #[error("invariant violated: {reason}")]
    InvariantViolated { reason: String },
}

/// Result type alias for backend operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CompileError::RegistersExhausted {
            var: "%x3".to_string(),
            block: "L4".to_string(),
        };
        assert_eq!(err.to_string(), "ran out of registers assigning %x3 in block L4");

        let err = CompileError::Parse {
            line: 3,
            column: 7,
            message: "expected ';'".to_string(),
        };
        assert_eq!(err.to_string(), "parse error at 3:7: expected ';'");
    }
}
