//! Error types for the Spindle IR.

/// Errors that can occur when constructing or validating IR.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IrError {
    /// A malformed type description reached the type interner.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// A type mismatch was detected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// An instruction's operands do not satisfy its opcode signature.
    #[error("`{op}`: {reason}")]
    IrType { op: &'static str, reason: String },

    /// A sealing invariant does not hold.
    #[error("malformed function `{function}`{}: {reason}", location_suffix(.block, .instruction))]
    MalformedFunction {
        function: String,
        block: Option<usize>,
        instruction: Option<usize>,
        reason: String,
    },

    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// An invalid workgroup size was specified.
    #[error("invalid workgroup size: [{}, {}, {}]", .0[0], .0[1], .0[2])]
    InvalidWorkgroupSize([u32; 3]),

    /// An instruction was appended after the block's terminator.
    #[error("block {block} is already terminated")]
    BlockTerminated { block: usize },

    /// An earlier type error aborted construction of this function.
    #[error("construction of function `{function}` failed earlier")]
    FunctionFailed { function: String },

    /// An operation is not allowed in the function's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

fn location_suffix(block: &Option<usize>, instruction: &Option<usize>) -> String {
    match (*block, *instruction) {
        (Some(b), Some(i)) => format!(" (block {b}, instruction {i})"),
        (Some(b), None) => format!(" (block {b})"),
        (None, Some(i)) => format!(" (instruction {i})"),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_malformed_function() {
        let err = IrError::MalformedFunction {
            function: "main".into(),
            block: Some(2),
            instruction: Some(0),
            reason: "use is not dominated by its definition".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed function `main` (block 2, instruction 0): use is not dominated by its definition"
        );
    }

    #[test]
    fn display_workgroup_size() {
        let err = IrError::InvalidWorkgroupSize([0, 1, 1]);
        assert_eq!(err.to_string(), "invalid workgroup size: [0, 1, 1]");
    }

    #[test]
    fn display_ir_type() {
        let err = IrError::IrType {
            op: "binary",
            reason: "operand types differ".into(),
        };
        assert_eq!(err.to_string(), "`binary`: operand types differ");
    }
}
