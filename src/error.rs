use thiserror::Error;

/// Errors surfaced to the host by the compiler, the virtual machine and
/// the reader. Fatal conditions (OS memory exhaustion, a Free cell reached
/// through a live reference) are not represented here; they abort.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A variable was referenced that no compile-time frame binds.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A special form or primitive was given the wrong number of arguments.
    #[error("{form} expects {expected}")]
    Arity { form: String, expected: &'static str },

    /// `defun` appeared inside a function body or a conditional arm.
    #[error("defun is only allowed at global scope")]
    DefunAtLocalScope,

    /// A form the compiler cannot make sense of.
    #[error("malformed form: {0}")]
    Malformed(String),

    /// A value of the wrong kind reached an operation at runtime.
    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    /// Ill-formed bytecode: truncated operands, undefined opcodes, or a
    /// program that leaves the operand stack unbalanced.
    #[error("malformed program: {0}")]
    Program(String),

    /// The reader could not parse the source text.
    #[error("read error: {0}")]
    Read(String),

    /// I/O failure on the console used by PRINT and READ.
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
