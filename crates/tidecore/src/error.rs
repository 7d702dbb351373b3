use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal build failures. Anything recoverable becomes a diagnostic instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Malformed value descriptor: {0}")]
    Malformed(String),

    #[error("Invalid program descriptor: {0}")]
    InvalidProgram(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Program result is undefined")]
    UndefinedResult,

    #[error("Execution context not found: {0}")]
    UnknownContext(Uuid),

    #[error("Node #{0} is not writable")]
    NotWritable(u32),

    #[error("Slot {index} is out of range (context has {len} slots)")]
    SlotOutOfRange { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch module '{id}': {reason}")]
    FetchFailed { id: String, reason: String },

    #[error("Cannot build module '{id}' with type '{module_type}'")]
    UnknownModuleType { id: String, module_type: String },

    #[error("Module build failed: {0}")]
    BuildFailed(String),

    #[error("No module server configured to fetch '{0}'")]
    NoServer(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Value type '{0}' is unknown")]
    UnknownType(String),

    #[error("Value type '{0}' is not evaluable")]
    NotEvaluable(String),

    #[error("Value reference '{0}' cannot be evaluated statically")]
    Reference(String),

    #[error("Malformed value descriptor: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Cannot promote already registered user #{user} to field user of #{source_op}")]
    AlreadyRegistered { user: usize, source_op: usize },

    #[error("Flow operator not found: #{0}")]
    UnknownOperator(usize),
}

impl From<BuildError> for EvalError {
    fn from(err: BuildError) -> Self {
        EvalError::Malformed(err.to_string())
    }
}
