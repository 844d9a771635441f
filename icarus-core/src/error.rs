//! Internal error type for conditions that are bugs in the driver rather
//! than diagnosable source errors — those go through `icarus_diagnostics`
//! instead (§7 distinguishes "poisoning" source errors from the handful of
//! conditions below that indicate the core itself was used incorrectly).

use icarus_ast::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no subcontext registered for node {0:?}")]
    MissingSubcontext(NodeId),

    #[error("importer rejected locator {0:?}")]
    InvalidImportLocator(String),

    #[error("work item re-entered before its prior run completed (cyclic scheduling)")]
    ReentrantWorkItem,

    #[error("evaluator thunk for node {0:?} failed to produce a value")]
    EvaluationFailed(NodeId),

    #[error(transparent)]
    Arithmetic(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
