use thiserror::Error;

/// Errors that abort a whole load flow run before, or instead of,
/// committing results. Non-convergence and numerical breakdown are
/// reported per component in [`crate::ComponentStatus`].
#[derive(Debug, Error)]
pub enum LoadFlowError {
    #[error("invalid network: {0}")]
    Structural(#[from] StructuralError),

    #[error("invalid parameters: {0}")]
    Configuration(String),

    #[error("load flow cancelled")]
    Cancelled,
}

/// Invalid topology or dangling references.
#[derive(Debug, Error, PartialEq)]
pub enum StructuralError {
    #[error("network has no buses")]
    EmptyNetwork,

    #[error("duplicate bus id {0}")]
    DuplicateBus(String),

    #[error("{element} references unknown bus {bus}")]
    UnknownBus { element: String, bus: String },

    #[error("{element} references unknown branch {branch}")]
    UnknownBranch { element: String, branch: String },

    #[error("{element} position {position} out of range 0..={max}")]
    TapPosition {
        element: String,
        position: usize,
        max: usize,
    },

    #[error("branch {0} has a non-finite impedance")]
    InvalidImpedance(String),

    /// None of the requested slack buses lies in the processed component.
    #[error("no slack candidate among {0:?} in the main component")]
    DisconnectedSlack(Vec<String>),
}
