use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShipgateError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    #[error("invalid policy '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("invalid stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("failed to resolve team '{team}': {reason}")]
    TeamResolution { team: String, reason: String },

    #[error("no embedded state snapshot found")]
    MissingSnapshot,

    #[error("corrupt state snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("invalid increment kind '{0}': must be major, minor, or patch")]
    InvalidIncrement(String),

    #[error("{operation} failed: {reason}")]
    Collaborator { operation: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShipgateError>;
