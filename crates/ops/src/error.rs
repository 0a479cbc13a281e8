//! The typed error enum for the public operation surface (§7), a 1:1
//! mapping onto the wire error taxonomy. Plumbing crates (`sysfs`,
//! `mount`, `registry`, `pipeline`) use `anyhow` instead; this is only the
//! outer boundary a transport adapter would translate mechanically.

use storaged_auth::GateError;
use storaged_jobs::JobEngineError;

#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// Catch-all, including helper non-zero exits with no specific code.
    #[error("{0}")]
    Failed(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("permission denied (authentication is required)")]
    AuthenticationRequired,
    #[error("the service is inhibited")]
    Inhibited,
    #[error("device is busy")]
    Busy,
    #[error("cancelled")]
    Cancelled,
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("would wake up the drive")]
    AtaSmartWouldWakeup,
    #[error("filesystem driver missing")]
    FilesystemDriverMissing,
    #[error("filesystem tools missing: {0}")]
    FilesystemToolsMissing(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<GateError> for OpError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Inhibited => OpError::Inhibited,
            GateError::PermissionDenied => OpError::PermissionDenied,
            GateError::AuthenticationRequired => OpError::AuthenticationRequired,
            GateError::Cancelled => OpError::Cancelled,
            GateError::Authority(e) => OpError::Internal(e),
        }
    }
}

impl From<JobEngineError> for OpError {
    fn from(e: JobEngineError) -> Self {
        match e {
            JobEngineError::Busy => OpError::Busy,
            JobEngineError::Spawn(msg) => OpError::Failed(msg),
        }
    }
}

/// Interpret a finished helper's exit status the way §7 maps specific
/// codes: driver-missing (32) and tools-missing (3) for mount/mkfs-style
/// helpers, everything else falls through to the caller's own handling.
pub fn map_known_exit_code(exit_code: i32, helper_name: &str) -> Option<OpError> {
    match exit_code {
        32 => Some(OpError::FilesystemDriverMissing),
        3 => Some(OpError::FilesystemToolsMissing(helper_name.to_string())),
        _ => None,
    }
}
