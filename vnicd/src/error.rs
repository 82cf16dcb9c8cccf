//! Error types for the control plane.
//!
//! The datapath never returns these: per-packet problems are reported as
//! [`DropReason`](crate::datapath::DropReason) values and drop counters.

use thiserror::Error;

use crate::control::ErrorCode;
use crate::host::HostError;

/// Control plane errors.
#[derive(Debug, Error)]
pub enum VnicError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Interface name already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Port {port} out of range (scheme supports ports 0..{max})")]
    PortOutOfRange { port: u16, max: u16 },

    #[error("Invalid interface name: {0}")]
    InvalidName(String),

    #[error("Physical interface {0} is down")]
    NetworkDown(String),

    #[error("Interface {0} is busy")]
    Busy(String),
}

pub type Result<T> = std::result::Result<T, VnicError>;

impl VnicError {
    /// Wire code reported to the command caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            VnicError::NotFound(_) => ErrorCode::NotFound,
            VnicError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            VnicError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            VnicError::Internal(_) => ErrorCode::Internal,
            VnicError::PortOutOfRange { .. } => ErrorCode::PortOutOfRange,
            VnicError::InvalidName(_) => ErrorCode::InvalidName,
            VnicError::NetworkDown(_) => ErrorCode::NetworkDown,
            VnicError::Busy(_) => ErrorCode::Busy,
        }
    }
}

impl From<HostError> for VnicError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::NameInUse(name) => VnicError::AlreadyRegistered(name),
            other => VnicError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_collision_maps_to_already_registered() {
        let err: VnicError = HostError::NameInUse("veth2".to_string()).into();
        assert!(matches!(err, VnicError::AlreadyRegistered(ref name) if name == "veth2"));
        assert_eq!(err.code(), ErrorCode::AlreadyRegistered);
    }

    #[test]
    fn test_other_host_failures_map_to_internal() {
        let err: VnicError = HostError::Other("netlink timeout".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("netlink timeout"));
    }

    #[test]
    fn test_port_out_of_range_message() {
        let err = VnicError::PortOutOfRange { port: 40, max: 32 };
        assert_eq!(
            err.to_string(),
            "Port 40 out of range (scheme supports ports 0..32)"
        );
    }
}
