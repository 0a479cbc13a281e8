//! Authorization Gate (C8): the per-operation authorize flow, generalized
//! away from a specific authority backend (out of scope per spec.md §1)
//! behind the [`Authority`] trait.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::inhibitor::InhibitorRegistry;

/// The details bag built for the external authority (§4.8 step 3). The
/// caller (an operation handler in `storaged-ops`) fills this in from the
/// subject Device and its enclosing drive; the gate itself is agnostic to
/// Device internals.
#[derive(Debug, Clone, Default)]
pub struct AuthDetails {
    pub operation: String,
    pub subject_device_file: String,
    pub subject_by_id: Option<String>,
    pub subject_by_path: Option<String>,
    pub is_partition: bool,
    pub partition_number: u32,
    pub drive_device_file: Option<String>,
    pub drive_by_id: Option<String>,
    pub drive_by_path: Option<String>,
    pub drive_vendor: String,
    pub drive_model: String,
    pub drive_revision: String,
    pub drive_serial: String,
    pub drive_connection_interface: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied,
    NeedAuth,
}

/// The external authorization authority (PolicyKit-equivalent). Kept
/// generic rather than `dyn` since the single daemon binary only ever
/// has one concrete implementation in scope at a time.
pub trait Authority {
    fn check(
        &self,
        action: &str,
        details: &AuthDetails,
        allow_interaction: bool,
    ) -> impl Future<Output = anyhow::Result<AuthDecision>> + Send;
}

/// Always allows — useful for daemon-internal synthesized calls and
/// tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthority;

impl Authority for AllowAllAuthority {
    async fn check(&self, _action: &str, _details: &AuthDetails, _allow_interaction: bool) -> anyhow::Result<AuthDecision> {
        Ok(AuthDecision::Allowed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("the service is inhibited")]
    Inhibited,
    #[error("permission denied")]
    PermissionDenied,
    #[error("permission denied (authentication is required)")]
    AuthenticationRequired,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Authority(#[from] anyhow::Error),
}

/// Stateless; the registry it consults and the notifiers it races are
/// passed in per call.
#[derive(Debug, Default)]
pub struct AuthorizationGate;

impl AuthorizationGate {
    pub fn new() -> Self {
        Self
    }

    /// Run the §4.8 flow. `action` empty means an internal daemon call,
    /// which skips authorization entirely (step 2). `caller_disconnected`
    /// and `subject_removed` are raced against the authority check (step
    /// 5); whichever fires first cancels it.
    pub async fn authorize<A: Authority>(
        &self,
        authority: &A,
        inhibitors: &InhibitorRegistry,
        action: &str,
        details: &AuthDetails,
        allow_interaction: bool,
        caller_disconnected: Arc<Notify>,
        subject_removed: Arc<Notify>,
    ) -> Result<(), GateError> {
        if inhibitors.is_service_inhibited() {
            return Err(GateError::Inhibited);
        }
        if action.is_empty() {
            return Ok(());
        }
        tokio::select! {
            _ = caller_disconnected.notified() => Err(GateError::Cancelled),
            _ = subject_removed.notified() => Err(GateError::Cancelled),
            result = authority.check(action, details, allow_interaction) => {
                match result? {
                    AuthDecision::Allowed => Ok(()),
                    AuthDecision::Denied => Err(GateError::PermissionDenied),
                    AuthDecision::NeedAuth => Err(GateError::AuthenticationRequired),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAllAuthority;
    impl Authority for DenyAllAuthority {
        async fn check(&self, _action: &str, _details: &AuthDetails, _allow_interaction: bool) -> anyhow::Result<AuthDecision> {
            Ok(AuthDecision::Denied)
        }
    }

    #[tokio::test]
    async fn test_empty_action_skips_authority() {
        let gate = AuthorizationGate::new();
        let inhibitors = InhibitorRegistry::new();
        let result = gate
            .authorize(
                &DenyAllAuthority,
                &inhibitors,
                "",
                &AuthDetails::default(),
                false,
                Arc::new(Notify::new()),
                Arc::new(Notify::new()),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_service_inhibited_short_circuits() {
        let gate = AuthorizationGate::new();
        let mut inhibitors = InhibitorRegistry::new();
        inhibitors.inhibit_service(crate::inhibitor::CallerId("a".into()));
        let result = gate
            .authorize(
                &AllowAllAuthority,
                &inhibitors,
                "org.storaged.filesystem-mount",
                &AuthDetails::default(),
                false,
                Arc::new(Notify::new()),
                Arc::new(Notify::new()),
            )
            .await;
        assert!(matches!(result, Err(GateError::Inhibited)));
    }

    #[tokio::test]
    async fn test_denied_maps_to_permission_denied() {
        let gate = AuthorizationGate::new();
        let inhibitors = InhibitorRegistry::new();
        let result = gate
            .authorize(
                &DenyAllAuthority,
                &inhibitors,
                "org.storaged.filesystem-mount",
                &AuthDetails::default(),
                false,
                Arc::new(Notify::new()),
                Arc::new(Notify::new()),
            )
            .await;
        assert!(matches!(result, Err(GateError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_caller_disconnect_cancels() {
        let gate = AuthorizationGate::new();
        let inhibitors = InhibitorRegistry::new();
        let caller_disconnected = Arc::new(Notify::new());
        caller_disconnected.notify_one();
        let result = gate
            .authorize(
                &AllowAllAuthority,
                &inhibitors,
                "org.storaged.filesystem-mount",
                &AuthDetails::default(),
                false,
                caller_disconnected,
                Arc::new(Notify::new()),
            )
            .await;
        assert!(matches!(result, Err(GateError::Cancelled)));
    }
}
