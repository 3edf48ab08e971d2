use async_trait::async_trait;
use webhooks_core::boundary::{Authentication, Permission, PermissionChecker, Principal};
use webhooks_core::{ObjectRef, PermissionId, PrincipalId};

/// Placeholder identity boundary for this demo host: every principal
/// and permission id resolves, and every check passes. A real
/// deployment replaces this with its own identity provider and
/// authorization policy (spec §6 boundary) — this exists so the
/// dispatcher has something concrete to wire `Registry`/`Subscription`
/// against without depending on `webhooks_core::testing`, which is
/// documented as test-only.
pub struct OpenAuthentication;

#[async_trait]
impl Authentication for OpenAuthentication {
    async fn get_principal(&self, id: &PrincipalId) -> Option<Principal> {
        Some(Principal { id: id.clone() })
    }

    fn unauthenticated_principal(&self) -> Principal {
        Principal { id: PrincipalId("anonymous".to_string()) }
    }

    async fn get_permission(&self, id: &PermissionId) -> Option<Permission> {
        Some(Permission { id: id.clone() })
    }
}

#[async_trait]
impl PermissionChecker for OpenAuthentication {
    async fn check_permission(&self, _principal: &Principal, _permission: &Permission, _object_ref: &ObjectRef) -> bool {
        true
    }
}
