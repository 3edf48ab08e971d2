use crate::ids::{PermissionId, PrincipalId};
use async_trait::async_trait;

/// A resolved principal. Only what the applicability check needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
}

/// A resolved permission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
}

/// The host's authentication boundary (spec §6). Looks up principals
/// and permissions by id; `None` means "not found", which the
/// applicability check treats as a precondition failure rather than
/// outright denial.
#[async_trait]
pub trait Authentication: Send + Sync {
    async fn get_principal(&self, id: &PrincipalId) -> Option<Principal>;

    /// The fallback principal used when no owner is set but a
    /// permission check must still be evaluated against "whoever is
    /// asking" (mirrors `IAuthentication.unauthenticatedPrincipal()`).
    fn unauthenticated_principal(&self) -> Principal;

    async fn get_permission(&self, id: &PermissionId) -> Option<Permission>;
}

/// The host's permission policy. Evaluated under a principal
/// "interaction" the core sets up locally for the duration of a single
/// applicability check (spec §4.4.1: "set up a security interaction
/// asserting participation of that principal").
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn check_permission(
        &self,
        principal: &Principal,
        permission: &Permission,
        object_ref: &crate::ids::ObjectRef,
    ) -> bool;
}
