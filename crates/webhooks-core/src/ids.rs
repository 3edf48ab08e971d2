use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(SubscriptionId);
uuid_id!(AttemptId);
uuid_id!(ManagerId);
uuid_id!(SiteId);
uuid_id!(UowId);

/// Identifies a principal (user, service account, ...) in the host's
/// authentication boundary. Whitespace is rejected at the call site
/// that constructs a `Subscription` (spec §8 boundary property).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionId(pub String);

impl PermissionId {
    /// The generic "view" permission used when a subscription sets an
    /// owner but no explicit permission (spec §3).
    pub fn default_view() -> Self {
        Self("view".to_string())
    }
}

/// Opaque reference to a domain object's persistent identity, as
/// handed out by the host's persistence layer. `ShipmentInfo` carries
/// these instead of live references so the engine never has to walk
/// back into a unit of work that may no longer be active (spec §4.2
/// caution, §4.8).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub database_name: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(database_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database_name, self.object_id)
    }
}
