use crate::ids::{ObjectRef, SiteId};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A type tag identifying a domain object's class, or the structural
/// interface it implements. The original system resolves this through
/// component-architecture interface inheritance; Rust has no runtime
/// equivalent, so a domain object instead reports its own tag chain
/// (most specific first, ending in whatever base tags it extends).
/// Subscription matching (`for_`) checks membership in this chain.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeTag(pub Cow<'static, str>);

impl TypeTag {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A specialization of "object event". Defaults to `ANY_OBJECT_EVENT`
/// when a subscription doesn't name one (spec §3).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EventKind(pub Cow<'static, str>);

impl EventKind {
    pub const ANY_OBJECT_EVENT: EventKind = EventKind(Cow::Borrowed("object-event"));

    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for EventKind {
    fn default() -> Self {
        Self::ANY_OBJECT_EVENT
    }
}

/// Anything that can be the subject of an object event and therefore
/// the payload of a webhook delivery. Implemented by host domain
/// types; the core only ever touches it through this trait, never the
/// concrete type, matching the "no assumptions about implementations"
/// boundary in spec §1.
pub trait DomainObject: Send + Sync + fmt::Debug {
    /// Tag chain for this object, most specific first. A subscription
    /// with `for_ == "Thing"` matches any object whose chain contains
    /// `"Thing"`.
    fn type_tags(&self) -> Vec<TypeTag>;

    /// Opaque persistent identity, used to build `ShipmentInfo`
    /// entries that outlive the current unit of work.
    fn object_ref(&self) -> ObjectRef;

    /// The site this object is scoped to, if any. Used by the registry
    /// scope walk (spec §4.6) to find applicable `SubscriptionManager`s.
    fn site(&self) -> Option<SiteId> {
        None
    }

    /// Owning principal of this object, used by the applicability
    /// security check (spec §4.4.1) when the object itself determines
    /// "view"-style permission.
    fn owner(&self) -> Option<&str> {
        None
    }
}

/// An object-lifecycle event: "this object" underwent "this kind" of
/// change. `kind_tags` is the event's own specialization chain, ending
/// in `EventKind::ANY_OBJECT_EVENT`.
#[derive(Clone, Debug)]
pub struct ObjectEvent {
    pub kind_tags: Vec<EventKind>,
    pub object: Arc<dyn DomainObject>,
}

impl ObjectEvent {
    pub fn new(kind: EventKind, object: Arc<dyn DomainObject>) -> Self {
        let mut kind_tags = vec![kind];
        if kind_tags.last() != Some(&EventKind::ANY_OBJECT_EVENT) {
            kind_tags.push(EventKind::ANY_OBJECT_EVENT);
        }
        Self { kind_tags, object }
    }

    pub fn matches_kind(&self, when: &EventKind) -> bool {
        self.kind_tags.contains(when)
    }
}
