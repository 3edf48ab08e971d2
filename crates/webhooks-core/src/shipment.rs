use crate::dialect::Dialect;
use crate::ids::{AttemptId, SubscriptionId};
use crate::subscription::Subscription;
use std::sync::Arc;

/// One `(subscription, attempt)` pair ready to ship. Carries everything
/// the engine needs to act without touching the unit of work that
/// created it (spec §3 `ShipmentInfo`): the destination, the resolved
/// dialect, the already-serialized payload, and a direct reference
/// back to the owning subscription so the write-back step can resolve
/// the attempt in place. This is the "direct reference for
/// non-persistent cases" the spec allows for hosts (like this one)
/// whose subscription graph lives in-process rather than behind an
/// ORM identity map.
#[derive(Clone)]
pub struct ShipmentPair {
    pub subscription_id: SubscriptionId,
    pub attempt_id: AttemptId,
    pub to: String,
    pub dialect: Arc<dyn Dialect>,
    pub payload: Arc<[u8]>,
    pub(crate) subscription: Arc<Subscription>,
}

/// An opaque parcel produced at commit-prepare time, self-sufficient
/// from the moment it's created (spec §3, §4.8 `createShipmentInfo`).
#[derive(Clone)]
pub struct ShipmentInfo {
    pub pairs: Vec<ShipmentPair>,
}

impl ShipmentInfo {
    pub fn new(mut pairs: Vec<ShipmentPair>) -> Self {
        // Sort by destination URL to encourage HTTP keep-alive within
        // one shipment (spec §4.8.1).
        pairs.sort_by(|a, b| a.to.cmp(&b.to));
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
