use crate::boundary::{Authentication, PermissionChecker};
use crate::domain_object::DomainObject;
use crate::ids::{ManagerId, SiteId};
use crate::subscription::Subscription;
use crate::subscription_manager::SubscriptionManager;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One node in the site hierarchy: an optional parent plus the
/// `SubscriptionManager` local to that scope (spec §4.6).
struct Site {
    parent: Option<SiteId>,
    manager: Arc<SubscriptionManager>,
}

/// Resolves "which `SubscriptionManager`s apply to this object" by
/// walking the site hierarchy from the object's site up to the root,
/// plus the process-wide global manager that always applies (spec
/// §4.6: "(i) querying the current-site manager for all local
/// managers, (ii) querying the manager tree... (iii) walking up the
/// next-utility chain"). The three-step lookup in the original is a
/// generic component-architecture utility walk; here it collapses to
/// one explicit parent-linked tree since Rust has no ambient
/// component registry to consult.
pub struct Registry {
    global: Arc<SubscriptionManager>,
    sites: RwLock<HashMap<SiteId, Site>>,
}

impl Registry {
    pub fn new(global: Arc<SubscriptionManager>) -> Arc<Self> {
        Arc::new(Self {
            global,
            sites: RwLock::new(HashMap::new()),
        })
    }

    pub fn global(&self) -> Arc<SubscriptionManager> {
        self.global.clone()
    }

    /// Registers a site's local manager, linking it under `parent` (or
    /// directly under the global scope if `None`).
    pub async fn register_site(&self, id: SiteId, parent: Option<SiteId>, manager: Arc<SubscriptionManager>) {
        self.sites.write().await.insert(id, Site { parent, manager });
    }

    /// All managers applicable to `data`: the global manager, plus
    /// every site manager from `data.site()` up to the root, each
    /// included at most once even if revisited through aliasing.
    pub async fn managers_for(&self, data: &dyn DomainObject) -> Vec<Arc<SubscriptionManager>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        if seen.insert(self.global.id) {
            result.push(self.global.clone());
        }
        let sites = self.sites.read().await;
        let mut cursor = data.site();
        let mut guard = 0;
        while let Some(site_id) = cursor {
            guard += 1;
            if guard > 64 {
                break; // malformed cycle in the site tree; stop rather than loop forever
            }
            let Some(site) = sites.get(&site_id) else {
                break;
            };
            if seen.insert(site.manager.id) {
                result.push(site.manager.clone());
            }
            cursor = site.parent;
        }
        result
    }

    /// Looks up a site's local manager directly by site id, used by
    /// `config::SchemaManager` to resolve a declared `site_path` (spec
    /// §6 declarative config).
    pub async fn site_manager(&self, id: SiteId) -> Option<Arc<SubscriptionManager>> {
        self.sites.read().await.get(&id).map(|s| s.manager.clone())
    }

    pub async fn manager_by_id(&self, id: ManagerId) -> Option<Arc<SubscriptionManager>> {
        if id == self.global.id {
            return Some(self.global.clone());
        }
        self.sites
            .read()
            .await
            .values()
            .find(|s| s.manager.id == id)
            .map(|s| s.manager.clone())
    }

    /// Active and applicable subscriptions across every manager scoped
    /// to `data`, used by the outbox when it accumulates a `(data,
    /// event)` pair for the current unit of work (spec §4.6, §4.7).
    pub async fn subscriptions_to_deliver(
        &self,
        data: &dyn DomainObject,
        event: &crate::domain_object::ObjectEvent,
        object_ref: &crate::ids::ObjectRef,
        auth: &dyn Authentication,
        checker: &dyn PermissionChecker,
    ) -> Vec<Arc<Subscription>> {
        let mut result = Vec::new();
        for manager in self.managers_for(data).await {
            result.extend(
                manager
                    .subscriptions_to_deliver(data, event, object_ref, auth, checker)
                    .await,
            );
        }
        result
    }
}
