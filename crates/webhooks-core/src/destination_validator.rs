use crate::error::WebhookError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Pre-flight check of a subscriber URL (spec §4.1). Implementations
/// MUST reject non-HTTPS urls and unresolvable hostnames.
#[async_trait]
pub trait DestinationValidator: Send + Sync {
    async fn validate_target(&self, url: &str) -> Result<(), WebhookError>;
}

#[derive(Clone, Copy)]
enum CachedOutcome {
    Ok,
    Err,
}

/// Default validator: HTTPS-only scheme check plus a DNS lookup,
/// with a short positive/negative TTL cache (spec §4.1: "MAY cache
/// positive and negative outcomes with a short TTL").
pub struct DefaultDestinationValidator {
    cache: Mutex<HashMap<String, (CachedOutcome, Instant)>>,
    ttl: Duration,
}

impl DefaultDestinationValidator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn cached(&self, host: &str) -> Option<CachedOutcome> {
        let cache = self.cache.lock().unwrap();
        cache.get(host).and_then(|(outcome, at)| {
            if at.elapsed() < self.ttl {
                Some(*outcome)
            } else {
                None
            }
        })
    }

    fn remember(&self, host: &str, outcome: CachedOutcome) {
        self.cache
            .lock()
            .unwrap()
            .insert(host.to_string(), (outcome, Instant::now()));
    }
}

impl Default for DefaultDestinationValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationValidator for DefaultDestinationValidator {
    async fn validate_target(&self, url: &str) -> Result<(), WebhookError> {
        if !url.starts_with("https://") {
            return Err(WebhookError::NotHttps(url.to_string()));
        }

        let parsed = url::Url::parse(url).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| WebhookError::InvalidUrl(url.to_string()))?
            .to_string();

        if let Some(outcome) = self.cached(&host) {
            return match outcome {
                CachedOutcome::Ok => Ok(()),
                CachedOutcome::Err => Err(WebhookError::UnresolvableHost(host)),
            };
        }

        let port = parsed.port_or_known_default().unwrap_or(443);
        let lookup = tokio::net::lookup_host((host.as_str(), port)).await;
        match lookup {
            Ok(mut addrs) if addrs.next().is_some() => {
                self.remember(&host, CachedOutcome::Ok);
                Ok(())
            }
            _ => {
                self.remember(&host, CachedOutcome::Err);
                Err(WebhookError::UnresolvableHost(host))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_https() {
        let v = DefaultDestinationValidator::new();
        let err = v.validate_target("http://example.com").await.unwrap_err();
        assert!(matches!(err, WebhookError::NotHttps(_)));
    }

    #[tokio::test]
    async fn rejects_unresolvable_host() {
        let v = DefaultDestinationValidator::new();
        let err = v
            .validate_target("https://this-host-does-not-exist.invalid")
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::UnresolvableHost(_)));
    }
}
