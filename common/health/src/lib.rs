use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Health reporting for long-running components of a process.
///
/// A bucket worker, a poll loop, and a producer's rdkafka client context each
/// hold a `HealthHandle` and report on their own cadence. `HealthRegistry`
/// combines those reports into one process-level status so a single
/// liveness/readiness probe can speak for all of them, without conflating the
/// k8s concepts of liveness and readiness into a single instance: callers
/// should keep a separate registry per probe.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component is newly registered, before its first report.
    Starting,
    /// Recently reported healthy; will need to report again before the deadline.
    HealthyUntil(time::OffsetDateTime),
    /// Explicitly reported unhealthy.
    Unhealthy,
    /// The `HealthyUntil` deadline passed without a fresh report.
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Reports healthy; must be called more often than the configured deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }

    /// Same as [`report_healthy`](Self::report_healthy), safe to call from a
    /// synchronous rdkafka callback (e.g. `ClientContext::stats`).
    pub fn report_healthy_blocking(&self) {
        let status = ComponentStatus::HealthyUntil(time::OffsetDateTime::now_utc().add(self.deadline));
        self.report_status_blocking(status)
    }

    pub fn report_status_blocking(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sender = self.sender.clone();
            handle.spawn(async move {
                if let Err(err) = sender.send(message).await {
                    warn!("failed to report health status: {}", err)
                }
            });
        } else if let Err(err) = self.sender.blocking_send(message) {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(32);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Ok(mut map) = components.write() {
                    map.insert(message.component, message.status);
                } else {
                    warn!("poisoned health registry mutex");
                }
            }
        });

        registry
    }

    /// Registers a component, returning a handle it should hold for its
    /// lifetime to keep reporting its status.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// The process is healthy only if every registered component is
    /// currently reporting healthy; an empty registry is unhealthy.
    pub fn get_status(&self) -> HealthStatus {
        let components = self.components.read().expect("poisoned health registry mutex");
        let now = time::OffsetDateTime::now_utc();

        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: Default::default(),
        };

        for (name, status) in components.iter() {
            match status {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    result.components.insert(name.clone(), status.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    result.healthy = false;
                    result.components.insert(name.clone(), ComponentStatus::Stalled);
                }
                other => {
                    result.healthy = false;
                    result.components.insert(name.clone(), other.clone());
                }
            }
        }

        if result.healthy {
            info!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;
    use std::time::Duration as StdDuration;

    async fn assert_or_retry<F: Fn() -> bool>(check: F) {
        let deadline = time::OffsetDateTime::now_utc().add(time::Duration::seconds(5));
        while !check() && time::OffsetDateTime::now_utc().lt(&deadline) {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
        assert!(check());
    }

    #[tokio::test]
    async fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn single_component_goes_healthy_then_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("bucket-default".to_string(), StdDuration::from_secs(30))
            .await;
        assert_or_retry(|| registry.get_status().components.len() == 1).await;
        assert!(!registry.get_status().healthy);

        handle.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
        assert_eq!(
            registry.get_status().components.get("bucket-default"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn stale_report_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("bucket-default".to_string(), StdDuration::from_secs(30))
            .await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                time::OffsetDateTime::now_utc().sub(time::Duration::seconds(1)),
            ))
            .await;
        assert_or_retry(|| !registry.get_status().healthy).await;
        assert_eq!(
            registry.get_status().components.get("bucket-default"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[tokio::test]
    async fn several_components_all_required() {
        let registry = HealthRegistry::new("liveness");
        let h1 = registry.register("a".to_string(), StdDuration::from_secs(30)).await;
        let h2 = registry.register("b".to_string(), StdDuration::from_secs(30)).await;
        assert_or_retry(|| registry.get_status().components.len() == 2).await;

        h1.report_healthy().await;
        assert!(!registry.get_status().healthy);

        h2.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;

        h1.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
    }
}
