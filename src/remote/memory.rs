//! In-process control plane.
//!
//! Keeps resources in a map, counts calls, and can be told to fail. Used by
//! the test suites and for local dry runs of a document.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::config::{ResourceId, ResourceSpec};
use crate::error::{ConvoyError, RemoteError, Result};

use super::client::{ControlPlane, RemoteResource};

/// Attribute the in-memory plane adds to every resource it stores.
pub const STATUS_KEY: &str = "status";

/// A failure to inject into mutating calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Request timed out (transient).
    Timeout,
    /// Throttled with the given retry-after (transient).
    RateLimited(u64),
    /// Permanent rejection with the given status.
    Reject(u16),
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    fault: Fault,
    remaining: Option<u32>,
}

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `describe` calls.
    pub describe: usize,
    /// `create` calls.
    pub create: usize,
    /// `update` calls.
    pub update: usize,
}

/// Control plane backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    resources: Mutex<BTreeMap<ResourceId, RemoteResource>>,
    faults: Mutex<HashMap<ResourceId, FaultPlan>>,
    latency: Option<Duration>,
    describes: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    next_id: AtomicUsize,
    log: Mutex<Vec<(ResourceId, &'static str)>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Fault {
    fn into_error(self, id: &ResourceId) -> ConvoyError {
        let error = match self {
            Self::Timeout => RemoteError::timeout(format!("{id}: injected timeout")),
            Self::RateLimited(retry_after_secs) => RemoteError::RateLimited { retry_after_secs },
            Self::Reject(status) => RemoteError::rejected(status, format!("{id}: injected rejection")),
        };
        ConvoyError::Remote(error)
    }
}

impl InMemoryControlPlane {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed delay to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `times` mutating calls on `id` fail with `fault`.
    pub fn fail_times(&self, id: &ResourceId, fault: Fault, times: u32) {
        locked(&self.faults).insert(
            id.clone(),
            FaultPlan {
                fault,
                remaining: Some(times),
            },
        );
    }

    /// Makes every mutating call on `id` fail with `fault`.
    pub fn fail_always(&self, id: &ResourceId, fault: Fault) {
        locked(&self.faults).insert(id.clone(), FaultPlan { fault, remaining: None });
    }

    /// Changes one remote attribute behind the orchestrator's back.
    pub fn drift(&self, id: &ResourceId, key: &str, value: serde_json::Value) {
        if let Some(resource) = locked(&self.resources).get_mut(id) {
            resource.attributes.insert(key.to_string(), value);
        }
    }

    /// Returns a stored resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<RemoteResource> {
        locked(&self.resources).get(id).cloned()
    }

    /// Number of stored resources.
    #[must_use]
    pub fn len(&self) -> usize {
        locked(&self.resources).len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            describe: self.describes.load(Ordering::SeqCst),
            create: self.creates.load(Ordering::SeqCst),
            update: self.updates.load(Ordering::SeqCst),
        }
    }

    /// Number of `create` plus `update` calls.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        let calls = self.calls();
        calls.create + calls.update
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Mutating calls in the order they were received.
    #[must_use]
    pub fn mutation_log(&self) -> Vec<(ResourceId, &'static str)> {
        locked(&self.log).clone()
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn take_fault(&self, id: &ResourceId) -> Option<Fault> {
        let mut faults = locked(&self.faults);
        let plan = faults.get_mut(id)?;
        let fault = plan.fault;
        match plan.remaining {
            None => {}
            Some(0) => {
                faults.remove(id);
                return None;
            }
            Some(1) => {
                faults.remove(id);
            }
            Some(n) => plan.remaining = Some(n - 1),
        }
        Some(fault)
    }

    fn store(&self, spec: &ResourceSpec, verb: &'static str) -> Result<RemoteResource> {
        let id = spec.id();
        if let Some(fault) = self.take_fault(&id) {
            debug!("Injecting {fault:?} into {verb} {id}");
            return Err(fault.into_error(&id));
        }

        let mut resources = locked(&self.resources);
        let existing = resources.get(&id).and_then(|r| r.remote_id.clone());
        match (verb, &existing) {
            ("create", Some(_)) => {
                return Err(RemoteError::rejected(409, format!("{id} already exists")).into());
            }
            ("update", None) => {
                return Err(RemoteError::rejected(404, format!("{id} does not exist")).into());
            }
            _ => {}
        }

        let mut attributes = spec.attribute_map();
        attributes.insert(STATUS_KEY.to_string(), serde_json::json!("ACTIVE"));
        let remote_id = existing.unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{n:04}", id.kind)
        });

        let resource = RemoteResource {
            id: id.clone(),
            attributes,
            remote_id: Some(remote_id),
        };
        resources.insert(id.clone(), resource.clone());
        locked(&self.log).push((id, verb));
        Ok(resource)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe(&self, id: &ResourceId) -> Result<Option<RemoteResource>> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let found = self.get(id);
        self.leave();
        Ok(found)
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<RemoteResource> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = self.store(spec, "create");
        self.leave();
        result
    }

    async fn update(&self, spec: &ResourceSpec) -> Result<RemoteResource> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = self.store(spec, "update");
        self.leave();
        result
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
