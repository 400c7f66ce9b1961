//! Remote control plane integration.
//!
//! This module provides:
//! - The `ControlPlane` trait the planner and executor work against
//! - An HTTP implementation for a real control plane API
//! - An in-memory implementation with call counting and fault injection
//! - The observer that refreshes observed state before planning

mod client;
mod http;
mod memory;
mod observer;

pub use client::{ControlPlane, RemoteResource};
#[cfg(test)]
pub use client::MockControlPlane;
pub use http::HttpControlPlane;
pub use memory::{CallCounts, Fault, InMemoryControlPlane, STATUS_KEY};
pub use observer::StateObserver;
