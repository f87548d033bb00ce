//! Tenant-scoped data access for community resource portals.
//!
//! Every screen of the portal reads through a [`store::ScopedStore`] bound to an explicit
//! [`tenant::TenantScope`]; [`sync::LiveSync`] keeps those snapshots fresh from the backend change
//! feed, and the [`progress`] and [`eligibility`] modules derive display values from snapshots or raw
//! inputs without touching the network.

pub mod config;
pub mod eligibility;
pub mod error;
pub mod progress;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod tenant;
