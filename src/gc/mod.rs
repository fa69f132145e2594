//! Garbage collection of expired objects.
//!
//! Expired objects are normally removed lazily, when a typed store reads them.
//! Objects nobody reads again are reclaimed by an explicit GC operation.
//!
//! # Overview
//!
//! An operation sweeps resource types in parent-first order
//! (assistant, thread, message, run, file). For each type the
//! [`BatchProcessor`] pages through the type's key prefix under a
//! [`RateLimiter`], and the [`ResourceCleanupHandler`] deletes every expired
//! object in each page, cascading to dependents:
//!
//! - a thread takes its messages and runs with it
//! - an assistant takes every thread recorded with its id as `parentId`
//! - a file takes its metadata document and payload together
//!
//! Failures are collected into the [`GcOperationResult`] and never stop the
//! sweep.
//!
//! # Example
//!
//! ```rust,ignore
//! use ttlstore::gc::{GcConfig, GcConfigOverrides, GcOrchestrator};
//!
//! let gc = GcOrchestrator::new(store, GcConfig::default());
//!
//! // See what would be reclaimed
//! let report = gc.execute_gc(&GcConfigOverrides::new().with_dry_run(true)).await;
//! println!("{}", report.summary());
//!
//! // Reclaim it
//! let report = gc.execute_gc(&GcConfigOverrides::new()).await;
//! ```
//!
//! # Triggers
//!
//! External callers go through [`GcService`], which parses a JSON
//! [`GcRequest`] and checks its admin key before running the orchestrator.

mod batch;
mod cleanup;
mod orchestrator;
mod rate_limit;
mod request;

pub use batch::{BatchOptions, BatchProcessor, BatchSummary, BatchTransform, ListedObject};
pub use cleanup::{CleanupDetail, CleanupResult, CleanupTransform, ResourceCleanupHandler};
pub use orchestrator::GcOrchestrator;
pub use rate_limit::RateLimiter;
pub use request::{GcMode, GcRequest, GcService};

pub use crate::models::{
    GcConfig, GcConfigOverrides, GcOperationResult, GcStatus, OverallStats, ResourceStats,
    ResourceType,
};
