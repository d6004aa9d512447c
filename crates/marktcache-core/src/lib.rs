//! Offline caching engine for the marketplace web client.
//!
//! Intercepts the page's same-origin GET traffic, picks a caching policy per
//! request, keeps versioned cache partitions, serves the app shell when the
//! network is gone and takes control commands from the page.

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod control;
pub mod http;
pub mod lifecycle;
pub mod manifest;
pub mod network;
pub mod policy;
pub mod tasks;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStorage, DiskStorage, MemoryStorage, PartitionKind, PartitionSet};
pub use classify::{Classifier, RequestClass};
pub use config::Config;
pub use control::{ClientMessage, ControlClient, ControlCommand, ControlError, StatusReport};
pub use http::{Method, Request, RequestMode, Response};
pub use lifecycle::{LifecycleError, LifecycleState};
pub use manifest::ShellManifest;
pub use network::{FetchError, HttpNetwork, Network};
pub use worker::CacheWorker;
