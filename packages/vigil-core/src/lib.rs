//! Vigil Core - shared library for the Vigil video inference orchestration server.
//!
//! This crate drives a single bound video source (a file or a phone camera) through a
//! paced scheduler, a single-inflight inference worker, and a non-blocking fan-out layer
//! to any number of connected viewers. It is designed to be used by a standalone headless
//! server binary, with the network/task-spawning abstractions left generic enough to host
//! other front ends later.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for real-time client communication
//! - [`context`]: Network configuration and URL building
//! - [`config`]: Core application configuration
//! - [`manager`]: Source lifecycle state machine
//! - [`scheduler`]: Paced frame/result production
//! - [`inference`]: The inference collaborator client and single-inflight worker
//! - [`source`]: Frame source implementations (file, phone)
//! - [`viewers`]: Viewer registry and non-blocking broadcaster
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from platform-specific
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`IpDetector`](context::IpDetector): Local IP detection

// Allow missing docs for now during migration - will be cleaned up later
#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod frame;
pub mod inference;
pub mod manager;
pub mod protocol_constants;
pub mod runtime;
pub mod scheduler;
pub mod source;
pub mod utils;
pub mod viewers;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError};
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, UrlBuilder};
pub use error::{CoreError, CoreResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, InferenceEvent, LoggingEventEmitter,
    NoopEventEmitter, PhoneEvent, SourceEvent, ViewerEvent,
};
pub use frame::Frame;
pub use inference::{
    Detection, HttpInferenceClient, InferenceClient, InferenceResult, InferenceState,
    InferenceWorker,
};
pub use manager::{SourceManager, SourceRequest, SourceState};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::{EnhancedEmission, PacedScheduler, RawEmission, SystemInfo};
pub use source::{EofBehavior, FileSource, FrameSource, PhoneSource};
pub use utils::now_millis;
pub use viewers::{ConnectionGuard, Viewer, ViewerInfo, ViewerRegistry};

// Re-export bootstrap types
pub use bootstrap::{bootstrap, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
