//! GymDesk Core Library
//!
//! This crate provides the shared configuration, errors, logging setup and
//! domain types for the GymDesk offline engine.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    Capabilities, EvictionConfig, NotificationDefaults, OfflineConfig, PrecacheManifest,
    SyncConfig,
};
pub use error::{GymDeskError, GymDeskResult};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use types::{CacheNamespace, CacheRole, CacheSet, ResourceClass};
