//! RUDI core library: domain types, document store, node configuration.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`StoreError`], [`ConfigError`]
//! - [`store`]: the [`Store`] collaborator and its file/memory backends
//! - [`config`]: YAML node configuration

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{Config, NodeConfig, PortalConfig};
pub use error::{ConfigError, StoreError};
pub use store::{FileStore, MemoryStore, ReportWrite, Store};
pub use types::{
    Collection, ErrorDetail, IntegrationReport, LocalReportError, Media, MediaStatus, Metadata,
    MetadataId, PortalToken, ReportId, ReportStatus, StorageStatus,
};
