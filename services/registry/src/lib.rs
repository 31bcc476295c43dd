//! # Artifact Registry
//!
//! A content-addressable registry for versioned artifacts such as packaged
//! models. Clients push and pull *manifests* (JSON documents naming an
//! artifact) and *blobs* (immutable content addressed by digest), and browse
//! per-repository and registry-wide indices.
//!
//! ## Endpoints
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | HEAD | `/v2/{name}/manifests/{reference}` | 200 / 404 |
//! | GET | `/v2/{name}/manifests/{reference}` | 200 |
//! | PUT | `/v2/{name}/manifests/{reference}` | 201 |
//! | DELETE | `/v2/{name}/manifests/{reference}` | 202 |
//! | HEAD | `/v2/{name}/blobs/{digest}` | 200 / 404 |
//! | GET | `/v2/{name}/blobs/{digest}` | 200, or 302 to the backend |
//! | PUT | `/v2/{name}/blobs/{digest}` | 201, or 307 to the backend |
//! | GET | `/v2/{name}/index?search=` | 200 |
//! | DELETE | `/v2/{name}/index` | 200 |
//! | GET | `/v2/_index?search=` | 200 |
//!
//! Errors are JSON `{"code": ..., "message": ...}` bodies; see [`RegistryError`].
//!
//! ## Example
//!
//! ```no_run
//! use artifact_registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod config;
pub mod digest;
mod error;
mod index;
mod manifest;
pub mod range;
mod storage;
pub mod store;
pub mod types;

pub use api::RegistryBuilder;
pub use config::{ConfigError, RegistryConfig};
pub use error::{ErrorBody, RegistryError, RegistryResult};
pub use index::SearchQuery;
pub use manifest::MAX_MANIFEST_SIZE;
pub use crate::storage::{RedirectPolicy, StorageStore};
