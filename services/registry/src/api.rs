//! API server builder and router

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{Json, Response};
use axum::routing::{any, get};
use serde_json::json;

use crate::error::{RegistryError, RegistryResult};
use crate::index::SearchQuery;
use crate::storage::{RedirectPolicy, StorageStore};
use crate::store::RegistryStore;
use crate::{blob, index, manifest};

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    redirect: RedirectPolicy,
    presign_expiry: Option<Duration>,
    store: Option<Arc<dyn RegistryStore>>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            storage: None,
            bucket: None,
            redirect: RedirectPolicy::default(),
            presign_expiry: None,
            store: None,
        }
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set when clients are redirected to presigned backend URLs
    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set how long presigned URLs stay valid
    pub fn presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = Some(expiry);
        self
    }

    /// Serve from a custom store instead of a storage backend.
    ///
    /// Takes precedence over [`RegistryBuilder::storage`].
    pub fn store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    ///
    /// # Panics
    ///
    /// Panics if neither a storage backend nor a store was configured.
    pub fn build(self) -> Router {
        let store = match self.store {
            Some(store) => store,
            None => {
                let storage = self.storage.expect("storage backend must be configured");
                let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());

                let mut store = StorageStore::new(storage.bucket(bucket)).with_redirect(self.redirect);
                if let Some(expiry) = self.presign_expiry {
                    store = store.with_presign_expiry(expiry);
                }
                Arc::new(store)
            }
        };

        Router::new()
            .route("/v2", get(api_version_check))
            .route("/v2/", get(api_version_check))
            .route("/v2/{*path}", any(dispatch))
            .with_state(store)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// A registry endpoint, parsed from the path below `/v2/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'p> {
    GlobalIndex,
    Index(&'p str),
    Manifest { name: &'p str, reference: &'p str },
    Blob { name: &'p str, digest: &'p str },
}

/// Split a path into a route.
///
/// Repository names may contain `/`, so the endpoint is found from the end
/// of the path: `<name>/index`, `<name>/manifests/<reference>` or
/// `<name>/blobs/<digest>`.
fn parse_route(path: &str) -> Option<Route<'_>> {
    if path == "_index" {
        return Some(Route::GlobalIndex);
    }

    let (rest, last) = path.rsplit_once('/')?;
    if last == "index" && valid_repository(rest) {
        return Some(Route::Index(rest));
    }

    let (name, kind) = rest.rsplit_once('/')?;
    if !valid_repository(name) {
        return None;
    }

    match kind {
        "manifests" if valid_reference(last) => Some(Route::Manifest {
            name,
            reference: last,
        }),
        // Digests are checked by the handler, so a bad one is a 400 rather than a 404.
        "blobs" if !last.is_empty() => Some(Route::Blob { name, digest: last }),
        _ => None,
    }
}

/// Repository names are `/`-separated lowercase components, each starting
/// and ending with an alphanumeric and joined internally by `.`, `_` or `-`.
fn valid_repository(name: &str) -> bool {
    fn component(part: &str) -> bool {
        let bytes = part.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                first.is_ascii_alphanumeric()
                    && last.is_ascii_alphanumeric()
                    && bytes.iter().all(|&b| {
                        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
                    })
            }
            _ => false,
        }
    }

    !name.is_empty() && name.len() <= 255 && name.split('/').all(component)
}

/// Tags and digests: no path separators, and never a relative path component.
fn valid_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference.len() <= 255
        && !reference.starts_with('.')
        && reference
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':'))
}

/// The `search` parameter of the index routes. Other routes never look at the query.
fn search_param(
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> RegistryResult<Option<String>> {
    match query {
        Ok(Query(query)) => Ok(query.search),
        Err(rejection) => {
            tracing::debug!(%rejection, "rejected query string");
            Err(RegistryError::ParameterInvalid("search"))
        }
    }
}

#[tracing::instrument(skip_all, fields(%method, %uri))]
async fn dispatch(
    State(store): State<Arc<dyn RegistryStore>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<SearchQuery>, QueryRejection>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let path = match path {
        Ok(Path(path)) => path,
        Err(rejection) => {
            tracing::debug!(%rejection, "rejected request path");
            return Err(RegistryError::RouteUnknown(uri.path().to_owned()));
        }
    };
    let Some(route) = parse_route(&path) else {
        return Err(RegistryError::RouteUnknown(path));
    };

    let store = store.as_ref();

    match (route, &method) {
        (Route::GlobalIndex, &Method::GET) => {
            let search = search_param(query)?;
            index::get_global_index(store, search.as_deref()).await
        }
        (Route::Index(name), &Method::GET) => {
            let search = search_param(query)?;
            index::get_index(store, name, search.as_deref()).await
        }
        (Route::Index(name), &Method::DELETE) => index::delete_index(store, name).await,

        (Route::Manifest { name, reference }, &Method::HEAD) => {
            manifest::head_manifest(store, name, reference).await
        }
        (Route::Manifest { name, reference }, &Method::GET) => {
            manifest::get_manifest(store, name, reference).await
        }
        (Route::Manifest { name, reference }, &Method::PUT) => {
            manifest::put_manifest(store, name, reference, &headers, body).await
        }
        (Route::Manifest { name, reference }, &Method::DELETE) => {
            manifest::delete_manifest(store, name, reference).await
        }

        (Route::Blob { name, digest }, &Method::HEAD) => blob::head_blob(store, name, digest).await,
        (Route::Blob { name, digest }, &Method::GET) => blob::get_blob(store, name, digest).await,
        (Route::Blob { name, digest }, &Method::PUT) => {
            blob::put_blob(store, name, digest, &headers, body).await
        }

        _ => Err(RegistryError::Unsupported(method.clone())),
    }
}
