//! Repository and global index operations

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::{RegistryError, RegistryResult};
use crate::store::RegistryStore;
use crate::types::Index;

/// Query parameters accepted by index listings.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring filter on entry names.
    pub search: Option<String>,
}

/// List repositories. A registry with no index yet lists nothing.
pub(crate) async fn get_global_index(
    store: &dyn RegistryStore,
    search: Option<&str>,
) -> RegistryResult<Response> {
    let index = match store.get_global_index(search).await {
        Ok(index) => index,
        Err(err) if err.is_not_found() => {
            tracing::debug!("no global index yet");
            Index::default()
        }
        Err(err) => return Err(err),
    };
    Ok(Json(index).into_response())
}

/// List the manifests in one repository
pub(crate) async fn get_index(
    store: &dyn RegistryStore,
    name: &str,
    search: Option<&str>,
) -> RegistryResult<Response> {
    match store.get_index(name, search).await {
        Ok(index) => Ok(Json(index).into_response()),
        Err(err) if err.is_not_found() => Err(RegistryError::IndexUnknown(name.to_owned())),
        Err(err) => Err(err),
    }
}

/// Remove a repository's index
pub(crate) async fn delete_index(store: &dyn RegistryStore, name: &str) -> RegistryResult<Response> {
    match store.remove_index(name).await {
        Ok(()) => Ok(Json("ok").into_response()),
        Err(err) if err.is_not_found() => Err(RegistryError::IndexUnknown(name.to_owned())),
        Err(err) => Err(err),
    }
}
