//! Manifest operations for the registry

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::{RegistryError, RegistryResult};
use crate::store::{ManifestContent, RegistryStore};
use crate::types::Manifest;

/// Largest manifest body accepted, in bytes.
pub const MAX_MANIFEST_SIZE: usize = 4 * 1024 * 1024;

/// Check if a manifest exists. Absence is a plain 404, never an error body.
pub(crate) async fn head_manifest(
    store: &dyn RegistryStore,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let status = if store.manifest_exists(name, reference).await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok(status.into_response())
}

/// Get a manifest, with the content type it was pushed with
pub(crate) async fn get_manifest(
    store: &dyn RegistryStore,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let content = store.get_manifest(name, reference).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content.content_type)],
        content.raw,
    )
        .into_response())
}

/// Put a manifest
pub(crate) async fn put_manifest(
    store: &dyn RegistryStore,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let raw = axum::body::to_bytes(body, MAX_MANIFEST_SIZE)
        .await
        .map_err(|err| RegistryError::ManifestInvalid(err.to_string()))?;
    let manifest: Manifest = serde_json::from_slice(&raw)
        .map_err(|err| RegistryError::ManifestInvalid(err.to_string()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.is_empty() {
        return Err(RegistryError::ContentTypeInvalid("empty".to_owned()));
    }

    store
        .put_manifest(
            name,
            reference,
            ManifestContent {
                content_type: content_type.to_owned(),
                manifest,
                raw,
            },
        )
        .await?;

    Ok(StatusCode::CREATED.into_response())
}

/// Delete a manifest. A missing manifest is reported, not ignored.
pub(crate) async fn delete_manifest(
    store: &dyn RegistryStore,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    store.delete_manifest(name, reference).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}
