//! Blob operations for the registry

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt as _;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::digest::parse_digest;
use crate::error::{RegistryError, RegistryResult};
use crate::range::parse_content_range;
use crate::store::{RegistryStore, StorageContent, Transfer};
use crate::types::parse_descriptor;

fn header_str<'h>(headers: &'h HeaderMap, name: header::HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Check if a blob exists
pub(crate) async fn head_blob(
    store: &dyn RegistryStore,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = parse_digest(digest)?;
    let status = if store.blob_exists(name, &digest).await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok(status.into_response())
}

/// Upload a blob, or point the client at the backend to upload it there.
pub(crate) async fn put_blob(
    store: &dyn RegistryStore,
    name: &str,
    digest: &str,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let content_type = header_str(headers, header::CONTENT_TYPE).unwrap_or_default();
    let descriptor = parse_descriptor(digest, content_type)?;

    let declared_length = header_str(headers, header::CONTENT_LENGTH);
    let range = header_str(headers, header::CONTENT_RANGE)
        .map(|range| parse_content_range(range, declared_length.unwrap_or_default()))
        .transpose()?;

    let content_length = match range {
        Some(range) => u64::try_from(range.length()).ok(),
        None => declared_length.and_then(|len| len.parse().ok()),
    };

    let stream = body.into_data_stream().map_err(io::Error::other);
    let content = StorageContent {
        content_length,
        content_type: descriptor.media_type,
        content_encoding: header_str(headers, header::CONTENT_ENCODING).map(str::to_owned),
        range,
        content: Box::new(StreamReader::new(stream)),
    };

    match store.put_blob(name, &descriptor.digest, content).await? {
        Transfer::Direct(()) => Ok(StatusCode::CREATED.into_response()),
        Transfer::Redirect(location) => Ok((
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, location.to_string())],
        )
            .into_response()),
    }
}

/// Stream a blob, or redirect the client to fetch it from the backend.
pub(crate) async fn get_blob(
    store: &dyn RegistryStore,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = parse_digest(digest)?;

    let content = match store.get_blob(name, &digest).await? {
        Transfer::Direct(content) => content,
        Transfer::Redirect(location) => {
            return Ok((StatusCode::FOUND, [(header::LOCATION, location.to_string())])
                .into_response());
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content.content_type);
    if let Some(length) = content.content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }
    if let Some(encoding) = content.content_encoding {
        response = response.header(header::CONTENT_ENCODING, encoding);
    }

    response
        .body(Body::from_stream(ReaderStream::new(content.content)))
        .map_err(|err| RegistryError::Internal(format!("building blob response: {err}")))
}
