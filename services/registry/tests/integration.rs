//! Integration tests for the artifact registry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use artifact_registry::digest::{Algorithm, Digest};
use artifact_registry::store::{ManifestContent, RegistryStore, StorageContent, Transfer};
use artifact_registry::types::Index;
use artifact_registry::{ErrorBody, RegistryBuilder, RegistryError, RegistryResult};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, Uri, header};
use bytes::Bytes;
use storage::{MemoryStorage, StorageError, StorageErrorKind, TempDriver};
use tower::ServiceExt;

const MANIFEST_TYPE: &str = "application/vnd.modelx.model.manifest.v1+json";

/// Helper to create a test registry
fn test_registry() -> Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::new()
        .storage(storage.into())
        .bucket("test-registry")
        .build()
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn error_body(response: Response<Body>) -> ErrorBody {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn sha256(data: &[u8]) -> String {
    Digest::compute(Algorithm::Sha256, data).to_string()
}

fn put_blob(path: &str, data: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .unwrap()
}

fn put_manifest(path: &str, manifest: &'static str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(path)
        .header(header::CONTENT_TYPE, MANIFEST_TYPE)
        .body(Body::from(manifest))
        .unwrap()
}

fn request(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn request_for_blob(method: &str, digest: &str) -> Request<Body> {
    request(method, &format!("/v2/bert/blobs/{digest}"))
}

/// A store which records calls and answers from a script.
#[derive(Debug, Default)]
struct StubStore {
    calls: AtomicUsize,
    redirect: Option<Uri>,
}

impl StubStore {
    fn redirecting() -> Self {
        Self {
            redirect: Some("https://objects.example.com/bucket/blob?sig=abc".parse().unwrap()),
            ..Self::default()
        }
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn missing() -> RegistryError {
        StorageError::not_found("stub", "registry", "anything").into()
    }
}

#[async_trait::async_trait]
impl RegistryStore for StubStore {
    async fn manifest_exists(&self, _name: &str, _reference: &str) -> RegistryResult<bool> {
        self.called();
        Ok(false)
    }

    async fn get_manifest(&self, name: &str, reference: &str) -> RegistryResult<ManifestContent> {
        self.called();
        Err(RegistryError::ManifestUnknown(format!("{name}:{reference}")))
    }

    async fn put_manifest(
        &self,
        _name: &str,
        _reference: &str,
        _content: ManifestContent,
    ) -> RegistryResult<()> {
        self.called();
        Ok(())
    }

    async fn delete_manifest(&self, _name: &str, _reference: &str) -> RegistryResult<()> {
        self.called();
        Err(Self::missing())
    }

    async fn get_global_index(&self, _search: Option<&str>) -> RegistryResult<Index> {
        self.called();
        Err(Self::missing())
    }

    async fn get_index(&self, _name: &str, _search: Option<&str>) -> RegistryResult<Index> {
        self.called();
        Err(Self::missing())
    }

    async fn remove_index(&self, _name: &str) -> RegistryResult<()> {
        self.called();
        Err(StorageError::new("stub", StorageErrorKind::Io, "connection reset by 10.0.0.7").into())
    }

    async fn blob_exists(&self, _name: &str, _digest: &Digest) -> RegistryResult<bool> {
        self.called();
        Ok(false)
    }

    async fn put_blob(
        &self,
        _name: &str,
        _digest: &Digest,
        content: StorageContent,
    ) -> RegistryResult<Transfer<()>> {
        self.called();
        match &self.redirect {
            Some(location) => Ok(Transfer::Redirect(location.clone())),
            None => {
                let mut stream = content.content;
                tokio::io::copy(&mut stream, &mut tokio::io::sink())
                    .await
                    .map_err(|err| RegistryError::Internal(err.to_string()))?;
                Ok(Transfer::Direct(()))
            }
        }
    }

    async fn get_blob(
        &self,
        _name: &str,
        digest: &Digest,
    ) -> RegistryResult<Transfer<StorageContent>> {
        self.called();
        match &self.redirect {
            Some(location) => Ok(Transfer::Redirect(location.clone())),
            None => Err(RegistryError::BlobUnknown(digest.to_string())),
        }
    }
}

fn stub_registry(store: Arc<StubStore>) -> Router {
    RegistryBuilder::new().store(store).build()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry();

    let response = send(&app, request("GET", "/v2/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, "{}");
}

#[tokio::test]
async fn invalid_digest_never_reaches_store() {
    let store = Arc::new(StubStore::default());
    let app = stub_registry(store.clone());

    for method in ["HEAD", "GET"] {
        let response = send(&app, request(method, "/v2/library/bert/blobs/sha256:nope")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method}");
    }

    let response = send(&app, put_blob("/v2/library/bert/blobs/md5:abc", b"hello")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = error_body(response).await;
    assert_eq!(body.code, "DIGEST_INVALID");
    assert!(body.message.contains("md5:abc"));

    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blob_put_requires_content_type() {
    let store = Arc::new(StubStore::default());
    let app = stub_registry(store.clone());
    let digest = sha256(b"hello");

    let untyped = Request::builder()
        .method("PUT")
        .uri(format!("/v2/bert/blobs/{digest}"))
        .body(Body::from("hello"))
        .unwrap();
    let response = send(&app, untyped).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "CONTENT_TYPE_INVALID");
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blob_redirect_leaves_body_unread() {
    let store = Arc::new(StubStore::redirecting());
    let app = stub_registry(store.clone());
    let digest = sha256(b"hello");

    let polled = Arc::new(AtomicBool::new(false));
    let flag = polled.clone();
    let stream = futures::stream::once(async move {
        flag.store(true, Ordering::SeqCst);
        Ok::<_, std::io::Error>(Bytes::from_static(b"hello"))
    });

    let upload = Request::builder()
        .method("PUT")
        .uri(format!("/v2/bert/blobs/{digest}"))
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .unwrap();
    let response = send(&app, upload).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://objects.example.com/bucket/blob?sig=abc"
    );
    assert!(!polled.load(Ordering::SeqCst));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);

    let response = send(&app, request_for_blob("GET", &digest)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(response.headers().contains_key(header::LOCATION));
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn blob_direct_upload_has_no_location() {
    let store = Arc::new(StubStore::default());
    let app = stub_registry(store);
    let digest = sha256(b"hello");

    let response = send(&app, put_blob(&format!("/v2/bert/blobs/{digest}"), b"hello")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(!response.headers().contains_key(header::LOCATION));
}

#[tokio::test]
async fn blob_round_trip() {
    let app = test_registry();
    let data: &'static [u8] = b"Hello, artifact registry!";
    let digest = sha256(data);
    let path = format!("/v2/org/team/model/blobs/{digest}");

    let response = send(&app, request("HEAD", &path)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_bytes(response).await.is_empty());

    let response = send(&app, put_blob(&path, data)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Pushing the same content again changes nothing.
    let response = send(&app, put_blob(&path, data)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, request("HEAD", &path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());

    let response = send(&app, request("GET", &path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        data.len().to_string().as_str()
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn blob_keeps_content_encoding() {
    let app = test_registry();
    let data: &'static [u8] = b"\x1f\x8bnot really gzip";
    let digest = sha256(data);
    let path = format!("/v2/bert/blobs/{digest}");

    let upload = Request::builder()
        .method("PUT")
        .uri(&path)
        .header(header::CONTENT_TYPE, "application/x-tar")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(data))
        .unwrap();
    assert_eq!(send(&app, upload).await.status(), StatusCode::CREATED);

    let response = send(&app, request("GET", &path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-tar");
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn blob_digest_mismatch_is_rejected() {
    let app = test_registry();
    let digest = sha256(b"expected");
    let path = format!("/v2/bert/blobs/{digest}");

    let response = send(&app, put_blob(&path, b"something else")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "DIGEST_INVALID");

    let response = send(&app, request("HEAD", &path)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_blob_is_unknown() {
    let app = test_registry();
    let digest = sha256(b"never pushed");

    let response = send(&app, request_for_blob("GET", &digest)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn content_range_is_checked() {
    let app = test_registry();
    let data: &'static [u8] = b"hello";
    let digest = sha256(data);
    let path = format!("/v2/bert/blobs/{digest}");

    let mismatched = Request::builder()
        .method("PUT")
        .uri(&path)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_RANGE, "0-9")
        .header(header::CONTENT_LENGTH, "5")
        .body(Body::from(data))
        .unwrap();
    let response = send(&app, mismatched).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = error_body(response).await;
    assert_eq!(body.code, "CONTENT_RANGE_INVALID");
    assert!(body.message.contains("content length != (end-start)+1"));

    let whole = Request::builder()
        .method("PUT")
        .uri(&path)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_RANGE, "0-4")
        .header(header::CONTENT_LENGTH, "5")
        .body(Body::from(data))
        .unwrap();
    assert_eq!(send(&app, whole).await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn manifest_round_trip() {
    let app = test_registry();
    let manifest = r#"{"schemaVersion":1,"config":{"name":"modelx.yaml","mediaType":"application/yaml","digest":"sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824","size":5},"blobs":[]}"#;
    let path = "/v2/library/bert/manifests/v1";

    let response = send(&app, request("HEAD", path)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, put_manifest(path, manifest)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(body_bytes(response).await.is_empty());

    let response = send(&app, request("HEAD", path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());

    let response = send(&app, request("GET", path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], MANIFEST_TYPE);
    assert_eq!(body_bytes(response).await, manifest);

    let response = send(&app, request("DELETE", path)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, request("GET", path)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn manifest_by_digest() {
    let app = test_registry();
    let manifest = r#"{"schemaVersion":1}"#;

    let path = format!("/v2/bert/manifests/{}", sha256(manifest.as_bytes()));
    let response = send(&app, put_manifest(&path, manifest)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let path = format!("/v2/bert/manifests/{}", sha256(b"other"));
    let response = send(&app, put_manifest(&path, manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "DIGEST_INVALID");
}

#[tokio::test]
async fn invalid_manifest_is_rejected() {
    let app = test_registry();

    for body in ["{not json", "null"] {
        let response = send(&app, put_manifest("/v2/bert/manifests/v1", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(error_body(response).await.code, "MANIFEST_INVALID");
    }

    // Nothing was stored by the rejected pushes.
    let response = send(&app, request("HEAD", "/v2/bert/manifests/v1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let untyped = Request::builder()
        .method("PUT")
        .uri("/v2/bert/manifests/v1")
        .body(Body::from("{}"))
        .unwrap();
    let response = send(&app, untyped).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "CONTENT_TYPE_INVALID");
}

#[tokio::test]
async fn deleting_missing_manifest_is_not_found() {
    let app = test_registry();

    let response = send(&app, request("DELETE", "/v2/bert/manifests/never")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "NOT_FOUND");

    let store = Arc::new(StubStore::default());
    let response = send(
        &stub_registry(store),
        request("DELETE", "/v2/bert/manifests/never"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "NOT_FOUND");
}

#[tokio::test]
async fn global_index_is_empty_when_missing() {
    let expected = serde_json::json!({"schemaVersion": 0, "manifests": []});

    let store = Arc::new(StubStore::default());
    let response = send(&stub_registry(store), request("GET", "/v2/_index")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, expected);

    let response = send(&test_registry(), request("GET", "/v2/_index?search=bert")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, expected);
}

#[tokio::test]
async fn repository_index_lifecycle() {
    let app = test_registry();

    let response = send(&app, request("GET", "/v2/library/bert/index")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = error_body(response).await;
    assert_eq!(body.code, "INDEX_UNKNOWN");
    assert!(body.message.contains("library/bert"));

    for path in [
        "/v2/library/bert/manifests/v1",
        "/v2/library/bert/manifests/latest",
        "/v2/library/gpt/manifests/v1",
    ] {
        let response = send(&app, put_manifest(path, "{}")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = send(&app, request("GET", "/v2/library/bert/index")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let index: Index = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let names: Vec<_> = index.manifests.iter().filter_map(|d| d.name.as_deref()).collect();
    assert_eq!(names, ["latest", "v1"]);
    assert_eq!(index.manifests[0].media_type, MANIFEST_TYPE);

    let response = send(&app, request("GET", "/v2/library/bert/index?search=LAT")).await;
    let index: Index = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(index.manifests.len(), 1);

    let response = send(&app, request("GET", "/v2/_index?search=gpt")).await;
    let index: Index = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let names: Vec<_> = index.manifests.iter().filter_map(|d| d.name.as_deref()).collect();
    assert_eq!(names, ["library/gpt"]);

    let response = send(&app, request("DELETE", "/v2/library/bert/index")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, "\"ok\"");

    let response = send(&app, request("DELETE", "/v2/library/bert/index")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "INDEX_UNKNOWN");

    let response = send(&app, request("GET", "/v2/_index")).await;
    let index: Index = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let names: Vec<_> = index.manifests.iter().filter_map(|d| d.name.as_deref()).collect();
    assert_eq!(names, ["library/gpt"]);
}

#[tokio::test]
async fn backend_failures_are_generic() {
    let store = Arc::new(StubStore::default());
    let response = send(&stub_registry(store), request("DELETE", "/v2/bert/index")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = error_body(response).await;
    assert_eq!(body.code, "UNKNOWN");
    assert!(!body.message.contains("10.0.0.7"));
}

#[tokio::test]
async fn malformed_query_uses_error_body() {
    let app = test_registry();

    let response = send(&app, request("GET", "/v2/_index?search=a&search=b")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let body = error_body(response).await;
    assert_eq!(body.code, "PARAMETER_INVALID");
    assert!(!body.message.contains("duplicate field"));

    let response = send(&app, request("GET", "/v2/bert/index?search=a&search=b")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "PARAMETER_INVALID");

    // Routes without a search parameter ignore the query string.
    let data: &'static [u8] = b"hello";
    let path = format!("/v2/bert/blobs/{}?search=a&search=b", sha256(data));
    let response = send(&app, put_blob(&path, data)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let app = test_registry();

    let response = send(&app, request("GET", "/v2/bert/tags/list")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await.code, "NOT_FOUND");

    let response = send(&app, request("GET", "/v2/Bert/manifests/v1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, request("POST", "/v2/bert/manifests/v1")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_body(response).await.code, "UNSUPPORTED");

    let response = send(&app, request("DELETE", "/v2/_index")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn local_storage_round_trip() {
    let driver = TempDriver::new().unwrap();
    let app = RegistryBuilder::new().storage(driver.into()).build();

    let data: &'static [u8] = b"weights";
    let path = format!("/v2/library/bert/blobs/{}", sha256(data));
    assert_eq!(send(&app, put_blob(&path, data)).await.status(), StatusCode::CREATED);

    let response = send(&app, request("GET", &path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, data);

    let response = send(&app, put_manifest("/v2/library/bert/manifests/v1", "{}")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, request("GET", "/v2/library/bert/index")).await;
    assert_eq!(response.status(), StatusCode::OK);
}
