use http::{header, StatusCode};
use registry_client::mock::{MockResponse, MockService};
use registry_client::{Credentials, HttpRegistry, Registry, RegistryError, RegistryHost};
use sha2::{Digest as _, Sha256};

const CONFIG: &str = r#"{"architecture": "amd64", "os": "linux", "created": "2024-03-04T05:06:07Z"}"#;

fn config_digest() -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(CONFIG.as_bytes())))
}

fn manifest() -> String {
    format!(
        r#"{{"schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {{"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "{}", "size": {}}},
            "layers": []}}"#,
        config_digest(),
        CONFIG.len()
    )
}

fn manifest_response() -> MockResponse {
    MockResponse::json(manifest()).with_header(
        header::CONTENT_TYPE,
        "application/vnd.oci.image.manifest.v1+json",
    )
}

fn registry(mock: &MockService) -> HttpRegistry {
    HttpRegistry::new_with_inner_service(
        RegistryHost::new("registry.test:5000").tls(false),
        mock.clone(),
    )
}

#[tokio::test]
async fn catalog_follows_pagination() {
    let mut mock = MockService::new();
    mock.add(
        "/v2/_catalog?n=1000",
        MockResponse::json(r#"{"repositories": ["alpha", "beta"]}"#)
            .with_header(header::LINK, r#"</v2/_catalog?last=beta&n=1000>; rel="next""#),
    )
    .add(
        "/v2/_catalog?last=beta&n=1000",
        MockResponse::json(r#"{"repositories": ["gamma"]}"#),
    );

    let repositories = registry(&mock).list_repositories().await.unwrap();
    assert_eq!(repositories, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn pagination_cycles_end() {
    let mut mock = MockService::new();
    mock.add(
        "/v2/_catalog?n=1000",
        MockResponse::json(r#"{"repositories": ["alpha", "beta"]}"#)
            .with_header(header::LINK, r#"</v2/_catalog?last=beta&n=1000>; rel="next""#),
    )
    .add(
        "/v2/_catalog?last=beta&n=1000",
        MockResponse::json(r#"{"repositories": ["gamma"]}"#)
            .with_header(header::LINK, r#"</v2/_catalog?n=1000>; rel="next""#),
    );

    let repositories = registry(&mock).list_repositories().await.unwrap();
    assert_eq!(repositories, vec!["alpha", "beta", "gamma"]);
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let mut mock = MockService::new();
    mock.add(
        "/v2/alpha/tags/list",
        MockResponse::json(r#"{"name": "alpha", "tags": ["v1", "v2"]}"#),
    );
    let registry = registry(&mock);

    assert_eq!(registry.list_tags("alpha").await.unwrap(), vec!["v1", "v2"]);
    assert!(registry.list_tags("beta").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn server_errors_are_not_not_found() {
    let mut mock = MockService::new();
    mock.add(
        "/v2/_catalog",
        MockResponse::status(StatusCode::SERVICE_UNAVAILABLE),
    );

    let err = registry(&mock).list_repositories().await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(matches!(
        err,
        RegistryError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            ..
        }
    ));
}

#[tokio::test]
async fn invalid_names_never_reach_the_network() {
    let mock = MockService::new();
    let registry = registry(&mock);

    assert!(registry
        .list_tags("../etc")
        .await
        .unwrap_err()
        .is_invalid_reference());
    assert!(registry
        .image_info("alpha", "bad/tag")
        .await
        .unwrap_err()
        .is_invalid_reference());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn image_info_from_manifest_and_config() {
    let mut mock = MockService::new();
    mock.add("/v2/team/app/manifests/v1", manifest_response())
        .add(
            &format!("/v2/team/app/blobs/{}", config_digest()),
            MockResponse::json(CONFIG),
        );

    let info = registry(&mock).image_info("team/app", "v1").await.unwrap();
    assert_eq!(info.reference, "registry.test:5000/team/app:v1");
    assert_eq!(
        info.created.unwrap().to_rfc3339(),
        "2024-03-04T05:06:07+00:00"
    );
}

#[tokio::test]
async fn image_info_resolves_index() {
    let index = r#"{"schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"digest": "sha256:aaaa", "size": 1, "platform": {"os": "linux", "architecture": "arm64"}},
            {"digest": "sha256:bbbb", "size": 1, "platform": {"os": "linux", "architecture": "amd64"}}
        ]}"#;

    let mut mock = MockService::new();
    mock.add(
        "/v2/app/manifests/latest",
        MockResponse::json(index)
            .with_header(header::CONTENT_TYPE, "application/vnd.oci.image.index.v1+json"),
    )
    .add("/v2/app/manifests/sha256:bbbb", manifest_response())
    .add(
        &format!("/v2/app/blobs/{}", config_digest()),
        MockResponse::json(CONFIG),
    );

    let info = registry(&mock).image_info("app", "latest").await.unwrap();
    assert!(info.created.is_some());

    let paths: Vec<_> = mock.requests().into_iter().map(|r| r.path).collect();
    assert!(paths.contains(&"/v2/app/manifests/sha256:bbbb".to_owned()));
    assert!(!paths.contains(&"/v2/app/manifests/sha256:aaaa".to_owned()));
}

#[tokio::test]
async fn missing_tag_is_not_found() {
    let mock = MockService::new();
    let err = registry(&mock).image_info("app", "gone").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn config_digest_is_verified() {
    let mut mock = MockService::new();
    mock.add("/v2/app/manifests/v1", manifest_response()).add(
        &format!("/v2/app/blobs/{}", config_digest()),
        MockResponse::json(r#"{"created": "2000-01-01T00:00:00Z"}"#),
    );

    let err = registry(&mock).image_info("app", "v1").await.unwrap_err();
    assert!(matches!(err, RegistryError::DigestMismatch { .. }));
}

#[tokio::test]
async fn blob_redirect_is_followed_without_credentials() {
    let mut mock = MockService::new();
    mock.add("/v2/app/manifests/v1", manifest_response())
        .add(
            &format!("/v2/app/blobs/{}", config_digest()),
            MockResponse::status(StatusCode::TEMPORARY_REDIRECT)
                .with_header(header::LOCATION, "/storage/config-blob"),
        )
        .add("/storage/config-blob", MockResponse::json(CONFIG));

    let registry = HttpRegistry::new_with_inner_service(
        RegistryHost::new("registry.test")
            .tls(false)
            .credentials(Some(Credentials::new("robot", Some("hunter2")))),
        mock.clone(),
    );
    registry.image_info("app", "v1").await.unwrap();

    let storage = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/storage/config-blob")
        .unwrap();
    assert_eq!(storage.authorization, None);
}

#[tokio::test]
async fn bearer_token_challenge() {
    let challenge = r#"Bearer realm="http://registry.test/token",service="registry.test""#;

    let mut mock = MockService::new();
    mock.protect("/v2/", "Bearer s3cret", challenge)
        .add(
            "/token",
            MockResponse::json(r#"{"token": "s3cret", "expires_in": 300}"#),
        )
        .add(
            "/v2/alpha/tags/list",
            MockResponse::json(r#"{"name": "alpha", "tags": ["v1"]}"#),
        );

    let registry = HttpRegistry::new_with_inner_service(
        RegistryHost::new("registry.test")
            .tls(false)
            .credentials(Some(Credentials::new("robot", Some("hunter2")))),
        mock.clone(),
    );

    assert_eq!(registry.list_tags("alpha").await.unwrap(), vec!["v1"]);

    let requests = mock.requests();
    let token = requests
        .iter()
        .find(|r| r.path.starts_with("/token"))
        .unwrap();
    assert!(token.path.contains("scope=repository%3Aalpha%3Apull"));
    assert!(token.path.contains("service=registry.test"));
    assert_eq!(
        token.authorization.as_deref(),
        Some("Basic cm9ib3Q6aHVudGVyMg==")
    );

    // The token is cached and sent up front on the next request.
    let before = mock.requests().len();
    registry.list_tags("alpha").await.unwrap();
    let after = mock.requests();
    assert_eq!(after.len(), before + 1);
    assert_eq!(after[before].authorization.as_deref(), Some("Bearer s3cret"));
}

#[tokio::test]
async fn basic_challenge() {
    let mut mock = MockService::new();
    mock.protect(
        "/v2/",
        "Basic cm9ib3Q6aHVudGVyMg==",
        r#"Basic realm="Registry""#,
    )
    .add(
        "/v2/_catalog",
        MockResponse::json(r#"{"repositories": ["alpha"]}"#),
    );

    let anonymous = registry(&mock);
    assert!(matches!(
        anonymous.list_repositories().await.unwrap_err(),
        RegistryError::Authentication(_)
    ));

    let authenticated = HttpRegistry::new_with_inner_service(
        RegistryHost::new("registry.test")
            .tls(false)
            .credentials(Some(Credentials::new("robot", Some("hunter2")))),
        mock.clone(),
    );
    assert_eq!(
        authenticated.list_repositories().await.unwrap(),
        vec!["alpha"]
    );
}
