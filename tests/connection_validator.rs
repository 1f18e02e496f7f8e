//! Connection validation against live, silent and closed endpoints

use data_source_service::services::data_source::{
    AuthConfig, DataSourceError, DataSourceRecord, DataSourceService, EncryptedRef,
    InMemoryMetadataStore, PoolConfig, ServiceDependencies, TestConnectionRequest,
    TransportConfig, ValidationStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(records: Vec<DataSourceRecord>) -> DataSourceService {
    let store = Arc::new(InMemoryMetadataStore::from_records(records));
    DataSourceService::setup(PoolConfig::new(4), ServiceDependencies::new(store)).unwrap()
}

fn request(endpoint: String, auth: Option<AuthConfig>) -> TestConnectionRequest {
    TestConnectionRequest {
        data_source_id: None,
        endpoint,
        auth,
        transport: None,
    }
}

/// Cluster that accepts admin:admin and rejects everything else
async fn secured_cluster() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("authorization", "Basic YWRtaW46YWRtaW4="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cluster_name": "logs",
            "version": {"number": "2.11.0", "distribution": "opensearch"}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .with_priority(2)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_valid_credentials_reachable() {
    let server = secured_cluster().await;
    let service = service(vec![]);

    let result = service
        .test_connection(&request(
            server.uri(),
            Some(AuthConfig::username_password("admin", EncryptedRef::new("admin"))),
        ))
        .await
        .unwrap();

    assert_eq!(result.status, ValidationStatus::Reachable);
    assert_eq!(result.cluster_name.as_deref(), Some("logs"));
    assert_eq!(result.version.as_deref(), Some("2.11.0"));
    assert!(result.detail.contains("logs"), "detail: {}", result.detail);
    assert_eq!(service.pool_stats()[0].cached, 0);
    assert_eq!(service.pool_stats()[1].cached, 0);
}

#[tokio::test]
async fn test_wrong_credentials_auth_rejected() {
    let server = secured_cluster().await;
    let service = service(vec![]);

    let result = service
        .test_connection(&request(
            server.uri(),
            Some(AuthConfig::username_password("admin", EncryptedRef::new("wrong"))),
        ))
        .await
        .unwrap();

    assert_eq!(result.status, ValidationStatus::AuthRejected);
    assert_eq!(result.http_status, Some(401));
    assert_ne!(result.status, ValidationStatus::Unreachable);
}

#[tokio::test]
async fn test_stored_credentials_reused_when_auth_omitted() {
    let server = secured_cluster().await;
    let service = service(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::username_password("admin", EncryptedRef::new("admin")),
    )]);

    let mut req = request(server.uri(), None);
    req.data_source_id = Some("logs".to_string());
    let result = service.test_connection(&req).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Reachable);
}

#[tokio::test]
async fn test_silent_endpoint_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept connections and never answer
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let service = service(vec![]);
    let mut req = request(format!("http://{}", addr), Some(AuthConfig::NoAuth));
    req.transport = Some(TransportConfig::default().with_request_timeout_ms(200));

    let started = Instant::now();
    let result = service.test_connection(&req).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status, ValidationStatus::Timeout);
    assert!(elapsed >= Duration::from_millis(150), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    silent.abort();
}

#[tokio::test]
async fn test_closed_port_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = service(vec![]);
    let result = service
        .test_connection(&request(format!("http://{}", addr), None))
        .await
        .unwrap();
    assert_eq!(result.status, ValidationStatus::Unreachable);
}

#[tokio::test]
async fn test_closed_port_with_tls_in_path_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = service(vec![]);
    for endpoint in [
        format!("http://{}/opensearch-tls", addr),
        format!("http://{}/ssl/certificate-handshake", addr),
    ] {
        let result = service
            .test_connection(&request(endpoint.clone(), None))
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Unreachable, "{}: {}", endpoint, result.detail);
    }
}

#[tokio::test]
async fn test_https_against_plain_http_is_tls_error() {
    let server = secured_cluster().await;
    let endpoint = server.uri().replacen("http://", "https://", 1);

    let service = service(vec![]);
    let mut req = request(endpoint, Some(AuthConfig::NoAuth));
    req.transport = Some(TransportConfig::default().with_request_timeout_ms(2_000));

    let result = service.test_connection(&req).await.unwrap();
    assert_eq!(result.status, ValidationStatus::TlsError, "detail: {}", result.detail);
    assert!(result.http_status.is_none());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_configuration_defects_are_errors() {
    let service = service(vec![]);

    let err = service
        .test_connection(&request("ftp://example.com".to_string(), None))
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::TransportConfigError(_)));

    let err = service
        .test_connection(&request(
            "http://127.0.0.1:9200".to_string(),
            Some(AuthConfig::Unsupported),
        ))
        .await
        .unwrap_err();
    assert!(err.is_configuration_error());
}
