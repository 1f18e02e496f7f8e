//! Data source service integration tests against mock clusters

use data_source_service::services::data_source::{
    AuthConfig, CredentialOverride, DataSourceClientParams, DataSourceError, DataSourceRecord,
    DataSourceService, EncryptedRef, InMemoryMetadataStore, PoolConfig, ServiceDependencies,
    TransportConfig,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service_with(records: Vec<DataSourceRecord>) -> (DataSourceService, Arc<InMemoryMetadataStore>) {
    let store = Arc::new(InMemoryMetadataStore::from_records(records));
    let deps = ServiceDependencies::new(store.clone());
    let service = DataSourceService::setup(PoolConfig::new(10), deps).unwrap();
    (service, store)
}

fn health_body() -> Value {
    json!({
        "cluster_name": "logs",
        "status": "green",
        "number_of_nodes": 3,
        "active_shards_percent_as_number": 100.0
    })
}

// =============================================================================
// Legacy call binding
// =============================================================================

#[tokio::test]
async fn test_legacy_call_returns_body_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);

    let binding = service
        .get_data_source_legacy_client(&DataSourceClientParams::new("logs"))
        .await
        .unwrap();
    let body = binding.call("/_cluster/health", None, None).await.unwrap();
    assert_eq!(body, health_body());

    let body = binding.call("cluster.health", None, None).await.unwrap();
    assert_eq!(body, health_body());
}

#[tokio::test]
async fn test_legacy_call_unknown_data_source_fails_before_any_call() {
    let server = MockServer::start().await;
    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);

    let err = service
        .get_data_source_legacy_client(&DataSourceClientParams::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::DataSourceNotFound(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_legacy_search_with_params_and_401_wrapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/logs-*/_search"))
        .and(query_param("size", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": {"total": 1}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_cluster/state"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"reason": "bad token"}})),
        )
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);
    let binding = service
        .get_data_source_legacy_client(&DataSourceClientParams::new("logs"))
        .await
        .unwrap();

    let mut params = Map::new();
    params.insert("index".to_string(), json!("logs-*"));
    params.insert("size".to_string(), json!(5));
    params.insert("body".to_string(), json!({"query": {"match_all": {}}}));
    let body = binding.call("search", Some(params), None).await.unwrap();
    assert_eq!(body, json!({"hits": {"total": 1}}));

    match binding.call("cluster.state", None, None).await {
        Err(DataSourceError::Unauthorized(reason)) => assert_eq!(reason, "bad token"),
        other => panic!("expected Unauthorized, got {:?}", other),
    }
}

// =============================================================================
// Pooling through the façade
// =============================================================================

#[tokio::test]
async fn test_identical_params_share_pooled_client() {
    let server = MockServer::start().await;
    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::username_password("admin", EncryptedRef::new("admin")),
    )]);
    let params = DataSourceClientParams::new("logs");

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(service.get_data_source_client(&params).await.unwrap());
    }
    assert!(handles.windows(2).all(|w| w[0].same_entry(&w[1])));
    assert_eq!(service.pool_stats()[0].cached, 1);
}

#[tokio::test]
async fn test_concurrent_requests_create_one_client() {
    let server = MockServer::start().await;
    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);
    let service = Arc::new(service);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .get_data_source_client(&DataSourceClientParams::new("logs"))
                    .await
            })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }
    assert!(handles.iter().all(|h| h.same_entry(&handles[0])));
    assert_eq!(service.pool_stats()[0].cached, 1);
}

#[tokio::test]
async fn test_basic_auth_header_sent() {
    let server = MockServer::start().await;
    // admin:secret
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::username_password("admin", EncryptedRef::new("secret")),
    )]);
    let client = service
        .get_data_source_client(&DataSourceClientParams::new("logs"))
        .await
        .unwrap();
    assert_eq!(client.cluster_health().await.unwrap(), health_body());
}

#[tokio::test]
async fn test_on_behalf_of_token_replaces_stored_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("authorization", "Bearer user-token"))
        .and(header("securitytenant", "analytics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cluster_name": "logs"})))
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::username_password("admin", EncryptedRef::new("secret")),
    )]);
    let params = DataSourceClientParams::new("logs").with_override(
        CredentialOverride::on_behalf_of("user-token").with_tenant("analytics"),
    );
    let client = service.get_data_source_client(&params).await.unwrap();
    assert_eq!(client.info().await.unwrap()["cluster_name"], "logs");
}

#[tokio::test]
async fn test_invalidate_after_endpoint_update() {
    let old_server = MockServer::start().await;
    let new_server = MockServer::start().await;
    for (server, name) in [(&old_server, "old"), (&new_server, "new")] {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cluster_name": name})))
            .mount(server)
            .await;
    }

    let (service, store) = service_with(vec![DataSourceRecord::new(
        "logs",
        old_server.uri(),
        AuthConfig::NoAuth,
    )]);
    let params = DataSourceClientParams::new("logs");
    let client = service.get_data_source_client(&params).await.unwrap();
    assert_eq!(client.info().await.unwrap()["cluster_name"], "old");

    store
        .upsert(DataSourceRecord::new("logs", new_server.uri(), AuthConfig::NoAuth))
        .await;
    assert_eq!(service.invalidate_data_source("logs"), 1);

    let client = service.get_data_source_client(&params).await.unwrap();
    assert_eq!(client.info().await.unwrap()["cluster_name"], "new");
}

#[tokio::test]
async fn test_transport_timeout_surfaces_to_caller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(health_body())
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new("logs", server.uri(), AuthConfig::NoAuth)
        .with_transport(TransportConfig::default().with_request_timeout_ms(100))]);
    let client = service
        .get_data_source_client(&DataSourceClientParams::new("logs"))
        .await
        .unwrap();

    match client.cluster_health().await {
        Err(DataSourceError::Transport { kind, .. }) => {
            assert_eq!(kind, data_source_service::services::data_source::TransportFailure::Timeout)
        }
        other => panic!("expected transport timeout, got {:?}", other),
    }
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_stop_closes_both_pools() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);
    let params = DataSourceClientParams::new("logs");
    let typed = service.get_data_source_client(&params).await.unwrap();
    let binding = service.get_data_source_legacy_client(&params).await.unwrap();
    binding.call("/_cluster/health", None, None).await.unwrap();

    service.stop();

    assert!(matches!(
        service.get_data_source_client(&params).await,
        Err(DataSourceError::PoolClosed)
    ));
    assert!(matches!(
        binding.call("/_cluster/health", None, None).await,
        Err(DataSourceError::PoolClosed)
    ));
    // Handles obtained before shutdown are closed with their pool
    assert!(matches!(
        typed.cluster_health().await,
        Err(DataSourceError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_stop_closes_invalidated_handles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(&server)
        .await;

    let (service, _) = service_with(vec![DataSourceRecord::new(
        "logs",
        server.uri(),
        AuthConfig::NoAuth,
    )]);
    let params = DataSourceClientParams::new("logs");
    let stale = service.get_data_source_client(&params).await.unwrap();
    assert!(service.invalidate_data_source("logs") >= 1);

    // Still usable after invalidation, until the service stops
    stale.cluster_health().await.unwrap();
    service.stop();

    assert!(matches!(
        stale.cluster_health().await,
        Err(DataSourceError::PoolClosed)
    ));
}
