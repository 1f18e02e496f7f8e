//! Cluster transport and the typed data source client
//!
//! `ClusterTransport` owns the HTTP client, the base URL and the optional
//! SigV4 signer. Both client flavors are thin layers over it.

use super::error::DataSourceError;
use super::pool::PoolClient;
use super::signer::SigV4Signer;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

// ============================================================================
// Requests and Responses
// ============================================================================

/// One request against a data source, relative to its endpoint
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the endpoint; may carry a query string
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    /// Overrides the client's request timeout for this request only
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Raw response: status plus the body parsed as JSON when possible
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// Cluster Transport
// ============================================================================

pub struct ClusterTransport {
    http: reqwest::Client,
    base_url: Url,
    signer: Option<SigV4Signer>,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for ClusterTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTransport")
            .field("base_url", &self.base_url.as_str())
            .field("signed", &self.signer.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClusterTransport {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: Url,
        signer: Option<SigV4Signer>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            signer,
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Resolve a request path against the endpoint, keeping any base path
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> Url {
        let (path, inline_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(inline_query.filter(|q| !q.is_empty()));
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        url
    }

    /// Send a request and return whatever the data source answered
    pub async fn send(&self, request: TransportRequest) -> Result<TransportResponse, DataSourceError> {
        if self.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }

        let url = self.url_for(&request.path, &request.query);
        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let mut http_request = builder.build()?;
        *http_request.timeout_mut() = Some(request.timeout.unwrap_or(self.request_timeout));

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                DataSourceError::TransportConfigError(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                DataSourceError::TransportConfigError(format!("invalid value for header {}", name))
            })?;
            http_request.headers_mut().insert(name, value);
        }

        if let Some(signer) = &self.signer {
            signer.sign(&mut http_request).await?;
        }

        tracing::trace!(
            method = %request.method,
            path = %request.path,
            "Sending data source request"
        );

        let response = self.http.execute(http_request).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(TransportResponse {
            status,
            body: parse_body(&text),
        })
    }

    /// Send a request and fail on any non-2xx status
    pub async fn perform_request(&self, request: TransportRequest) -> Result<Value, DataSourceError> {
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(DataSourceError::ResponseError {
                status: response.status,
                body: response.body,
            })
        }
    }
}

/// Empty bodies become `null`; bodies that are not JSON are kept as text
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

// ============================================================================
// Typed Client
// ============================================================================

/// Typed client for one data source and one effective credential
#[derive(Debug)]
pub struct DataSourceClient {
    data_source_id: String,
    transport: ClusterTransport,
}

impl PoolClient for DataSourceClient {
    fn close(&self) {
        self.transport.close();
    }
}

impl DataSourceClient {
    pub(crate) fn new(data_source_id: impl Into<String>, transport: ClusterTransport) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            transport,
        }
    }

    pub fn data_source_id(&self) -> &str {
        &self.data_source_id
    }

    pub fn transport(&self) -> &ClusterTransport {
        &self.transport
    }

    /// Cluster name, version and build information
    pub async fn info(&self) -> Result<Value, DataSourceError> {
        self.transport.perform_request(TransportRequest::get("/")).await
    }

    /// Whether the cluster answers its root endpoint with a 2xx
    pub async fn ping(&self) -> Result<bool, DataSourceError> {
        let response = self.transport.send(TransportRequest::head("/")).await?;
        Ok(response.is_success())
    }

    pub async fn cluster_health(&self) -> Result<Value, DataSourceError> {
        self.transport
            .perform_request(TransportRequest::get("/_cluster/health"))
            .await
    }

    pub async fn cat_indices(&self) -> Result<Value, DataSourceError> {
        self.transport
            .perform_request(TransportRequest::get("/_cat/indices").with_query("format", "json"))
            .await
    }

    pub async fn search(&self, index: Option<&str>, body: Value) -> Result<Value, DataSourceError> {
        self.transport
            .perform_request(TransportRequest::post(index_path(index, "_search")).with_body(body))
            .await
    }

    pub async fn count(&self, index: Option<&str>, body: Option<Value>) -> Result<Value, DataSourceError> {
        let mut request = TransportRequest::post(index_path(index, "_count"));
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.transport.perform_request(request).await
    }
}

pub(crate) fn index_path(index: Option<&str>, action: &str) -> String {
    match index.map(str::trim).filter(|i| !i.is_empty()) {
        Some(index) => format!("/{}/{}", index, action),
        None => format!("/{}", action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(base: &str) -> ClusterTransport {
        ClusterTransport::new(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            None,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_url_for_keeps_base_path_and_query() {
        let t = transport("https://search.example.com:9200/opensearch/");
        assert_eq!(
            t.url_for("/_cluster/health", &[]).as_str(),
            "https://search.example.com:9200/opensearch/_cluster/health"
        );
        assert_eq!(
            t.url_for("_cat/indices?v=true", &[("format".to_string(), "json".to_string())])
                .as_str(),
            "https://search.example.com:9200/opensearch/_cat/indices?v=true&format=json"
        );

        let root = transport("http://localhost:9200");
        assert_eq!(root.url_for("/", &[]).as_str(), "http://localhost:9200/");
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(
            parse_body("green open logs"),
            Value::String("green open logs".to_string())
        );
    }

    #[test]
    fn test_index_path() {
        assert_eq!(index_path(Some("logs-*"), "_search"), "/logs-*/_search");
        assert_eq!(index_path(None, "_count"), "/_count");
        assert_eq!(index_path(Some(" "), "_count"), "/_count");
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let t = transport("http://127.0.0.1:9");
        t.close();
        assert!(matches!(
            t.send(TransportRequest::get("/")).await,
            Err(DataSourceError::PoolClosed)
        ));
    }
}
