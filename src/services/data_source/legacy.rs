//! Legacy call-style client
//!
//! Older callers address the cluster with a dotted endpoint name
//! (`"cluster.health"`, `"indices.getMapping"`) or a raw path plus a loose
//! parameter map. `LegacyClient` maps those onto transport requests and hands
//! back the response body untouched.

use super::client::{index_path, ClusterTransport, TransportRequest};
use super::error::DataSourceError;
use super::factory::{ClientBuildInputs, ClientFactory};
use super::pool::{ClientPool, PoolClient, PoolKey};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Options accepted by a legacy call
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyCallOptions {
    /// Request timeout for this call only
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra headers for this call only
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Report 401 responses as `Unauthorized` rather than a plain response error
    #[serde(default = "default_wrap_401")]
    pub wrap_401_errors: bool,
}

fn default_wrap_401() -> bool {
    true
}

impl Default for LegacyCallOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            headers: BTreeMap::new(),
            wrap_401_errors: true,
        }
    }
}

/// How a legacy endpoint's response is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseShape {
    Body,
    /// HEAD style: `true` on 2xx, `false` on 404
    Exists,
}

/// Call-by-endpoint client for one data source and one effective credential
#[derive(Debug)]
pub struct LegacyClient {
    data_source_id: String,
    transport: ClusterTransport,
}

impl PoolClient for LegacyClient {
    fn close(&self) {
        self.transport.close();
    }
}

impl LegacyClient {
    pub(crate) fn new(data_source_id: impl Into<String>, transport: ClusterTransport) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            transport,
        }
    }

    pub fn data_source_id(&self) -> &str {
        &self.data_source_id
    }

    /// Call `endpoint` with `params` and return the response body as-is
    pub async fn call_api(
        &self,
        endpoint: &str,
        params: Map<String, Value>,
        options: LegacyCallOptions,
    ) -> Result<Value, DataSourceError> {
        let (mut request, shape) = build_request(endpoint, params)?;
        if let Some(ms) = options.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms.max(1)));
        }
        for (name, value) in options.headers {
            request = request.with_header(name, value);
        }

        let response = self.transport.send(request).await?;
        match shape {
            ResponseShape::Exists if response.is_success() => Ok(Value::Bool(true)),
            ResponseShape::Exists if response.status == 404 => Ok(Value::Bool(false)),
            _ if response.is_success() => Ok(response.body),
            _ if response.status == 401 && options.wrap_401_errors => {
                Err(DataSourceError::Unauthorized(unauthorized_reason(&response.body)))
            }
            _ => Err(DataSourceError::ResponseError {
                status: response.status,
                body: response.body,
            }),
        }
    }
}

fn unauthorized_reason(body: &Value) -> String {
    body.pointer("/error/reason")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "authentication rejected by data source".to_string())
}

// ============================================================================
// Endpoint Mapping
// ============================================================================

fn take_string(params: &mut Map<String, Value>, name: &str) -> Option<String> {
    params.remove(name).and_then(|value| match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Array(items) => Some(join_values(&items)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn require_string(
    params: &mut Map<String, Value>,
    name: &str,
    endpoint: &str,
) -> Result<String, DataSourceError> {
    take_string(params, name).ok_or_else(|| {
        DataSourceError::InvalidLegacyEndpoint(format!("{} requires parameter '{}'", endpoint, name))
    })
}

fn join_values(items: &[Value]) -> String {
    items
        .iter()
        .map(query_value)
        .collect::<Vec<_>>()
        .join(",")
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => join_values(items),
        other => other.to_string(),
    }
}

fn parse_method(value: Option<String>) -> Result<Method, DataSourceError> {
    match value {
        None => Ok(Method::GET),
        Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
            .map_err(|_| DataSourceError::InvalidLegacyEndpoint(format!("invalid method: {}", m))),
    }
}

/// Translate a legacy endpoint and its parameters into a request
fn build_request(
    endpoint: &str,
    mut params: Map<String, Value>,
) -> Result<(TransportRequest, ResponseShape), DataSourceError> {
    let endpoint = endpoint.trim();
    let body = params.remove("body");
    let mut shape = ResponseShape::Body;

    let mut request = if endpoint.starts_with('/') {
        let method = parse_method(take_string(&mut params, "method"))?;
        TransportRequest::new(method, endpoint)
    } else {
        match endpoint {
            "info" => TransportRequest::get("/"),
            "ping" => {
                shape = ResponseShape::Exists;
                TransportRequest::head("/")
            }
            "cluster.health" => match take_string(&mut params, "index") {
                Some(index) => TransportRequest::get(format!("/_cluster/health/{}", index)),
                None => TransportRequest::get("/_cluster/health"),
            },
            "cluster.state" => TransportRequest::get("/_cluster/state"),
            "cluster.stats" => TransportRequest::get("/_cluster/stats"),
            "cat.indices" => {
                let path = match take_string(&mut params, "index") {
                    Some(index) => format!("/_cat/indices/{}", index),
                    None => "/_cat/indices".to_string(),
                };
                params
                    .entry("format")
                    .or_insert_with(|| Value::String("json".to_string()));
                TransportRequest::get(path)
            }
            "cat.aliases" => {
                params
                    .entry("format")
                    .or_insert_with(|| Value::String("json".to_string()));
                TransportRequest::get("/_cat/aliases")
            }
            "indices.exists" => {
                shape = ResponseShape::Exists;
                let index = require_string(&mut params, "index", endpoint)?;
                TransportRequest::head(format!("/{}", index))
            }
            "indices.get" => {
                let index = require_string(&mut params, "index", endpoint)?;
                TransportRequest::get(format!("/{}", index))
            }
            "indices.getMapping" => {
                let index = take_string(&mut params, "index");
                TransportRequest::get(index_path(index.as_deref(), "_mapping"))
            }
            "indices.create" => {
                let index = require_string(&mut params, "index", endpoint)?;
                TransportRequest::new(Method::PUT, format!("/{}", index))
            }
            "indices.delete" => {
                let index = require_string(&mut params, "index", endpoint)?;
                TransportRequest::new(Method::DELETE, format!("/{}", index))
            }
            "search" => {
                let index = take_string(&mut params, "index");
                TransportRequest::post(index_path(index.as_deref(), "_search"))
            }
            "count" => {
                let index = take_string(&mut params, "index");
                TransportRequest::post(index_path(index.as_deref(), "_count"))
            }
            "get" => {
                let index = require_string(&mut params, "index", endpoint)?;
                let id = require_string(&mut params, "id", endpoint)?;
                TransportRequest::get(format!("/{}/_doc/{}", index, id))
            }
            "index" => {
                let index = require_string(&mut params, "index", endpoint)?;
                match take_string(&mut params, "id") {
                    Some(id) => TransportRequest::new(Method::PUT, format!("/{}/_doc/{}", index, id)),
                    None => TransportRequest::post(format!("/{}/_doc", index)),
                }
            }
            "delete" => {
                let index = require_string(&mut params, "index", endpoint)?;
                let id = require_string(&mut params, "id", endpoint)?;
                TransportRequest::new(Method::DELETE, format!("/{}/_doc/{}", index, id))
            }
            "transport.request" => {
                let method = parse_method(take_string(&mut params, "method"))?;
                let path = require_string(&mut params, "path", endpoint)?;
                if let Some(Value::Object(query)) = params.remove("querystring") {
                    params.extend(query);
                }
                TransportRequest::new(method, path)
            }
            other => {
                return Err(DataSourceError::InvalidLegacyEndpoint(format!(
                    "unknown endpoint: {}",
                    other
                )))
            }
        }
    };

    if let Some(body) = body.filter(|b| !b.is_null()) {
        request = request.with_body(body);
    }
    for (name, value) in params {
        if !value.is_null() {
            request = request.with_query(name, query_value(&value));
        }
    }

    Ok((request, shape))
}

// ============================================================================
// Legacy Call Binding
// ============================================================================

/// A legacy call function bound to one data source and credential
///
/// The data source was already resolved when the binding was made. Each call
/// fetches the pooled legacy client, creating it on first use.
#[derive(Clone)]
pub struct LegacyCallBinding {
    key: PoolKey,
    fingerprint: String,
    inputs: Arc<ClientBuildInputs>,
    pool: ClientPool<LegacyClient>,
    factory: Arc<ClientFactory>,
}

impl std::fmt::Debug for LegacyCallBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyCallBinding")
            .field("key", &self.key)
            .finish()
    }
}

impl LegacyCallBinding {
    pub(crate) fn new(
        key: PoolKey,
        fingerprint: String,
        inputs: Arc<ClientBuildInputs>,
        pool: ClientPool<LegacyClient>,
        factory: Arc<ClientFactory>,
    ) -> Self {
        Self {
            key,
            fingerprint,
            inputs,
            pool,
            factory,
        }
    }

    pub fn data_source_id(&self) -> &str {
        &self.key.data_source_id
    }

    pub async fn call(
        &self,
        endpoint: &str,
        params: Option<Map<String, Value>>,
        options: Option<LegacyCallOptions>,
    ) -> Result<Value, DataSourceError> {
        let factory = Arc::clone(&self.factory);
        let inputs = Arc::clone(&self.inputs);
        let client = self
            .pool
            .get_or_create(self.key.clone(), &self.fingerprint, move || async move {
                factory.create_legacy(&inputs)
            })
            .await?;

        client
            .call_api(endpoint, params.unwrap_or_default(), options.unwrap_or_default())
            .await
    }
}
