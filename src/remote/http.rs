//! HTTP control plane client.
//!
//! Resources live at `{endpoint}/v1/resources/{kind}/{name}`: `GET` describes,
//! `POST` creates and `PUT` updates. Bodies are JSON.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{AttributeMap, ControlPlaneConfig, ResourceId, ResourceKind, ResourceSpec};
use crate::error::{ConfigError, ConvoyError, RemoteError, Result};

use super::client::{ControlPlane, RemoteResource};

/// Delay assumed when a 429 response carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Control plane reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    kind: ResourceKind,
    name: &'a str,
    attributes: AttributeMap,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    attributes: AttributeMap,
    #[serde(default)]
    id: Option<String>,
}

impl HttpControlPlane {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("convoy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Creates a client from the document's `control_plane` section.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no endpoint is configured.
    pub fn from_config(config: &ControlPlaneConfig, token: Option<String>) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ConfigError::validation(
                "No control plane endpoint configured (set control_plane.endpoint or CONVOY_CONTROL_PLANE_ENDPOINT)",
                "control_plane.endpoint",
            )
        })?;
        Self::new(endpoint, token, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, id: &ResourceId) -> String {
        format!("{}/v1/resources/{}/{}", self.endpoint, id.kind, id.name)
    }

    async fn send(&self, request: RequestBuilder, id: &ResourceId) -> Result<Response> {
        let request = request.header(header::ACCEPT, "application/json");
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        request.send().await.map_err(|e| {
            let error = if e.is_timeout() {
                RemoteError::timeout(format!("{id}: {e}"))
            } else {
                RemoteError::network(format!("{id}: {e}"))
            };
            ConvoyError::Remote(error)
        })
    }

    async fn write(&self, request: RequestBuilder, spec: &ResourceSpec) -> Result<RemoteResource> {
        let id = spec.id();
        let body = ResourceRequest {
            kind: id.kind,
            name: &spec.name,
            attributes: spec.attribute_map(),
        };

        let response = self.send(request.json(&body), &id).await?;
        let response = check_status(response, &id).await?;
        parse_resource(response, id).await
    }
}

/// Maps a non-success status to the matching error.
async fn check_status(response: Response, id: &ResourceId) -> Result<Response> {
    let status = response.status();
    trace!("{id}: HTTP {status}");

    if status.is_success() {
        return Ok(response);
    }

    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            RemoteError::RateLimited { retry_after_secs }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthenticationFailed {
            message: format!("{id}: control plane returned {status}"),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::timeout(format!("{id}: control plane returned {status}"))
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            RemoteError::network(format!("{id}: control plane returned {status}"))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            RemoteError::rejected(status.as_u16(), format!("{id}: {body}"))
        }
    };

    Err(ConvoyError::Remote(error))
}

async fn parse_resource(response: Response, id: ResourceId) -> Result<RemoteResource> {
    let body: ResourceResponse = response.json().await.map_err(|e| RemoteError::InvalidResponse {
        message: format!("{id}: {e}"),
    })?;

    Ok(RemoteResource {
        id,
        attributes: body.attributes,
        remote_id: body.id,
    })
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe(&self, id: &ResourceId) -> Result<Option<RemoteResource>> {
        debug!("GET {}", self.url(id));
        let response = self.send(self.client.get(self.url(id)), id).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response, id).await?;
        parse_resource(response, id.clone()).await.map(Some)
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<RemoteResource> {
        let url = self.url(&spec.id());
        debug!("POST {url}");
        self.write(self.client.post(url), spec).await
    }

    async fn update(&self, spec: &ResourceSpec) -> Result<RemoteResource> {
        let url = self.url(&spec.id());
        debug!("PUT {url}");
        self.write(self.client.put(url), spec).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceAttributes, ServiceAttributes};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(desired_count: u32) -> ResourceSpec {
        ResourceSpec {
            name: String::from("s1"),
            attributes: ResourceAttributes::Service(ServiceAttributes {
                desired_count,
                launch_type: String::from("FARGATE"),
                port: None,
            }),
            depends_on: vec![],
        }
    }

    fn client(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(&server.uri(), Some(String::from("tok")), Duration::from_secs(5)).unwrap()
    }

    fn s1() -> ResourceId {
        ResourceId::new(ResourceKind::Service, "s1")
    }

    #[tokio::test]
    async fn test_describe_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources/service/s1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "svc-123",
                "attributes": { "desired_count": 2, "status": "ACTIVE" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server).describe(&s1()).await.unwrap().unwrap();
        assert_eq!(found.id, s1());
        assert_eq!(found.remote_id.as_deref(), Some("svc-123"));
        assert_eq!(found.attributes["desired_count"], 2);
    }

    #[tokio::test]
    async fn test_describe_not_found_is_absence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).describe(&s1()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_sends_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/service/s1"))
            .and(body_partial_json(json!({
                "kind": "service",
                "name": "s1",
                "attributes": { "desired_count": 3 }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "svc-1",
                "attributes": { "desired_count": 3, "launch_type": "FARGATE" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server).create(&service(3)).await.unwrap();
        assert_eq!(created.attributes["desired_count"], 3);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client(&server).update(&service(2)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        for (name, status) in [("a", 503), ("b", 401), ("c", 409)] {
            Mock::given(method("GET"))
                .and(path(format!("/v1/resources/service/{name}")))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }
        let cp = client(&server);

        let unavailable = cp
            .describe(&ResourceId::new(ResourceKind::Service, "a"))
            .await
            .unwrap_err();
        assert!(unavailable.is_transient());

        let unauthorized = cp
            .describe(&ResourceId::new(ResourceKind::Service, "b"))
            .await
            .unwrap_err();
        assert!(matches!(
            unauthorized,
            ConvoyError::Remote(RemoteError::AuthenticationFailed { .. })
        ));

        let conflict = cp
            .describe(&ResourceId::new(ResourceKind::Service, "c"))
            .await
            .unwrap_err();
        assert!(matches!(
            conflict,
            ConvoyError::Remote(RemoteError::Rejected { status: 409, .. })
        ));
        assert!(!conflict.is_transient());
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let cp = HttpControlPlane::new(&server.uri(), None, Duration::from_millis(50)).unwrap();
        let err = cp.describe(&s1()).await.unwrap_err();
        assert!(matches!(err, ConvoyError::Remote(RemoteError::Timeout { .. })));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let err = HttpControlPlane::from_config(&ControlPlaneConfig::default(), None).unwrap_err();
        assert!(err.is_validation());
    }
}
