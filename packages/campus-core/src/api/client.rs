use crate::auth::Credential;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use super::registry::{AuthorizedClient, ClientRegistry};
use super::ApiEndpointConfig;

/// The fixed set of backend services the dashboard talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceName {
    Course,
    Identity,
    Assessment,
    Dashboard,
    Profile,
    StudentManagement,
}

impl ServiceName {
    pub const ALL: [ServiceName; 6] = [
        ServiceName::Course,
        ServiceName::Identity,
        ServiceName::Assessment,
        ServiceName::Dashboard,
        ServiceName::Profile,
        ServiceName::StudentManagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Course => "course",
            ServiceName::Identity => "identity",
            ServiceName::Assessment => "assessment",
            ServiceName::Dashboard => "dashboard",
            ServiceName::Profile => "profile",
            ServiceName::StudentManagement => "student-management",
        }
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client for {service}: {source}")]
    Build {
        service: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("authorization state for {0} is poisoned")]
    Poisoned(String),
    #[error("{service} request failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned {status}: {message}")]
    Status {
        service: String,
        status: u16,
        message: String,
    },
    #[error("failed to parse {service} response: {reason}")]
    Decode { service: String, reason: String },
}

impl ClientError {
    /// HTTP status of an explicit server rejection, if that is what this is
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One named HTTP client with its own bearer-token slot.
///
/// The token is read when a request is built. Requests already built or in
/// flight keep whatever header they were created with; a later
/// `set_auth_token`/`clear_auth_token` does not touch them.
#[derive(Debug)]
pub struct ServiceClient {
    service: ServiceName,
    base_url: String,
    http: reqwest::Client,
    auth_token: RwLock<Option<Credential>>,
}

impl ServiceClient {
    pub fn new(service: ServiceName, base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Build {
                service: service.to_string(),
                source,
            })?;

        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth_token: RwLock::new(None),
        })
    }

    pub fn service(&self) -> ServiceName {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request, attaching the bearer token held at this moment.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.endpoint(path));
        match self.auth_token() {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Send a request and decode the unwrapped JSON payload.
    ///
    /// Non-2xx responses become [`ClientError::Status`] carrying the server's
    /// `message` when it sent one.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let resp = request.send().await.map_err(|source| ClientError::Transport {
            service: self.service.to_string(),
            source,
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| ClientError::Transport {
            service: self.service.to_string(),
            source,
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(ClientError::Status {
                service: self.service.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| ClientError::Decode {
            service: self.service.to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_value(unwrap_envelope(value)).map_err(|e| ClientError::Decode {
            service: self.service.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_json(self.get(path)).await
    }
}

impl AuthorizedClient for ServiceClient {
    fn name(&self) -> &str {
        self.service.as_str()
    }

    fn set_auth_token(&self, credential: &Credential) -> Result<(), ClientError> {
        let mut slot = self
            .auth_token
            .write()
            .map_err(|_| ClientError::Poisoned(self.service.to_string()))?;
        *slot = Some(credential.clone());
        Ok(())
    }

    fn clear_auth_token(&self) -> Result<(), ClientError> {
        let mut slot = self
            .auth_token
            .write()
            .map_err(|_| ClientError::Poisoned(self.service.to_string()))?;
        *slot = None;
        Ok(())
    }

    fn auth_token(&self) -> Option<Credential> {
        self.auth_token.read().ok().and_then(|slot| slot.clone())
    }
}

/// Backend responses wrap their payload as `{ body: .. }` or `{ data: .. }`;
/// some return it bare.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(body) = map.remove("body").filter(|v| !v.is_null()) {
                return body;
            }
            if let Some(data) = map.remove("data").filter(|v| !v.is_null()) {
                return data;
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Server-provided error message, looked up as `message` then `body.message`
pub fn error_message(value: &Value) -> Option<String> {
    value
        .get("message")
        .or_else(|| value.get("body").and_then(|b| b.get("message")))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Every service client the dashboard holds, built from one endpoint config.
#[derive(Debug, Clone)]
pub struct ServiceClients {
    course: Arc<ServiceClient>,
    identity: Arc<ServiceClient>,
    assessment: Arc<ServiceClient>,
    dashboard: Arc<ServiceClient>,
    profile: Arc<ServiceClient>,
    student_management: Arc<ServiceClient>,
}

impl ServiceClients {
    pub fn new(config: &ApiEndpointConfig) -> Result<Self, ClientError> {
        let build = |service: ServiceName| {
            ServiceClient::new(service, config.url_for(service), config.request_timeout).map(Arc::new)
        };

        Ok(Self {
            course: build(ServiceName::Course)?,
            identity: build(ServiceName::Identity)?,
            assessment: build(ServiceName::Assessment)?,
            dashboard: build(ServiceName::Dashboard)?,
            profile: build(ServiceName::Profile)?,
            student_management: build(ServiceName::StudentManagement)?,
        })
    }

    pub fn get(&self, service: ServiceName) -> &Arc<ServiceClient> {
        match service {
            ServiceName::Course => &self.course,
            ServiceName::Identity => &self.identity,
            ServiceName::Assessment => &self.assessment,
            ServiceName::Dashboard => &self.dashboard,
            ServiceName::Profile => &self.profile,
            ServiceName::StudentManagement => &self.student_management,
        }
    }

    pub fn identity(&self) -> &Arc<ServiceClient> {
        &self.identity
    }

    /// Registry over all six clients, in [`ServiceName::ALL`] order.
    pub fn registry(&self) -> ClientRegistry {
        let mut registry = ClientRegistry::new();
        for service in ServiceName::ALL {
            registry.register(self.get(service).clone());
        }
        registry
    }
}
