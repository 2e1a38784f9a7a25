//! Domain services: the remotely invocable method surface.
//!
//! Each service owns one domain's slice of the studio model and receives its
//! collaborators (model, event bus) at construction. The registry maps
//! method names to their owning service and is the manager's single dispatch
//! entry point for inbound requests.

pub mod app;
pub mod collections;
pub mod outputs;
pub mod scenes;
pub mod sources;

pub use app::AppService;
pub use collections::CollectionService;
pub use outputs::OutputService;
pub use scenes::SceneService;
pub use sources::SourceService;

use crate::error::DomainError;
use crate::protocol::ErrorBody;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failure of one service method, mapped onto the wire as `{code, message}`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("malformed request: {0}")]
    BadRequest(String),
}

impl ServiceError {
    pub fn to_wire(&self) -> ErrorBody {
        let code = match self {
            ServiceError::Domain(DomainError::NotFound { .. }) => "not_found",
            ServiceError::Domain(DomainError::OperationFailed(_)) => "operation_failed",
            ServiceError::BadRequest(_) => "malformed_request",
        };
        ErrorBody::new(code, self.to_string())
    }
}

pub type ServiceResult = Result<Value, ServiceError>;

/// One domain's method handlers.
pub trait Service: Send + Sync {
    /// Stable identifier, used in logs.
    fn id(&self) -> &'static str;

    /// Method names this service answers.
    fn methods(&self) -> &'static [&'static str];

    /// Handle one request. `method` is guaranteed to be in `methods()` when
    /// called through the registry.
    fn handle(&self, method: &str, params: &Value) -> ServiceResult;
}

/// Method-name → owning-service dispatch table.
pub struct ServiceRegistry {
    services: RwLock<HashMap<&'static str, Arc<dyn Service>>>,
    method_map: RwLock<HashMap<String, &'static str>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            method_map: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service and claim its method names.
    pub fn register(&self, service: Arc<dyn Service>) {
        let id = service.id();
        {
            let mut methods = self.method_map.write().unwrap_or_else(|e| e.into_inner());
            for method in service.methods() {
                if let Some(previous) = methods.insert(method.to_string(), id) {
                    tracing::warn!(method, previous, claimed_by = id, "method re-registered");
                }
            }
        }
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, service);
    }

    /// Dispatch one inbound request. Unknown method names produce an
    /// `unknown_method` error, never a panic.
    pub fn dispatch(&self, method: &str, params: &Value) -> Result<Value, ErrorBody> {
        let service = {
            let methods = self.method_map.read().unwrap_or_else(|e| e.into_inner());
            let services = self.services.read().unwrap_or_else(|e| e.into_inner());
            methods
                .get(method)
                .and_then(|id| services.get(id))
                .map(Arc::clone)
        };

        match service {
            Some(service) => service
                .handle(method, params)
                .map_err(|e| e.to_wire()),
            None => Err(ErrorBody::new(
                "unknown_method",
                format!("unknown method: {method}"),
            )),
        }
    }

    /// All registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .method_map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a required string parameter.
pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ServiceError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest(format!("missing string param: {key}")))
}

/// Extract a required boolean parameter.
pub(crate) fn require_bool(params: &Value, key: &str) -> Result<bool, ServiceError> {
    params
        .get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| ServiceError::BadRequest(format!("missing bool param: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoService;

    impl Service for EchoService {
        fn id(&self) -> &'static str {
            "echo"
        }

        fn methods(&self) -> &'static [&'static str] {
            &["echo"]
        }

        fn handle(&self, _method: &str, params: &Value) -> ServiceResult {
            Ok(params.clone())
        }
    }

    #[test]
    fn dispatch_routes_to_owning_service() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(EchoService));

        let result = registry.dispatch("echo", &json!({"x": 1})).unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[test]
    fn unknown_method_is_an_error_response_not_a_crash() {
        let registry = ServiceRegistry::new();
        let err = registry.dispatch("no_such_method", &json!({})).unwrap_err();
        assert_eq!(err.code, "unknown_method");
    }

    #[test]
    fn method_names_are_sorted() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(EchoService));
        assert_eq!(registry.method_names(), vec!["echo"]);
    }

    #[test]
    fn service_error_wire_codes() {
        let not_found: ServiceError = DomainError::not_found("scene", "X").into();
        assert_eq!(not_found.to_wire().code, "not_found");

        let refused: ServiceError = DomainError::OperationFailed("busy".into()).into();
        assert_eq!(refused.to_wire().code, "operation_failed");

        let bad = ServiceError::BadRequest("missing string param: name".into());
        assert_eq!(bad.to_wire().code, "malformed_request");
    }

    #[test]
    fn require_str_rejects_missing_and_non_string() {
        assert!(require_str(&json!({}), "name").is_err());
        assert!(require_str(&json!({"name": 5}), "name").is_err());
        assert_eq!(require_str(&json!({"name": "x"}), "name").unwrap(), "x");
    }
}
