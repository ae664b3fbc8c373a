//! API-key authentication middleware and the principal extractor.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpResponse,
};
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use chainwatch_core::domain::{ClientType, Principal};
use chainwatch_core::ports::PrincipalResolver;
use chainwatch_shared::ErrorBody;

use crate::config::AuthConfig;
use crate::middleware::error::ApiError;
use crate::observability::RequestId;

/// Authentication middleware: resolves the bearer key into a `Principal`
/// and stores it in request extensions for the admission gate and the
/// handlers. When `require_api_keys` is off everything passes through
/// unauthenticated.
#[derive(Clone)]
pub struct ApiKeyAuth {
    resolver: Arc<dyn PrincipalResolver>,
    config: Arc<AuthConfig>,
}

impl ApiKeyAuth {
    pub fn new(resolver: Arc<dyn PrincipalResolver>, config: Arc<AuthConfig>) -> Self {
        Self { resolver, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ApiKeyAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthService {
            service: Rc::new(service),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct ApiKeyAuthService<S> {
    service: Rc<S>,
    resolver: Arc<dyn PrincipalResolver>,
    config: Arc<AuthConfig>,
}

fn unauthorized<B>(req: ServiceRequest, message: &str) -> ServiceResponse<EitherBody<B>> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.as_str().to_string());
    let mut body = ErrorBody::new("Unauthorized").with_message(message);
    if let Some(id) = request_id {
        body = body.with_request_id(id);
    }
    let response = HttpResponse::Unauthorized().json(body);
    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response).map_into_right_body()
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let resolver = self.resolver.clone();
        let config = self.config.clone();

        Box::pin(async move {
            if !config.require_api_keys {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let raw = req
                .headers()
                .get(config.key_header.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .trim();
            if raw.is_empty() {
                return Ok(unauthorized(req, "missing API key"));
            }
            // Accept both `Bearer <key>` and a bare key.
            let key = raw
                .strip_prefix("Bearer ")
                .or_else(|| raw.strip_prefix("bearer "))
                .unwrap_or(raw)
                .trim();
            if key.is_empty() {
                return Ok(unauthorized(req, "invalid API key"));
            }

            let client_type = req
                .headers()
                .get(config.agent_header.as_str())
                .and_then(|v| v.to_str().ok())
                .and_then(ClientType::parse);
            if config.enable_agent_header && client_type.is_none() {
                return Ok(unauthorized(req, "invalid client type"));
            }

            match resolver.resolve(key, client_type).await {
                Ok(principal) => {
                    req.extensions_mut().insert(principal);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    tracing::debug!(error = %err, "API key rejected");
                    Ok(unauthorized(req, "invalid API key"))
                }
            }
        })
    }
}

/// Extractor for the authenticated principal; 401 when absent.
#[derive(Debug, Clone)]
pub struct Authed(pub Principal);

impl FromRequest for Authed {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let principal = req.extensions().get::<Principal>().cloned();
        ready(principal.map(Authed).ok_or(ApiError::Unauthorized))
    }
}
