//! Admission middleware: rate, quota, and trial enforcement around the
//! metered routes, with usage accounting after the handler runs.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage, HttpResponse,
};
use chrono::Utc;
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use chainwatch_core::admission::{
    AdmissionError, AdmissionGate, Denial, DenialKind, UsageHeaders,
};
use chainwatch_core::domain::Principal;
use chainwatch_shared::ErrorBody;

use crate::observability::RequestId;

pub struct AdmissionMiddleware {
    gate: Arc<AdmissionGate>,
}

impl AdmissionMiddleware {
    pub fn new(gate: Arc<AdmissionGate>) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AdmissionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionService {
            service: Rc::new(service),
            gate: self.gate.clone(),
        }))
    }
}

pub struct AdmissionService<S> {
    service: Rc<S>,
    gate: Arc<AdmissionGate>,
}

fn denial_message(kind: DenialKind) -> &'static str {
    match kind {
        DenialKind::RateExceeded => "per-endpoint rate limit exceeded",
        DenialKind::QuotaExceeded => "monthly quota exhausted",
        DenialKind::TrialExhausted => "trial request allowance exhausted",
    }
}

fn reject<B>(req: ServiceRequest, denial: Denial) -> ServiceResponse<EitherBody<B>> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.as_str().to_string());
    let mut body = ErrorBody::new("Too Many Requests").with_message(denial_message(denial.kind));
    if let Some(id) = request_id {
        body = body.with_request_id(id);
    }
    let response = HttpResponse::TooManyRequests()
        .insert_header(("Retry-After", denial.retry_after_seconds.to_string()))
        .json(body);
    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response).map_into_right_body()
}

fn counters_failed<B>(req: ServiceRequest) -> ServiceResponse<EitherBody<B>> {
    let response = HttpResponse::InternalServerError().json(ErrorBody::new("Internal Server Error"));
    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response).map_into_right_body()
}

fn set_header(res: &mut actix_web::http::header::HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        res.insert(HeaderName::from_static(name), value);
    }
}

fn apply_usage_headers(headers: &mut actix_web::http::header::HeaderMap, usage: &UsageHeaders) {
    set_header(headers, "x-ratelimit-limit", usage.rate_limit.to_string());
    let remaining = usage
        .rate_remaining
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    set_header(headers, "x-ratelimit-remaining", remaining);
    set_header(headers, "x-ratelimit-reset", usage.rate_reset.to_string());
    set_header(headers, "x-quota-limit", usage.quota_limit.to_string());
    set_header(
        headers,
        "x-quota-remaining",
        usage.quota_remaining.to_string(),
    );
    set_header(headers, "x-quota-reset", usage.quota_reset.to_string());
}

impl<S, B> Service<ServiceRequest> for AdmissionService<S>
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
        let gate = self.gate.clone();

        Box::pin(async move {
            let principal = req.extensions().get::<Principal>().cloned();
            // Unauthenticated pass-through mode: nothing to meter.
            let Some(principal) = principal else {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            };

            let method = req.method().as_str().to_string();
            // The route template, not the raw URL, so `/v1/alerts/{id}`
            // stays one counter however many ids are fetched.
            let route = req
                .match_pattern()
                .unwrap_or_else(|| req.path().to_string());

            match gate.admit(&principal, &method, &route, Utc::now()).await {
                Ok(admission) => {
                    let mut res = service.call(req).await?;
                    // Accounting runs whatever the handler returned; a 500
                    // is still a served request.
                    match gate
                        .record(&principal, &method, &route, &admission, Utc::now())
                        .await
                    {
                        Ok(usage) => apply_usage_headers(res.headers_mut(), &usage),
                        Err(err) => {
                            tracing::warn!(error = %err, "usage accounting failed");
                        }
                    }
                    Ok(res.map_into_left_body())
                }
                Err(AdmissionError::Denied(denial)) => {
                    tracing::debug!(
                        api_key_id = %principal.api_key_id,
                        kind = ?denial.kind,
                        "request denied"
                    );
                    Ok(reject(req, denial))
                }
                Err(AdmissionError::Counter(err)) => {
                    tracing::error!(error = %err, "counter store failure during admission");
                    Ok(counters_failed(req))
                }
            }
        })
    }
}
