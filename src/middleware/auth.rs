//! API key authentication layer

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Requires a configured API key on every request, either as a bearer
/// token or an `x-api-key` header.
#[derive(Clone)]
pub struct AuthLayer {
    api_keys: Arc<Vec<String>>,
}

impl AuthLayer {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            api_keys: self.api_keys.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    api_keys: Arc<Vec<String>>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let authorized = self.api_keys.is_empty() || {
            let presented = extract_key(&request);
            presented.map_or(false, |key| self.api_keys.iter().any(|k| k == key))
        };

        if !authorized {
            return Box::pin(async move {
                Ok((
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "error": {
                            "message": "missing or invalid API key",
                            "category": "auth",
                        }
                    })),
                )
                    .into_response())
            });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(request).await })
    }
}

fn extract_key(request: &Request<Body>) -> Option<&str> {
    if let Some(value) = request.headers().get("authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }
    request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
}
