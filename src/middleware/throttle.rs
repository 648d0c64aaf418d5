use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounds how many generation requests run at once. Each in-flight request
/// holds a model-service conversation for tens of seconds, so the limit is on
/// concurrency rather than request rate.
#[derive(Clone)]
pub struct GenerationGate {
    permits: Arc<Semaphore>,
}

impl GenerationGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

pub async fn generation_gate_middleware(
    State(gate): State<GenerationGate>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match Arc::clone(&gate.permits).try_acquire_owned() {
        Ok(_permit) => next.run(req).await,
        Err(_) => (StatusCode::TOO_MANY_REQUESTS, "generation_capacity_exhausted").into_response(),
    }
}
