//! Throttled service implementation.

use crate::error::ThrottleError;
use crate::gate::ThrottleGate;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_service::Service;

/// Service that holds a gate permit for the duration of each inner call.
#[derive(Clone, Debug)]
pub struct Throttle<S> {
    inner: S,
    gate: ThrottleGate,
}

impl<S> Throttle<S> {
    /// Wraps `inner` with `gate`.
    pub fn new(inner: S, gate: ThrottleGate) -> Self {
        Self { inner, gate }
    }

    /// Returns the gate shared by this service.
    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    /// Returns a reference to the inner service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consumes the wrapper, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, Request> Service<Request> for Throttle<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: From<ThrottleError> + Send + 'static,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let gate = self.gate.clone();
        // Take the service that was driven to readiness and leave a clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut permit = gate.acquire().await?;
            tokio::select! {
                biased;
                result = inner.call(request) => result,
                () = permit.discarded() => Err(ThrottleError::Discarded.into()),
            }
        })
    }
}
