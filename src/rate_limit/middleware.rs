use crate::error::LimiterError;
use crate::rate_limit::limiter::RateLimiter;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Errors produced by [`RateLimitService`].
#[derive(thiserror::Error, Debug)]
pub enum RateLimitError<E> {
    /// The limiter could not grant permits (bad cost, lock or store failure, overflow).
    #[error("rate limiter failed: {0}")]
    Limiter(#[source] LimiterError),
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> RateLimitError<E> {
    /// Borrow the inner service error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limiter(_) => None,
        }
    }

    /// Borrow the limiter error if present.
    pub fn as_limiter(&self) -> Option<&LimiterError> {
        match self {
            Self::Limiter(e) => Some(e),
            Self::Inner(_) => None,
        }
    }
}

/// How many permits a request costs.
pub trait PermitCost<Req>: Clone + Send + Sync + 'static {
    fn cost(&self, req: &Req) -> u32;
}

/// Every request costs one permit.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitCost;

impl<Req> PermitCost<Req> for UnitCost {
    fn cost(&self, _req: &Req) -> u32 {
        1
    }
}

/// Cost computed by a closure over the request.
#[derive(Clone)]
pub struct CostFn<F>(F);

impl<F> std::fmt::Debug for CostFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CostFn(<fn>)")
    }
}

impl<Req, F> PermitCost<Req> for CostFn<F>
where
    F: Fn(&Req) -> u32 + Clone + Send + Sync + 'static,
{
    fn cost(&self, req: &Req) -> u32 {
        (self.0)(req)
    }
}

/// A layer that waits on a [`RateLimiter`] before forwarding each request.
#[derive(Clone, Debug)]
pub struct RateLimitLayer<C = UnitCost> {
    limiter: Arc<RateLimiter>,
    cost: C,
}

impl RateLimitLayer {
    /// Create a new rate limit layer charging one permit per request.
    pub fn new(limiter: RateLimiter) -> Self {
        Self::shared(Arc::new(limiter))
    }

    /// Layer over a limiter handle that is also used elsewhere.
    pub fn shared(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter, cost: UnitCost }
    }
}

impl<C> RateLimitLayer<C> {
    /// Charge each request `cost(&req)` permits instead.
    pub fn with_cost<F>(self, cost: F) -> RateLimitLayer<CostFn<F>> {
        RateLimitLayer { limiter: self.limiter, cost: CostFn(cost) }
    }
}

impl<S, C: Clone> Layer<S> for RateLimitLayer<C> {
    type Service = RateLimitService<S, C>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, limiter: self.limiter.clone(), cost: self.cost.clone() }
    }
}

/// Middleware service that paces requests through the limiter.
#[derive(Clone, Debug)]
pub struct RateLimitService<S, C = UnitCost> {
    inner: S,
    limiter: Arc<RateLimiter>,
    cost: C,
}

impl<S, C, Req> Service<Req> for RateLimitService<S, C>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    C: PermitCost<Req>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = RateLimitError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RateLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let permits = self.cost.cost(&req);
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            limiter.acquire(permits).await.map_err(RateLimitError::Limiter)?;
            inner.call(req).await.map_err(RateLimitError::Inner)
        })
    }
}
