//! Request freshness stamp and the signing hand-off.
//!
//! The signing algorithm itself is owned by a [`RequestSigner`] supplied by the caller. This
//! module computes the expiry timestamp the signer consumes (`now + expire interval`, ISO-8601
//! with milliseconds) and provides a tower layer that stamps and signs each request before it
//! reaches the transport.

use crate::clock::{Clock, SystemClock};
use crate::error::ProviderError;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use http::header::EXPIRES;
use http::{HeaderValue, Request};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::trace;

/// `2009-08-16T23:34:58.123Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Default freshness window.
pub const DEFAULT_EXPIRE_INTERVAL: Duration = Duration::from_secs(15);

/// Renders the instant after which a signed request is no longer accepted.
#[derive(Debug, Clone)]
pub struct TimestampProvider {
    clock: Arc<dyn Clock>,
    expire_interval: Duration,
}

impl TimestampProvider {
    pub fn new(clock: Arc<dyn Clock>, expire_interval: Duration) -> Self {
        Self { clock, expire_interval }
    }

    pub fn expire_interval(&self) -> Duration {
        self.expire_interval
    }

    /// `now + expire_interval`; saturates at the clock's current instant on overflow.
    pub fn expiry(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        TimeDelta::from_std(self.expire_interval)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now)
    }

    pub fn timestamp(&self) -> String {
        self.expiry().format(TIMESTAMP_FORMAT).to_string()
    }
}

impl Default for TimestampProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), DEFAULT_EXPIRE_INTERVAL)
    }
}

/// Signs an outgoing request in place.
pub trait RequestSigner: Send + Sync + fmt::Debug {
    fn sign(&self, request: &mut Request<String>) -> Result<(), ProviderError>;
}

/// Stamps `Expires` and hands the request to a [`RequestSigner`].
#[derive(Debug, Clone)]
pub struct SigningLayer {
    signer: Arc<dyn RequestSigner>,
    timestamps: TimestampProvider,
}

impl SigningLayer {
    pub fn new(signer: Arc<dyn RequestSigner>, timestamps: TimestampProvider) -> Self {
        Self { signer, timestamps }
    }

    fn prepare(&self, request: &mut Request<String>) -> Result<(), ProviderError> {
        let stamp = self.timestamps.timestamp();
        let value = HeaderValue::from_str(&stamp)
            .map_err(|e| ProviderError::Signing(format!("bad timestamp {stamp:?}: {e}")))?;
        request.headers_mut().insert(EXPIRES, value);
        self.signer.sign(request)?;
        trace!(target: "cloudbind::signing", uri = %request.uri(), expires = %stamp, "request signed");
        Ok(())
    }
}

impl<S> Layer<S> for SigningLayer {
    type Service = SigningService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SigningService { inner, layer: self.clone() }
    }
}

/// Service produced by [`SigningLayer`].
#[derive(Debug, Clone)]
pub struct SigningService<S> {
    inner: S,
    layer: SigningLayer,
}

impl<S, R> Service<Request<String>> for SigningService<S>
where
    S: Service<Request<String>, Response = R, Error = ProviderError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = ProviderError;
    type Future = BoxFuture<'static, Result<R, ProviderError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<String>) -> Self::Future {
        let layer = self.layer.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            layer.prepare(&mut request)?;
            inner.call(request).await
        })
    }
}
