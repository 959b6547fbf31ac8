//! Response-category policy table and the tower layer that applies it.
//!
//! Every failed response falls into one of three categories. Each category is bound to a
//! [`HandlerPair`]: an interpreter that types the failure, and optionally a retry handler that
//! may resend the request first. Server errors carry no retry handler and surface directly.
//!
//! ```rust
//! use cloudbind::{ResponseCategory, ResponsePolicy};
//!
//! let policy = ResponsePolicy::provider_defaults();
//! assert!(policy.handlers(ResponseCategory::Redirection).retry.is_some());
//! assert!(policy.handlers(ResponseCategory::ClientError).retry.is_some());
//! assert!(policy.handlers(ResponseCategory::ServerError).retry.is_none());
//! ```

use crate::command::{HttpCommand, ResponseCategory};
use crate::error::ProviderError;
use crate::handlers::{
    ClientErrorRetryHandler, ErrorInterpreter, ParseProviderError, RedirectionRetryHandler,
    RetryDecision, RetryHandler, XmlErrorBodyParser,
};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{BootstrapEvent, ResponseEvent, SharedSink};
use futures::future::BoxFuture;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

/// Interpreter plus optional retry handler for one category.
#[derive(Debug, Clone)]
pub struct HandlerPair {
    pub interpret: Arc<dyn ErrorInterpreter>,
    pub retry: Option<Arc<dyn RetryHandler>>,
}

impl HandlerPair {
    pub fn new(interpret: Arc<dyn ErrorInterpreter>, retry: Option<Arc<dyn RetryHandler>>) -> Self {
        Self { interpret, retry }
    }

    /// Interpret only; never resend.
    pub fn interpret_only(interpret: Arc<dyn ErrorInterpreter>) -> Self {
        Self { interpret, retry: None }
    }
}

/// Fixed table from [`ResponseCategory`] to its handlers.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    redirection: HandlerPair,
    client_error: HandlerPair,
    server_error: HandlerPair,
}

impl ResponsePolicy {
    pub fn new(redirection: HandlerPair, client_error: HandlerPair, server_error: HandlerPair) -> Self {
        Self { redirection, client_error, server_error }
    }

    /// One shared XML interpreter for all categories; redirect and client-error retries.
    pub fn provider_defaults() -> Self {
        let interpret: Arc<dyn ErrorInterpreter> =
            Arc::new(ParseProviderError::new(XmlErrorBodyParser));
        Self {
            redirection: HandlerPair::new(
                interpret.clone(),
                Some(Arc::new(RedirectionRetryHandler::default())),
            ),
            client_error: HandlerPair::new(
                interpret.clone(),
                Some(Arc::new(ClientErrorRetryHandler::default())),
            ),
            server_error: HandlerPair::interpret_only(interpret),
        }
    }

    pub fn handlers(&self, category: ResponseCategory) -> &HandlerPair {
        match category {
            ResponseCategory::Redirection => &self.redirection,
            ResponseCategory::ClientError => &self.client_error,
            ResponseCategory::ServerError => &self.server_error,
        }
    }

    /// Replace the binding for one category.
    pub fn with_handlers(mut self, category: ResponseCategory, pair: HandlerPair) -> Self {
        match category {
            ResponseCategory::Redirection => self.redirection = pair,
            ResponseCategory::ClientError => self.client_error = pair,
            ResponseCategory::ServerError => self.server_error = pair,
        }
        self
    }
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::provider_defaults()
    }
}

/// Tower layer applying a [`ResponsePolicy`] to a transport service.
#[derive(Debug, Clone)]
pub struct ResponsePolicyLayer {
    policy: Arc<ResponsePolicy>,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl ResponsePolicyLayer {
    pub fn new(policy: Arc<ResponsePolicy>) -> Self {
        Self { policy, sleeper: Arc::new(TokioSleeper), sink: SharedSink::default() }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &ResponsePolicy {
        &self.policy
    }
}

impl<S> Layer<S> for ResponsePolicyLayer {
    type Service = ResponsePolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponsePolicyService { inner, layer: self.clone() }
    }
}

/// Service produced by [`ResponsePolicyLayer`].
#[derive(Debug, Clone)]
pub struct ResponsePolicyService<S> {
    inner: S,
    layer: ResponsePolicyLayer,
}

impl<S> Service<Request<String>> for ResponsePolicyService<S>
where
    S: Service<Request<String>, Response = Response<String>, Error = ProviderError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<String>;
    type Error = ProviderError;
    type Future = BoxFuture<'static, Result<Response<String>, ProviderError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<String>) -> Self::Future {
        let layer = self.layer.clone();
        // `self.inner` was readied by `poll_ready`; keep that instance for the first send.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            let mut command = HttpCommand::new(request);
            let mut attempt = 0usize;
            loop {
                attempt += 1;
                if attempt > 1 {
                    inner.ready().await?;
                }
                let response = inner.call(command.to_request()).await?;
                let Some(category) = ResponseCategory::of(&response) else {
                    return Ok(response);
                };
                let status = response.status().as_u16();
                let pair = layer.policy.handlers(category);

                if let Some(retry) = &pair.retry {
                    match retry.should_retry(&mut command, &response) {
                        RetryDecision::Retry { delay } => {
                            debug!(target: "cloudbind::policy", %category, status, attempt, ?delay, "resending");
                            layer
                                .sink
                                .emit(BootstrapEvent::Response(ResponseEvent::RetryScheduled {
                                    category,
                                    status,
                                    attempt,
                                    delay,
                                }))
                                .await;
                            if !delay.is_zero() {
                                layer.sleeper.sleep(delay).await;
                            }
                            continue;
                        }
                        RetryDecision::GiveUp => {
                            layer
                                .sink
                                .emit(BootstrapEvent::Response(ResponseEvent::GaveUp { category, status }))
                                .await;
                        }
                    }
                }

                let error = pair.interpret.interpret(&command, &response);
                debug!(target: "cloudbind::policy", %category, status, attempt, error = %error, "interpreted failure");
                layer
                    .sink
                    .emit(BootstrapEvent::Response(ResponseEvent::Interpreted { category, status }))
                    .await;
                return Err(error);
            }
        })
    }
}
