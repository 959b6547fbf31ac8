//! HTTP command state shared by the error and retry handlers.
//!
//! The transport itself lives elsewhere. This module only carries the request being attempted,
//! the bookkeeping the retry handlers need (failure and redirect counters), and the response
//! category used to pick a handler pair.

use crate::error::ProviderError;
use http::header::HOST;
use http::uri::{Authority, Uri};
use http::{HeaderValue, Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// HTTP failure categories that carry their own handler bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    /// 3xx other than 304.
    Redirection,
    /// 4xx.
    ClientError,
    /// 5xx.
    ServerError,
}

impl ResponseCategory {
    pub const ALL: [ResponseCategory; 3] =
        [ResponseCategory::Redirection, ResponseCategory::ClientError, ResponseCategory::ServerError];

    /// Classify a status code; `None` for success, informational, and 304 responses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            304 => None,
            300..=399 => Some(Self::Redirection),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }

    pub fn of<B>(response: &Response<B>) -> Option<Self> {
        Self::from_status(response.status().as_u16())
    }
}

impl fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCategory::Redirection => f.write_str("redirection"),
            ResponseCategory::ClientError => f.write_str("client error"),
            ResponseCategory::ServerError => f.write_str("server error"),
        }
    }
}

/// A request in flight plus the counters retry handlers consult.
#[derive(Debug)]
pub struct HttpCommand {
    request: Request<String>,
    failures: usize,
    redirects: usize,
}

impl HttpCommand {
    pub fn new(request: Request<String>) -> Self {
        Self { request, failures: 0, redirects: 0 }
    }

    pub fn request(&self) -> &Request<String> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<String> {
        &mut self.request
    }

    pub fn into_request(self) -> Request<String> {
        self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// A fresh copy of the request to hand to the transport.
    pub fn to_request(&self) -> Request<String> {
        let mut copy = Request::new(self.request.body().clone());
        *copy.method_mut() = self.request.method().clone();
        *copy.uri_mut() = self.request.uri().clone();
        *copy.version_mut() = self.request.version();
        *copy.headers_mut() = self.request.headers().clone();
        copy
    }

    pub fn failure_count(&self) -> usize {
        self.failures
    }

    /// Record a failed attempt and return the new count.
    pub fn increment_failure_count(&mut self) -> usize {
        self.failures += 1;
        self.failures
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects
    }

    /// Record a redirect and return the new count.
    pub fn increment_redirect_count(&mut self) -> usize {
        self.redirects += 1;
        self.redirects
    }

    /// Host of the current target, if the URI is absolute.
    pub fn host(&self) -> Option<&str> {
        self.request.uri().host()
    }

    /// Point the command at a `Location` value, resolved against the current target.
    pub fn redirect_to(&mut self, location: &str) -> Result<(), ProviderError> {
        let resolve_error =
            |e: url::ParseError| ProviderError::Parse(format!("cannot resolve redirect {location:?}: {e}"));
        let resolved = match Url::parse(&self.request.uri().to_string()) {
            Ok(base) => base.join(location).map_err(resolve_error)?,
            Err(_) => Url::parse(location).map_err(resolve_error)?,
        };
        let target: Uri = resolved
            .as_str()
            .parse()
            .map_err(|e| ProviderError::Parse(format!("bad redirect location {location:?}: {e}")))?;
        self.set_uri(target);
        Ok(())
    }

    /// Swap the authority (host and port) while keeping scheme, path, and query.
    pub fn change_host(&mut self, host: &str) -> Result<(), ProviderError> {
        let authority: Authority = host
            .parse()
            .map_err(|e| ProviderError::Parse(format!("bad endpoint host {host:?}: {e}")))?;
        let mut parts = self.request.uri().clone().into_parts();
        if parts.scheme.is_none() {
            parts.scheme = Some(http::uri::Scheme::HTTPS);
        }
        parts.authority = Some(authority);
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
        }
        let uri = Uri::from_parts(parts)
            .map_err(|e| ProviderError::Parse(format!("cannot rebuild uri for {host:?}: {e}")))?;
        self.set_uri(uri);
        Ok(())
    }

    /// 303 semantics: the follow-up is a bodiless GET.
    pub fn convert_to_get(&mut self) {
        *self.request.method_mut() = Method::GET;
        self.request.body_mut().clear();
    }

    fn set_uri(&mut self, uri: Uri) {
        if let Some(authority) = uri.authority() {
            if self.request.headers().contains_key(HOST) {
                if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                    self.request.headers_mut().insert(HOST, value);
                }
            }
        }
        *self.request.uri_mut() = uri;
    }
}
