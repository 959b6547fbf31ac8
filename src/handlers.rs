//! Error interpretation and retry decisions for failed HTTP responses.
//!
//! An [`ErrorInterpreter`] turns a failed response into a typed [`ProviderError`]. A
//! [`RetryHandler`] decides whether the request should be resent, and may rewrite the command
//! (new host, new location) before it is.

use crate::backoff::Backoff;
use crate::command::{HttpCommand, ResponseCategory};
use crate::error::{ErrorBody, ErrorResponse, ProviderError};
use crate::jitter::Jitter;
use http::header::LOCATION;
use http::{Method, Response, StatusCode};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of resends a retry handler allows per command.
pub const DEFAULT_RETRY_LIMIT: usize = 5;

/// Provider error codes that mean "try again shortly".
pub const RETRYABLE_CODES: [&str; 4] =
    ["RequestTimeout", "OperationAborted", "Throttling", "RequestLimitExceeded"];

/// Extracts the provider's error envelope from a response body.
pub trait ErrorBodyParser: Send + Sync + fmt::Debug {
    fn parse(&self, body: &str) -> ErrorBody;
}

/// Reads `<Code>`, `<Message>`, `<RequestId>` and `<Endpoint>` from an XML error document.
///
/// Tolerant by construction: a body that is not XML yields an empty [`ErrorBody`].
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlErrorBodyParser;

static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Code>\s*([^<]*?)\s*</Code>").expect("valid Code pattern"));
static MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Message>\s*([^<]*?)\s*</Message>").expect("valid Message pattern"));
static REQUEST_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<RequestI[Dd]>\s*([^<]*?)\s*</RequestI[Dd]>").expect("valid RequestId pattern")
});
static ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Endpoint>\s*([^<]*?)\s*</Endpoint>").expect("valid Endpoint pattern"));

fn capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

impl ErrorBodyParser for XmlErrorBodyParser {
    fn parse(&self, body: &str) -> ErrorBody {
        ErrorBody {
            code: capture(&CODE, body),
            message: capture(&MESSAGE, body),
            request_id: capture(&REQUEST_ID, body),
            endpoint: capture(&ENDPOINT, body),
        }
    }
}

/// Turns a failed response into a typed error.
pub trait ErrorInterpreter: Send + Sync + fmt::Debug {
    fn interpret(&self, command: &HttpCommand, response: &Response<String>) -> ProviderError;
}

/// Interpreter shared by every response category.
///
/// 401 becomes [`ProviderError::Unauthorized`], 404 on anything but `HEAD` becomes
/// [`ProviderError::NotFound`], everything else [`ProviderError::Response`].
#[derive(Debug, Default, Clone)]
pub struct ParseProviderError<P = XmlErrorBodyParser> {
    parser: P,
}

impl<P: ErrorBodyParser> ParseProviderError<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }
}

impl<P: ErrorBodyParser> ErrorInterpreter for ParseProviderError<P> {
    fn interpret(&self, command: &HttpCommand, response: &Response<String>) -> ProviderError {
        let status = response.status().as_u16();
        let Some(category) = ResponseCategory::from_status(status) else {
            return ProviderError::Parse(format!("status {status} is not a failure"));
        };
        let body = self.parser.parse(response.body());
        let interpreted = ErrorResponse {
            category,
            status,
            code: body.code,
            message: body.message,
            request_id: body.request_id,
        };
        match response.status() {
            StatusCode::UNAUTHORIZED => ProviderError::Unauthorized(interpreted),
            StatusCode::NOT_FOUND if command.method() != Method::HEAD => {
                ProviderError::NotFound(interpreted)
            }
            _ => ProviderError::Response(interpreted),
        }
    }
}

/// Outcome of consulting a retry handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend the (possibly rewritten) command after `delay`.
    Retry { delay: Duration },
    /// Surface the failure.
    GiveUp,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Decides whether a failed command is resent.
pub trait RetryHandler: Send + Sync + fmt::Debug {
    fn should_retry(&self, command: &mut HttpCommand, response: &Response<String>) -> RetryDecision;
}

/// Follows redirects.
///
/// For 301 and 307 on `GET`/`HEAD`, an `<Endpoint>` in the error body names the host the
/// resource actually lives on; the command is re-pointed there. Otherwise the `Location` header
/// is followed, and a 303 turns the follow-up into a bodiless `GET`. A redirect back to the
/// current target is a loop and is refused.
#[derive(Debug, Clone)]
pub struct RedirectionRetryHandler {
    retry_limit: usize,
    parser: Arc<dyn ErrorBodyParser>,
}

impl RedirectionRetryHandler {
    pub fn new(retry_limit: usize, parser: Arc<dyn ErrorBodyParser>) -> Self {
        Self { retry_limit, parser }
    }

    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    fn follow_endpoint(&self, command: &mut HttpCommand, response: &Response<String>) -> Option<RetryDecision> {
        let status = response.status();
        let idempotent = matches!(*command.method(), Method::GET | Method::HEAD);
        if !idempotent
            || !(status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::TEMPORARY_REDIRECT)
        {
            return None;
        }
        let host = self.parser.parse(response.body()).endpoint?;
        if command.host() == Some(host.as_str()) {
            warn!(target: "cloudbind::handlers", %host, "redirect endpoint is the current host; refusing loop");
            return Some(RetryDecision::GiveUp);
        }
        match command.change_host(&host) {
            Ok(()) => {
                debug!(target: "cloudbind::handlers", %host, "following provider endpoint redirect");
                Some(RetryDecision::Retry { delay: Duration::ZERO })
            }
            Err(e) => {
                warn!(target: "cloudbind::handlers", error = %e, "cannot re-point command");
                Some(RetryDecision::GiveUp)
            }
        }
    }

    fn follow_location(&self, command: &mut HttpCommand, response: &Response<String>) -> RetryDecision {
        let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
            return RetryDecision::GiveUp;
        };
        let before = command.uri().clone();
        if let Err(e) = command.redirect_to(location) {
            warn!(target: "cloudbind::handlers", error = %e, "unusable redirect location");
            return RetryDecision::GiveUp;
        }
        if *command.uri() == before {
            warn!(target: "cloudbind::handlers", %location, "redirect points at the current target; refusing loop");
            return RetryDecision::GiveUp;
        }
        if response.status() == StatusCode::SEE_OTHER {
            command.convert_to_get();
        }
        debug!(target: "cloudbind::handlers", %location, "following redirect");
        RetryDecision::Retry { delay: Duration::ZERO }
    }
}

impl Default for RedirectionRetryHandler {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT, Arc::new(XmlErrorBodyParser))
    }
}

impl RetryHandler for RedirectionRetryHandler {
    fn should_retry(&self, command: &mut HttpCommand, response: &Response<String>) -> RetryDecision {
        if command.increment_redirect_count() > self.retry_limit {
            warn!(target: "cloudbind::handlers", limit = self.retry_limit, "too many redirects");
            return RetryDecision::GiveUp;
        }
        if let Some(decision) = self.follow_endpoint(command, response) {
            return decision;
        }
        self.follow_location(command, response)
    }
}

/// Resends throttled and transiently-refused requests with exponential backoff.
#[derive(Debug, Clone)]
pub struct ClientErrorRetryHandler {
    retry_limit: usize,
    backoff: Backoff,
    jitter: Jitter,
    parser: Arc<dyn ErrorBodyParser>,
}

impl ClientErrorRetryHandler {
    pub fn new(retry_limit: usize, backoff: Backoff, jitter: Jitter, parser: Arc<dyn ErrorBodyParser>) -> Self {
        Self { retry_limit, backoff, jitter, parser }
    }

    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    fn is_retryable(&self, response: &Response<String>) -> bool {
        match response.status().as_u16() {
            429 => true,
            400 | 403 | 409 => self
                .parser
                .parse(response.body())
                .code
                .is_some_and(|code| RETRYABLE_CODES.contains(&code.as_str())),
            _ => false,
        }
    }
}

impl Default for ClientErrorRetryHandler {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_LIMIT,
            Backoff::exponential(Duration::from_millis(50)),
            Jitter::Equal,
            Arc::new(XmlErrorBodyParser),
        )
    }
}

impl RetryHandler for ClientErrorRetryHandler {
    fn should_retry(&self, command: &mut HttpCommand, response: &Response<String>) -> RetryDecision {
        if !self.is_retryable(response) {
            return RetryDecision::GiveUp;
        }
        let failures = command.increment_failure_count();
        if failures > self.retry_limit {
            warn!(target: "cloudbind::handlers", failures, limit = self.retry_limit, "client error retries exhausted");
            return RetryDecision::GiveUp;
        }
        let delay = self.jitter.apply(self.backoff.delay(failures));
        debug!(target: "cloudbind::handlers", status = response.status().as_u16(), failures, ?delay, "retrying client error");
        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    const THROTTLED: &str = "<Response><Errors><Error><Code>Throttling</Code>\
        <Message>Rate exceeded</Message></Error></Errors><RequestID>req-1</RequestID></Response>";

    fn get(uri: &str) -> HttpCommand {
        HttpCommand::new(Request::get(uri).body(String::new()).unwrap())
    }

    fn response(status: u16, body: &str) -> Response<String> {
        Response::builder().status(status).body(body.to_string()).unwrap()
    }

    #[test]
    fn xml_parser_extracts_envelope() {
        let body = XmlErrorBodyParser.parse(THROTTLED);
        assert_eq!(body.code.as_deref(), Some("Throttling"));
        assert_eq!(body.message.as_deref(), Some("Rate exceeded"));
        assert_eq!(body.request_id.as_deref(), Some("req-1"));
        assert_eq!(body.endpoint, None);
    }

    #[test]
    fn xml_parser_tolerates_garbage() {
        assert_eq!(XmlErrorBodyParser.parse("not xml at all"), ErrorBody::default());
    }

    #[test]
    fn interpreter_types_errors_by_status() {
        let interpreter = ParseProviderError::<XmlErrorBodyParser>::default();
        let command = get("https://ec2.us-east-1.x/");

        let err = interpreter.interpret(&command, &response(401, "<Code>AuthFailure</Code>"));
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert_eq!(err.code(), Some("AuthFailure"));

        let err = interpreter.interpret(&command, &response(404, ""));
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err = interpreter.interpret(&command, &response(503, ""));
        assert_eq!(err.category(), Some(ResponseCategory::ServerError));
        assert!(matches!(err, ProviderError::Response(_)));
    }

    #[test]
    fn head_404_is_not_not_found() {
        let interpreter = ParseProviderError::<XmlErrorBodyParser>::default();
        let command = HttpCommand::new(Request::head("https://h/x").body(String::new()).unwrap());
        assert!(matches!(interpreter.interpret(&command, &response(404, "")), ProviderError::Response(_)));
    }

    #[test]
    fn redirect_follows_provider_endpoint() {
        let handler = RedirectionRetryHandler::default();
        let mut command = get("https://s3.amazonaws.com/bucket/key");
        let moved = response(301, "<Error><Endpoint>bucket.s3-eu-west-1.amazonaws.com</Endpoint></Error>");

        assert!(handler.should_retry(&mut command, &moved).is_retry());
        assert_eq!(command.host(), Some("bucket.s3-eu-west-1.amazonaws.com"));
        assert_eq!(command.uri().path(), "/bucket/key");
    }

    #[test]
    fn redirect_to_same_endpoint_is_refused() {
        let handler = RedirectionRetryHandler::default();
        let mut command = get("https://s3.amazonaws.com/bucket/key");
        let moved = response(307, "<Error><Endpoint>s3.amazonaws.com</Endpoint></Error>");
        assert_eq!(handler.should_retry(&mut command, &moved), RetryDecision::GiveUp);
    }

    #[test]
    fn redirect_follows_location_and_stops_at_limit() {
        let handler = RedirectionRetryHandler::new(2, Arc::new(XmlErrorBodyParser));
        let mut command = get("https://a.example/start");
        let hop = |n: usize| {
            Response::builder()
                .status(302)
                .header(LOCATION, format!("https://a.example/hop{n}"))
                .body(String::new())
                .unwrap()
        };

        assert!(handler.should_retry(&mut command, &hop(1)).is_retry());
        assert!(handler.should_retry(&mut command, &hop(2)).is_retry());
        assert_eq!(handler.should_retry(&mut command, &hop(3)), RetryDecision::GiveUp);
        assert_eq!(command.uri().path(), "/hop2");
    }

    #[test]
    fn redirect_back_to_current_target_gives_up() {
        let handler = RedirectionRetryHandler::default();
        let mut command = get("https://a.example/dir/start");
        let redirect = |location: &str| {
            Response::builder()
                .status(302)
                .header(LOCATION, location)
                .body(String::new())
                .unwrap()
        };

        assert_eq!(handler.should_retry(&mut command, &redirect("start")), RetryDecision::GiveUp);
        assert_eq!(
            handler.should_retry(&mut command, &redirect("https://a.example/dir/start")),
            RetryDecision::GiveUp
        );
        assert_eq!(command.uri().to_string(), "https://a.example/dir/start");

        assert!(handler.should_retry(&mut command, &redirect("//b.example/elsewhere")).is_retry());
        assert_eq!(command.host(), Some("b.example"));
        assert_eq!(command.uri().path(), "/elsewhere");
    }

    #[test]
    fn see_other_converts_to_get() {
        let handler = RedirectionRetryHandler::default();
        let mut command =
            HttpCommand::new(Request::post("https://a.example/form").body("x=1".to_string()).unwrap());
        let see_other = Response::builder()
            .status(303)
            .header(LOCATION, "/result")
            .body(String::new())
            .unwrap();

        assert!(handler.should_retry(&mut command, &see_other).is_retry());
        assert_eq!(command.method(), Method::GET);
        assert!(command.request().body().is_empty());
        assert_eq!(command.uri().to_string(), "https://a.example/result");
    }

    #[test]
    fn client_error_retries_throttling_with_backoff() {
        let handler = ClientErrorRetryHandler::default().with_jitter(Jitter::None);
        let mut command = get("https://ec2.us-east-1.x/");
        let throttled = response(400, THROTTLED);

        let delays: Vec<_> = (0..5).map(|_| handler.should_retry(&mut command, &throttled)).collect();
        assert_eq!(delays[0], RetryDecision::Retry { delay: Duration::from_millis(50) });
        assert_eq!(delays[4], RetryDecision::Retry { delay: Duration::from_millis(800) });
        assert_eq!(handler.should_retry(&mut command, &throttled), RetryDecision::GiveUp);
    }

    #[test]
    fn client_error_ignores_other_codes() {
        let handler = ClientErrorRetryHandler::default();
        let mut command = get("https://ec2.us-east-1.x/");
        let invalid = response(400, "<Code>InvalidParameterValue</Code>");
        assert_eq!(handler.should_retry(&mut command, &invalid), RetryDecision::GiveUp);
        assert_eq!(command.failure_count(), 0);
    }

    #[test]
    fn too_many_requests_is_always_retryable() {
        let handler = ClientErrorRetryHandler::default();
        let mut command = get("https://ec2.us-east-1.x/");
        assert!(handler.should_retry(&mut command, &response(429, "")).is_retry());
    }
}
