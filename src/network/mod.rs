//! Network primitive for `fetch`
//!
//! The window never talks to a socket. It hands an [`HttpRequest`] to a
//! [`Network`] implementation and awaits the boxed future it returns.
//! [`MockNetwork`] is the stub used by tests and the CLI: requests are held
//! in flight until the caller delivers them, so the order in which fetches
//! settle is fully under test control.

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// URL Parser
// ---------------------------------------------------------------------------

/// Parsed URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl ParsedUrl {
    /// Parse "http://host:port/path?query#fragment"
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidUrl(format!("{}: {}", url, why));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => return Err(invalid("unsupported scheme")),
        };

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q.to_string())),
            None => (rest, None),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (h.to_string(), port)
            }
            None => (authority.to_string(), default_port),
        };

        Ok(ParsedUrl {
            scheme,
            host,
            port,
            path: path.to_string(),
            query,
            fragment,
        })
    }

    /// Returns "scheme://host:port"
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Returns "/path?query"
    pub fn full_path(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Options => write!(f, "OPTIONS"),
        }
    }
}

/// HTTP request as issued by `fetch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

/// HTTP response produced by the network primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub url: String,
}

/// Reason phrase for the status codes the stub commonly produces
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Network primitive
// ---------------------------------------------------------------------------

/// The platform network call behind `fetch`.
///
/// A returned future that errors is a rejected fetch; the window passes the
/// error through to the caller unchanged. Dropping the future aborts the
/// request, and implementations must release whatever they hold for it.
pub trait Network {
    fn issue(&self, request: HttpRequest) -> LocalBoxFuture<'static, Result<HttpResponse>>;
}

// ---------------------------------------------------------------------------
// Mock network
// ---------------------------------------------------------------------------

/// Canned answer for a mocked route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MockResponse {
    /// Response with `status` and an empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::default(),
            body: Vec::new(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::status(200)
            .with_header("Content-Type", "text/plain")
            .with_body(body.into().into_bytes())
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::status(200)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    fn into_http(self, url: &str) -> HttpResponse {
        HttpResponse {
            status: self.status,
            status_text: status_text(self.status).to_string(),
            headers: self.headers,
            body: self.body,
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Respond(MockResponse),
    Fail(String),
}

struct InFlight {
    request: HttpRequest,
    reply: oneshot::Sender<Result<HttpResponse>>,
}

#[derive(Default)]
struct MockState {
    routes: HashMap<(HttpMethod, String), MockReply>,
    in_flight: VecDeque<InFlight>,
    issued: Vec<HttpRequest>,
    auto_respond: bool,
}

impl MockState {
    /// Forget requests whose fetch dropped its end of the reply channel
    fn prune_aborted(&mut self) {
        let before = self.in_flight.len();
        self.in_flight.retain(|f| !f.reply.is_canceled());
        let aborted = before - self.in_flight.len();
        if aborted > 0 {
            trace!(aborted, "dropped aborted mock requests");
        }
    }

    fn answer(&self, request: &HttpRequest) -> Result<HttpResponse> {
        match self.routes.get(&(request.method, request.url.clone())) {
            Some(MockReply::Respond(resp)) => Ok(resp.clone().into_http(&request.url)),
            Some(MockReply::Fail(message)) => Err(Error::network(&request.url, message.clone())),
            None => Ok(MockResponse::status(404).into_http(&request.url)),
        }
    }
}

/// Route-based network stub.
///
/// Unrouted URLs answer 404. In the default mode every request stays in
/// flight until [`deliver_next`](Self::deliver_next),
/// [`deliver`](Self::deliver) or [`deliver_all`](Self::deliver_all) is
/// called; [`auto`](Self::auto) answers on the first poll instead.
#[derive(Default)]
pub struct MockNetwork {
    state: RefCell<MockState>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub that answers every request as soon as it is polled
    pub fn auto() -> Self {
        let network = Self::new();
        network.state.borrow_mut().auto_respond = true;
        network
    }

    /// Answer `method url` with `response`
    pub fn route(&self, method: HttpMethod, url: &str, response: MockResponse) {
        self.state
            .borrow_mut()
            .routes
            .insert((method, url.to_string()), MockReply::Respond(response));
    }

    /// Reject `method url` with a network error
    pub fn route_failure(&self, method: HttpMethod, url: &str, message: &str) {
        self.state
            .borrow_mut()
            .routes
            .insert((method, url.to_string()), MockReply::Fail(message.to_string()));
    }

    /// Answer the oldest in-flight request
    pub fn deliver_next(&self) -> bool {
        let next = {
            let mut state = self.state.borrow_mut();
            state.prune_aborted();
            state.in_flight.pop_front()
        };
        match next {
            Some(flight) => {
                self.settle(flight);
                true
            }
            None => false,
        }
    }

    /// Answer the oldest in-flight request for `url`
    pub fn deliver(&self, url: &str) -> bool {
        let flight = {
            let mut state = self.state.borrow_mut();
            state.prune_aborted();
            let idx = state.in_flight.iter().position(|f| f.request.url == url);
            idx.and_then(|i| state.in_flight.remove(i))
        };
        match flight {
            Some(flight) => {
                self.settle(flight);
                true
            }
            None => false,
        }
    }

    /// Answer everything in flight, returning how many requests were answered
    pub fn deliver_all(&self) -> usize {
        let mut delivered = 0;
        while self.deliver_next() {
            delivered += 1;
        }
        delivered
    }

    /// Drop the oldest in-flight request for `url`; its fetch rejects with `Aborted`
    pub fn abort(&self, url: &str) -> bool {
        let mut state = self.state.borrow_mut();
        state.prune_aborted();
        let Some(idx) = state.in_flight.iter().position(|f| f.request.url == url) else {
            return false;
        };
        // Dropping the sender rejects the receiving side.
        state.in_flight.remove(idx);
        debug!(url, "mock request aborted");
        true
    }

    /// Requests still waiting for an answer. Aborted requests do not count.
    pub fn in_flight_count(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.prune_aborted();
        state.in_flight.len()
    }

    /// Every request issued so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.borrow().issued.clone()
    }

    fn settle(&self, flight: InFlight) {
        let reply = self.state.borrow().answer(&flight.request);
        trace!(url = %flight.request.url, ok = reply.is_ok(), "mock request delivered");
        // The fetch may have been dropped in the meantime.
        let _ = flight.reply.send(reply);
    }
}

impl Network for MockNetwork {
    fn issue(&self, request: HttpRequest) -> LocalBoxFuture<'static, Result<HttpResponse>> {
        let (tx, rx) = oneshot::channel();
        let url = request.url.clone();
        {
            let mut state = self.state.borrow_mut();
            state.issued.push(request.clone());
            if state.auto_respond {
                let _ = tx.send(state.answer(&request));
            } else {
                state.in_flight.push_back(InFlight { request, reply: tx });
            }
        }
        trace!(url = %url, "mock request issued");
        async move { rx.await.unwrap_or_else(|_| Err(Error::aborted(url))) }.boxed_local()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: HashMap::default(),
            body: None,
        }
    }

    #[test]
    fn test_parsed_url_full() {
        let url = ParsedUrl::parse("http://example.com:8080/path?key=val#frag").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "/path");
        assert_eq!(url.query, Some("key=val".to_string()));
        assert_eq!(url.fragment, Some("frag".to_string()));
        assert_eq!(url.full_path(), "/path?key=val");
        assert_eq!(url.origin(), "http://example.com:8080");
    }

    #[test]
    fn test_parsed_url_defaults() {
        let url = ParsedUrl::parse("https://example.com").unwrap();
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/");
        assert_eq!(url.query, None);
    }

    #[test]
    fn test_parsed_url_invalid() {
        assert!(ParsedUrl::parse("not-a-url").is_err());
        assert!(ParsedUrl::parse("ftp://example.com").is_err());
        assert!(ParsedUrl::parse("http:///path").is_err());
        assert!(matches!(
            ParsedUrl::parse("http://host:99999/"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_http_method_display_and_serde() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
        let m: HttpMethod = serde_json::from_str("\"POST\"").unwrap();
        assert_eq!(m, HttpMethod::Post);
    }

    #[test]
    fn test_mock_holds_until_delivered() {
        let net = MockNetwork::new();
        net.route(HttpMethod::Get, "http://a.test/x", MockResponse::text("hello"));

        let mut fut = net.issue(get("http://a.test/x"));
        assert!((&mut fut).now_or_never().is_none());
        assert_eq!(net.in_flight_count(), 1);

        assert!(net.deliver_next());
        let resp = fut.now_or_never().unwrap().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.url, "http://a.test/x");
    }

    #[test]
    fn test_mock_unrouted_is_404() {
        let net = MockNetwork::auto();
        let resp = net.issue(get("http://a.test/missing")).now_or_never().unwrap().unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.status_text, "Not Found");
    }

    #[test]
    fn test_mock_route_failure() {
        let net = MockNetwork::auto();
        net.route_failure(HttpMethod::Get, "http://a.test/down", "connection refused");
        let err = net.issue(get("http://a.test/down")).now_or_never().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "NetworkError: connection refused (http://a.test/down)");
    }

    #[test]
    fn test_mock_deliver_by_url_and_abort() {
        let net = MockNetwork::new();
        let mut first = net.issue(get("http://a.test/1"));
        let mut second = net.issue(get("http://a.test/2"));

        assert!(net.deliver("http://a.test/2"));
        assert!((&mut first).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_some());

        assert!(net.abort("http://a.test/1"));
        assert!(!net.abort("http://a.test/1"));
        assert!(matches!(first.now_or_never(), Some(Err(Error::Aborted { .. }))));
        assert_eq!(net.requests().len(), 2);
        assert_eq!(net.deliver_all(), 0);
    }

    #[test]
    fn test_mock_dropped_future_leaves_flight() {
        let net = MockNetwork::new();
        let dropped = net.issue(get("http://a.test/gone"));
        let _kept = net.issue(get("http://a.test/kept"));
        assert_eq!(net.in_flight_count(), 2);

        drop(dropped);
        assert_eq!(net.in_flight_count(), 1);
        assert!(!net.deliver("http://a.test/gone"));
        assert_eq!(net.deliver_all(), 1);
    }
}
