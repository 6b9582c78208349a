//! `fetch` adapter types
//!
//! A fetch stays registered with the tracker until the last step the caller
//! awaits has finished: the response future when the response is dropped
//! unread, the body read otherwise. Body readers consume the [`Response`],
//! so a body can only be read once.

use futures::future::LocalBoxFuture;
use rustc_hash::FxHashMap as HashMap;
use serde::de::DeserializeOwned;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::{Error, Result};
use crate::network::{HttpMethod, HttpRequest, HttpResponse};
use crate::tracker::{TaskGuard, TaskId};

/// Request options for [`Window::fetch`](crate::Window::fetch)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn into_request(self, url: &str, user_agent: &str) -> HttpRequest {
        let mut headers: HashMap<String, String> = self.headers.into_iter().collect();
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
            headers.insert("User-Agent".to_string(), user_agent.to_string());
        }
        HttpRequest {
            method: self.method,
            url: url.to_string(),
            headers,
            body: self.body,
        }
    }
}

/// In-flight response future, shared with the fetch's cancel capability.
///
/// The capability empties the slot; dropping the network future is what
/// aborts the request.
pub(crate) type PendingResponse = Rc<RefCell<Option<LocalBoxFuture<'static, Result<HttpResponse>>>>>;

/// Future returned by [`Window::fetch`](crate::Window::fetch).
///
/// Once the window cancels its async work the future never completes, so
/// nothing chained after it runs.
#[must_use = "futures do nothing unless polled"]
pub struct FetchFuture {
    response: PendingResponse,
    guard: Option<TaskGuard>,
    abandoned: Rc<Cell<bool>>,
}

impl FetchFuture {
    pub(crate) fn new(response: PendingResponse, guard: TaskGuard, abandoned: Rc<Cell<bool>>) -> Self {
        Self {
            response,
            guard: Some(guard),
            abandoned,
        }
    }

    /// The tracked task, until the response has been handed over
    pub fn task_id(&self) -> Option<TaskId> {
        self.guard.as_ref().map(TaskGuard::id)
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.get()
    }
}

impl Future for FetchFuture {
    type Output = Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.abandoned.get() {
            this.guard.take();
            return Poll::Pending;
        }
        // Empty once the response was handed over.
        let Some(mut response) = this.response.take() else {
            return Poll::Pending;
        };
        match response.as_mut().poll(cx) {
            Poll::Pending => {
                if this.abandoned.get() {
                    this.guard.take();
                } else {
                    *this.response.borrow_mut() = Some(response);
                }
                Poll::Pending
            }
            Poll::Ready(Ok(inner)) => Poll::Ready(Ok(Response {
                inner,
                guard: this.guard.take(),
                abandoned: this.abandoned.clone(),
            })),
            Poll::Ready(Err(err)) => {
                // A rejected fetch is still a finished one.
                this.guard.take();
                Poll::Ready(Err(err))
            }
        }
    }
}

/// A received response whose body has not been read yet
#[derive(Debug)]
pub struct Response {
    inner: HttpResponse,
    guard: Option<TaskGuard>,
    abandoned: Rc<Cell<bool>>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.inner.status
    }

    pub fn status_text(&self) -> &str {
        &self.inner.status_text
    }

    /// Whether the status is in the 2xx range
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.inner.status)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Read the body as UTF-8 text
    pub fn text(self) -> BodyRead<String> {
        self.read_with(decode_text)
    }

    /// Read the body as JSON
    pub fn json<T: DeserializeOwned>(self) -> BodyRead<T> {
        self.read_with(decode_json::<T>)
    }

    /// Read the raw body bytes
    pub fn bytes(self) -> BodyRead<Vec<u8>> {
        self.read_with(Ok)
    }

    fn read_with<T>(self, decode: fn(Vec<u8>) -> Result<T>) -> BodyRead<T> {
        BodyRead {
            body: Some(self.inner.body),
            decode,
            guard: self.guard,
            abandoned: self.abandoned,
            yielded: false,
        }
    }
}

fn decode_text(body: Vec<u8>) -> Result<String> {
    String::from_utf8(body).map_err(|e| Error::Body(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(body: Vec<u8>) -> Result<T> {
    Ok(serde_json::from_slice(&body)?)
}

/// Future returned by the [`Response`] body readers.
///
/// Takes one extra turn of the microtask queue before decoding, like a
/// platform body stream would.
#[must_use = "futures do nothing unless polled"]
pub struct BodyRead<T> {
    body: Option<Vec<u8>>,
    decode: fn(Vec<u8>) -> Result<T>,
    guard: Option<TaskGuard>,
    abandoned: Rc<Cell<bool>>,
    yielded: bool,
}

impl<T> Future for BodyRead<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.abandoned.get() {
            this.body.take();
            this.guard.take();
            return Poll::Pending;
        }
        if !this.yielded {
            this.yielded = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        // Polled again after the body was handed out.
        let Some(body) = this.body.take() else {
            return Poll::Pending;
        };
        let decoded = (this.decode)(body);
        this.guard.take();
        Poll::Ready(decoded)
    }
}
