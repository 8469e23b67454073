//! Outgoing response with a single-send capability.
//!
//! Handlers stage a status and headers, then call one of the `send*` methods exactly once.
//! Any later send is ignored, so a chain can never write two responses for one request.

use crate::error::RestError;
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new(), sent: false }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether a response has been sent for this request.
    #[inline]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Sends `body` with the staged status and headers.
    ///
    /// Returns `false` and leaves the response untouched when one was already sent.
    pub fn send(&mut self, body: impl Into<Bytes>) -> bool {
        if self.sent {
            warn!(status = %self.status, "response already sent, ignoring");
            return false;
        }
        self.body = body.into();
        self.sent = true;
        true
    }

    pub fn send_status(&mut self, status: StatusCode) -> bool {
        if self.sent {
            warn!(%status, "response already sent, ignoring");
            return false;
        }
        self.status = status;
        self.send(Bytes::new())
    }

    /// Serializes `value` as an `application/json` body.
    pub fn send_json<T: Serialize>(&mut self, status: StatusCode, value: &T) -> bool {
        if self.sent {
            warn!(%status, "response already sent, ignoring");
            return false;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.status = status;
                if let Ok(value) = HeaderValue::from_str(mime::APPLICATION_JSON.as_ref()) {
                    self.headers.insert(CONTENT_TYPE, value);
                }
                self.send(bytes)
            }
            Err(e) => {
                error!(cause = %e, "serialize response body error");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
                self.send(Bytes::new())
            }
        }
    }

    /// Renders `err` as `{"code", "message"}`, adding `Allow` for method mismatches.
    pub fn send_error(&mut self, err: &RestError) -> bool {
        if self.sent {
            warn!(code = err.code(), "response already sent, dropping error response");
            return false;
        }
        if let Some(value) = err.allowed_methods().and_then(allow_header) {
            self.headers.insert(ALLOW, value);
        }
        self.send_json(err.status(), &err.body())
    }

    pub fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

pub(crate) fn allow_header(methods: &[http::Method]) -> Option<HeaderValue> {
    let joined = methods.iter().map(http::Method::as_str).collect::<Vec<_>>().join(", ");
    HeaderValue::from_str(&joined).ok()
}

#[cfg(test)]
mod tests {
    use super::Response;
    use crate::error::RestError;
    use http::{Method, StatusCode};

    #[test]
    fn test_second_send_is_ignored() {
        let mut res = Response::new();
        assert!(res.send("first"));
        assert!(!res.send("second"));
        assert!(!res.send_status(StatusCode::NOT_MODIFIED));
        assert_eq!(res.body().as_ref(), b"first");
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.is_sent());
    }

    #[test]
    fn test_send_error_sets_allow() {
        let mut res = Response::new();
        let err = RestError::MethodNotAllowed { method: Method::POST, allowed: vec![Method::GET, Method::PUT] };
        assert!(res.send_error(&err));
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()["allow"], "GET, PUT");
        assert_eq!(res.headers()["content-type"], "application/json");

        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], "MethodNotAllowed");
    }

    #[test]
    fn test_into_inner() {
        let mut res = Response::new();
        res.set_status(StatusCode::CREATED);
        res.send("done");
        let inner = res.into_inner();
        assert_eq!(inner.status(), StatusCode::CREATED);
    }
}
