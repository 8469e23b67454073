//! The request side of a single in-flight exchange.
//!
//! This module contains the core types handlers read from:
//! - `Request`: method, path, headers, body and the per-request routing state
//! - `PathParams`: parameters bound by the router when a route matches

use crate::router::Route;
use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use std::collections::HashMap;
use std::collections::hash_map;
use std::sync::Arc;

/// Header carrying the semver range a client asks for.
pub const ACCEPT_VERSION: &str = "accept-version";
/// Legacy alias of [`ACCEPT_VERSION`].
pub const X_API_VERSION: &str = "x-api-version";
/// The requested version when a client does not ask for one.
pub const ANY_VERSION: &str = "*";
/// Stands in for a version header that is not visible ASCII, no range parses from it.
const UNREADABLE_VERSION: &str = "!";

/// An incoming request together with the state the router and the dispatch engine attach to it.
///
/// A `Request` is created per inbound request and is owned by that request's processing flow
/// only; it is never shared between concurrent requests.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    params: PathParams,
    route: Option<Arc<Route>>,
    matched_version: Option<semver::Version>,
    extensions: Extensions,
    redirected: bool,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let path = uri.path().to_owned();
        Self {
            method,
            uri,
            path,
            headers,
            body,
            params: PathParams::empty(),
            route: None,
            matched_version: None,
            extensions: Extensions::new(),
            redirected: false,
        }
    }

    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let mut request = Self::new(parts.method, parts.uri, parts.headers, body);
        request.extensions = parts.extensions;
        request
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI as received
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The path used for routing, initially the URI path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrites the routing path; meant for pre-handlers such as a trailing slash sanitizer.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Case-insensitive header lookup, `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The semver range asked for by the client, `*` when none was sent.
    ///
    /// A header that is present but unreadable yields a range that satisfies no version.
    pub fn version(&self) -> &str {
        match self.headers.get(ACCEPT_VERSION).or_else(|| self.headers.get(X_API_VERSION)) {
            Some(value) => value.to_str().unwrap_or(UNREADABLE_VERSION),
            None => ANY_VERSION,
        }
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// The route resolved for this request, `None` until routing completes.
    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// The highest declared route version satisfying the requested range.
    pub fn matched_version(&self) -> Option<&semver::Version> {
        self.matched_version.as_ref()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub(crate) fn bind_route(&mut self, route: Arc<Route>, params: PathParams, version: Option<semver::Version>) {
        self.route = Some(route);
        self.params = params;
        self.matched_version = version;
    }

    pub(crate) fn is_redirected(&self) -> bool {
        self.redirected
    }

    pub(crate) fn mark_redirected(&mut self) {
        self.redirected = true;
    }
}

/// Path parameters bound by the router.
///
/// Keys are unique; a fresh map is created for every match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    inner: HashMap<String, String>,
}

impl PathParams {
    #[inline]
    pub fn empty() -> Self {
        Self { inner: HashMap::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.inner.get(key.as_ref()).map(String::as_str)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, String> {
        self.inner.iter()
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl<'a> IntoIterator for &'a PathParams {
    type Item = (&'a String, &'a String);
    type IntoIter = hash_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
