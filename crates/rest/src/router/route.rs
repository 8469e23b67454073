use crate::router::pattern::PathPattern;
use crate::router::version::VersionSet;
use http::Method;
use regex::Regex;

/// The path half of a [`RouteSpec`]: a segment pattern or a raw regular expression.
#[derive(Debug, Clone)]
pub enum PathSpec {
    Pattern(String),
    Regex(Regex),
}

impl From<&str> for PathSpec {
    fn from(path: &str) -> Self {
        PathSpec::Pattern(path.to_owned())
    }
}

impl From<String> for PathSpec {
    fn from(path: String) -> Self {
        PathSpec::Pattern(path)
    }
}

impl From<Regex> for PathSpec {
    fn from(regex: Regex) -> Self {
        PathSpec::Regex(regex)
    }
}

/// Describes a route to mount.
///
/// ```
/// use http::Method;
/// use micro_rest::router::RouteSpec;
///
/// let spec = RouteSpec::new(Method::GET, "/users/:id").versions(["1.0.0", "2.0.0"]).name("get_user");
/// ```
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub(crate) method: Method,
    pub(crate) path: PathSpec,
    pub(crate) versions: Option<Vec<String>>,
    pub(crate) name: Option<String>,
}

impl RouteSpec {
    pub fn new(method: Method, path: impl Into<PathSpec>) -> Self {
        Self { method, path: path.into(), versions: None, name: None }
    }

    /// Adds one version, replacing the router-wide default list.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.versions.get_or_insert_with(Vec::new).push(version.into());
        self
    }

    pub fn versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions.get_or_insert_with(Vec::new).extend(versions.into_iter().map(Into::into));
        self
    }

    /// Uses `name` instead of the generated `method_path_[versions]` name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// A compiled, mounted route. Immutable once mounted.
#[derive(Debug)]
pub struct Route {
    pub(crate) name: String,
    pub(crate) key: String,
    pub(crate) method: Method,
    pub(crate) pattern: PathPattern,
    pub(crate) versions: VersionSet,
}

impl Route {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path source as mounted, the regex source for raw patterns.
    pub fn path(&self) -> &str {
        self.pattern.source()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Declared versions, ascending; empty means any version.
    pub fn versions(&self) -> &[semver::Version] {
        self.versions.as_slice()
    }

    pub fn param_names(&self) -> &[String] {
        self.pattern.param_names()
    }
}
