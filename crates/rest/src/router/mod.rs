//! Versioned route table.
//!
//! Routes are kept per HTTP method in mount order, so the first structurally matching route
//! wins. A reverse index from path source to the routes mounted on it tells a missing
//! resource (404) apart from a method mismatch (405).

mod pattern;
mod route;
mod version;

pub use pattern::{PathPattern, Segment, WILDCARD_PARAM};
pub use route::{PathSpec, Route, RouteSpec};
pub use version::{VersionCheck, VersionSet};

use crate::error::{MountError, RenderError, RestError};
use crate::request::PathParams;
use http::Method;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options applied to every route mounted on a [`Router`].
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Versions for routes whose spec declares none.
    pub versions: Vec<String>,
}

/// Main router structure that resolves `(method, path, version)` to a route
#[derive(Debug, Clone, Default)]
pub struct Router {
    options: RouterOptions,
    routes: HashMap<Method, Vec<Arc<Route>>>,
    names: HashMap<String, Arc<Route>>,
    keys: HashSet<String>,
    reverse: BTreeMap<String, Vec<Arc<Route>>>,
}

/// A successful [`Router::find`].
#[derive(Debug, Clone)]
pub struct RouteMatch {
    route: Arc<Route>,
    params: PathParams,
    version: Option<semver::Version>,
}

impl RouteMatch {
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// The max-satisfying declared version, `None` for unversioned routes or a `*` request.
    pub fn version(&self) -> Option<&semver::Version> {
        self.version.as_ref()
    }

    pub fn into_parts(self) -> (Arc<Route>, PathParams, Option<semver::Version>) {
        (self.route, self.params, self.version)
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self { options, ..Self::default() }
    }

    /// Compiles and mounts `spec`.
    ///
    /// Returns the route name, or `None` when the same `(method, path, versions)` (or the
    /// same custom name) is already mounted; the table is left unchanged in that case.
    pub fn mount(&mut self, spec: RouteSpec) -> Result<Option<String>, MountError> {
        let RouteSpec { method, path, versions, name } = spec;

        let pattern = match path {
            PathSpec::Pattern(path) => PathPattern::compile(&path)?,
            PathSpec::Regex(regex) => PathPattern::raw(regex),
        };
        let versions = match versions {
            Some(versions) => VersionSet::parse(versions)?,
            None => VersionSet::parse(&self.options.versions)?,
        };

        let key = format!("{}_{}_[{}]", method.as_str().to_ascii_lowercase(), pattern.source(), versions.key());
        if self.keys.contains(&key) {
            debug!(route = %key, "route already mounted, skipping");
            return Ok(None);
        }

        let name = name.unwrap_or_else(|| key.clone());
        if self.names.contains_key(&name) {
            warn!(route = %name, "route name already taken, skipping");
            return Ok(None);
        }

        let source = pattern.source().to_owned();
        let route = Arc::new(Route { name: name.clone(), key: key.clone(), method: method.clone(), pattern, versions });

        self.routes.entry(method).or_default().push(Arc::clone(&route));
        self.reverse.entry(source).or_default().push(Arc::clone(&route));
        self.names.insert(name.clone(), route);
        self.keys.insert(key);

        debug!(route = %name, "mounted route");
        Ok(Some(name))
    }

    /// Removes the route called `name` from the table and the reverse index.
    pub fn unmount(&mut self, name: &str) -> bool {
        let Some(route) = self.names.remove(name) else {
            warn!(route = name, "unmount unknown route");
            return false;
        };
        self.keys.remove(&route.key);

        let method_empty = self.routes.get_mut(route.method()).is_some_and(|routes| {
            routes.retain(|r| !Arc::ptr_eq(r, &route));
            routes.is_empty()
        });
        if method_empty {
            self.routes.remove(route.method());
        }

        let bucket_empty = self.reverse.get_mut(route.path()).is_some_and(|routes| {
            routes.retain(|r| !Arc::ptr_eq(r, &route));
            routes.is_empty()
        });
        if bucket_empty {
            self.reverse.remove(route.path());
        }

        debug!(route = name, "unmounted route");
        true
    }

    /// Resolves a request to a route.
    ///
    /// Routes for `method` are scanned in mount order. A route whose path matches but whose
    /// versions do not satisfy `version` is remembered and the scan continues, so several
    /// versions of the same path may be mounted as separate routes.
    pub fn find(&self, method: &Method, path: &str, version: &str) -> Result<RouteMatch, RestError> {
        let mut version_mismatch = false;

        for route in self.routes.get(method).into_iter().flatten() {
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };

            let matched = match route.versions.check(version) {
                VersionCheck::Any => None,
                VersionCheck::Matched(matched) => Some(matched),
                VersionCheck::Unsatisfied => {
                    version_mismatch = true;
                    continue;
                }
            };

            return params.map(|params| RouteMatch { route: Arc::clone(route), params, version: matched });
        }

        if version_mismatch {
            return Err(RestError::VersionNotSatisfied {
                method: method.clone(),
                path: path.to_owned(),
                version: version.to_owned(),
            });
        }

        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            Err(RestError::not_found(path))
        } else {
            Err(RestError::MethodNotAllowed { method: method.clone(), allowed })
        }
    }

    /// Methods of every route whose pattern structurally matches `path`, sorted and deduplicated.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = Vec::new();
        for routes in self.reverse.values() {
            let Some(first) = routes.first() else { continue };
            if !first.pattern.is_match(path) {
                continue;
            }
            for route in routes {
                if !allowed.contains(route.method()) {
                    allowed.push(route.method().clone());
                }
            }
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }

    /// Builds a concrete path for the named route.
    pub fn render(&self, name: &str, params: &PathParams) -> Result<String, RenderError> {
        let route = self.names.get(name).ok_or_else(|| RenderError::UnknownRoute { name: name.to_owned() })?;
        route.pattern.render(name, params)
    }

    pub fn route(&self, name: &str) -> Option<&Arc<Route>> {
        self.names.get(name)
    }

    /// Every mounted route, grouped by method name and in mount order within a method.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut methods = self.routes.keys().collect::<Vec<_>>();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods.into_iter().flat_map(|method| self.routes_for(method).iter().map(Arc::clone)).collect()
    }

    /// Routes mounted for `method`, in precedence order.
    pub fn routes_for(&self, method: &Method) -> &[Arc<Route>] {
        self.routes.get(method).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
