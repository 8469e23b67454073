//! Error types shared by the router, the dispatch engine and the server shell.
//!
//! [`RestError`] is the request-level taxonomy. Router classification failures are
//! returned as values, handlers hand them to the chain through [`Flow::Fail`](crate::Flow::Fail),
//! and the dispatch engine either delivers them to a registered listener or renders them
//! as a JSON response.

use http::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RestError {
    #[error("{message}")]
    BadRequest { message: String },

    #[error("{path} does not exist")]
    ResourceNotFound { path: String },

    #[error("{method} is not allowed")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    #[error("{version} is not supported by {method} {path}")]
    VersionNotSatisfied { method: Method, path: String, version: String },

    #[error("{message}")]
    InternalError { message: String },

    #[error("handler panicked: {message}")]
    UncaughtHandlerFault { message: String },

    #[error("request was closed before the handler chain finished")]
    RequestAborted,

    #[error("{message}")]
    Http { status: StatusCode, code: String, message: String },
}

impl RestError {
    pub fn bad_request<S: ToString>(message: S) -> Self {
        Self::BadRequest { message: message.to_string() }
    }

    pub fn not_found<S: ToString>(path: S) -> Self {
        Self::ResourceNotFound { path: path.to_string() }
    }

    pub fn internal<S: ToString>(message: S) -> Self {
        Self::InternalError { message: message.to_string() }
    }

    /// An application defined error, `code` doubles as the listener category.
    pub fn http<C: ToString, M: ToString>(status: StatusCode, code: C, message: M) -> Self {
        Self::Http { status, code: code.to_string(), message: message.to_string() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } | Self::VersionNotSatisfied { .. } => StatusCode::BAD_REQUEST,
            Self::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::InternalError { .. } | Self::UncaughtHandlerFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            // nginx's "connection closed without response"
            Self::RequestAborted => StatusCode::from_u16(444).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Http { status, .. } => *status,
        }
    }

    /// The code written in the `code` field of the error body.
    pub fn code(&self) -> &str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::ResourceNotFound { .. } => "ResourceNotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::VersionNotSatisfied { .. } => "InvalidVersion",
            Self::InternalError { .. } => "InternalError",
            Self::UncaughtHandlerFault { .. } => "UncaughtHandlerFault",
            Self::RequestAborted => "RequestAborted",
            Self::Http { code, .. } => code,
        }
    }

    /// The category an error listener registers against, see [`EventsBuilder::on_error`](crate::EventsBuilder::on_error).
    pub fn category(&self) -> &str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::ResourceNotFound { .. } => "NotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::VersionNotSatisfied { .. } => "VersionNotAllowed",
            Self::InternalError { .. } => "Internal",
            Self::UncaughtHandlerFault { .. } => "UncaughtException",
            Self::RequestAborted => "RequestAborted",
            Self::Http { code, .. } => code,
        }
    }

    /// Methods to advertise in the `Allow` header, only set for [`RestError::MethodNotAllowed`].
    pub fn allowed_methods(&self) -> Option<&[Method]> {
        match self {
            Self::MethodNotAllowed { allowed, .. } => Some(allowed),
            _ => None,
        }
    }

    pub(crate) fn body(&self) -> ErrorBody<'_> {
        ErrorBody { code: self.code(), message: self.to_string() }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

/// Raised while compiling a route at mount time.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("invalid route path `{path}`: must begin with '/'")]
    InvalidPath { path: String },

    #[error("invalid parameter name `{name}` in route path `{path}`")]
    InvalidParamName { path: String, name: String },

    #[error("wildcard must be the last segment of route path `{path}`")]
    MisplacedWildcard { path: String },

    #[error("invalid route version `{version}`: {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },
}

impl MountError {
    pub fn invalid_path<S: ToString>(path: S) -> Self {
        Self::InvalidPath { path: path.to_string() }
    }

    pub fn invalid_param_name<P: ToString, N: ToString>(path: P, name: N) -> Self {
        Self::InvalidParamName { path: path.to_string(), name: name.to_string() }
    }

    pub fn misplaced_wildcard<S: ToString>(path: S) -> Self {
        Self::MisplacedWildcard { path: path.to_string() }
    }
}

/// Raised when building a concrete path from a named route.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    #[error("no route named `{name}`")]
    UnknownRoute { name: String },

    #[error("missing parameter `{param}` for route `{name}`")]
    MissingParam { name: String, param: String },

    #[error("route `{name}` is a raw pattern and can not be rendered")]
    NotRenderable { name: String },
}

#[cfg(test)]
mod tests {
    use super::RestError;
    use http::{Method, StatusCode};

    #[test]
    fn test_status_and_category() {
        let not_found = RestError::not_found("/nope");
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.category(), "NotFound");
        assert_eq!(not_found.to_string(), "/nope does not exist");

        let version = RestError::VersionNotSatisfied { method: Method::GET, path: "/x".into(), version: ">=2.0".into() };
        assert_eq!(version.status(), StatusCode::BAD_REQUEST);
        assert_eq!(version.code(), "InvalidVersion");
        assert_eq!(version.category(), "VersionNotAllowed");
        assert_eq!(version.to_string(), ">=2.0 is not supported by GET /x");

        let custom = RestError::http(StatusCode::CONFLICT, "Conflict", "already exists");
        assert_eq!(custom.status(), StatusCode::CONFLICT);
        assert_eq!(custom.category(), "Conflict");
        assert_eq!(custom.allowed_methods(), None);
    }

    #[test]
    fn test_body_serializes_code_and_message() {
        let err = RestError::MethodNotAllowed { method: Method::POST, allowed: vec![Method::GET] };
        let json = serde_json::to_value(err.body()).unwrap();
        assert_eq!(json["code"], "MethodNotAllowed");
        assert_eq!(json["message"], "POST is not allowed");
        assert_eq!(err.allowed_methods(), Some(&[Method::GET][..]));
    }
}
