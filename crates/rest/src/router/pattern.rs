//! Route path compilation.
//!
//! A route path is either a segment pattern such as `/users/:id/files/*`, compiled into a
//! sequence of [`Segment`]s, or a raw [`Regex`] that is matched opaquely and exposes its
//! capture groups positionally.

use crate::error::{MountError, RenderError, RestError};
use crate::request::PathParams;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;

/// Characters kept verbatim when rendering a parameter value.
const PARAM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'~').remove(b'.').remove(b'@');
const WILDCARD_ENCODE_SET: &AsciiSet = &PARAM_ENCODE_SET.remove(b'/');

/// The key a trailing `*` binds the remainder of the path under.
pub const WILDCARD_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

#[derive(Debug, Clone)]
pub enum PathPattern {
    Segments { source: String, segments: Vec<Segment>, names: Vec<String> },
    Raw(Regex),
}

impl PathPattern {
    pub fn compile(path: &str) -> Result<Self, MountError> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(MountError::invalid_path(path));
        };

        let mut segments = Vec::new();
        let mut names: Vec<String> = Vec::new();
        if !rest.is_empty() {
            let raw_segments = rest.split('/').collect::<Vec<_>>();
            for (index, raw) in raw_segments.iter().enumerate() {
                if let Some(name) = raw.strip_prefix(':') {
                    let valid = !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
                    if !valid || names.iter().any(|n| n == name) {
                        return Err(MountError::invalid_param_name(path, name));
                    }
                    names.push(name.to_owned());
                    segments.push(Segment::Param(name.to_owned()));
                } else if *raw == WILDCARD_PARAM {
                    if index + 1 != raw_segments.len() {
                        return Err(MountError::misplaced_wildcard(path));
                    }
                    names.push(WILDCARD_PARAM.to_owned());
                    segments.push(Segment::Wildcard);
                } else {
                    segments.push(Segment::Literal((*raw).to_owned()));
                }
            }
        }

        Ok(Self::Segments { source: path.to_owned(), segments, names })
    }

    pub fn raw(regex: Regex) -> Self {
        Self::Raw(regex)
    }

    /// The pattern as written at mount time, used for route names and the reverse index.
    pub fn source(&self) -> &str {
        match self {
            Self::Segments { source, .. } => source,
            Self::Raw(regex) => regex.as_str(),
        }
    }

    /// Ordered parameter names, empty for raw patterns.
    pub fn param_names(&self) -> &[String] {
        match self {
            Self::Segments { names, .. } => names,
            Self::Raw(_) => &[],
        }
    }

    pub fn is_match(&self, path: &str) -> bool {
        match self {
            Self::Segments { segments, .. } => match_segments(segments, path).is_some(),
            Self::Raw(regex) => regex.is_match(path),
        }
    }

    /// Structurally matches `path` and binds parameters.
    ///
    /// Returns `None` when the path does not match, and `Some(Err(_))` when it matches but a
    /// parameter is not valid percent-encoded UTF-8.
    pub fn matches(&self, path: &str) -> Option<Result<PathParams, RestError>> {
        match self {
            Self::Segments { segments, .. } => {
                let captures = match_segments(segments, path)?;
                let mut params = PathParams::empty();
                for (name, raw) in captures {
                    match percent_decode_str(raw).decode_utf8() {
                        Ok(value) => params.insert(name, value.into_owned()),
                        Err(_) => {
                            return Some(Err(RestError::bad_request(format!(
                                "invalid percent-encoding in path parameter `{name}`"
                            ))));
                        }
                    }
                }
                Some(Ok(params))
            }
            Self::Raw(regex) => {
                let captures = regex.captures(path)?;
                let mut params = PathParams::empty();
                for (index, group) in captures.iter().skip(1).enumerate() {
                    if let Some(group) = group {
                        params.insert(index.to_string(), group.as_str().to_owned());
                    }
                }
                Some(Ok(params))
            }
        }
    }

    /// Builds a concrete path for the route `name` from `params`.
    pub fn render(&self, name: &str, params: &PathParams) -> Result<String, RenderError> {
        let Self::Segments { segments, .. } = self else {
            return Err(RenderError::NotRenderable { name: name.to_owned() });
        };

        let missing = |param: &str| RenderError::MissingParam { name: name.to_owned(), param: param.to_owned() };

        let mut path = String::new();
        for segment in segments {
            path.push('/');
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Param(param) => {
                    let value = params.get(param).filter(|v| !v.is_empty()).ok_or_else(|| missing(param))?;
                    path.extend(utf8_percent_encode(value, PARAM_ENCODE_SET));
                }
                Segment::Wildcard => {
                    let value = params.get(WILDCARD_PARAM).unwrap_or_default();
                    path.extend(utf8_percent_encode(value, WILDCARD_ENCODE_SET));
                }
            }
        }

        if path.is_empty() {
            path.push('/');
        }
        Ok(path)
    }
}

#[inline]
fn is_param_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'~' | b'.' | b'%' | b'@')
}

/// Walks the path segment by segment, returning the raw (still encoded) parameter values.
fn match_segments<'p, 'a>(segments: &'p [Segment], path: &'a str) -> Option<Vec<(&'p str, &'a str)>> {
    let rest = path.strip_prefix('/')?;
    // `None` once every path segment is consumed; "/" has no segments at all
    let mut remaining = if rest.is_empty() { None } else { Some(rest) };
    let mut captures = Vec::new();

    for segment in segments {
        if let Segment::Wildcard = segment {
            captures.push((WILDCARD_PARAM, remaining.unwrap_or_default()));
            return Some(captures);
        }

        let current = remaining?;
        let (head, tail) = match current.split_once('/') {
            Some((head, tail)) => (head, Some(tail)),
            None => (current, None),
        };

        match segment {
            Segment::Literal(literal) if literal == head => {}
            Segment::Param(name) if !head.is_empty() && head.bytes().all(is_param_byte) => {
                captures.push((name.as_str(), head));
            }
            _ => return None,
        }
        remaining = tail;
    }

    remaining.is_none().then_some(captures)
}
