use crate::error::MountError;
use crate::request::ANY_VERSION;
use semver::{Version, VersionReq};

/// The versions a route is mounted under, kept sorted ascending.
///
/// An empty set accepts any requested version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSet {
    versions: Vec<Version>,
}

/// Outcome of checking a requested range against a [`VersionSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// The route is unversioned or the client asked for `*`.
    Any,
    /// The highest declared version inside the requested range.
    Matched(Version),
    Unsatisfied,
}

impl VersionSet {
    pub fn parse<I, S>(versions: I) -> Result<Self, MountError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = versions
            .into_iter()
            .map(|v| {
                let v = v.as_ref().trim();
                Version::parse(v).map_err(|source| MountError::InvalidVersion { version: v.to_owned(), source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(Self { versions: parsed })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn as_slice(&self) -> &[Version] {
        &self.versions
    }

    pub fn check(&self, requested: &str) -> VersionCheck {
        if self.is_empty() || requested.trim() == ANY_VERSION {
            return VersionCheck::Any;
        }
        self.max_satisfying(requested).map_or(VersionCheck::Unsatisfied, |v| VersionCheck::Matched(v.clone()))
    }

    /// The highest version satisfying `requested`, `None` if the range does not parse.
    pub fn max_satisfying(&self, requested: &str) -> Option<&Version> {
        let alternatives = parse_range(requested);
        self.versions.iter().rev().find(|version| alternatives.iter().any(|req| req.matches(version)))
    }

    pub(crate) fn key(&self) -> String {
        self.versions.iter().map(Version::to_string).collect::<Vec<_>>().join(",")
    }
}

/// Parses a client range such as `~1.2`, `>=1.0 <2`, `1.2.3 - 1.4`, `1.2.3 || 2.x` or `v2`.
///
/// A bare version is an exact (or, when partial, a same-prefix) match rather than a caret
/// requirement, alternatives are separated by `||` and comparators by spaces or commas.
/// `A - B` is the inclusive range `>=A, <=B`.
pub(crate) fn parse_range(range: &str) -> Vec<VersionReq> {
    range
        .split("||")
        .filter_map(|alternative| {
            let mut comparators = Vec::new();
            let mut pending_op = String::new();
            let mut tokens =
                alternative.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()).peekable();
            while let Some(token) = tokens.next() {
                if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
                    pending_op.push_str(token);
                    continue;
                }
                let token = strip_v(token);
                if pending_op.is_empty() && tokens.next_if_eq(&"-").is_some() {
                    // a dangling `-` leaves an operand `VersionReq` rejects
                    let upper = tokens.next().map_or("-", strip_v);
                    comparators.push(format!(">={token}"));
                    comparators.push(format!("<={upper}"));
                    continue;
                }
                let bare = pending_op.is_empty()
                    && token.starts_with(|c: char| c.is_ascii_digit())
                    && !token.contains(['*', 'x', 'X']);
                comparators.push(if bare { format!("={token}") } else { format!("{pending_op}{token}") });
                pending_op.clear();
            }

            if comparators.is_empty() {
                return Some(VersionReq::STAR);
            }
            VersionReq::parse(&comparators.join(", ")).ok()
        })
        .collect()
}

fn strip_v(token: &str) -> &str {
    token.strip_prefix(['v', 'V']).unwrap_or(token)
}
