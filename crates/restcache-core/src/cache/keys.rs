//! Cache key definitions.
//!
//! A `QueryKey` is an ordered list of tokens, most general first:
//! entity kind, then "list"/"detail", then the parameters or identifier.
//! Any prefix of a key names the family of keys below it, which is what
//! invalidation operates on.

use std::fmt;

use serde::Serialize;

use crate::models::PaginationParams;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Extend the key with one more token.
    pub fn child(&self, part: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// Extend the key with a parameter object, encoded as canonical JSON.
    ///
    /// serde_json orders object keys, so two equal parameter values always
    /// give the same token.
    pub fn with_params<P: Serialize>(&self, params: &P) -> Self {
        let token = serde_json::to_value(params)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "{}".to_string());
        self.child(token)
    }

    /// True if `prefix` names a family this key belongs to.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Keys for session data.
pub struct AuthKeys;

impl AuthKeys {
    pub fn all() -> QueryKey {
        QueryKey::new(["auth"])
    }

    pub fn current_user() -> QueryKey {
        Self::all().child("currentUser")
    }
}

/// Keys for the user collection.
pub struct UserKeys;

impl UserKeys {
    pub fn all() -> QueryKey {
        QueryKey::new(["users"])
    }

    pub fn lists() -> QueryKey {
        Self::all().child("list")
    }

    /// One list variant. Absent parameters encode the same as empty ones.
    pub fn list(params: Option<&PaginationParams>) -> QueryKey {
        let default = PaginationParams::default();
        Self::lists().with_params(params.unwrap_or(&default))
    }

    pub fn details() -> QueryKey {
        Self::all().child("detail")
    }

    pub fn detail(id: &str) -> QueryKey {
        Self::details().child(id)
    }
}
