//! Channel permissions.
//!
//! The server hands out a permission table with every successful handshake.
//! Before subscribing or publishing, the session derives a proof token for
//! the channel from that table through a [`PermissionHash`] implementation.

use std::collections::HashMap;
use std::fmt;

/// The action a permission is checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Subscribe,
    Send,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Subscribe => f.write_str("subscribe"),
            Action::Send => f.write_str("send to"),
        }
    }
}

/// The permission table of a session.
///
/// An empty table means the session is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    grants: HashMap<String, String>,
}

impl Permissions {
    /// A table without restrictions.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Build a table from channel patterns and their grants.
    #[must_use]
    pub fn from_grants(grants: HashMap<String, String>) -> Self {
        Self { grants }
    }

    /// Whether no restrictions apply.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.grants.is_empty()
    }

    /// Look up the grant for an exact channel pattern.
    #[must_use]
    pub fn grant(&self, pattern: &str) -> Option<&str> {
        self.grants.get(pattern).map(String::as_str)
    }

    /// Number of patterns in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the table has no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl From<Option<HashMap<String, String>>> for Permissions {
    fn from(table: Option<HashMap<String, String>>) -> Self {
        table.map(Self::from_grants).unwrap_or_default()
    }
}

/// Derives the proof-of-authorization token sent with subscribe and send frames.
pub trait PermissionHash: Send + Sync {
    /// Return the token for `action` on `channel`, or `None` if not permitted.
    fn hash(&self, permissions: &Permissions, channel: &str, action: Action) -> Option<String>;
}

/// Default permission lookup.
///
/// The server issues one token per channel pattern. A channel matches its
/// exact name first, then the wildcard `<prefix>:*` built from the part
/// before its first `:`. An unrestricted session uses an empty token. The
/// same token authorizes every action.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternPermissionHash;

impl PermissionHash for PatternPermissionHash {
    fn hash(&self, permissions: &Permissions, channel: &str, _action: Action) -> Option<String> {
        if permissions.is_unrestricted() {
            return Some(String::new());
        }

        if let Some(grant) = permissions.grant(channel) {
            return Some(grant.to_string());
        }

        let (prefix, _) = channel.split_once(':')?;
        permissions
            .grant(&format!("{}:*", prefix))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> Permissions {
        Permissions::from_grants(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_unrestricted_allows_everything() {
        let hash = PatternPermissionHash.hash(&Permissions::unrestricted(), "any", Action::Send);
        assert_eq!(hash.as_deref(), Some(""));
    }

    #[test]
    fn test_exact_match() {
        let permissions = table(&[("blue", "h1")]);
        assert_eq!(
            PatternPermissionHash
                .hash(&permissions, "blue", Action::Subscribe)
                .as_deref(),
            Some("h1")
        );
        assert!(PatternPermissionHash
            .hash(&permissions, "yellow", Action::Subscribe)
            .is_none());
    }

    #[test]
    fn test_wildcard_match() {
        let permissions = table(&[("news:*", "h2"), ("news:sports", "h3")]);
        let hash = |ch| PatternPermissionHash.hash(&permissions, ch, Action::Send);
        assert_eq!(hash("news:weather").as_deref(), Some("h2"));
        assert_eq!(hash("news:sports").as_deref(), Some("h3"));
        assert!(hash("news").is_none());
        assert!(hash("sport:news").is_none());
    }

    #[test]
    fn test_null_table_is_unrestricted() {
        assert!(Permissions::from(None).is_unrestricted());
        let some: Permissions = Some(HashMap::from([("a".to_string(), "x".to_string())])).into();
        assert_eq!(some.len(), 1);
    }
}
