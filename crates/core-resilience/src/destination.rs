//! Destination identifiers
//!
//! A destination names one protected dependency (a host, a database, a
//! downstream service). Pool and breaker state is partitioned by destination.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Logical identifier for a protected dependency
///
/// Cloning is cheap: the name is shared.
///
/// # Example
/// ```
/// use bulwark_core_resilience::Destination;
///
/// let db = Destination::new("db");
/// assert_eq!(db.as_str(), "db");
/// assert_eq!(db, Destination::from("db"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(Arc<str>);

impl Destination {
    /// Create a destination from any string-like name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Get the destination name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Destination> for Destination {
    fn from(destination: &Destination) -> Self {
        destination.clone()
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Destination {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(Destination::new("db"), 1);

        assert_eq!(map.get("db"), Some(&1));
        assert_eq!(map.get("cache"), None);
    }

    #[test]
    fn test_display() {
        let dest = Destination::from(String::from("api.example.com"));
        assert_eq!(dest.to_string(), "api.example.com");
    }
}
