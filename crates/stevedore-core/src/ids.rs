//! Newtype wrappers for document links to ensure type safety.
//!
//! Every persisted document is addressed by a self link, a factory-style
//! path such as `/requests/placement-tasks/<uuid>`. The wrappers keep
//! the different document families from being mixed up in signatures.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Self link of a task record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskLink(String);

impl TaskLink {
    /// Create a new TaskLink from a string.
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Generate a new random TaskLink under the given factory path.
    pub fn generate_under(factory: &str) -> Self {
        Self(format!("{}/{}", factory, Uuid::new_v4()))
    }

    /// Build a TaskLink under a factory path from a known id.
    pub fn under(factory: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}/{}", factory, id))
    }

    /// The last path segment of the link.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskLink {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskLink {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Self link of a compute host document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostLink(String);

impl HostLink {
    /// Create a new HostLink from a string.
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Generate a new random HostLink under the given factory path.
    pub fn generate_under(factory: &str) -> Self {
        Self(format!("{}/{}", factory, Uuid::new_v4()))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for HostLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostLink {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HostLink {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Self link of a resource pool document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolLink(String);

impl PoolLink {
    /// Create a new PoolLink from a string.
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PoolLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PoolLink {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PoolLink {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Self link of a group placement document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementLink(String);

impl PlacementLink {
    /// Create a new PlacementLink from a string.
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Generate a new random PlacementLink under the given factory path.
    pub fn generate_under(factory: &str) -> Self {
        Self(format!("{}/{}", factory, Uuid::new_v4()))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PlacementLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PlacementLink {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PlacementLink {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_under_is_unique() {
        let a = TaskLink::generate_under("/requests/reservation-tasks");
        let b = TaskLink::generate_under("/requests/reservation-tasks");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("/requests/reservation-tasks/"));
    }

    #[test]
    fn test_link_id() {
        let link = TaskLink::under("/requests/placement-tasks", "abc-123");
        assert_eq!(link.id(), "abc-123");
        assert_eq!(format!("{}", link), "/requests/placement-tasks/abc-123");
    }
}
