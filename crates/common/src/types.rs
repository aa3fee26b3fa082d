use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow instance.
///
/// Top-level instances get a random UUID. Child instances (sub-workflows)
/// derive their id from the parent so that external callers can address
/// them without knowing a generated value, e.g. `"<parent>:pay"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Creates an instance ID from an explicit, caller-chosen value.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates the ID of a child instance scoped under `parent`.
    pub fn child(parent: &InstanceId, suffix: &str) -> Self {
        Self(format!("{}:{}", parent.0, suffix))
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this ID was derived from `parent` via [`InstanceId::child`].
    pub fn is_child_of(&self, parent: &InstanceId) -> bool {
        self.0
            .strip_prefix(parent.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_new_creates_unique_ids() {
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn child_id_is_scoped_under_parent() {
        let parent = InstanceId::from_name("booking-1");
        let child = InstanceId::child(&parent, "pay");
        assert_eq!(child.as_str(), "booking-1:pay");
        assert!(child.is_child_of(&parent));
        assert!(!parent.is_child_of(&child));
        assert!(!InstanceId::from_name("booking-10:pay").is_child_of(&parent));
    }

    #[test]
    fn instance_id_serializes_as_plain_string() {
        let id = InstanceId::from_name("eventinstance");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"eventinstance\"");
        let deserialized: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
