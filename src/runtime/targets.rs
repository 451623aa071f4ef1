//! Logical target names for lab containers
//!
//! Lessons refer to their broker by week (`week1` .. `week5`). The map turns
//! those names into container names; anything it does not know passes
//! through unchanged so clients can still name a container directly.

use std::collections::HashMap;

/// Built-in week-to-broker mapping.
pub const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("week1", "kafka-xray-broker"),
    ("week2", "kafka-builder-broker"),
    ("week3", "kafka-optimizer-broker"),
    ("week4", "kafka-detective-broker"),
    ("week5", "kafka-architect-broker"),
];

#[derive(Debug, Clone)]
pub struct TargetMap {
    entries: HashMap<String, String>,
}

impl TargetMap {
    /// An empty map (every target passes through).
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Defaults overlaid with `overrides` from configuration.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut map = Self::default();
        for (target, container) in overrides {
            map.entries.insert(target.clone(), container.clone());
        }
        map
    }

    pub fn resolve(&self, target: &str) -> String {
        self.entries
            .get(target)
            .cloned()
            .unwrap_or_else(|| target.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TargetMap {
    fn default() -> Self {
        Self {
            entries: DEFAULT_TARGETS
                .iter()
                .map(|(t, c)| (t.to_string(), c.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weeks() {
        let map = TargetMap::default();
        assert_eq!(map.resolve("week1"), "kafka-xray-broker");
        assert_eq!(map.resolve("week5"), "kafka-architect-broker");
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_unknown_passes_through() {
        let map = TargetMap::default();
        assert_eq!(map.resolve("my-broker"), "my-broker");
        assert_eq!(TargetMap::empty().resolve("week1"), "week1");
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let overrides = HashMap::from([
            ("week1".to_string(), "broker-a".to_string()),
            ("week6".to_string(), "kafka-capstone-broker".to_string()),
        ]);
        let map = TargetMap::with_overrides(&overrides);
        assert_eq!(map.resolve("week1"), "broker-a");
        assert_eq!(map.resolve("week2"), "kafka-builder-broker");
        assert_eq!(map.resolve("week6"), "kafka-capstone-broker");
    }
}
