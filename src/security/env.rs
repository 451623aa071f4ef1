//! Environment variable sanitizer
//!
//! Clients may pass environment variables with an execute request. Only a
//! fixed set of lab variables is forwarded, and shell metacharacters are
//! stripped from their values.

use std::collections::{BTreeMap, HashMap};

const ALLOWED_ENV_VARS: &[&str] = &[
    "BOOTSTRAP_SERVERS",
    "KAFKA_BROKER_ID",
    "KAFKA_ZOOKEEPER_CONNECT",
    "TOPIC_NAME",
    "CONSUMER_GROUP",
    "CLUSTER_NAME",
];

const STRIPPED_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')'];

/// Keep allow-listed variables and strip `;&|`$()` from their values.
///
/// The result is ordered by name so spawned processes see a stable environment.
pub fn sanitize_env(vars: &HashMap<String, String>) -> BTreeMap<String, String> {
    vars.iter()
        .filter(|(key, _)| ALLOWED_ENV_VARS.contains(&key.as_str()))
        .map(|(key, value)| {
            let clean: String = value.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
            (key.clone(), clean)
        })
        .collect()
}
