//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "server",
    "runtime",
    "executor",
    "security",
    "session",
    "rate_limit",
    "logging",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("server", &["host", "port", "allowed_origins", "max_body_bytes"]),
    ("runtime", &["runtime_type", "docker_cmd", "targets"]),
    (
        "executor",
        &[
            "default_timeout_secs",
            "max_timeout_secs",
            "progress_interval_secs",
            "working_dir",
            "output_buffer",
        ],
    ),
    ("security", &["extra_base_commands"]),
    (
        "session",
        &["require_authentication", "permissions", "outbound_buffer"],
    ),
    ("rate_limit", &["max_requests", "window_secs"]),
    ("logging", &["format", "level", "file"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic {
        level: DiagnosticLevel::Error,
        path,
        message,
    }
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: "Config must be a JSON object".to_string(),
            });
            return diagnostics;
        }
    };

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, fields) in KNOWN_SECTIONS {
        let Some(values) = obj.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };
        for key in values.keys() {
            if !fields.contains(&key.as_str()) {
                has_unknown = true;
                diagnostics.push(unknown_field(format!("{}.{}", section, key), key, fields));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: "All fields recognized".to_string(),
        });
    }

    // Security warnings
    if obj
        .get("session")
        .and_then(|s| s.get("require_authentication"))
        .and_then(|v| v.as_bool())
        == Some(false)
    {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warn,
            path: "session.require_authentication".to_string(),
            message: "Disabled; any client can execute commands".to_string(),
        });
    }
    if let Some(origins) = obj
        .get("server")
        .and_then(|s| s.get("allowed_origins"))
        .and_then(|v| v.as_array())
    {
        if origins.iter().any(|o| o.as_str() == Some("*")) {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warn,
                path: "server.allowed_origins".to_string(),
                message: "'*' is not supported; list origins explicitly".to_string(),
            });
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("port", "port"), 0);
        assert_eq!(levenshtein("prot", "port"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_suggest_field() {
        assert_eq!(
            suggest_field("executer", KNOWN_TOP_LEVEL).as_deref(),
            Some("did you mean 'executor'?")
        );
        assert!(suggest_field("zzzzzzzzzz", KNOWN_TOP_LEVEL).is_none());
    }

    #[test]
    fn test_clean_config() {
        let diags = validate_config(&json!({"server": {"port": 3001}}));
        assert!(diags.iter().all(|d| d.level == DiagnosticLevel::Ok));
    }

    #[test]
    fn test_unknown_section_field() {
        let diags = validate_config(&json!({"executor": {"default_timeout": 5}}));
        let err = diags
            .iter()
            .find(|d| d.level == DiagnosticLevel::Error)
            .unwrap();
        assert_eq!(err.path, "executor.default_timeout");
        assert!(err.to_string().contains("did you mean"));
    }

    #[test]
    fn test_not_an_object() {
        let diags = validate_config(&json!([1, 2]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }

    #[test]
    fn test_auth_disabled_warns() {
        let diags = validate_config(&json!({"session": {"require_authentication": false}}));
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Warn && d.path == "session.require_authentication"));
    }
}
