//! Dangerous command patterns
//!
//! A blacklist scanned against the raw command string before tokenizing.
//! It is the secondary check: the allow-list grammar in
//! [`super::command`] decides what may run, this filter only catches
//! obviously hostile input early.

use once_cell::sync::Lazy;
use regex::Regex;

/// `(label, pattern)` pairs. Labels show up in logs, never in client replies.
const DEFAULT_DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    // Destructive file operations
    ("recursive delete", r"(?i)rm\s+-(rf|fr)"),
    ("raw disk write", r"(?i)dd\s+if="),
    ("filesystem format", r"(?i)mkfs"),
    // Output suppression hides what a command did from the learner
    ("null redirect", r"(?i)>\s*/dev/null"),
    // Network fetch piped into a shell
    ("fetch piped to shell", r"(?i)(curl|wget)\s+.*\|\s*(ba|z|da)?sh\b"),
    ("pipe to shell", r"(?i)\|\s*(ba|z|da)?sh\b"),
    // Code evaluation and command substitution
    ("eval", r"(?i)\beval\b"),
    ("command substitution", r"\$\("),
    ("backtick substitution", r"`"),
    // Privilege changes
    ("sudo", r"(?i)sudo"),
    ("world-writable chmod", r"(?i)chmod\s+(-R\s+)?777"),
    // Chained deletes
    ("chained rm (&&)", r"(?i)&&\s*rm\b"),
    ("chained rm (;)", r"(?i);\s*rm\b"),
];

static COMPILED: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DEFAULT_DANGEROUS_PATTERNS
        .iter()
        .filter_map(|(label, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*label, re)),
            Err(e) => {
                tracing::error!(label, error = %e, "Invalid dangerous pattern skipped");
                None
            }
        })
        .collect()
});

/// Return the label of the first dangerous pattern found in `command`.
pub fn find_dangerous_pattern(command: &str) -> Option<&'static str> {
    COMPILED
        .iter()
        .find(|(_, re)| re.is_match(command))
        .map(|(label, _)| *label)
}
