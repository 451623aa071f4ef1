//! Command validator
//!
//! Decides whether a command typed into the lab terminal may run. The
//! decision is an allow-list grammar over the tokenized command:
//!
//! ```text
//! command   := docker SUB args | docker-compose SUB args | REGISTERED args
//! docker    SUB ∈ {ps logs exec stats inspect top run stop start restart compose}
//!   exec    := [flags] CONTAINER PROGRAM args   (PROGRAM: kafka tool | jmx | safe utility)
//!   run     := args mentioning an approved image; mount sources under ./ or ${PWD}
//! compose   SUB ∈ {up down ps logs exec stop start restart}
//! ```
//!
//! Before tokenizing, the raw string is scanned for dangerous patterns
//! ([`super::patterns`]); a hit short-circuits the grammar. Validation is
//! pure: no I/O, no shared state, the same input always gives the same
//! answer.

use std::ops::Range;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::patterns::find_dangerous_pattern;
use super::tokenize::tokenize;

const DOCKER_SUBCOMMANDS: &[&str] = &[
    "ps", "logs", "exec", "stats", "inspect", "top", "run", "stop", "start", "restart", "compose",
];

const COMPOSE_SUBCOMMANDS: &[&str] = &[
    "up", "down", "ps", "logs", "exec", "stop", "start", "restart",
];

/// Base commands accepted without further grammar (reserved for future policy).
const DEFAULT_REGISTERED_COMMANDS: &[&str] = &["kubectl"];

const KAFKA_TOOLS: &[&str] = &[
    "kafka-topics",
    "kafka-console-producer",
    "kafka-console-consumer",
    "kafka-consumer-groups",
    "kafka-broker-api-versions",
    "kafka-producer-perf-test",
    "kafka-consumer-perf-test",
    "kafka-configs",
    "kafka-acls",
    "kafka-reassign-partitions",
];

const SAFE_UTILITIES: &[&str] = &["sh", "bash", "cat", "grep", "tail", "head", "ls", "echo"];

const APPROVED_IMAGES: &[&str] = &[
    "newrelic/nri-kafka",
    "newrelic/infrastructure",
    "confluentinc/cp-kafka",
    "confluentinc/cp-zookeeper",
    "bitnami/kafka",
];

/// `docker exec` options that consume the following argument.
const EXEC_VALUE_FLAGS: &[&str] = &[
    "-e",
    "--env",
    "--env-file",
    "-u",
    "--user",
    "-w",
    "--workdir",
    "--detach-keys",
];

/// Short `docker run` switches that take no value and may be clustered.
const RUN_SHORT_SWITCHES: &[char] = &['d', 'i', 't', 'P'];

/// The shell variable lab commands use for the lab directory.
const WORKSPACE_VAR: &str = "${PWD}";

static CONTAINER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());

/// Why a command was refused. The `Display` text is what the client sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Invalid command format")]
    InvalidFormat,
    #[error("Empty command")]
    EmptyCommand,
    #[error("Command contains dangerous pattern")]
    DangerousPattern,
    #[error("Command '{0}' is not allowed")]
    CommandNotAllowed(String),
    #[error("Incomplete docker command")]
    IncompleteDocker,
    #[error("Docker subcommand '{0}' is not allowed")]
    DockerSubcommandNotAllowed(String),
    #[error("No container specified")]
    NoContainer,
    #[error("Invalid container name")]
    InvalidContainerName,
    #[error("Command not allowed in docker exec")]
    ExecProgramNotAllowed,
    #[error("Only approved images can be run")]
    ImageNotApproved,
    #[error("Volume mounts must be from current directory")]
    VolumeOutsideWorkspace,
    #[error("Incomplete docker-compose command")]
    IncompleteCompose,
    #[error("Docker-compose subcommand '{0}' is not allowed")]
    ComposeSubcommandNotAllowed(String),
    #[error("Working directory must stay inside the lab directory")]
    WorkingDirectoryOutsideLab,
}

/// The base command of an accepted command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseCommand {
    Docker,
    DockerCompose,
    /// `kubectl` or a base command registered through configuration.
    Registered(String),
}

/// A command that passed the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub base: BaseCommand,
    pub sub_command: Option<String>,
    /// Arguments after the base command (and sub-command, when present).
    pub args: Vec<String>,
    /// The trimmed original text. This is what gets executed.
    pub sanitized: String,
}

/// Wire form of a validation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn accepted(sanitized: impl Into<String>) -> Self {
        Self {
            valid: true,
            sanitized_command: Some(sanitized.into()),
            reason: None,
        }
    }

    pub fn rejected(rejection: &Rejection) -> Self {
        Self {
            valid: false,
            sanitized_command: None,
            reason: Some(rejection.to_string()),
        }
    }
}

impl From<std::result::Result<ParsedCommand, Rejection>> for ValidationResult {
    fn from(outcome: std::result::Result<ParsedCommand, Rejection>) -> Self {
        match outcome {
            Ok(parsed) => ValidationResult::accepted(parsed.sanitized),
            Err(rejection) => ValidationResult::rejected(&rejection),
        }
    }
}

/// Returns true if `name` is a syntactically safe container name.
pub fn is_valid_container_name(name: &str) -> bool {
    CONTAINER_NAME_RE.is_match(name)
}

/// Allow-list command validator.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    registered: Vec<String>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self {
            registered: DEFAULT_REGISTERED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CommandValidator {
    /// Create a validator with the default registered base commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional base command accepted without grammar checks.
    pub fn register_base_command(mut self, command: &str) -> Self {
        let command = command.trim();
        if !command.is_empty() && !self.registered.iter().any(|c| c == command) {
            self.registered.push(command.to_string());
        }
        self
    }

    /// Validate `command` and return the wire-form decision.
    pub fn validate(&self, command: &str) -> ValidationResult {
        self.check(command).into()
    }

    /// Validate an arbitrary JSON value as a command (non-strings are refused).
    pub fn validate_value(&self, value: Option<&serde_json::Value>) -> ValidationResult {
        match value.and_then(|v| v.as_str()) {
            Some(command) => self.validate(command),
            None => ValidationResult::rejected(&Rejection::InvalidFormat),
        }
    }

    /// Validate `command` and return the parsed structure on success.
    pub fn check(&self, command: &str) -> std::result::Result<ParsedCommand, Rejection> {
        let original = command.trim();
        if original.is_empty() {
            return Err(Rejection::InvalidFormat);
        }

        if let Some(label) = find_dangerous_pattern(original) {
            tracing::debug!(pattern = label, "Command matched dangerous pattern");
            return Err(Rejection::DangerousPattern);
        }

        let mut parts = tokenize(original);
        if parts.is_empty() {
            return Err(Rejection::EmptyCommand);
        }
        let base = parts.remove(0);

        match base.as_str() {
            "docker" => self.check_docker(parts, original),
            "docker-compose" => check_compose(parts, original),
            other if self.registered.iter().any(|c| c == other) => Ok(ParsedCommand {
                base: BaseCommand::Registered(base.clone()),
                sub_command: None,
                args: parts,
                sanitized: original.to_string(),
            }),
            other => Err(Rejection::CommandNotAllowed(other.to_string())),
        }
    }

    /// Validate `command` as something to run inside `container` via `sh -c`.
    ///
    /// The request is judged exactly like `docker exec <container> <command>`,
    /// so the container-name grammar and the exec program allow-list apply.
    /// On success the sanitized text is the trimmed `command` itself.
    pub fn check_in_container(
        &self,
        container: &str,
        command: &str,
    ) -> std::result::Result<ParsedCommand, Rejection> {
        let original = command.trim();
        if original.is_empty() {
            return Err(Rejection::InvalidFormat);
        }
        if !is_valid_container_name(container) {
            return Err(Rejection::InvalidContainerName);
        }
        let mut parsed = self.check(&format!("docker exec {} {}", container, original))?;
        parsed.sanitized = original.to_string();
        Ok(parsed)
    }

    fn check_docker(
        &self,
        mut parts: Vec<String>,
        original: &str,
    ) -> std::result::Result<ParsedCommand, Rejection> {
        if parts.is_empty() {
            return Err(Rejection::IncompleteDocker);
        }
        let sub = parts.remove(0);
        if !DOCKER_SUBCOMMANDS.contains(&sub.as_str()) {
            return Err(Rejection::DockerSubcommandNotAllowed(sub));
        }

        match sub.as_str() {
            "exec" => check_exec_args(&parts)?,
            "run" => check_run_args(&parts)?,
            _ => {}
        }

        Ok(ParsedCommand {
            base: BaseCommand::Docker,
            sub_command: Some(sub),
            args: parts,
            sanitized: original.to_string(),
        })
    }
}

fn check_compose(
    mut parts: Vec<String>,
    original: &str,
) -> std::result::Result<ParsedCommand, Rejection> {
    if parts.is_empty() {
        return Err(Rejection::IncompleteCompose);
    }
    let sub = parts.remove(0);
    if !COMPOSE_SUBCOMMANDS.contains(&sub.as_str()) {
        return Err(Rejection::ComposeSubcommandNotAllowed(sub));
    }
    Ok(ParsedCommand {
        base: BaseCommand::DockerCompose,
        sub_command: Some(sub),
        args: parts,
        sanitized: original.to_string(),
    })
}

/// `docker exec [OPTIONS] CONTAINER PROGRAM [ARG...]`
fn check_exec_args(args: &[String]) -> std::result::Result<(), Rejection> {
    let mut index = 0;
    while index < args.len() && args[index].starts_with('-') {
        let takes_value = EXEC_VALUE_FLAGS.contains(&args[index].as_str());
        index += if takes_value { 2 } else { 1 };
    }

    let container = args.get(index).ok_or(Rejection::NoContainer)?;
    if !is_valid_container_name(container) {
        return Err(Rejection::InvalidContainerName);
    }

    match args.get(index + 1) {
        Some(program) if is_allowed_exec_program(program) => Ok(()),
        _ => Err(Rejection::ExecProgramNotAllowed),
    }
}

fn is_allowed_exec_program(program: &str) -> bool {
    let name = program.rsplit('/').next().unwrap_or(program);
    let tool = name.strip_suffix(".sh").unwrap_or(name);

    KAFKA_TOOLS.contains(&tool)
        || tool == "java"
        || tool.starts_with("jmxterm")
        || SAFE_UTILITIES.contains(&name)
}

/// `docker run ...` must name an approved image and only mount local paths.
fn check_run_args(args: &[String]) -> std::result::Result<(), Rejection> {
    if !args.iter().any(|arg| is_approved_image(arg)) {
        return Err(Rejection::ImageNotApproved);
    }

    for source in mount_sources(args) {
        if !is_workspace_path(source.path(args)) {
            return Err(Rejection::VolumeOutsideWorkspace);
        }
    }
    Ok(())
}

/// Host paths may only name the lab directory or something below it.
fn is_workspace_path(host: &str) -> bool {
    let rest = if let Some(rest) = host.strip_prefix("./") {
        rest
    } else if let Some(rest) = host.strip_prefix(WORKSPACE_VAR) {
        if !(rest.is_empty() || rest.starts_with('/')) {
            return false;
        }
        rest
    } else {
        return false;
    };
    !rest.split('/').any(|component| component == "..")
}

/// A host path named by a `docker run` mount option: the argument it sits
/// in and its byte range inside that argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSource {
    pub arg: usize,
    pub range: Range<usize>,
}

impl MountSource {
    pub fn path<'a>(&self, args: &'a [String]) -> &'a str {
        &args[self.arg][self.range.clone()]
    }
}

/// Find every host path mounted by the `docker run` arguments `args`.
///
/// Recognises `-v X`, `-vX`, `-v=X`, clustered switches such as `-itv X`,
/// `--volume X`, `--volume=X`, and bind sources of `--mount`.
pub fn mount_sources(args: &[String]) -> Vec<MountSource> {
    let mut sources = Vec::new();
    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();
        let option = if arg == "--volume" {
            Some((index + 1, 0, false))
        } else if arg.starts_with("--volume=") {
            Some((index, "--volume=".len(), false))
        } else if arg == "--mount" {
            Some((index + 1, 0, true))
        } else if arg.starts_with("--mount=") {
            Some((index, "--mount=".len(), true))
        } else if arg.starts_with('-') && !arg.starts_with("--") {
            short_volume_offset(arg).map(|offset| {
                if offset == arg.len() {
                    (index + 1, 0, false)
                } else {
                    (index, offset, false)
                }
            })
        } else {
            None
        };

        let Some((value_arg, offset, is_mount)) = option else {
            index += 1;
            continue;
        };
        if let Some(value) = args.get(value_arg) {
            let found = if is_mount {
                bind_source(value, offset)
            } else {
                let len = value[offset..].find(':').unwrap_or(value.len() - offset);
                Some(offset..offset + len)
            };
            if let Some(range) = found {
                sources.push(MountSource {
                    arg: value_arg,
                    range,
                });
            }
        }
        index = value_arg.max(index) + 1;
    }
    sources
}

/// Offset of the `-v` value inside a short-option cluster like `-itv/x:/y`.
fn short_volume_offset(arg: &str) -> Option<usize> {
    for (pos, c) in arg.char_indices().skip(1) {
        match c {
            'v' => {
                let offset = pos + 1;
                return Some(if arg[offset..].starts_with('=') {
                    offset + 1
                } else {
                    offset
                });
            }
            c if RUN_SHORT_SWITCHES.contains(&c) => continue,
            _ => return None,
        }
    }
    None
}

/// Range of the host path in a `--mount` field list, starting at `offset`.
///
/// Named volumes cannot contain `/`, so a source with one is a host path
/// whatever the `type` says.
fn bind_source(value: &str, offset: usize) -> Option<Range<usize>> {
    let mut is_bind = false;
    let mut source = None;
    let mut start = offset;
    for field in value[offset..].split(',') {
        if let Some((key, val)) = field.split_once('=') {
            let val_start = start + key.len() + 1;
            match key.trim() {
                "type" => is_bind = val.trim() == "bind",
                "source" | "src" => source = Some(val_start..val_start + val.len()),
                _ => {}
            }
        }
        start += field.len() + 1;
    }
    let range = source?;
    let path = &value[range.clone()];
    (is_bind || path.contains('/')).then_some(range)
}

/// Replace a leading `${PWD}` in each mount source of `docker run`
/// arguments with `dir`, the way a shell would have.
pub fn expand_workspace_mounts(args: &mut [String], dir: &Path) {
    let dir = dir.display().to_string();
    // later sources first so earlier ranges stay valid within one argument
    for source in mount_sources(args).into_iter().rev() {
        let arg = &mut args[source.arg];
        if arg[source.range.clone()].starts_with(WORKSPACE_VAR) {
            let start = source.range.start;
            arg.replace_range(start..start + WORKSPACE_VAR.len(), &dir);
        }
    }
}

fn is_approved_image(arg: &str) -> bool {
    APPROVED_IMAGES.iter().any(|image| {
        arg.strip_prefix(*image)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':') || rest.starts_with('@'))
    })
}
