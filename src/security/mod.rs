//! Security module for labgate
//!
//! Everything that decides what a client is allowed to run: the command
//! validator and its tokenizer, the dangerous-pattern filter, the
//! environment sanitizer and working-directory resolution.

pub mod command;
pub mod env;
pub mod path;
pub mod patterns;
pub mod tokenize;

pub use command::{
    expand_workspace_mounts, is_valid_container_name, mount_sources, BaseCommand,
    CommandValidator, MountSource, ParsedCommand, Rejection,
    ValidationResult,
};
pub use env::sanitize_env;
pub use path::resolve_working_dir;
pub use tokenize::tokenize;
