//! Working-directory resolution
//!
//! A client may ask for a command to run in a sub-directory of the lab
//! directory. The request is purely lexical: absolute paths and any `..`
//! component are refused, so the result can never escape the base.

use std::path::{Component, Path, PathBuf};

use super::command::Rejection;

/// Resolve a client-supplied `requested` directory against `base`.
///
/// `None` or an empty string yields `base` itself.
pub fn resolve_working_dir(
    base: &Path,
    requested: Option<&str>,
) -> std::result::Result<PathBuf, Rejection> {
    let requested = match requested.map(str::trim) {
        None | Some("") => return Ok(base.to_path_buf()),
        Some(r) => r,
    };

    let mut resolved = base.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Rejection::WorkingDirectoryOutsideLab)
            }
        }
    }
    Ok(resolved)
}
