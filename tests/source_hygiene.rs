use anyhow::Context;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

// Source-level checks that are cheap to enforce by grepping:
//
// - no literal-range string slices like `text[..50]`, which panic on UTF-8
//   boundaries (output chunks are arbitrary bytes from child processes)
// - processes are only spawned from `src/runtime`, so every spawn goes
//   through the validated executor path

fn visit_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir failed: {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            visit_rs_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn source_files() -> anyhow::Result<Vec<PathBuf>> {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut files = Vec::new();
    visit_rs_files(&src_dir, &mut files)?;
    Ok(files)
}

#[test]
fn no_literal_byte_index_string_slices() -> anyhow::Result<()> {
    let re_literal_range = Regex::new(r"\[\s*\.\.\s*\d+\s*\]").unwrap();
    let re_leading_range = Regex::new(r"\[\s*\d+\s*\.\.\s*\]").unwrap();
    let mut failures: Vec<String> = Vec::new();

    for path in source_files()? {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for (i, line) in text.lines().enumerate() {
            if re_literal_range.is_match(line) || re_leading_range.is_match(line) {
                failures.push(format!("{}:{}: {}", path.display(), i + 1, line.trim()));
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!(
            "Found unsafe literal-range slices in source files:\n{}",
            failures.join("\n")
        );
    }
    Ok(())
}

#[test]
fn processes_spawned_only_from_runtime() -> anyhow::Result<()> {
    let runtime_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join("runtime");
    let re_spawn = Regex::new(r"\bCommand::new\(").unwrap();
    let mut failures: Vec<String> = Vec::new();

    for path in source_files()? {
        if path.starts_with(&runtime_dir) {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for (i, line) in text.lines().enumerate() {
            if re_spawn.is_match(line) {
                failures.push(format!("{}:{}: {}", path.display(), i + 1, line.trim()));
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!(
            "Process spawning outside src/runtime:\n{}",
            failures.join("\n")
        );
    }
    Ok(())
}
