//! Architecture enforcement tests.
//!
//! The crate is layered so that metadata only reaches disk through the
//! engine's write protocol. These tests read the source tree and fail when
//! a module reaches past its layer.

use std::fs;
use std::path::{Path, PathBuf};

/// Module directories (or files) and the crate modules they must not import.
const LAYERS: &[(&str, &[&str])] = &[
    (
        "src/core",
        &[
            "cache", "locking", "device", "format", "engine", "archive", "cli", "sim", "logging",
        ],
    ),
    (
        "src/device",
        &["cache", "locking", "format", "engine", "archive", "cli", "sim"],
    ),
    (
        "src/format",
        &["cache", "locking", "device", "engine", "archive", "cli", "sim"],
    ),
    ("src/cache", &["engine", "archive", "cli", "sim"]),
    ("src/locking", &["engine", "archive", "cli", "sim"]),
    ("src/sim", &["cache", "locking", "engine", "archive", "cli"]),
    ("src/engine", &["cli"]),
    ("src/archive", &["cli"]),
    ("src/logging.rs", &["cli", "engine"]),
];

/// Calls that move bytes to or from metadata areas and labels.
///
/// Commands must go through `vg_write`/`vg_commit`/`vg_revert` and the
/// archive module instead.
const RAW_IO_PATTERNS: &[&str] = &[
    "write_label(",
    "remove_label(",
    "create_instance(",
    ".precommit(",
    "MetadataArea",
];

fn rust_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap_or_else(|_| panic!("Failed to read {:?}", dir)) {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Source text without comments and with any trailing `#[cfg(test)]`
/// module cut off.
fn production_source(path: &Path) -> String {
    let content =
        fs::read_to_string(path).unwrap_or_else(|_| panic!("Failed to read {:?}", path));
    let code = match content.find("#[cfg(test)]") {
        Some(idx) => &content[..idx],
        None => content.as_str(),
    };
    code.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn layers_do_not_import_upward() {
    let mut violations = Vec::new();

    for (root, forbidden) in LAYERS {
        for file in rust_files(Path::new(root)) {
            let content = production_source(&file);
            for module in *forbidden {
                let needle = format!("crate::{}::", module);
                let braced = format!("crate::{}}}", module);
                if content.contains(&needle) || content.contains(&braced) {
                    violations.push(format!("{}: imports crate::{}", file.display(), module));
                }
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Layering violations found:\n{}",
        violations.join("\n")
    );
}

#[test]
fn commands_do_not_touch_metadata_areas() {
    let mut violations = Vec::new();

    for file in rust_files(Path::new("src/cli")) {
        let content = production_source(&file);
        for pattern in RAW_IO_PATTERNS {
            if content.contains(pattern) {
                violations.push(format!(
                    "{}: uses {} - go through the engine or archive module",
                    file.display(),
                    pattern
                ));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Commands bypass the write protocol:\n{}",
        violations.join("\n")
    );
}

#[test]
fn every_command_module_is_dispatched() {
    let dispatch = fs::read_to_string("src/cli/commands/mod.rs")
        .expect("Failed to read src/cli/commands/mod.rs");

    let mut missing = Vec::new();
    for file in rust_files(Path::new("src/cli/commands")) {
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .expect("utf-8 file name");
        if stem == "mod" {
            continue;
        }
        if !dispatch.contains(&format!("mod {};", stem)) || !dispatch.contains(&format!("{}::", stem))
        {
            missing.push(stem.to_string());
        }
    }

    assert!(
        missing.is_empty(),
        "Command modules not wired into dispatch: {:?}",
        missing
    );
}

#[test]
fn library_code_does_not_print() {
    // Only the CLI talks to the terminal; everything else logs through tracing.
    let mut violations = Vec::new();
    for root in [
        "src/core",
        "src/cache",
        "src/locking",
        "src/device",
        "src/format",
        "src/engine",
        "src/archive",
        "src/sim",
    ] {
        for file in rust_files(Path::new(root)) {
            let content = production_source(&file);
            if content.contains("println!(") || content.contains("eprintln!(") {
                violations.push(file.display().to_string());
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Library modules print directly:\n{}",
        violations.join("\n")
    );
}
