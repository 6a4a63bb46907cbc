//! Destination naming for incoming transfers.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Return the file name component of a transport-supplied path.
///
/// Both `/` and `\` count as separators, since peers may run on any platform.
///
/// # Errors
///
/// Returns [`Error::InvalidFileName`] if nothing is left after the last
/// separator.
pub fn strip_directory(path: &str) -> Result<&str> {
    let name = path
        .rfind(['/', '\\'])
        .map_or(path, |idx| &path[idx + 1..]);

    if name.is_empty() {
        return Err(Error::InvalidFileName(path.to_string()));
    }
    Ok(name)
}

/// Pick a path under `base_dir` that does not exist yet.
///
/// Returns `base_dir/desired_name` unchanged when it is free. Otherwise
/// appends `(N)` to the stem, continuing from an existing `(N)` suffix if the
/// name already carries one.
///
/// # Errors
///
/// Returns [`Error::NameSpaceExhausted`] if the counter overflows.
pub fn unique_destination(base_dir: &Path, desired_name: &str) -> Result<PathBuf> {
    let candidate = base_dir.join(desired_name);
    if !occupied(&candidate) {
        return Ok(candidate);
    }

    let (stem, extension) = split_extension(desired_name);
    let (stem, mut counter) = split_counter(stem).unwrap_or((stem, 1));

    loop {
        let candidate = base_dir.join(format!("{stem}({counter}){extension}"));
        if !occupied(&candidate) {
            tracing::debug!(
                "'{}' exists, using '{}'",
                desired_name,
                candidate.display()
            );
            return Ok(candidate);
        }
        counter = counter
            .checked_add(1)
            .ok_or_else(|| Error::NameSpaceExhausted(desired_name.to_string()))?;
    }
}

/// Dangling symlinks count as occupied: opening them would write elsewhere.
fn occupied(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Split `name` into stem and extension, keeping the dot with the extension.
///
/// A leading dot (`.bashrc`) does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Split a trailing `(N)` off `stem`.
fn split_counter(stem: &str) -> Option<(&str, u64)> {
    let inner = stem.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let digits = &inner[open + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let counter = digits.parse().ok()?;
    Some((&stem[..open], counter))
}
