// Write-then-publish handling for encoder output

use crate::config::CollisionPolicy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Pick the sibling path the encoder writes into.
///
/// `movie.mp4` becomes `movie.partial.mp4`; if that is taken, `movie.partial1.mp4`,
/// `movie.partial2.mp4`, ... Paths without an extension use `name.partial`, `name.partial1`, ...
pub fn temp_output_path(output: &Path) -> PathBuf {
    let name = |n: Option<u32>| -> PathBuf {
        let marker = match n {
            Some(n) => format!("partial{}", n),
            None => "partial".to_string(),
        };
        match (output.file_stem(), output.extension()) {
            (Some(stem), Some(ext)) => output.with_file_name(format!(
                "{}.{}.{}",
                stem.to_string_lossy(),
                marker,
                ext.to_string_lossy()
            )),
            _ => {
                let file_name = output
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                output.with_file_name(format!("{}.{}", file_name, marker))
            }
        }
    };

    let first = name(None);
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| name(Some(n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Move a finished encode into place.
///
/// Under the overwrite policy an existing destination is removed first. The
/// temp file is left untouched on error so the caller can discard it.
pub fn publish(temp: &Path, output: &Path, policy: CollisionPolicy) -> io::Result<()> {
    if policy == CollisionPolicy::Overwrite && output.exists() {
        fs::remove_file(output)?;
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::rename(temp, output)?;
    debug!(temp = %temp.display(), output = %output.display(), "published output");
    Ok(())
}

/// Remove a partial encode. Failures are ignored.
pub fn discard(temp: &Path) {
    if temp.exists() {
        if let Err(e) = fs::remove_file(temp) {
            debug!(path = %temp.display(), error = %e, "could not remove partial output");
        }
    }
}
