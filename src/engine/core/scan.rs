use super::types::{Job, JobId, JobStatus};
use crate::config::{BatchConfig, CollisionPolicy};
use crate::engine::error::EngineError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Check if a path carries one of the (normalized, dot-prefixed) extensions
pub fn is_media_file(path: &Path, extensions: &[String]) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            let dotted = format!(".{}", ext_str.to_lowercase());
            return extensions.iter().any(|e| *e == dotted);
        }
    }
    false
}

/// Walk `root` in file-name order and invoke a callback for each matching file.
///
/// An unreadable root is an error; unreadable entries below it are logged and skipped.
pub fn scan_streaming<F>(root: &Path, extensions: &[String], mut on_file: F) -> Result<(), EngineError>
where
    F: FnMut(PathBuf),
{
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(EngineError::Scan {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_file() && is_media_file(path, extensions) {
            on_file(path.to_path_buf());
        }
    }

    Ok(())
}

/// Scan a directory recursively for matching files
pub fn scan(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, EngineError> {
    let mut files = Vec::new();
    scan_streaming(root, extensions, |path| files.push(path))?;
    Ok(files)
}

/// First `stem_N.ext` (N = 1, 2, ...) that neither exists nor is in `claimed`
pub fn suffix_path(path: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| path.with_file_name(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists() && !claimed.contains(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Mirror `input` from `input_root` into `output_root`
pub fn derive_output_path(input: &Path, input_root: &Path, output_root: &Path) -> PathBuf {
    match input.strip_prefix(input_root) {
        Ok(rel) => output_root.join(rel),
        Err(_) => output_root.join(input.file_name().unwrap_or(input.as_os_str())),
    }
}

/// Build one job, applying the collision policy against what is on disk now.
///
/// `claimed` holds destinations already given to earlier jobs of the same
/// batch; a claimed destination always gets a suffixed name, whatever the
/// policy. Queued destinations are added to it.
pub fn build_job_from_path(
    id: JobId,
    input_path: PathBuf,
    input_root: &Path,
    output_root: &Path,
    policy: CollisionPolicy,
    claimed: &mut HashSet<PathBuf>,
) -> Job {
    let output_path = derive_output_path(&input_path, input_root, output_root);

    let mut job = if claimed.contains(&output_path) {
        let free = suffix_path(&output_path, claimed);
        Job::new(id, input_path, free)
    } else if output_path.exists() {
        match policy {
            CollisionPolicy::Skip => Job::skipped(id, input_path, output_path, "output exists"),
            CollisionPolicy::Overwrite => Job::new(id, input_path, output_path),
            CollisionPolicy::Suffix => {
                let free = suffix_path(&output_path, claimed);
                Job::new(id, input_path, free)
            }
        }
    } else {
        Job::new(id, input_path, output_path)
    };
    if job.status == JobStatus::Queued {
        claimed.insert(job.output_path.clone());
    }

    job.input_bytes = fs::metadata(&job.input_path).map(|m| m.len()).ok();
    debug!(
        job_id = job.id,
        input = %job.input_path.display(),
        output = %job.output_path.display(),
        status = %job.status,
        "scanned"
    );
    job
}

/// Number the files 1.. in the order given and build their jobs; no two
/// queued jobs share a destination
pub fn build_job_queue(
    files: Vec<PathBuf>,
    input_root: &Path,
    output_root: &Path,
    policy: CollisionPolicy,
) -> Vec<Job> {
    let mut claimed = HashSet::with_capacity(files.len());
    files
        .into_iter()
        .zip(1..)
        .map(|(input_path, id)| {
            build_job_from_path(id, input_path, input_root, output_root, policy, &mut claimed)
        })
        .collect()
}

/// Scan the configured input tree and build the batch's jobs
pub fn scan_batch(batch: &BatchConfig) -> Result<Vec<Job>, EngineError> {
    let files = scan(&batch.input_dir, &batch.extensions)?;
    Ok(build_job_queue(
        files,
        &batch.input_dir,
        &batch.output_dir,
        batch.collision_policy,
    ))
}
