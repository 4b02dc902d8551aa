use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};

// Exclusive-create lock file next to the catalog. Guards against two overlapping pipeline runs
// rewriting the same catalog; a crashed run leaves the file behind and it must be removed by hand.
const LOCK_SUFFIX: &str = ".lock";

fn lock_path_for(catalog_path: &Path) -> PathBuf {
    super::sibling_path(catalog_path, LOCK_SUFFIX)
}

pub fn try_acquire_catalog_lock(catalog_path: &Path) -> anyhow::Result<bool> {
    let path = lock_path_for(catalog_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create lock {}", path.display()))
        }
    };

    writeln!(file, "pid={} acquired_at={}", std::process::id(), chrono::Utc::now())
        .with_context(|| format!("failed to write lock {}", path.display()))?;
    Ok(true)
}

pub fn release_catalog_lock(catalog_path: &Path) -> anyhow::Result<()> {
    let path = lock_path_for(catalog_path);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to release lock {}", path.display())),
    }
}
