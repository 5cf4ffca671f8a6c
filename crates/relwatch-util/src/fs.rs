use std::path::{Path, PathBuf};

/// Ensure a directory exists, creating it and any parents if needed.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Atomically replace `target` with `bytes`.
///
/// The data is written to `<target>.tmp` first and then renamed over the
/// target, so a crash mid-write leaves the previous file intact.
pub fn atomic_replace(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    let tmp = tmp_path(target);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}

/// The sibling `.tmp` path used by [`atomic_replace`].
pub fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
