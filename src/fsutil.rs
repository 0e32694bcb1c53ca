//! Small filesystem helpers shared by the stages.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write a file atomically: temp name in the same directory, fsync, rename.
/// Prevents half-written unit or config files if the run dies mid-write.
pub fn write_file_atomic(path: &Path, content: &str) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("unit.service");
        write_file_atomic(&path, "first").expect("write");
        write_file_atomic(&path, "second").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!path.with_extension("tmp").exists());
    }
}
