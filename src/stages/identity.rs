//! Service account creation and permission normalization.
//!
//! The application ships its own permission tool; we prefer it and only
//! fall back to the manual policy when it is absent or fails. The rendered
//! configuration file gets a restrictive mode on both paths.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::ProvisionError;
use crate::exec::run_checked;
use crate::fsutil::{is_executable, set_mode};
use crate::runtime::{Runtime, SERVICE_USER, WEB_GROUP};

pub fn ensure_service_identity(rt: &Runtime) -> Result<(), ProvisionError> {
    let exists = rt
        .runner
        .run("getent", &["passwd", SERVICE_USER])
        .map(|out| out.success())
        .unwrap_or(false);
    if exists {
        // Re-run idempotence: a pre-existing account is kept, not recreated.
        rt.logger
            .warn(&format!("user {SERVICE_USER} already exists, keeping it"));
        return Ok(());
    }

    let home = rt.paths.app_home.to_string_lossy().into_owned();
    run_checked(
        rt.runner.as_ref(),
        "useradd",
        &[
            "-d",
            home.as_str(),
            "-c",
            "Znuny service user",
            "-g",
            WEB_GROUP,
            "-s",
            "/bin/bash",
            "-M",
            SERVICE_USER,
        ],
    )?;
    rt.logger
        .info(&format!("created user {SERVICE_USER} with home {home}"));
    Ok(())
}

pub fn normalize_permissions(rt: &Runtime) -> Result<(), ProvisionError> {
    let tool = rt.paths.app_home.join("bin/znuny.SetPermissions.pl");
    let mut tool_succeeded = false;

    if is_executable(&tool) {
        let tool_path = tool.to_string_lossy().into_owned();
        let home = rt.paths.app_home.to_string_lossy().into_owned();
        let user_arg = format!("--znuny-user={SERVICE_USER}");
        let group_arg = format!("--web-group={WEB_GROUP}");
        match rt.runner.run(
            &tool_path,
            &[user_arg.as_str(), group_arg.as_str(), home.as_str()],
        ) {
            Ok(out) if out.success() => {
                rt.logger.info("permissions set by znuny.SetPermissions.pl");
                tool_succeeded = true;
            }
            Ok(out) => rt.logger.warn(&format!(
                "znuny.SetPermissions.pl exited with status {}, applying manual policy",
                out.status
            )),
            Err(e) => rt.logger.warn(&format!(
                "znuny.SetPermissions.pl failed to run ({e}), applying manual policy"
            )),
        }
    } else {
        rt.logger
            .warn("znuny.SetPermissions.pl not available, applying manual policy");
    }

    if !tool_succeeded {
        manual_policy(rt)?;
    }

    force_config_mode(rt)?;
    Ok(())
}

/// Fallback policy: service ownership throughout, 755 everywhere, then the
/// stricter 770/660 override on the writable data tree.
fn manual_policy(rt: &Runtime) -> Result<(), ProvisionError> {
    let home = rt.paths.app_home.to_string_lossy().into_owned();
    let owner = format!("{SERVICE_USER}:{WEB_GROUP}");
    run_checked(
        rt.runner.as_ref(),
        "chown",
        &["-R", owner.as_str(), home.as_str()],
    )?;

    let root = fs::canonicalize(&rt.paths.app_home)
        .map_err(|e| ProvisionError::write(&rt.paths.app_home, e))?;
    set_modes_recursive(&root, 0o755, 0o755)?;
    let var_tree = root.join("var");
    if var_tree.is_dir() {
        set_modes_recursive(&var_tree, 0o770, 0o660)?;
    }
    Ok(())
}

/// The rendered configuration carries credentials; it is never left
/// world-readable regardless of which permission path ran.
fn force_config_mode(rt: &Runtime) -> Result<(), ProvisionError> {
    let config = rt.paths.config_file();
    if config.is_file() {
        set_mode(&config, 0o660).map_err(|e| ProvisionError::write(&config, e))?;
    }
    Ok(())
}

pub(crate) fn set_modes_recursive(
    root: &Path,
    dir_mode: u32,
    file_mode: u32,
) -> Result<(), ProvisionError> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            ProvisionError::write(root, std::io::Error::other(e.to_string()))
        })?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let mode = if entry.file_type().is_dir() {
            dir_mode
        } else {
            file_mode
        };
        set_mode(entry.path(), mode).map_err(|e| ProvisionError::write(entry.path(), e))?;
    }
    Ok(())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).expect("metadata").permissions().mode() & 0o777
    }

    #[test]
    fn writable_tree_gets_stricter_modes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().join("znuny");
        fs::create_dir_all(home.join("var/article")).expect("mkdir");
        fs::create_dir_all(home.join("bin")).expect("mkdir");
        fs::write(home.join("bin/tool.pl"), "#!/usr/bin/perl\n").expect("write");
        fs::write(home.join("var/article/attachment.txt"), "data").expect("write");

        set_modes_recursive(&home, 0o755, 0o755).expect("base pass");
        set_modes_recursive(&home.join("var"), 0o770, 0o660).expect("override pass");

        assert_eq!(mode_of(&home.join("bin")), 0o755);
        assert_eq!(mode_of(&home.join("bin/tool.pl")), 0o755);
        assert_eq!(mode_of(&home.join("var")), 0o770);
        assert_eq!(mode_of(&home.join("var/article")), 0o770);
        assert_eq!(mode_of(&home.join("var/article/attachment.txt")), 0o660);
    }
}
