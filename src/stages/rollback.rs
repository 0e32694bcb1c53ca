//! Best-effort rollback and uninstall.
//!
//! Every cleanup step is individually guarded: a failure is logged and
//! collected into the report, and the remaining steps still run. The steps
//! tolerate absent resources, so cleaning up after a partial run (or a host
//! that was never provisioned) is safe.

use std::fs;

use anyhow::{bail, Result};

use crate::runtime::{Runtime, SERVICE_NAME, SERVICE_USER};

/// What to do with partial state after a failed install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackChoice {
    /// Leave everything for inspection; the default when not interactive.
    Keep,
    RemoveApp,
    RemoveAppAndDatabase,
}

/// Outcome of a cleanup pass. Failures are reported, never raised.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub failures: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Unconditional uninstall: application, services, database, identity.
pub fn uninstall(rt: &Runtime, db_name: &str, db_user: &str) -> CleanupReport {
    cleanup(rt, db_name, db_user, true)
}

/// Rollback after a failed install, scoped by the operator's choice.
pub fn rollback(rt: &Runtime, db_name: &str, db_user: &str, choice: RollbackChoice) -> CleanupReport {
    match choice {
        RollbackChoice::Keep => {
            rt.logger
                .info("keeping partial state for inspection");
            CleanupReport::default()
        }
        RollbackChoice::RemoveApp => cleanup(rt, db_name, db_user, false),
        RollbackChoice::RemoveAppAndDatabase => cleanup(rt, db_name, db_user, true),
    }
}

/// Ask the operator what to do with partial state; non-interactive runs
/// keep it.
pub fn choose_rollback(interactive: bool) -> RollbackChoice {
    if !interactive {
        return RollbackChoice::Keep;
    }
    const KEEP: &str = "Keep everything for inspection";
    const APP: &str = "Remove the application only";
    const ALL: &str = "Remove the application and the database";
    match inquire::Select::new(
        "Provisioning failed. What should happen to the partial state?",
        vec![KEEP, APP, ALL],
    )
    .prompt()
    {
        Ok(APP) => RollbackChoice::RemoveApp,
        Ok(ALL) => RollbackChoice::RemoveAppAndDatabase,
        // Cancelled prompt behaves like the non-interactive default.
        _ => RollbackChoice::Keep,
    }
}

fn cleanup(rt: &Runtime, db_name: &str, db_user: &str, with_database: bool) -> CleanupReport {
    let mut report = CleanupReport::default();

    step(rt, &mut report, "stop application daemon", |rt| {
        ignore_exit(rt, "systemctl", &["stop", SERVICE_NAME]);
        ignore_exit(rt, "systemctl", &["disable", SERVICE_NAME]);
        Ok(())
    });

    step(rt, &mut report, "stop web server", |rt| {
        ignore_exit(rt, "systemctl", &["stop", "apache2"]);
        ignore_exit(rt, "systemctl", &["disable", "apache2"]);
        Ok(())
    });

    step(rt, &mut report, "remove web server config", |rt| {
        ignore_exit(rt, "a2disconf", &["znuny"]);
        let link = rt.paths.apache_fragment_link();
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)?;
        }
        Ok(())
    });

    step(rt, &mut report, "remove supervisor unit", |rt| {
        let unit = rt.paths.unit_file();
        if unit.exists() {
            fs::remove_file(&unit)?;
        }
        checked(rt, "systemctl", &["daemon-reload"])
    });

    if with_database {
        step(rt, &mut report, "drop database and role", |rt| {
            checked(
                rt,
                "su",
                &[
                    "-",
                    "postgres",
                    "-c",
                    &format!("psql -qc \"DROP DATABASE IF EXISTS {db_name};\""),
                ],
            )?;
            checked(
                rt,
                "su",
                &[
                    "-",
                    "postgres",
                    "-c",
                    &format!("psql -qc \"DROP ROLE IF EXISTS {db_user};\""),
                ],
            )
        });
    }

    step(rt, &mut report, "remove installed files", |rt| {
        remove_install_tree(rt)
    });

    step(rt, &mut report, "remove service identity", |rt| {
        let exists = rt
            .runner
            .run("getent", &["passwd", SERVICE_USER])
            .map(|out| out.success())
            .unwrap_or(false);
        if exists {
            checked(rt, "userdel", &[SERVICE_USER])?;
        }
        Ok(())
    });

    // The host depended on its web server before we touched it; leave it
    // running.
    step(rt, &mut report, "restart web server", |rt| {
        ignore_exit(rt, "systemctl", &["enable", "apache2"]);
        ignore_exit(rt, "systemctl", &["restart", "apache2"]);
        Ok(())
    });

    if report.is_clean() {
        rt.logger.info("cleanup finished");
    } else {
        for (name, error) in &report.failures {
            rt.logger
                .warn(&format!("cleanup step {name:?} failed: {error}"));
        }
    }
    report
}

/// Run one guarded cleanup step; failure is recorded, not raised.
fn step(
    rt: &Runtime,
    report: &mut CleanupReport,
    name: &str,
    action: impl FnOnce(&Runtime) -> Result<()>,
) {
    rt.logger.info(name);
    if let Err(e) = action(rt) {
        report.failures.push((name.to_string(), e.to_string()));
    }
}

/// Invoke a tool whose non-zero exit is expected when the resource is
/// already absent (stopping a never-installed unit, say).
fn ignore_exit(rt: &Runtime, program: &str, args: &[&str]) {
    let _ = rt.runner.run(program, args);
}

fn checked(rt: &Runtime, program: &str, args: &[&str]) -> Result<()> {
    let out = rt.runner.run(program, args)?;
    if !out.success() {
        bail!(
            "{program} exited with status {}: {}",
            out.status,
            out.stderr.trim()
        );
    }
    Ok(())
}

/// Remove the versioned trees, downloaded archives and the stable symlink.
fn remove_install_tree(rt: &Runtime) -> Result<()> {
    let link = &rt.paths.app_home;
    if fs::symlink_metadata(link).is_ok() {
        if link.is_dir() && fs::read_link(link).is_err() {
            fs::remove_dir_all(link)?;
        } else {
            fs::remove_file(link)?;
        }
    }

    let Ok(entries) = fs::read_dir(&rt.paths.install_root) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("znuny-") {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
