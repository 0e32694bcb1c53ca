//! Unattended Znuny provisioning for Debian hosts.
//!
//! The crate drives the full install path (PostgreSQL role and database,
//! Apache with mod_perl, release download and extraction, service identity,
//! configuration rendering, systemd wiring, schema bootstrap, verification
//! and credential reporting) as a linear workflow of stages, plus the
//! matching best-effort uninstall. Everything that touches the host goes
//! through the seams in [`exec`], [`net`] and [`runtime::HostPaths`], so the
//! whole workflow runs against scripted collaborators in tests.

pub mod cli;
pub mod context;
pub mod error;
pub mod exec;
pub mod facts;
pub mod fsutil;
pub mod logger;
pub mod net;
pub mod runtime;
pub mod secret;
pub mod stages;
pub mod workflow;

use anyhow::{bail, Result};

use crate::context::RunContext;
use crate::runtime::{InstallOptions, Runtime};
use crate::stages::rollback;

/// Top-level entry shared by the binary and the integration tests.
pub fn run(rt: &Runtime, opts: &InstallOptions, uninstall: bool) -> Result<()> {
    if uninstall {
        return run_uninstall(rt, opts);
    }

    let mut ctx = RunContext::default();
    match workflow::run_install(rt, opts, &mut ctx) {
        Ok(()) => Ok(()),
        Err(e) => {
            rt.logger.error(&format!("provisioning failed: {e}"));
            if let Some(stage) = ctx.furthest_completed() {
                rt.logger
                    .info(&format!("last completed stage: {stage}"));
            }
            rt.logger
                .info(&format!("full log: {}", rt.logger.path().display()));

            let choice = rollback::choose_rollback(opts.interactive);
            let report = rollback::rollback(rt, &opts.db_name, &opts.db_user, choice);
            if !report.is_clean() {
                rt.logger.warn(&format!(
                    "{} cleanup step(s) failed; see the log",
                    report.failures.len()
                ));
            }
            Err(e.into())
        }
    }
}

fn run_uninstall(rt: &Runtime, opts: &InstallOptions) -> Result<()> {
    if !rt.privileged {
        bail!("administrative privileges required; re-run as root");
    }
    let report = rollback::uninstall(rt, &opts.db_name, &opts.db_user);
    if report.is_clean() {
        rt.logger.plain("Znuny has been removed from this host.");
        Ok(())
    } else {
        bail!(
            "{} cleanup step(s) failed; see {}",
            report.failures.len(),
            rt.logger.path().display()
        )
    }
}
