//! Linear provisioning workflow.
//!
//! Stages run strictly in [`Stage::ALL`] order; the first failure aborts the
//! run and leaves the rollback decision to the caller. Verification is the
//! one non-fatal stage: an unhealthy probe is logged, not raised.

use std::thread;

use crate::context::{RunContext, Stage};
use crate::error::ProvisionError;
use crate::runtime::{InstallOptions, Runtime};
use crate::stages::{
    credentials, database, dbinit, fetch, identity, packages, preflight, render, services, verify,
};

pub fn run_install(
    rt: &Runtime,
    opts: &InstallOptions,
    ctx: &mut RunContext,
) -> Result<(), ProvisionError> {
    rt.logger.plain(&format!(
        "Provisioning Znuny {} (database {}, user {})",
        opts.version, opts.db_name, opts.db_user
    ));
    rt.logger
        .info(&format!("run log: {}", rt.logger.path().display()));
    if !opts.preflight_pause.is_zero() {
        rt.logger.plain(&format!(
            "Starting in {} seconds; press Ctrl-C to abort.",
            opts.preflight_pause.as_secs()
        ));
        thread::sleep(opts.preflight_pause);
    }

    let total = Stage::ALL.len();
    for (index, stage) in Stage::ALL.into_iter().enumerate() {
        rt.logger
            .plain(&format!("[{}/{total}] {stage}", index + 1));
        run_stage(rt, opts, ctx, stage)?;
        ctx.mark_completed(stage);
    }
    Ok(())
}

fn run_stage(
    rt: &Runtime,
    opts: &InstallOptions,
    ctx: &mut RunContext,
    stage: Stage,
) -> Result<(), ProvisionError> {
    match stage {
        Stage::Preflight => preflight::check_preconditions(rt, ctx),
        Stage::Packages => packages::install_stage(rt, ctx),
        Stage::Database => database::provision_database(rt, ctx, opts),
        Stage::Fetch => fetch::fetch_and_install(rt, opts),
        Stage::Identity => {
            identity::ensure_service_identity(rt)?;
            identity::normalize_permissions(rt)
        }
        Stage::Config => render::render_config(rt, ctx, opts),
        Stage::Services => services::wire_services(rt, opts),
        Stage::DbInit => dbinit::initialize_database(rt, ctx, opts),
        Stage::Verify => {
            if !verify::verify(rt) {
                rt.logger
                    .warn("one or more health probes failed; see the log for details");
            }
            Ok(())
        }
        Stage::Credentials => credentials::save_credentials(rt, ctx, opts),
    }
}
