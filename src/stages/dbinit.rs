//! Schema, seed content and administrative account bootstrap.
//!
//! Two variants, selected by the installer mode: the automated variant
//! drives the application's own SQL scripts and console tool; the
//! web-installer variant verifies connectivity with a trial query and
//! leaves schema creation to the application's web wizard.

use std::fs;

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::runtime::{InitMode, InstallOptions, Runtime, SERVICE_USER, WEB_GROUP};
use crate::secret::Credential;

const ADMIN_PASSWORD_LENGTH: usize = 25;

/// Directories the daemon and web frontend write into at runtime.
const RUNTIME_DIRS: &[&str] = &["var/article", "var/log", "var/run", "var/sessions", "var/tmp"];

const SCHEMA_SCRIPTS: &[&str] = &[
    "scripts/database/znuny-schema.postgresql.sql",
    "scripts/database/znuny-initial_insert.postgresql.sql",
    "scripts/database/znuny-schema-post.postgresql.sql",
];

pub fn initialize_database(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    match opts.init_mode {
        InitMode::Automated => automated(rt, ctx, opts),
        InitMode::WebInstaller => connectivity_only(rt, ctx, opts),
    }
}

fn automated(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    for dir in RUNTIME_DIRS {
        let path = rt.paths.app_home.join(dir);
        fs::create_dir_all(&path)
            .map_err(|e| ProvisionError::DbInit(format!("create {}: {e}", path.display())))?;
    }
    let var_tree = rt.paths.app_home.join("var").to_string_lossy().into_owned();
    let owner = format!("{SERVICE_USER}:{WEB_GROUP}");
    let chown = rt
        .runner
        .run("chown", &["-R", owner.as_str(), var_tree.as_str()])
        .map_err(|e| ProvisionError::DbInit(format!("chown: {e}")))?;
    if !chown.success() {
        return Err(ProvisionError::DbInit(format!(
            "chown {var_tree} exited with status {}",
            chown.status
        )));
    }

    let password = ctx
        .db_password
        .as_ref()
        .ok_or_else(|| ProvisionError::DbInit("database password not yet generated".to_string()))?;
    let conninfo = format!(
        "postgresql://{}:{}@127.0.0.1/{}",
        opts.db_user, password.value, opts.db_name
    );
    for script in SCHEMA_SCRIPTS {
        let path = rt.paths.app_home.join(script).to_string_lossy().into_owned();
        rt.logger.info(&format!("applying {script}"));
        let out = rt
            .runner
            .run(
                "psql",
                &[
                    conninfo.as_str(),
                    "-v",
                    "ON_ERROR_STOP=1",
                    "-q",
                    "-f",
                    path.as_str(),
                ],
            )
            .map_err(|e| ProvisionError::DbInit(format!("psql: {e}")))?;
        if !out.success() {
            return Err(ProvisionError::DbInit(format!(
                "{script} failed with status {}: {}",
                out.status,
                out.stderr.trim()
            )));
        }
    }

    let admin = Credential::generate(ADMIN_PASSWORD_LENGTH);
    console(
        rt,
        &[
            "Admin::User::Add",
            "--user-name",
            "admin",
            "--first-name",
            "Znuny",
            "--last-name",
            "Admin",
            "--email-address",
            &opts.admin_email,
            "--password",
            &admin.value,
            "--group",
            "admin",
            "--group",
            "users",
        ],
    )
    .map_err(|e| ProvisionError::DbInit(e.to_string()))?;
    rt.logger.info("administrative account created");
    ctx.admin_password = Some(admin);

    // Housekeeping only; a failure here never fails the install.
    if let Err(e) = console(rt, &["Maint::Ticket::UnlockTimeout"]) {
        rt.logger
            .warn(&format!("ticket maintenance skipped: {e}"));
    }
    Ok(())
}

/// The web-installer variant creates no schema: the wizard owns that. A
/// trial query proves the role and client-auth rule work before handing
/// over.
fn connectivity_only(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    let password = ctx
        .db_password
        .as_ref()
        .ok_or_else(|| ProvisionError::DbInit("database password not yet generated".to_string()))?;
    let conninfo = format!(
        "postgresql://{}:{}@127.0.0.1/{}",
        opts.db_user, password.value, opts.db_name
    );
    let out = rt
        .runner
        .run("psql", &[conninfo.as_str(), "-qAt", "-c", "SELECT 1"])
        .map_err(|e| ProvisionError::DbInit(format!("psql: {e}")))?;
    if !out.success() {
        return Err(ProvisionError::DbInit(format!(
            "trial query failed with status {}: {}",
            out.status,
            out.stderr.trim()
        )));
    }
    rt.logger
        .info("database reachable; schema creation deferred to the web installer");
    Ok(())
}

/// Run the application console tool as the service user.
fn console(rt: &Runtime, args: &[&str]) -> anyhow::Result<()> {
    let console_path = rt.paths.app_home.join("bin/znuny.Console.pl");
    let command = format!("{} {}", console_path.display(), args.join(" "));
    let out = rt.runner.run("su", &["-", SERVICE_USER, "-c", &command])?;
    if !out.success() {
        anyhow::bail!(
            "znuny.Console.pl {} exited with status {}: {}",
            args.first().unwrap_or(&""),
            out.status,
            out.stderr.trim()
        );
    }
    Ok(())
}
