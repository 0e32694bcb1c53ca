//! Configuration rendering.
//!
//! The application's `Kernel/Config.pm` is produced by substitution over a
//! closed set of named fields. Unknown placeholders and unused or empty
//! fields are rejected instead of silently emitting empty values, and the
//! `$DIBI$` marker the application's own installer appends after must
//! survive the render untouched.

use std::fs;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::exec::run_checked;
use crate::facts;
use crate::fsutil::{set_mode, write_file_atomic};
use crate::runtime::{InstallOptions, Runtime, SERVICE_USER, WEB_GROUP};

const CONFIG_TEMPLATE: &str = include_str!("../../templates/config.pm.tt");
/// Marker line consumed by the application's web installer; rendering must
/// leave it exactly as-is.
const INSTALLER_MARKER: &str = "$DIBI$";

const DB_HOST: &str = "127.0.0.1";
const SYSTEM_ID: &str = "10";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-z_]+)\}\}").expect("valid placeholder pattern"));

pub fn render_config(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    let db_password = ctx
        .db_password
        .as_ref()
        .ok_or_else(|| ProvisionError::Render("database password not yet generated".to_string()))?;

    let fqdn = ctx
        .fqdn
        .get_or_insert_with(|| facts::detect_fqdn(rt.runner.as_ref()))
        .clone();
    let home = rt.paths.app_home.to_string_lossy().into_owned();
    let dsn = format!("DBI:Pg:dbname={};host={DB_HOST};", opts.db_name);
    let secure_mode = match opts.init_mode {
        // The web installer refuses to run once SecureMode is set.
        crate::runtime::InitMode::Automated => "1",
        crate::runtime::InitMode::WebInstaller => "0",
    };

    let fields: &[(&str, &str)] = &[
        ("db_host", DB_HOST),
        ("db_name", &opts.db_name),
        ("db_user", &opts.db_user),
        ("db_password", &db_password.value),
        ("dsn", &dsn),
        ("home", &home),
        ("secure_mode", secure_mode),
        ("system_id", SYSTEM_ID),
        ("fqdn", &fqdn),
        ("admin_email", &opts.admin_email),
        ("organization", &opts.organization),
    ];
    let rendered = render_template(CONFIG_TEMPLATE, fields)?;
    if !rendered.contains(INSTALLER_MARKER) {
        return Err(ProvisionError::Render(format!(
            "rendering consumed the {INSTALLER_MARKER} marker"
        )));
    }

    let config = rt.paths.config_file();
    if let Some(parent) = config.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ProvisionError::Render(format!("create {}: {e}", parent.display())))?;
    }
    // The file carries credentials; a crash mid-write must never leave a
    // half-rendered config behind.
    write_file_atomic(&config, &rendered)
        .map_err(|e| ProvisionError::Render(format!("write {}: {e}", config.display())))?;

    // Ownership and restrictive mode are part of this stage, not deferred.
    let owner = format!("{SERVICE_USER}:{WEB_GROUP}");
    let config_str = config.to_string_lossy().into_owned();
    run_checked(
        rt.runner.as_ref(),
        "chown",
        &[owner.as_str(), config_str.as_str()],
    )?;
    set_mode(&config, 0o660).map_err(|e| ProvisionError::write(&config, e))?;

    rt.logger
        .info(&format!("rendered {}", config.display()));
    Ok(())
}

/// Substitute `{{name}}` placeholders from a closed field set. Every field
/// must be non-empty and used by the template; every placeholder must be
/// covered by a field.
pub fn render_template(template: &str, fields: &[(&str, &str)]) -> Result<String, ProvisionError> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(ProvisionError::Render(format!("field {name} is empty")));
        }
        if !template.contains(&format!("{{{{{name}}}}}")) {
            return Err(ProvisionError::Render(format!(
                "field {name} has no placeholder in the template"
            )));
        }
    }

    let mut rendered = template.to_string();
    for (name, value) in fields {
        rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
    }

    if let Some(leftover) = PLACEHOLDER.find(&rendered) {
        return Err(ProvisionError::Render(format!(
            "no field provided for placeholder {}",
            leftover.as_str()
        )));
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_fields() {
        let out = render_template(
            "db={{db_name}} user={{db_user}}",
            &[("db_name", "znuny"), ("db_user", "znuny")],
        )
        .expect("render");
        assert_eq!(out, "db=znuny user=znuny");
    }

    #[test]
    fn rejects_uncovered_placeholder() {
        let err = render_template("db={{db_name}}", &[]).expect_err("must fail");
        assert!(matches!(err, ProvisionError::Render(_)));
    }

    #[test]
    fn rejects_unused_field() {
        let err = render_template("static", &[("db_name", "znuny")]).expect_err("must fail");
        assert!(matches!(err, ProvisionError::Render(_)));
    }

    #[test]
    fn rejects_empty_value() {
        let err =
            render_template("db={{db_name}}", &[("db_name", "  ")]).expect_err("must fail");
        assert!(matches!(err, ProvisionError::Render(_)));
    }

    #[test]
    fn full_template_renders_and_keeps_marker() {
        let fields: &[(&str, &str)] = &[
            ("db_host", "127.0.0.1"),
            ("db_name", "znuny"),
            ("db_user", "znuny"),
            ("db_password", "s3cretpassw0rd16"),
            ("dsn", "DBI:Pg:dbname=znuny;host=127.0.0.1;"),
            ("home", "/opt/znuny"),
            ("secure_mode", "1"),
            ("system_id", "10"),
            ("fqdn", "tickets.example.org"),
            ("admin_email", "root@localhost"),
            ("organization", "Example Company"),
        ];
        let rendered = render_template(CONFIG_TEMPLATE, fields).expect("render");
        assert!(rendered.contains("$Self->{Database} = 'znuny';"));
        assert!(rendered.contains("$Self->{DatabasePw} = 's3cretpassw0rd16';"));
        assert!(rendered.contains("$Self->{FQDN} = 'tickets.example.org';"));
        assert!(rendered.contains(INSTALLER_MARKER));
        assert!(!PLACEHOLDER.is_match(&rendered));
    }
}
