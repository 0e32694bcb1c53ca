//! Declarative wrapper over apt.
//!
//! The package index is refreshed once per run; each requested set is then
//! installed in a single apt-get invocation so inter-package dependencies
//! resolve together. Idempotence on an already-satisfied host is apt's own.

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::runtime::Runtime;

/// Everything the application needs to run: web server, database engine,
/// mod_perl glue and the required Perl module set.
pub const CORE_PACKAGES: &[&str] = &[
    "apache2",
    "libapache2-mod-perl2",
    "postgresql",
    "libapache-dbi-perl",
    "libarchive-zip-perl",
    "libcrypt-eksblowfish-perl",
    "libdatetime-perl",
    "libdbd-pg-perl",
    "libio-socket-ssl-perl",
    "libjson-xs-perl",
    "libmail-imapclient-perl",
    "libmoo-perl",
    "libnet-dns-perl",
    "libnet-ldap-perl",
    "libtemplate-perl",
    "libtext-csv-xs-perl",
    "libtimedate-perl",
    "libxml-libxml-perl",
    "libxml-libxslt-perl",
    "libyaml-libyaml-perl",
];

/// Nice-to-have modules (PDF output, CJK encodings, statistics graphs).
/// Installed best-effort; their absence only degrades optional features.
pub const OPTIONAL_PACKAGES: &[&str] = &[
    "libencode-hanextra-perl",
    "libgd-graph-perl",
    "libgd-text-perl",
    "libpdf-api2-perl",
    "libsoap-lite-perl",
];

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// Stage entry: required set is fatal on failure, optional set is not.
pub fn install_stage(rt: &Runtime, ctx: &mut RunContext) -> Result<(), ProvisionError> {
    ensure_installed(rt, ctx, CORE_PACKAGES)?;
    if let Err(e) = ensure_installed(rt, ctx, OPTIONAL_PACKAGES) {
        rt.logger
            .warn(&format!("optional packages skipped: {e}"));
    }
    Ok(())
}

/// Install the full set in one manager call. Non-zero exit is fatal.
pub fn ensure_installed(
    rt: &Runtime,
    ctx: &mut RunContext,
    packages: &[&str],
) -> Result<(), ProvisionError> {
    refresh_index_once(rt, ctx)?;

    let mut args = vec!["install", "-y", "--no-install-recommends"];
    args.extend_from_slice(packages);
    rt.logger
        .info(&format!("installing {} packages", packages.len()));
    let output = rt
        .runner
        .run_with_env("apt-get", &args, APT_ENV)
        .map_err(|e| ProvisionError::PackageInstall(e.to_string()))?;
    if !output.success() {
        return Err(ProvisionError::PackageInstall(format!(
            "apt-get install exited with status {}: {}",
            output.status,
            output.stderr.trim()
        )));
    }
    Ok(())
}

fn refresh_index_once(rt: &Runtime, ctx: &mut RunContext) -> Result<(), ProvisionError> {
    if ctx.apt_index_refreshed {
        return Ok(());
    }
    rt.logger.info("refreshing package index");
    let output = rt
        .runner
        .run_with_env("apt-get", &["update"], APT_ENV)
        .map_err(|e| ProvisionError::PackageInstall(e.to_string()))?;
    if !output.success() {
        return Err(ProvisionError::PackageInstall(format!(
            "apt-get update exited with status {}: {}",
            output.status,
            output.stderr.trim()
        )));
    }
    ctx.apt_index_refreshed = true;
    Ok(())
}
