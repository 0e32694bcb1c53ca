//! Web server and process-supervisor wiring.
//!
//! Apache gets the application's module set and bundled config fragment,
//! gated behind a configuration self-test so a broken fragment never takes
//! down the running server. The application daemon gets a systemd unit with
//! automatic restart; whether it is started immediately is decided by the
//! installer mode, not here.

use std::fmt::Write as _;
use std::fs;

use crate::error::ProvisionError;
use crate::exec::run_checked;
use crate::fsutil::{set_mode, write_file_atomic};
use crate::runtime::{InitMode, InstallOptions, Runtime, SERVICE_NAME, SERVICE_USER};

/// Apache extension modules the application requires.
const APACHE_MODULES: &[&str] = &["perl", "deflate", "filter", "headers"];

/// Declarative description of the supervisor unit for the application
/// daemon; consumed by systemd, overwritten on every run.
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub exec_start: String,
    pub exec_stop: String,
    pub exec_reload: String,
    pub working_dir: String,
    pub user: String,
    pub restart_sec: u32,
}

impl ServiceUnit {
    pub fn znuny_daemon(rt: &Runtime) -> Self {
        let home = rt.paths.app_home.to_string_lossy().into_owned();
        let daemon = format!("{home}/bin/znuny.Daemon.pl");
        Self {
            name: SERVICE_NAME.to_string(),
            description: "Znuny ticketing system daemon".to_string(),
            exec_start: format!("{daemon} start"),
            exec_stop: format!("{daemon} stop"),
            exec_reload: format!("{daemon} stop && {daemon} start"),
            working_dir: home,
            user: SERVICE_USER.to_string(),
            restart_sec: 5,
        }
    }

    /// Generate the unit file text. Pure, so the wiring is testable without
    /// a systemd on the host.
    pub fn render(&self) -> String {
        let mut unit = String::with_capacity(512);
        unit.push_str("[Unit]\n");
        let _ = writeln!(unit, "Description={}", self.description);
        unit.push_str("After=network.target postgresql.service\n");
        unit.push('\n');
        unit.push_str("[Service]\n");
        unit.push_str("Type=forking\n");
        let _ = writeln!(unit, "User={}", self.user);
        let _ = writeln!(unit, "WorkingDirectory={}", self.working_dir);
        let _ = writeln!(unit, "ExecStart={}", self.exec_start);
        let _ = writeln!(unit, "ExecStop={}", self.exec_stop);
        let _ = writeln!(unit, "ExecReload=/bin/sh -c '{}'", self.exec_reload);
        unit.push_str("Restart=on-failure\n");
        let _ = writeln!(unit, "RestartSec={}s", self.restart_sec);
        unit.push('\n');
        unit.push_str("[Install]\n");
        unit.push_str("WantedBy=multi-user.target\n");
        unit
    }
}

pub fn wire_services(rt: &Runtime, opts: &InstallOptions) -> Result<(), ProvisionError> {
    enable_apache_modules(rt)?;
    publish_apache_fragment(rt)?;

    // Self-test before touching the running server.
    let configtest = rt
        .runner
        .run("apachectl", &["configtest"])
        .map_err(|e| ProvisionError::ServiceConfig(format!("apachectl: {e}")))?;
    if !configtest.success() {
        return Err(ProvisionError::ServiceConfig(format!(
            "apache configuration self-test failed: {}",
            configtest.stderr.trim()
        )));
    }

    // Modules changed, so a reload is not enough.
    systemctl(rt, &["restart", "apache2"])?;
    systemctl(rt, &["enable", "apache2"])?;
    rt.logger.info("apache restarted and enabled");

    install_daemon_unit(rt)?;
    match opts.init_mode {
        InitMode::Automated => {
            systemctl(rt, &["start", SERVICE_NAME])?;
            rt.logger.info(&format!("{SERVICE_NAME} started"));
        }
        InitMode::WebInstaller => {
            // The daemon would fail against an empty schema; the web
            // installer run starts it afterwards.
            rt.logger
                .info(&format!("{SERVICE_NAME} start deferred to the web installer"));
        }
    }
    Ok(())
}

fn enable_apache_modules(rt: &Runtime) -> Result<(), ProvisionError> {
    for module in APACHE_MODULES {
        let out = rt
            .runner
            .run("a2enmod", &[module])
            .map_err(|e| ProvisionError::ServiceConfig(format!("a2enmod {module}: {e}")))?;
        if !out.success() {
            return Err(ProvisionError::ServiceConfig(format!(
                "a2enmod {module} exited with status {}: {}",
                out.status,
                out.stderr.trim()
            )));
        }
    }
    Ok(())
}

fn publish_apache_fragment(rt: &Runtime) -> Result<(), ProvisionError> {
    let link = rt.paths.apache_fragment_link();
    let source = rt.paths.apache_fragment_source();
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ProvisionError::ServiceConfig(format!("create {}: {e}", parent.display())))?;
    }
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)
            .map_err(|e| ProvisionError::ServiceConfig(format!("remove {}: {e}", link.display())))?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(&source, &link)
        .map_err(|e| ProvisionError::ServiceConfig(format!("symlink {}: {e}", link.display())))?;

    let out = rt
        .runner
        .run("a2enconf", &["znuny"])
        .map_err(|e| ProvisionError::ServiceConfig(format!("a2enconf: {e}")))?;
    if !out.success() {
        return Err(ProvisionError::ServiceConfig(format!(
            "a2enconf znuny exited with status {}: {}",
            out.status,
            out.stderr.trim()
        )));
    }
    Ok(())
}

fn install_daemon_unit(rt: &Runtime) -> Result<(), ProvisionError> {
    let unit = ServiceUnit::znuny_daemon(rt);
    let unit_path = rt.paths.unit_file();
    if let Some(parent) = unit_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvisionError::ServiceConfig(format!("create {}: {e}", parent.display()))
        })?;
    }
    write_file_atomic(&unit_path, &unit.render())
        .map_err(|e| ProvisionError::ServiceConfig(format!("write {}: {e}", unit_path.display())))?;
    set_mode(&unit_path, 0o644)
        .map_err(|e| ProvisionError::ServiceConfig(format!("chmod {}: {e}", unit_path.display())))?;

    systemctl(rt, &["daemon-reload"])?;
    systemctl(rt, &["enable", SERVICE_NAME])?;
    rt.logger
        .info(&format!("installed unit {}", unit_path.display()));
    Ok(())
}

fn systemctl(rt: &Runtime, args: &[&str]) -> Result<(), ProvisionError> {
    run_checked(rt.runner.as_ref(), "systemctl", args)
        .map_err(|e| ProvisionError::ServiceConfig(e.to_string()))?;
    Ok(())
}
