//! Post-install health probes.
//!
//! Verification is observational: each probe is independent, failures are
//! logged, and the aggregate result never unwinds completed provisioning.

use std::fs;
use std::path::Path;

use crate::runtime::{Runtime, PROBE_URL, SERVICE_NAME};

pub fn verify(rt: &Runtime) -> bool {
    let mut healthy = true;
    for service in ["postgresql", "apache2"] {
        healthy &= unit_active(rt, service);
    }
    healthy &= daemon_active(rt);
    healthy &= endpoint_reachable(rt);
    healthy
}

fn unit_active(rt: &Runtime, service: &str) -> bool {
    let active = rt
        .runner
        .run("systemctl", &["is-active", "--quiet", service])
        .map(|out| out.success())
        .unwrap_or(false);
    if active {
        rt.logger.info(&format!("{service} is active"));
    } else {
        rt.logger.warn(&format!("{service} is not active"));
    }
    active
}

/// The daemon is checked via the service manager first, then via its PID
/// file — the daemon predates supervision and still maintains one.
fn daemon_active(rt: &Runtime) -> bool {
    if unit_active(rt, SERVICE_NAME) {
        return true;
    }
    let pid_file = rt.paths.app_home.join("var/run/znuny.Daemon.pl.pid");
    let alive = pid_file_alive(&pid_file);
    if alive {
        rt.logger
            .info("application daemon alive per PID file");
    } else {
        rt.logger.warn("application daemon not running");
    }
    alive
}

pub fn pid_file_alive(pid_file: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(pid_file) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    process_exists(pid)
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    false
}

fn endpoint_reachable(rt: &Runtime) -> bool {
    match rt.transport.probe(PROBE_URL) {
        Ok(status @ (200 | 302)) => {
            rt.logger
                .info(&format!("entry endpoint answered {status}"));
            true
        }
        Ok(status) => {
            rt.logger
                .warn(&format!("entry endpoint answered {status}"));
            false
        }
        Err(e) => {
            rt.logger
                .warn(&format!("entry endpoint unreachable: {e}"));
            false
        }
    }
}
