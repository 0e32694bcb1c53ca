//! Shared runtime services and host layout.
//!
//! [`Runtime`] bundles the log sink, the collaborator process runner, the
//! download transport and the host filesystem layout. Stages receive it by
//! shared reference; tests construct one with scripted runner/transport
//! implementations and a layout rooted in a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProvisionError;
use crate::exec::{CommandRunner, SystemRunner};
use crate::logger::Logger;
use crate::net::{HttpTransport, Transport};

/// OS account the application runs as.
pub const SERVICE_USER: &str = "znuny";
/// Web server group sharing the writable data tree.
pub const WEB_GROUP: &str = "www-data";
/// Name of the process-supervisor unit for the application daemon.
pub const SERVICE_NAME: &str = "znuny-daemon";
/// Fixed origin for release archives.
pub const DOWNLOAD_ORIGIN: &str = "https://download.znuny.org/releases";
/// Localhost entry endpoint probed by the verifier.
pub const PROBE_URL: &str = "http://127.0.0.1/znuny/index.pl";

/// Filesystem layout of the managed host. Fixed in production, rebased under
/// a temporary directory in tests.
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// Directory holding versioned install trees and downloaded archives.
    pub install_root: PathBuf,
    /// Stable symlink consumers reference; repointed on upgrade.
    pub app_home: PathBuf,
    pub pg_conf_root: PathBuf,
    pub apache_conf_available: PathBuf,
    pub systemd_dir: PathBuf,
    pub credentials_file: PathBuf,
    pub os_release: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("/opt"),
            app_home: PathBuf::from("/opt/znuny"),
            pg_conf_root: PathBuf::from("/etc/postgresql"),
            apache_conf_available: PathBuf::from("/etc/apache2/conf-available"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            credentials_file: PathBuf::from("/root/.znuny-credentials"),
            os_release: PathBuf::from("/etc/os-release"),
            log_dir: PathBuf::from("/var/log"),
        }
    }
}

impl HostPaths {
    /// Rebase every path beneath `root`. Test-only in spirit, but harmless
    /// for chrooted or containerized runs too.
    pub fn rooted(root: &Path) -> Self {
        Self {
            install_root: root.join("opt"),
            app_home: root.join("opt/znuny"),
            pg_conf_root: root.join("etc/postgresql"),
            apache_conf_available: root.join("etc/apache2/conf-available"),
            systemd_dir: root.join("etc/systemd/system"),
            credentials_file: root.join("root/.znuny-credentials"),
            os_release: root.join("etc/os-release"),
            log_dir: root.join("var/log"),
        }
    }

    pub fn versioned_dir(&self, version: &str) -> PathBuf {
        self.install_root.join(format!("znuny-{version}"))
    }

    pub fn archive_path(&self, version: &str) -> PathBuf {
        self.install_root.join(format!("znuny-{version}.tar.gz"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.app_home.join("Kernel/Config.pm")
    }

    pub fn unit_file(&self) -> PathBuf {
        self.systemd_dir.join(format!("{SERVICE_NAME}.service"))
    }

    pub fn apache_fragment_link(&self) -> PathBuf {
        self.apache_conf_available.join("znuny.conf")
    }

    pub fn apache_fragment_source(&self) -> PathBuf {
        self.app_home.join("scripts/apache2-httpd.include.conf")
    }

    pub fn log_file(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        self.log_dir.join(format!("znuny-provision-{stamp}.log"))
    }
}

/// Which variant performs schema creation. One flag, not two near-duplicate
/// code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InitMode {
    /// Schema, seed content and admin account created by this tool.
    #[default]
    Automated,
    /// Connectivity verified only; schema creation deferred to the
    /// application's own web installer.
    WebInstaller,
}

/// Workflow inputs. Defaults match the supported release; tests shrink the
/// retry backoff and pre-flight pause to zero.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub db_name: String,
    pub db_user: String,
    pub version: String,
    pub init_mode: InitMode,
    /// Prompts allowed (rollback choice). Non-interactive runs default to
    /// keeping partial state on failure.
    pub interactive: bool,
    pub admin_email: String,
    pub organization: String,
    pub fetch_attempts: u32,
    pub fetch_backoff: Duration,
    pub preflight_pause: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            db_name: "znuny".to_string(),
            db_user: "znuny".to_string(),
            version: "6.5.15".to_string(),
            init_mode: InitMode::Automated,
            interactive: true,
            admin_email: "root@localhost".to_string(),
            organization: "Example Company".to_string(),
            fetch_attempts: 3,
            fetch_backoff: Duration::from_secs(5),
            preflight_pause: Duration::from_secs(3),
        }
    }
}

pub struct Runtime {
    pub logger: Logger,
    pub runner: Box<dyn CommandRunner>,
    pub transport: Box<dyn Transport>,
    pub paths: HostPaths,
    /// Effective uid is root. Captured once at construction.
    pub privileged: bool,
}

impl Runtime {
    /// Production runtime: real process runner, real HTTP transport, fixed
    /// host layout, timestamped log file under `/var/log`.
    pub fn system() -> Result<Self, ProvisionError> {
        let paths = HostPaths::default();
        let logger = Logger::create(&paths.log_file())?;
        Ok(Self {
            logger,
            runner: Box::new(SystemRunner),
            transport: Box::new(HttpTransport::new()?),
            paths,
            privileged: effective_uid_is_root(),
        })
    }
}

#[cfg(unix)]
fn effective_uid_is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn effective_uid_is_root() -> bool {
    false
}
