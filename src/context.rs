//! Per-run mutable state threaded through every stage.

use std::fmt;
use std::path::PathBuf;

use crate::secret::Credential;

/// One named step of the linear provisioning workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Preflight,
    Packages,
    Database,
    Fetch,
    Identity,
    Config,
    Services,
    DbInit,
    Verify,
    Credentials,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Preflight,
        Stage::Packages,
        Stage::Database,
        Stage::Fetch,
        Stage::Identity,
        Stage::Config,
        Stage::Services,
        Stage::DbInit,
        Stage::Verify,
        Stage::Credentials,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Stage::Preflight => "checking preconditions",
            Stage::Packages => "installing packages",
            Stage::Database => "provisioning database",
            Stage::Fetch => "fetching application release",
            Stage::Identity => "creating service identity",
            Stage::Config => "rendering configuration",
            Stage::Services => "wiring services",
            Stage::DbInit => "initializing database content",
            Stage::Verify => "verifying services",
            Stage::Credentials => "saving credentials",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Facts detected and secrets generated during the run. Owned by the
/// workflow loop and passed by mutable reference to each stage; nothing in
/// here survives the process except the two secrets, which the credential
/// reporter writes out at the end of a successful run.
#[derive(Default)]
pub struct RunContext {
    pub db_password: Option<Credential>,
    pub admin_password: Option<Credential>,
    pub os_name: Option<String>,
    pub perl_version: Option<String>,
    pub pg_hba: Option<PathBuf>,
    pub fqdn: Option<String>,
    pub local_ip: Option<String>,
    /// The package index is refreshed at most once per run.
    pub apt_index_refreshed: bool,
    completed: Option<Stage>,
}

impl RunContext {
    /// Advance the furthest-completed marker. Monotonic; a stage re-running
    /// earlier work never moves it backwards.
    pub fn mark_completed(&mut self, stage: Stage) {
        if self.completed.map_or(true, |done| stage > done) {
            self.completed = Some(stage);
        }
    }

    pub fn furthest_completed(&self) -> Option<Stage> {
        self.completed
    }

    pub fn stage_completed(&self, stage: Stage) -> bool {
        self.completed.map_or(false, |done| done >= stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_marker_is_monotonic() {
        let mut ctx = RunContext::default();
        assert!(ctx.furthest_completed().is_none());
        ctx.mark_completed(Stage::Database);
        ctx.mark_completed(Stage::Preflight);
        assert_eq!(ctx.furthest_completed(), Some(Stage::Database));
        assert!(ctx.stage_completed(Stage::Packages));
        assert!(!ctx.stage_completed(Stage::Fetch));
    }
}
