use clap::Parser;

use crate::runtime::{InitMode, InstallOptions};

#[derive(Parser, Debug)]
#[command(version, about = "Znuny provisioning tool for Debian hosts")]
pub struct Args {
    /// Remove a provisioned installation instead of installing
    #[arg(long)]
    pub uninstall: bool,

    /// Never prompt; on failure, partial state is kept for inspection
    #[arg(long)]
    pub no_interaction: bool,

    /// Who creates the database schema
    #[arg(long, value_enum, default_value_t = InitMode::Automated)]
    pub init_mode: InitMode,

    /// Znuny release to install
    #[arg(long, default_value = "6.5.15")]
    pub release: String,

    /// Database name
    #[arg(long, default_value = "znuny")]
    pub db_name: String,

    /// Database role owning the schema
    #[arg(long, default_value = "znuny")]
    pub db_user: String,

    /// E-mail address of the administrative account
    #[arg(long, default_value = "root@localhost")]
    pub admin_email: String,

    /// Organization name placed in the application configuration
    #[arg(long, default_value = "Example Company")]
    pub organization: String,
}

impl Args {
    pub fn into_options(self) -> InstallOptions {
        InstallOptions {
            db_name: self.db_name,
            db_user: self.db_user,
            version: self.release,
            init_mode: self.init_mode,
            interactive: !self.no_interaction,
            admin_email: self.admin_email,
            organization: self.organization,
            ..InstallOptions::default()
        }
    }
}
