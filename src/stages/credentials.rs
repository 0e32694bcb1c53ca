//! Credential reporting.
//!
//! The one place secrets are deliberately surfaced: a 0600 file for the
//! operator and an unredacted console summary. The log file copy of the
//! summary is redacted by the logger as usual.

use std::fs;
use std::io;

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::facts;
use crate::fsutil::set_mode;
use crate::runtime::{InstallOptions, Runtime};

pub fn save_credentials(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    let path = &rt.paths.credentials_file;
    let db_password = ctx.db_password.as_ref().ok_or_else(|| {
        ProvisionError::write(path, io::Error::other("database password never generated"))
    })?;

    let fqdn = ctx
        .fqdn
        .get_or_insert_with(|| facts::detect_fqdn(rt.runner.as_ref()))
        .clone();
    let local_ip = ctx
        .local_ip
        .get_or_insert_with(|| {
            facts::detect_local_ip(rt.runner.as_ref()).unwrap_or_else(|| "127.0.0.1".to_string())
        })
        .clone();

    let admin_line = match &ctx.admin_password {
        Some(admin) => format!("Admin account:     admin / {}", admin.value),
        None => "Admin account:     created by the web installer".to_string(),
    };
    let body = format!(
        "Znuny {version} provisioning credentials
=========================================

Database:          {db}
Database user:     {user}
Database password: {db_pw}
{admin_line}

Access URLs:
  http://{fqdn}/znuny/index.pl
  http://{local_ip}/znuny/index.pl

Notes:
  - This file is the only persisted copy of these secrets; store them in
    your password manager and delete it.
  - The database accepts password logins for {user} on 127.0.0.1 only.
  - Log files of this run redact passwords.
",
        version = opts.version,
        db = opts.db_name,
        user = opts.db_user,
        db_pw = db_password.value,
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ProvisionError::write(path, e))?;
    }
    fs::write(path, &body).map_err(|e| ProvisionError::write(path, e))?;
    set_mode(path, 0o600).map_err(|e| ProvisionError::write(path, e))?;
    rt.logger
        .info(&format!("credentials written to {}", path.display()));

    // Console summary: shown in clear on purpose; the log file copy is
    // redacted by the logger.
    rt.logger.plain("----------------------------------------");
    rt.logger
        .plain(&format!("Znuny {} is provisioned.", opts.version));
    rt.logger
        .plain(&format!("  URL:               http://{fqdn}/znuny/index.pl"));
    rt.logger
        .plain(&format!("  Database password: {}", db_password.value));
    if let Some(admin) = &ctx.admin_password {
        rt.logger
            .plain(&format!("  Admin password:    {}", admin.value));
    }
    rt.logger
        .plain(&format!("  Credentials file:  {}", path.display()));
    rt.logger.plain("----------------------------------------");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CmdOutput, CommandRunner};
    use crate::logger::Logger;
    use crate::net::Transport;
    use crate::runtime::HostPaths;
    use crate::secret::Credential;

    struct FactsRunner;
    impl CommandRunner for FactsRunner {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
            match (program, args.first().copied()) {
                ("hostname", Some("-f")) => Ok(CmdOutput::ok("tickets.example.org\n")),
                ("ip", _) => Ok(CmdOutput::ok(
                    "1.1.1.1 via 10.0.0.1 dev ens3 src 10.0.0.42 uid 0\n",
                )),
                _ => Ok(CmdOutput::ok("")),
            }
        }
    }

    struct NoNet;
    impl Transport for NoNet {
        fn download(&self, _url: &str, _dest: &std::path::Path) -> anyhow::Result<()> {
            anyhow::bail!("offline")
        }
        fn probe(&self, _url: &str) -> anyhow::Result<u16> {
            anyhow::bail!("offline")
        }
    }

    #[test]
    fn writes_owner_only_file_with_both_secrets() {
        let root = tempfile::tempdir().expect("tempdir");
        let paths = HostPaths::rooted(root.path());
        fs::create_dir_all(&paths.log_dir).expect("log dir");
        let rt = Runtime {
            logger: Logger::create_quiet(&paths.log_file()).expect("logger"),
            runner: Box::new(FactsRunner),
            transport: Box::new(NoNet),
            paths,
            privileged: true,
        };
        let mut ctx = RunContext::default();
        ctx.db_password = Some(Credential {
            value: "dbsecret16chars0".to_string(),
        });
        ctx.admin_password = Some(Credential {
            value: "adminsecret25chars0000000".to_string(),
        });
        let opts = InstallOptions::default();

        save_credentials(&rt, &mut ctx, &opts).expect("save");

        let body = fs::read_to_string(&rt.paths.credentials_file).expect("read");
        assert!(body.contains("dbsecret16chars0"));
        assert!(body.contains("adminsecret25chars0000000"));
        assert!(body.contains("http://tickets.example.org/znuny/index.pl"));
        assert!(body.contains("http://10.0.0.42/znuny/index.pl"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&rt.paths.credentials_file)
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
