//! Database role, database and client-authentication provisioning.
//!
//! Re-run safety comes from drop-if-exists before create. The pg_hba edit
//! is a pure function over the file text; the file is backed up with a
//! timestamp suffix before the mutating write, and the engine is reloaded
//! (not restarted) so existing connections survive.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::exec::CmdOutput;
use crate::runtime::{InstallOptions, Runtime};
use crate::secret::Credential;

const DB_PASSWORD_LENGTH: usize = 16;

pub fn provision_database(
    rt: &Runtime,
    ctx: &mut RunContext,
    opts: &InstallOptions,
) -> Result<(), ProvisionError> {
    let password = Credential::generate(DB_PASSWORD_LENGTH);

    let db = &opts.db_name;
    let user = &opts.db_user;
    rt.logger
        .info(&format!("creating role {user} and database {db}"));

    // Drop-if-exists keeps a re-run after a partial prior attempt clean.
    admin_sql(rt, None, &format!("DROP DATABASE IF EXISTS {db}"))?;
    admin_sql(rt, None, &format!("DROP ROLE IF EXISTS {user}"))?;
    admin_sql(
        rt,
        None,
        &format!("CREATE ROLE {user} LOGIN PASSWORD '{}'", password.value),
    )?;
    admin_sql(
        rt,
        None,
        &format!("CREATE DATABASE {db} OWNER {user} ENCODING 'UTF8'"),
    )?;
    admin_sql(
        rt,
        None,
        &format!("GRANT ALL PRIVILEGES ON DATABASE {db} TO {user}"),
    )?;
    admin_sql(rt, Some(db), &format!("ALTER SCHEMA public OWNER TO {user}"))?;
    admin_sql(rt, Some(db), &format!("GRANT ALL ON SCHEMA public TO {user}"))?;

    let hba = locate_pg_hba(rt)?;
    rt.logger
        .info(&format!("client-auth rules at {}", hba.display()));
    let contents = fs::read_to_string(&hba)
        .map_err(|e| ProvisionError::DatabaseProvision(format!("read {}: {e}", hba.display())))?;
    match insert_auth_rule(&contents, db, user) {
        None => rt
            .logger
            .info("equivalent client-auth rule already present"),
        Some(updated) => {
            // Back up before the mutating edit, never after.
            let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
            let backup = hba.with_extension(format!("conf.bak.{stamp}"));
            fs::copy(&hba, &backup).map_err(|e| {
                ProvisionError::DatabaseProvision(format!("backup {}: {e}", backup.display()))
            })?;
            fs::write(&hba, updated).map_err(|e| {
                ProvisionError::DatabaseProvision(format!("write {}: {e}", hba.display()))
            })?;
            rt.logger
                .info(&format!("inserted client-auth rule, backup at {}", backup.display()));
        }
    }

    let reload = rt
        .runner
        .run("systemctl", &["reload", "postgresql"])
        .map_err(|e| ProvisionError::DatabaseProvision(format!("systemctl reload: {e}")))?;
    if !reload.success() {
        return Err(ProvisionError::DatabaseProvision(format!(
            "postgresql reload exited with status {}: {}",
            reload.status,
            reload.stderr.trim()
        )));
    }

    ctx.pg_hba = Some(hba);
    ctx.db_password = Some(password);
    Ok(())
}

/// `PASSWORD '...'` literal inside an administrative statement. Statement
/// text only ever reaches errors and logs with this elided.
static PASSWORD_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)PASSWORD\s+'[^']*'").expect("valid password-literal pattern"));

/// Elide any password literal from a statement before it is surfaced in an
/// error or a log line.
pub fn elide_password(sql: &str) -> String {
    PASSWORD_LITERAL
        .replace_all(sql, "PASSWORD '[HIDDEN]'")
        .into_owned()
}

/// Run one statement in an administrative session, optionally inside a
/// specific database. Any failure aborts the stage; the error carries the
/// statement with its password literal elided, never the secret itself.
fn admin_sql(rt: &Runtime, db: Option<&str>, sql: &str) -> Result<CmdOutput, ProvisionError> {
    let target = db.map(|name| format!(" -d {name}")).unwrap_or_default();
    let command = format!("psql -v ON_ERROR_STOP=1 -q{target} -c \"{sql};\"");
    let output = rt
        .runner
        .run("su", &["-", "postgres", "-c", &command])
        .map_err(|e| ProvisionError::DatabaseProvision(format!("psql session: {e}")))?;
    if !output.success() {
        return Err(ProvisionError::DatabaseProvision(format!(
            "psql exited with status {} running {:?}: {}",
            output.status,
            elide_password(sql),
            output.stderr.trim()
        )));
    }
    Ok(output)
}

/// Find pg_hba.conf for the active major version: ask `pg_lsclusters`
/// first, fall back to enumerating the configuration root.
fn locate_pg_hba(rt: &Runtime) -> Result<PathBuf, ProvisionError> {
    if let Ok(out) = rt.runner.run("pg_lsclusters", &["-h"]) {
        if out.success() {
            if let Some((version, cluster)) = parse_cluster_listing(&out.stdout) {
                let hba = rt
                    .paths
                    .pg_conf_root
                    .join(version)
                    .join(cluster)
                    .join("pg_hba.conf");
                if hba.exists() {
                    return Ok(hba);
                }
            }
        }
    }

    let major = highest_major_version(&rt.paths.pg_conf_root).ok_or_else(|| {
        ProvisionError::ConfigNotFound(format!(
            "no cluster version detectable under {}",
            rt.paths.pg_conf_root.display()
        ))
    })?;
    let hba = rt
        .paths
        .pg_conf_root
        .join(&major)
        .join("main/pg_hba.conf");
    if !hba.exists() {
        return Err(ProvisionError::ConfigNotFound(format!(
            "{} does not exist",
            hba.display()
        )));
    }
    Ok(hba)
}

/// First line of `pg_lsclusters -h` output: `15 main 5432 online postgres ...`.
pub fn parse_cluster_listing(output: &str) -> Option<(String, String)> {
    let mut fields = output.lines().next()?.split_whitespace();
    let version = fields.next()?.to_string();
    let cluster = fields.next()?.to_string();
    Some((version, cluster))
}

/// Highest numeric subdirectory name, i.e. the newest installed major.
pub fn highest_major_version(conf_root: &Path) -> Option<String> {
    let entries = fs::read_dir(conf_root).ok()?;
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| name.parse::<u32>().ok().map(|n| (n, name)))
        .max_by_key(|(n, _)| *n)
        .map(|(_, name)| name)
}

/// Insert a password-hash host rule for `user` on `db` immediately before
/// the catch-all rule. Returns `None` when an equivalent rule is already
/// present (idempotent re-run); appends when no catch-all exists.
pub fn insert_auth_rule(contents: &str, db: &str, user: &str) -> Option<String> {
    if contents.lines().any(|line| rule_covers(line, db, user)) {
        return None;
    }

    let rule = format!("host    {db:<15} {user:<15} 127.0.0.1/32            scram-sha-256");
    let mut lines: Vec<&str> = contents.lines().collect();
    let insert_at = lines
        .iter()
        .position(|line| is_catch_all_rule(line))
        .unwrap_or(lines.len());
    lines.insert(insert_at, &rule);

    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

/// A non-comment rule line already granting `user` access to `db`.
fn rule_covers(line: &str, db: &str, user: &str) -> bool {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return false;
    };
    if kind.starts_with('#') || !matches!(kind, "host" | "hostssl" | "local") {
        return false;
    }
    fields.next() == Some(db) && fields.next() == Some(user)
}

/// The distribution's fallback rule matching every database and user.
fn is_catch_all_rule(line: &str) -> bool {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return false;
    };
    if kind.starts_with('#') || !matches!(kind, "host" | "hostssl" | "local") {
        return false;
    }
    fields.next() == Some("all") && fields.next() == Some("all")
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::exec::{CmdOutput, CommandRunner};
    use crate::logger::Logger;
    use crate::net::Transport;
    use crate::runtime::HostPaths;

    const HBA: &str = "\
# PostgreSQL Client Authentication Configuration File
local   all             postgres                                peer
# TYPE  DATABASE        USER            ADDRESS                 METHOD
local   all             all                                     peer
host    all             all             127.0.0.1/32            scram-sha-256
host    all             all             ::1/128                 scram-sha-256
";

    #[test]
    fn inserts_rule_before_catch_all() {
        let updated = insert_auth_rule(HBA, "znuny", "znuny").expect("rule inserted");
        let lines: Vec<&str> = updated.lines().collect();
        let rule_idx = lines
            .iter()
            .position(|l| l.starts_with("host") && l.contains("znuny"))
            .expect("rule present");
        let catch_all_idx = lines
            .iter()
            .position(|l| is_catch_all_rule(l))
            .expect("catch-all present");
        assert!(rule_idx < catch_all_idx);
        assert!(lines[rule_idx].contains("scram-sha-256"));
    }

    #[test]
    fn equivalent_rule_is_not_duplicated() {
        let updated = insert_auth_rule(HBA, "znuny", "znuny").expect("first insert");
        assert!(insert_auth_rule(&updated, "znuny", "znuny").is_none());
    }

    #[test]
    fn appends_when_no_catch_all_exists() {
        let minimal = "local   all             postgres                                peer\n";
        let updated = insert_auth_rule(minimal, "znuny", "znuny").expect("appended");
        assert!(updated.lines().last().expect("last line").contains("znuny"));
    }

    #[test]
    fn commented_rules_are_ignored() {
        let commented = "#host    znuny           znuny           127.0.0.1/32            md5\n";
        assert!(insert_auth_rule(commented, "znuny", "znuny").is_some());
    }

    #[test]
    fn cluster_listing_parsing() {
        let out = "15 main 5432 online postgres /var/lib/postgresql/15/main /var/log/postgresql/postgresql-15-main.log\n";
        assert_eq!(
            parse_cluster_listing(out),
            Some(("15".to_string(), "main".to_string()))
        );
        assert_eq!(parse_cluster_listing(""), None);
    }

    /// Records every command into a shared log and fails any session
    /// carrying a CREATE ROLE statement, so the error path that formats the
    /// statement is hit with a real generated password in play.
    struct FailsRoleCreation {
        commands: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl CommandRunner for FailsRoleCreation {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
            let line = format!("{program} {}", args.join(" "));
            let failing = line.contains("CREATE ROLE");
            self.commands.lock().expect("commands").push(line);
            if failing {
                Ok(CmdOutput::failed(1, "scripted failure"))
            } else {
                Ok(CmdOutput::ok(""))
            }
        }
    }

    struct NoNet;
    impl Transport for NoNet {
        fn download(&self, _url: &str, _dest: &Path) -> anyhow::Result<()> {
            anyhow::bail!("offline")
        }
        fn probe(&self, _url: &str) -> anyhow::Result<u16> {
            anyhow::bail!("offline")
        }
    }

    #[test]
    fn elides_password_literals() {
        assert_eq!(
            elide_password("CREATE ROLE znuny LOGIN PASSWORD 'abc123XYZ'"),
            "CREATE ROLE znuny LOGIN PASSWORD '[HIDDEN]'"
        );
        assert_eq!(
            elide_password("ALTER ROLE znuny password 's p a c e s'"),
            "ALTER ROLE znuny PASSWORD '[HIDDEN]'"
        );
        let plain = "GRANT ALL PRIVILEGES ON DATABASE znuny TO znuny";
        assert_eq!(elide_password(plain), plain);
    }

    #[test]
    fn failed_role_creation_never_leaks_the_password() {
        let root = tempfile::tempdir().expect("tempdir");
        let paths = HostPaths::rooted(root.path());
        fs::create_dir_all(&paths.log_dir).expect("log dir");
        let log_path = paths.log_file();
        let commands = std::sync::Arc::new(Mutex::new(Vec::new()));
        let rt = Runtime {
            logger: Logger::create_quiet(&log_path).expect("logger"),
            runner: Box::new(FailsRoleCreation {
                commands: std::sync::Arc::clone(&commands),
            }),
            transport: Box::new(NoNet),
            paths,
            privileged: true,
        };
        let mut ctx = RunContext::default();
        let opts = InstallOptions::default();

        let err = provision_database(&rt, &mut ctx, &opts).expect_err("must fail");

        // The runner saw the real password; pull it back out of the
        // recorded CREATE ROLE session.
        let commands = commands.lock().expect("commands");
        let create_role = commands
            .iter()
            .find(|line| line.contains("CREATE ROLE"))
            .expect("role creation attempted");
        let literal = PASSWORD_LITERAL
            .find(create_role)
            .expect("password literal in the session")
            .as_str();
        let secret = literal
            .split('\'')
            .nth(1)
            .expect("quoted password value");
        assert_eq!(secret.len(), DB_PASSWORD_LENGTH);

        let message = err.to_string();
        assert!(message.contains("CREATE ROLE"));
        assert!(message.contains("PASSWORD '[HIDDEN]'"));
        assert!(!message.contains(secret), "secret survived in the error");

        rt.logger.error(&format!("provisioning failed: {err}"));
        let log = fs::read_to_string(&log_path).expect("read log");
        assert!(!log.contains(secret), "secret survived in the log file");
    }

    #[test]
    fn highest_major_wins_directory_enumeration() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["9.6", "13", "15", "notes"] {
            fs::create_dir(dir.path().join(name)).expect("mkdir");
        }
        assert_eq!(highest_major_version(dir.path()), Some("15".to_string()));
        assert_eq!(highest_major_version(&dir.path().join("absent")), None);
    }
}
