//! Environment and capability gate.
//!
//! Every check here is terminal: an unsuitable host fails the run before
//! anything is mutated. Checks run in a fixed order — privilege, OS family,
//! Perl version, disk-usage helper, free space.

use std::fs;

use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::exec::run_checked;
use crate::runtime::Runtime;
use crate::stages::packages;

const MIN_PERL: (u32, u32, u32) = (5, 16, 0);
const REQUIRED_FREE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub fn check_preconditions(rt: &Runtime, ctx: &mut RunContext) -> Result<(), ProvisionError> {
    if !rt.privileged {
        return Err(ProvisionError::Precondition(
            "administrative privileges required; re-run as root".to_string(),
        ));
    }

    let os_release = fs::read_to_string(&rt.paths.os_release).map_err(|_| {
        ProvisionError::UnsupportedPlatform(format!(
            "{} not found; cannot identify the operating system",
            rt.paths.os_release.display()
        ))
    })?;
    let os = parse_os_release(&os_release);
    if !os.is_debian_family() {
        return Err(ProvisionError::UnsupportedPlatform(format!(
            "{} is not a Debian-family system",
            os.id.as_deref().unwrap_or("unknown")
        )));
    }
    rt.logger
        .info(&format!("detected {}", os.display_name()));
    ctx.os_name = Some(os.display_name());

    let perl = rt.runner.run("perl", &["-e", "print $^V"]).map_err(|_| {
        ProvisionError::Precondition("perl interpreter not found".to_string())
    })?;
    if !perl.success() {
        return Err(ProvisionError::Precondition(
            "perl interpreter failed to report its version".to_string(),
        ));
    }
    let reported = perl.stdout.trim().to_string();
    let found = parse_perl_version(&reported).ok_or_else(|| {
        ProvisionError::Precondition(format!("unparseable perl version {reported:?}"))
    })?;
    if found < MIN_PERL {
        return Err(ProvisionError::VersionTooLow {
            tool: "perl".to_string(),
            found: reported,
            required: format!("{}.{}.{}", MIN_PERL.0, MIN_PERL.1, MIN_PERL.2),
        });
    }
    rt.logger.info(&format!("perl {reported} is sufficient"));
    ctx.perl_version = Some(reported);

    // The free-space check needs df; a minimal container image may lack it.
    if which::which("df").is_err() {
        rt.logger.warn("df not found, installing coreutils");
        packages::ensure_installed(rt, ctx, &["coreutils"])?;
    }

    let install_root = rt.paths.install_root.to_string_lossy().into_owned();
    let volume = if rt.paths.install_root.exists() {
        install_root
    } else {
        "/".to_string()
    };
    let df = run_checked(
        rt.runner.as_ref(),
        "df",
        &["--output=avail", "-B1", &volume],
    )
    .map_err(|e| ProvisionError::Precondition(format!("free-space check failed: {e}")))?;
    let available = parse_df_avail(&df.stdout).ok_or_else(|| {
        ProvisionError::Precondition(format!("unparseable df output {:?}", df.stdout))
    })?;
    if available < REQUIRED_FREE_BYTES {
        return Err(ProvisionError::InsufficientResources {
            volume: rt.paths.install_root.clone(),
            available,
            required: REQUIRED_FREE_BYTES,
        });
    }
    rt.logger
        .info(&format!("{available} bytes free on the install volume"));

    Ok(())
}

#[derive(Debug, Default, PartialEq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub id_like: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    pub fn is_debian_family(&self) -> bool {
        let matches = |value: &str| {
            value
                .split_whitespace()
                .any(|word| word == "debian" || word == "ubuntu")
        };
        self.id.as_deref().map_or(false, matches)
            || self.id_like.as_deref().map_or(false, matches)
    }

    pub fn display_name(&self) -> String {
        self.pretty_name
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Parse the `KEY=value` lines of /etc/os-release, stripping quotes.
pub fn parse_os_release(contents: &str) -> OsRelease {
    let mut os = OsRelease::default();
    for line in contents.lines() {
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let value = raw.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => os.id = Some(value),
            "ID_LIKE" => os.id_like = Some(value),
            "PRETTY_NAME" => os.pretty_name = Some(value),
            _ => {}
        }
    }
    os
}

/// Parse `$^V` output such as `v5.36.0` into a comparable triple.
pub fn parse_perl_version(reported: &str) -> Option<(u32, u32, u32)> {
    let digits = reported.trim().trim_start_matches('v');
    let mut parts = digits.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

/// Parse the single value printed by `df --output=avail -B1 <path>`.
pub fn parse_df_avail(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<u64>().ok())
}
