//! Release archive download, extraction and stable symlink publication.
//!
//! A matching local archive short-circuits the network fetch. Downloads go
//! to a temporary name in the target directory and are renamed into place
//! only on success, so an interrupted transfer never masquerades as a
//! complete archive. The rest of the system references the stable symlink,
//! never the versioned directory, so an upgrade is a repoint of the link.

use std::fs::{self, File};
use std::path::Path;
use std::thread;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::ProvisionError;
use crate::runtime::{InstallOptions, Runtime, DOWNLOAD_ORIGIN};

pub fn fetch_and_install(rt: &Runtime, opts: &InstallOptions) -> Result<(), ProvisionError> {
    fs::create_dir_all(&rt.paths.install_root)
        .map_err(|e| ProvisionError::Download(format!("create install root: {e}")))?;

    let archive = rt.paths.archive_path(&opts.version);
    if archive_present(&archive) {
        rt.logger.info(&format!(
            "archive {} already present, skipping download",
            archive.display()
        ));
    } else {
        let url = format!("{DOWNLOAD_ORIGIN}/znuny-{}.tar.gz", opts.version);
        download_with_retry(rt, opts, &url, &archive)?;
    }

    let versioned = rt.paths.versioned_dir(&opts.version);
    if versioned.exists() {
        rt.logger.info(&format!(
            "removing stale extraction at {}",
            versioned.display()
        ));
        fs::remove_dir_all(&versioned)
            .map_err(|e| ProvisionError::Extract(format!("remove {}: {e}", versioned.display())))?;
    }

    rt.logger
        .info(&format!("extracting {}", archive.display()));
    extract_archive(&archive, &rt.paths.install_root)?;
    if !versioned.exists() {
        return Err(ProvisionError::Extract(format!(
            "archive did not contain {}",
            versioned.display()
        )));
    }

    republish_symlink(&versioned, &rt.paths.app_home)?;
    rt.logger.info(&format!(
        "{} -> {}",
        rt.paths.app_home.display(),
        versioned.display()
    ));
    Ok(())
}

fn archive_present(archive: &Path) -> bool {
    fs::metadata(archive).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

fn download_with_retry(
    rt: &Runtime,
    opts: &InstallOptions,
    url: &str,
    archive: &Path,
) -> Result<(), ProvisionError> {
    let dir = archive
        .parent()
        .ok_or_else(|| ProvisionError::Download(format!("{} has no parent", archive.display())))?;

    for attempt in 1..=opts.fetch_attempts {
        rt.logger.info(&format!(
            "downloading {url} (attempt {attempt}/{})",
            opts.fetch_attempts
        ));
        // Temp file lives in the target directory so the final rename is
        // atomic; it is cleaned up automatically on failure.
        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ProvisionError::Download(format!("create temp file: {e}")))?;

        match rt.transport.download(url, temp.path()) {
            Ok(()) if file_non_empty(temp.path()) => {
                temp.persist(archive)
                    .map_err(|e| ProvisionError::Download(format!("publish archive: {e}")))?;
                return Ok(());
            }
            Ok(()) => rt
                .logger
                .warn(&format!("attempt {attempt} produced an empty file")),
            Err(e) => rt.logger.warn(&format!("attempt {attempt} failed: {e}")),
        }

        if attempt < opts.fetch_attempts {
            thread::sleep(opts.fetch_backoff);
        }
    }

    Err(ProvisionError::Download(format!(
        "no usable archive after {} attempts: {url}",
        opts.fetch_attempts
    )))
}

fn file_non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let file = File::open(archive)
        .map_err(|e| ProvisionError::Extract(format!("open {}: {e}", archive.display())))?;
    let mut tarball = Archive::new(GzDecoder::new(file));
    tarball
        .unpack(dest)
        .map_err(|e| ProvisionError::Extract(format!("unpack {}: {e}", archive.display())))
}

/// Replace the stable symlink so consumers always see the new version.
fn republish_symlink(target: &Path, link: &Path) -> Result<(), ProvisionError> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(link)
            .map_err(|e| ProvisionError::Extract(format!("remove {}: {e}", link.display())))?,
        Ok(_) => fs::remove_file(link)
            .map_err(|e| ProvisionError::Extract(format!("remove {}: {e}", link.display())))?,
        Err(_) => {}
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| ProvisionError::Extract(format!("symlink {}: {e}", link.display())))?;
    #[cfg(not(unix))]
    return Err(ProvisionError::Extract(
        "symlinks unsupported on this platform".to_string(),
    ));
    #[cfg(unix)]
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{anyhow, Result};

    use super::*;
    use crate::logger::Logger;
    use crate::net::Transport;
    use crate::runtime::HostPaths;

    /// Transport that fails a fixed number of times before serving bytes.
    struct FlakyTransport {
        payload: Vec<u8>,
        failures_left: Mutex<u32>,
        attempts: Mutex<u32>,
    }

    impl Transport for FlakyTransport {
        fn download(&self, _url: &str, dest: &Path) -> Result<()> {
            *self.attempts.lock().expect("attempts") += 1;
            let mut left = self.failures_left.lock().expect("failures");
            if *left > 0 {
                *left -= 1;
                // Leave a partial body behind, like an interrupted transfer.
                fs::write(dest, b"partial").expect("write partial");
                return Err(anyhow!("connection reset"));
            }
            let mut file = File::create(dest)?;
            file.write_all(&self.payload)?;
            Ok(())
        }

        fn probe(&self, _url: &str) -> Result<u16> {
            Ok(200)
        }
    }

    struct NoopRunner;
    impl crate::exec::CommandRunner for NoopRunner {
        fn run(&self, _program: &str, _args: &[&str]) -> std::io::Result<crate::exec::CmdOutput> {
            Ok(crate::exec::CmdOutput::ok(""))
        }
    }

    fn release_tarball(version: &str) -> Vec<u8> {
        let src = tempfile::tempdir().expect("tempdir");
        let tree = src.path().join(format!("znuny-{version}"));
        fs::create_dir_all(tree.join("Kernel")).expect("mkdir");
        fs::create_dir_all(tree.join("bin")).expect("mkdir");
        fs::write(tree.join("bin/znuny.Daemon.pl"), "#!/usr/bin/perl\n").expect("write");

        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(format!("znuny-{version}"), &tree)
            .expect("append");
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    fn test_runtime(root: &Path, transport: Box<dyn Transport>) -> Runtime {
        let paths = HostPaths::rooted(root);
        fs::create_dir_all(&paths.log_dir).expect("log dir");
        let logger = Logger::create_quiet(&paths.log_file()).expect("logger");
        Runtime {
            logger,
            runner: Box::new(NoopRunner),
            transport,
            paths,
            privileged: true,
        }
    }

    fn fast_options() -> InstallOptions {
        InstallOptions {
            fetch_backoff: Duration::ZERO,
            preflight_pause: Duration::ZERO,
            interactive: false,
            ..InstallOptions::default()
        }
    }

    #[test]
    fn succeeds_on_third_attempt_with_clean_archive() {
        let root = tempfile::tempdir().expect("tempdir");
        let payload = release_tarball("6.5.15");
        let transport = FlakyTransport {
            payload: payload.clone(),
            failures_left: Mutex::new(2),
            attempts: Mutex::new(0),
        };
        let rt = test_runtime(root.path(), Box::new(transport));
        let opts = fast_options();

        fetch_and_install(&rt, &opts).expect("fetch succeeds");

        let archive = rt.paths.archive_path("6.5.15");
        assert_eq!(fs::read(&archive).expect("archive"), payload);
        assert!(rt.paths.versioned_dir("6.5.15").is_dir());
        assert_eq!(
            fs::read_link(&rt.paths.app_home).expect("symlink"),
            rt.paths.versioned_dir("6.5.15")
        );
        // No temp residue from the failed attempts.
        let stray: Vec<PathBuf> = fs::read_dir(&rt.paths.install_root)
            .expect("read dir")
            .flatten()
            .map(|e| e.path())
            .filter(|p| *p != archive && *p != rt.paths.versioned_dir("6.5.15") && *p != rt.paths.app_home)
            .collect();
        assert!(stray.is_empty(), "unexpected leftovers: {stray:?}");
    }

    #[test]
    fn gives_up_after_exhausting_retries() {
        let root = tempfile::tempdir().expect("tempdir");
        let transport = FlakyTransport {
            payload: Vec::new(),
            failures_left: Mutex::new(u32::MAX),
            attempts: Mutex::new(0),
        };
        let rt = test_runtime(root.path(), Box::new(transport));
        let opts = fast_options();

        let err = fetch_and_install(&rt, &opts).expect_err("must fail");
        assert!(matches!(err, ProvisionError::Download(_)));
        assert!(!rt.paths.archive_path("6.5.15").exists());
    }

    #[test]
    fn existing_archive_skips_the_network() {
        let root = tempfile::tempdir().expect("tempdir");
        let payload = release_tarball("6.5.15");
        let transport = FlakyTransport {
            payload: Vec::new(),
            failures_left: Mutex::new(u32::MAX), // any fetch would fail
            attempts: Mutex::new(0),
        };
        let rt = test_runtime(root.path(), Box::new(transport));
        let opts = fast_options();

        fs::create_dir_all(&rt.paths.install_root).expect("install root");
        fs::write(rt.paths.archive_path("6.5.15"), &payload).expect("seed archive");

        fetch_and_install(&rt, &opts).expect("local archive is trusted");
        assert!(rt.paths.versioned_dir("6.5.15").is_dir());
    }

    #[test]
    fn repointed_symlink_replaces_previous_version() {
        let root = tempfile::tempdir().expect("tempdir");
        let rt = test_runtime(
            root.path(),
            Box::new(FlakyTransport {
                payload: Vec::new(),
                failures_left: Mutex::new(0),
                attempts: Mutex::new(0),
            }),
        );
        let old = rt.paths.versioned_dir("6.5.14");
        let new = rt.paths.versioned_dir("6.5.15");
        fs::create_dir_all(&old).expect("old tree");
        fs::create_dir_all(&new).expect("new tree");
        republish_symlink(&old, &rt.paths.app_home).expect("first publish");
        republish_symlink(&new, &rt.paths.app_home).expect("repoint");
        assert_eq!(fs::read_link(&rt.paths.app_home).expect("link"), new);
    }
}
