// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use crate::{
    acquire::{self, PackageSource, RetrySource},
    cli::{status, warning},
    config::{self, FetchMethod},
    crypto,
    loader::{self, EventLog},
};

pub fn boot_main(cli: &BootCli) -> Result<()> {
    let policy = config::load_trust_policy(&cli.policy)
        .with_context(|| format!("Failed to load trust policy: {:?}", cli.policy))?;
    let root = crypto::read_pem_cert_file(&cli.root)
        .with_context(|| format!("Failed to load root certificate: {:?}", cli.root))?;

    let mut sources: Vec<Box<dyn PackageSource>> = vec![];

    match policy.fetch_method {
        FetchMethod::Local => {
            for dir in &cli.dir {
                let candidates = match acquire::local_candidates(dir) {
                    Ok(c) => c,
                    Err(e) => {
                        warning!("Skipping candidate directory: {dir:?}: {e}");
                        continue;
                    }
                };

                for candidate in candidates {
                    sources.push(Box::new(RetrySource::new(
                        candidate,
                        policy.fetch_attempts,
                        policy.fetch_retry_delay(),
                    )));
                }
            }
        }
    }

    if sources.is_empty() {
        bail!("No OS package candidates found in: {:?}", cli.dir);
    }

    status!("Trying {} OS package candidates", sources.len());

    let mut event_log = EventLog::default();
    let image = match loader::load_first_valid(&mut sources, &root, &policy, &mut event_log) {
        Ok(i) => i,
        Err(loader::Error::NoValidPackage(rejected)) => {
            let count = rejected.len();

            for rejection in rejected {
                warning!(
                    "Rejected {}: {:#}",
                    rejection.name,
                    anyhow::Error::from(rejection.error),
                );
            }

            bail!("No valid OS package among {count} candidates");
        }
        Err(e) => return Err(e).context("Failed to load OS package"),
    };

    for (event, digest) in &event_log.entries {
        info!("Measured {event}: {}", hex::encode(digest));
    }

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create directory: {:?}", cli.output))?;

    for (name, data) in [
        ("kernel", image.kernel()),
        ("initramfs", image.initramfs()),
        ("cmdline", image.cmdline().as_bytes()),
    ] {
        let path = cli.output.join(name);

        fs::write(&path, data).with_context(|| format!("Failed to write: {path:?}"))?;
    }

    status!("Ready to boot {:?} from {:?}", image.label(), cli.output);

    Ok(())
}

/// Select, verify, and stage an OS package for booting.
///
/// Every `<name>.json` descriptor with a matching `<name>.zip` archive in the
/// candidate directories is tried in order. The first package with enough
/// valid signatures has its kernel, initramfs, and command line written to the
/// output directory.
#[derive(Debug, Parser)]
pub struct BootCli {
    /// Path to trust policy TOML file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    policy: PathBuf,

    /// Path to trusted root certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    root: PathBuf,

    /// Directory containing OS package candidates.
    #[arg(short, long, value_name = "DIR", value_parser, required = true)]
    dir: Vec<PathBuf>,

    /// Output directory for the staged boot image.
    #[arg(short, long, value_name = "DIR", value_parser)]
    output: PathBuf,
}
