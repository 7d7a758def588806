// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use crate::crypto::{self, KeyKind, PassphraseSource};

fn get_passphrase_source(group: &PassphraseGroup, key_path: &Path) -> PassphraseSource {
    PassphraseSource::new(
        key_path,
        group.pass_file.as_deref(),
        group.pass_env_var.as_deref(),
    )
}

fn validity_duration(days: u64) -> Result<Duration> {
    match days.checked_mul(24 * 60 * 60) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("Validity is too large: {days} days"),
    }
}

pub fn key_main(cli: &KeyCli) -> Result<()> {
    match &cli.command {
        KeyCommand::GenerateKey(c) => {
            let source = get_passphrase_source(&c.passphrase, &c.output);
            let private_key = crypto::generate_key_pair(c.algorithm)
                .with_context(|| format!("Failed to generate {:?} key pair", c.algorithm))?;

            crypto::write_pem_key_file(&c.output, &private_key, &source)
                .with_context(|| format!("Failed to write private key: {:?}", c.output))?;
        }
        KeyCommand::GenerateCert(c) => {
            let source = get_passphrase_source(&c.passphrase, &c.key);
            let private_key = crypto::read_pem_key_file(&c.key, &source)
                .with_context(|| format!("Failed to load key: {:?}", c.key))?;

            let validity = validity_duration(c.validity)?;

            let cert = match (&c.issuer_key, &c.issuer_cert) {
                (Some(issuer_key_path), Some(issuer_cert_path)) => {
                    let issuer_source = get_passphrase_source(
                        &PassphraseGroup::from(&c.issuer_passphrase),
                        issuer_key_path,
                    );
                    let issuer_key = crypto::read_pem_key_file(issuer_key_path, &issuer_source)
                        .with_context(|| format!("Failed to load key: {issuer_key_path:?}"))?;
                    let issuer_cert = crypto::read_pem_cert_file(issuer_cert_path)
                        .with_context(|| {
                            format!("Failed to load certificate: {issuer_cert_path:?}")
                        })?;

                    if !crypto::cert_matches_key(&issuer_cert, &issuer_key)? {
                        bail!(
                            "Issuer key {issuer_key_path:?} does not match certificate {issuer_cert_path:?}"
                        );
                    }

                    crypto::generate_leaf_cert(
                        &private_key.to_public_key(),
                        &issuer_key,
                        &issuer_cert,
                        rand::random(),
                        validity,
                        &c.subject,
                    )
                    .context("Failed to generate leaf certificate")?
                }
                (None, None) => {
                    crypto::generate_cert(&private_key, rand::random(), validity, &c.subject)
                        .context("Failed to generate root certificate")?
                }
                _ => unreachable!(),
            };

            crypto::write_pem_cert_file(&c.output, &cert)
                .with_context(|| format!("Failed to write certificate: {:?}", c.output))?;
        }
    }

    Ok(())
}

#[derive(Debug, Args)]
struct PassphraseGroup {
    /// Environment variable containing private key passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "pass")]
    pass_env_var: Option<OsString>,

    /// File containing private key passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "pass")]
    pass_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct IssuerPassphraseGroup {
    /// Environment variable containing issuer private key passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "issuer_pass")]
    issuer_pass_env_var: Option<OsString>,

    /// File containing issuer private key passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "issuer_pass")]
    issuer_pass_file: Option<PathBuf>,
}

impl From<&IssuerPassphraseGroup> for PassphraseGroup {
    fn from(group: &IssuerPassphraseGroup) -> Self {
        Self {
            pass_env_var: group.issuer_pass_env_var.clone(),
            pass_file: group.issuer_pass_file.clone(),
        }
    }
}

/// Generate a key pair.
///
/// The output is saved in the standard PKCS8 format. Ed25519 keys are used for
/// signing OS packages by default. RSA keys are 4096 bits.
#[derive(Debug, Parser)]
struct GenerateKeyCli {
    /// Path to output private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Key algorithm.
    #[arg(short, long, value_enum, default_value_t = KeyKind::Ed25519)]
    algorithm: KeyKind,

    #[command(flatten)]
    passphrase: PassphraseGroup,
}

/// Generate a certificate.
///
/// Without an issuer, a self-signed root certificate is created. With an
/// issuer, a signing certificate issued by that root is created.
#[derive(Debug, Parser)]
struct GenerateCertCli {
    /// Path to input private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    key: PathBuf,

    #[command(flatten)]
    passphrase: PassphraseGroup,

    /// Path to issuer private key.
    #[arg(long, value_name = "FILE", value_parser, requires = "issuer_cert")]
    issuer_key: Option<PathBuf>,

    /// Path to issuer certificate.
    #[arg(long, value_name = "FILE", value_parser, requires = "issuer_key")]
    issuer_cert: Option<PathBuf>,

    #[command(flatten)]
    issuer_passphrase: IssuerPassphraseGroup,

    /// Path to output certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Certificate subject with comma-separated components.
    #[arg(short, long, default_value = "CN=stboot")]
    subject: String,

    /// Certificate validity in days.
    #[arg(short, long, default_value = "10000")]
    validity: u64,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    GenerateKey(GenerateKeyCli),
    GenerateCert(GenerateCertCli),
}

/// Generate signing keys and certificates.
#[derive(Debug, Parser)]
pub struct KeyCli {
    #[command(subcommand)]
    command: KeyCommand,
}
