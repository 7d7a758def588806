// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::{
    cli::{status, warning},
    crypto::{self, PassphraseSource, Signer},
    ospkg::{DEFAULT_OS_PKG_NAME, DESCRIPTOR_EXT, OS_PKG_EXT, OsPackage},
};

/// Signature algorithms selectable from the command line.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum SignerArg {
    #[default]
    Ed25519,
    RsaPss,
}

impl From<SignerArg> for Signer {
    fn from(arg: SignerArg) -> Self {
        match arg {
            SignerArg::Ed25519 => Self::Ed25519,
            SignerArg::RsaPss => Self::RsaPss,
        }
    }
}

#[derive(Debug, Args)]
pub struct PackagePaths {
    /// Path to the OS package archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub archive: PathBuf,

    /// Path to the OS package descriptor [default: archive path with .json].
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub descriptor: Option<PathBuf>,
}

impl PackagePaths {
    pub fn descriptor_path(&self) -> PathBuf {
        self.descriptor
            .clone()
            .unwrap_or_else(|| self.archive.with_extension(DESCRIPTOR_EXT))
    }
}

fn read_package(paths: &PackagePaths, signer: Signer) -> Result<OsPackage> {
    let archive = fs::read(&paths.archive)
        .with_context(|| format!("Failed to read archive: {:?}", paths.archive))?;
    let descriptor_path = paths.descriptor_path();
    let descriptor = fs::read(&descriptor_path)
        .with_context(|| format!("Failed to read descriptor: {descriptor_path:?}"))?;

    let package = OsPackage::reconstruct(archive, &descriptor)
        .with_context(|| format!("Failed to load OS package: {:?}", paths.archive))?;

    Ok(package.with_signer(signer))
}

fn write_package(package: &mut OsPackage, archive_path: &Path, descriptor_path: &Path) -> Result<()> {
    let descriptor = package
        .descriptor_bytes()
        .context("Failed to serialize descriptor")?;
    let archive = package.archive_bytes().context("Failed to pack archive")?;

    fs::write(archive_path, archive)
        .with_context(|| format!("Failed to write archive: {archive_path:?}"))?;
    fs::write(descriptor_path, descriptor)
        .with_context(|| format!("Failed to write descriptor: {descriptor_path:?}"))?;

    Ok(())
}

fn verify_package(package: &mut OsPackage, root_path: &Path, threshold: usize) -> Result<()> {
    let root = crypto::read_pem_cert_file(root_path)
        .with_context(|| format!("Failed to load root certificate: {root_path:?}"))?;

    let verification = package.verify(&root).context("Failed to verify signatures")?;

    status!(
        "Signatures: {} found, {} valid, {threshold} required",
        verification.found,
        verification.valid,
    );

    if !package.meets_threshold(threshold) {
        bail!(
            "Not enough valid signatures: {} < {threshold}",
            verification.valid,
        );
    }

    Ok(())
}

fn create_subcommand(cli: &CreateCli) -> Result<()> {
    let mut package = OsPackage::create(
        &cli.label,
        &cli.url,
        &cli.kernel,
        &cli.initramfs,
        &cli.cmdline,
    )
    .context("Failed to create OS package")?;

    if !cli.output.is_dir() {
        bail!("Output is not a directory: {:?}", cli.output);
    }

    let archive_path = cli.output.join(format!("{}.{OS_PKG_EXT}", cli.name));
    let descriptor_path = cli.output.join(format!("{}.{DESCRIPTOR_EXT}", cli.name));

    write_package(&mut package, &archive_path, &descriptor_path)?;

    if let Some(hash) = package.hash() {
        info!("Archive SHA-256: {}", hex::encode(hash));
    }

    status!("Created {archive_path:?} and {descriptor_path:?}");

    Ok(())
}

fn sign_subcommand(cli: &SignCli) -> Result<()> {
    let mut package = read_package(&cli.package, cli.signer.into())?;

    let source = PassphraseSource::new(
        &cli.key,
        cli.passphrase.pass_file.as_deref(),
        cli.passphrase.pass_env_var.as_deref(),
    );
    let key = crypto::read_pem_key_file(&cli.key, &source)
        .with_context(|| format!("Failed to load key: {:?}", cli.key))?;
    let cert = crypto::read_pem_cert_file(&cli.cert)
        .with_context(|| format!("Failed to load certificate: {:?}", cli.cert))?;

    if !crypto::cert_matches_key(&cert, &key)? {
        bail!(
            "Private key {:?} does not match certificate {:?}",
            cli.key,
            cli.cert,
        );
    }

    package.sign(&key, &cert).context("Failed to sign OS package")?;

    let descriptor_path = cli.package.descriptor_path();
    let descriptor = package
        .descriptor_bytes()
        .context("Failed to serialize descriptor")?;

    fs::write(&descriptor_path, descriptor)
        .with_context(|| format!("Failed to write descriptor: {descriptor_path:?}"))?;

    status!(
        "Descriptor now has {} signatures: {descriptor_path:?}",
        package.descriptor().len(),
    );

    Ok(())
}

fn verify_subcommand(cli: &VerifyCli) -> Result<()> {
    let mut package = read_package(&cli.package, cli.signer.into())?;

    verify_package(&mut package, &cli.root, cli.threshold)?;

    status!("Successfully verified OS package");

    Ok(())
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let package = read_package(&cli.package, Signer::default())?;
    let descriptor = package.descriptor();

    println!("Descriptor version: {}", descriptor.version);
    println!("OS package URL: {:?}", descriptor.os_pkg_url);

    if let Some(hash) = package.hash() {
        println!("Archive SHA-256: {}", hex::encode(hash));
    }

    println!("Signatures: {}", descriptor.len());

    for (i, entry) in descriptor.entries().iter().enumerate() {
        match crypto::parse_pem_cert(&entry.certificate) {
            Ok(cert) => {
                println!("  #{i}: subject: {}", cert.tbs_certificate.subject);
                println!("  #{i}: issuer: {}", cert.tbs_certificate.issuer);
            }
            Err(e) => warning!("Signature #{i} has an invalid certificate: {e}"),
        }
    }

    Ok(())
}

fn extract_subcommand(cli: &ExtractCli) -> Result<()> {
    let mut package = read_package(&cli.package, cli.signer.into())?;

    verify_package(&mut package, &cli.root, cli.threshold)?;

    let image = package.os_image().context("Failed to unpack OS package")?;

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create directory: {:?}", cli.output))?;

    let manifest = package.manifest();

    for (entry_path, data) in [
        (&manifest.kernel_path, image.kernel()),
        (&manifest.initramfs_path, image.initramfs()),
    ] {
        let name = Path::new(entry_path)
            .file_name()
            .with_context(|| format!("Entry path has no file name: {entry_path:?}"))?;
        let path = cli.output.join(name);

        fs::write(&path, data).with_context(|| format!("Failed to write: {path:?}"))?;
    }

    manifest
        .write_to(&cli.output)
        .context("Failed to write manifest")?;

    status!("Extracted {:?} to {:?}", image.label(), cli.output);

    Ok(())
}

pub fn ospkg_main(cli: &OspkgCli) -> Result<()> {
    match &cli.command {
        OspkgCommand::Create(c) => create_subcommand(c),
        OspkgCommand::Sign(c) => sign_subcommand(c),
        OspkgCommand::Verify(c) => verify_subcommand(c),
        OspkgCommand::Info(c) => info_subcommand(c),
        OspkgCommand::Extract(c) => extract_subcommand(c),
    }
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

/// Create an unsigned OS package from a kernel and initramfs.
#[derive(Debug, Parser)]
struct CreateCli {
    /// Path to kernel.
    #[arg(short, long, value_name = "FILE", value_parser)]
    kernel: PathBuf,

    /// Path to initramfs.
    #[arg(short, long, value_name = "FILE", value_parser)]
    initramfs: PathBuf,

    /// Human-readable description of the OS.
    #[arg(short, long, default_value = "")]
    label: String,

    /// Kernel command line.
    #[arg(short, long, default_value = "")]
    cmdline: String,

    /// URL the archive will be served from (http or https).
    #[arg(short, long, default_value = "")]
    url: String,

    /// Output directory.
    #[arg(short, long, value_name = "DIR", value_parser, default_value = ".")]
    output: PathBuf,

    /// Base name of the output archive and descriptor.
    #[arg(short, long, default_value = DEFAULT_OS_PKG_NAME)]
    name: String,
}

/// Add a signature to an OS package descriptor.
#[derive(Debug, Parser)]
struct SignCli {
    #[command(flatten)]
    package: PackagePaths,

    /// Path to signing private key.
    #[arg(short, long, value_name = "FILE", value_parser)]
    key: PathBuf,

    /// Path to signing certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    cert: PathBuf,

    #[command(flatten)]
    passphrase: PassphraseGroup,

    /// Signature algorithm.
    #[arg(short, long, value_enum, default_value_t)]
    signer: SignerArg,
}

/// Verify the signatures of an OS package.
#[derive(Debug, Parser)]
struct VerifyCli {
    #[command(flatten)]
    package: PackagePaths,

    /// Path to trusted root certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    root: PathBuf,

    /// Minimum number of valid signatures.
    #[arg(short, long, default_value = "1")]
    threshold: usize,

    /// Signature algorithm.
    #[arg(short, long, value_enum, default_value_t)]
    signer: SignerArg,
}

/// Show the descriptor of an OS package without unpacking it.
#[derive(Debug, Parser)]
struct InfoCli {
    #[command(flatten)]
    package: PackagePaths,
}

/// Verify an OS package and extract its kernel, initramfs, and manifest.
#[derive(Debug, Parser)]
struct ExtractCli {
    #[command(flatten)]
    package: PackagePaths,

    /// Path to trusted root certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    root: PathBuf,

    /// Minimum number of valid signatures.
    #[arg(short, long, default_value = "1")]
    threshold: usize,

    /// Signature algorithm.
    #[arg(short, long, value_enum, default_value_t)]
    signer: SignerArg,

    /// Output directory.
    #[arg(short, long, value_name = "DIR", value_parser)]
    output: PathBuf,
}

#[derive(Debug, Subcommand)]
enum OspkgCommand {
    Create(CreateCli),
    Sign(SignCli),
    Verify(VerifyCli),
    Info(InfoCli),
    Extract(ExtractCli),
}

/// Create, sign, and verify OS packages.
#[derive(Debug, Parser)]
pub struct OspkgCli {
    #[command(subcommand)]
    command: OspkgCommand,
}
