// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! An OS package is a zip archive containing a kernel, an initramfs, and a
//! manifest, plus a separate descriptor holding signatures over the SHA-256
//! digest of the archive bytes.
//!
//! The archive is never decompressed before [`OsPackage::verify`] has run.
//! The digest covers the compressed bytes, so changing any byte of the archive
//! invalidates every signature.

use std::{
    collections::HashSet,
    fs,
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace};
use x509_cert::Certificate;

use crate::{
    crypto::{self, PrivateKey, Signer},
    format::{
        archive::{self, BOOT_DIR},
        descriptor::{self, Descriptor},
        manifest::{self, Manifest},
    },
};

/// Extension of the package archive.
pub const OS_PKG_EXT: &str = "zip";
/// Extension of the package descriptor.
pub const DESCRIPTOR_EXT: &str = "json";
/// Default base name for the archive and descriptor files.
pub const DEFAULT_OS_PKG_NAME: &str = "ospkg";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Path has no file name: {0:?}")]
    NoFileName(PathBuf),
    #[error("Invalid OS package URL")]
    Url(#[source] descriptor::Invalid),
    #[error("Kernel is empty")]
    EmptyKernel,
    #[error("Initramfs is empty")]
    EmptyInitramfs,
    #[error("Cannot hash empty archive")]
    EmptyArchive,
    #[error("Certificate is already used by an existing signature")]
    CertificateAlreadyUsed,
    #[error("Failed to parse certificate of signature #{0}")]
    ParseCertificate(usize, #[source] crypto::Error),
    #[error("OS package has not been verified")]
    NotVerified,
    #[error("Archive error")]
    Archive(#[from] archive::Error),
    #[error("Descriptor error")]
    Descriptor(#[from] descriptor::Error),
    #[error("Manifest error")]
    Manifest(#[from] manifest::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Compute the SHA-256 digest of archive bytes. Empty input is rejected since
/// it can never be a valid archive.
pub fn hash_archive(data: &[u8]) -> Result<[u8; 32]> {
    if data.is_empty() {
        return Err(Error::EmptyArchive);
    }

    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(digest.as_ref());

    Ok(hash)
}

/// Counts reported by [`OsPackage::verify`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Verification {
    /// Number of signature slots in the descriptor.
    pub found: usize,
    /// Number of slots whose certificate chains to the root, is not a
    /// duplicate, and whose signature is valid.
    pub valid: usize,
}

impl Verification {
    pub fn meets_threshold(&self, threshold: usize) -> bool {
        self.valid >= threshold
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Only in-memory fields exist.
    Created,
    /// The archive bytes are established.
    Packed,
    /// [`OsPackage::verify`] has completed.
    Verified,
    /// The contents were decoded from the verified archive.
    Unpacked,
}

/// Verified kernel, initramfs, and command line ready to be handed to the boot
/// executor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootImage {
    label: String,
    kernel: Vec<u8>,
    initramfs: Vec<u8>,
    cmdline: String,
}

impl BootImage {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kernel(&self) -> &[u8] {
        &self.kernel
    }

    pub fn initramfs(&self) -> &[u8] {
        &self.initramfs
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn kernel_reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.kernel)
    }

    pub fn initramfs_reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.initramfs)
    }
}

#[derive(Debug)]
pub struct OsPackage {
    /// Archive bytes. Once set, they are never recomputed, even if the
    /// in-memory contents change.
    raw: Option<Vec<u8>>,
    descriptor: Descriptor,
    hash: Option<[u8; 32]>,
    manifest: Manifest,
    kernel: Vec<u8>,
    initramfs: Vec<u8>,
    signer: Signer,
    verification: Option<Verification>,
    unpacked: bool,
}

fn boot_path(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::NoFileName(path.to_owned()))?;

    Ok(format!("{BOOT_DIR}{}", name.to_string_lossy()))
}

fn validate_contents(manifest: &Manifest, kernel: &[u8], initramfs: &[u8]) -> Result<()> {
    manifest.validate()?;

    if kernel.is_empty() {
        return Err(Error::EmptyKernel);
    } else if initramfs.is_empty() {
        return Err(Error::EmptyInitramfs);
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::ReadFile(path.to_owned(), e))
}

impl OsPackage {
    /// Create a new unsigned package from a kernel and initramfs on disk. They
    /// are stored in the archive as `boot/<file name>`.
    pub fn create(
        label: &str,
        os_pkg_url: &str,
        kernel_path: &Path,
        initramfs_path: &Path,
        cmdline: &str,
    ) -> Result<Self> {
        descriptor::validate_url(os_pkg_url).map_err(Error::Url)?;

        let kernel = read_file(kernel_path)?;
        let initramfs = read_file(initramfs_path)?;

        let manifest = Manifest {
            label: label.to_owned(),
            kernel_path: boot_path(kernel_path)?,
            initramfs_path: boot_path(initramfs_path)?,
            cmdline: cmdline.to_owned(),
            ..Default::default()
        };

        Self::from_contents(manifest, Descriptor::new(os_pkg_url), kernel, initramfs)
    }

    /// Create a new unsigned package from in-memory contents.
    pub fn from_contents(
        manifest: Manifest,
        descriptor: Descriptor,
        kernel: Vec<u8>,
        initramfs: Vec<u8>,
    ) -> Result<Self> {
        let package = Self {
            raw: None,
            descriptor,
            hash: None,
            manifest,
            kernel,
            initramfs,
            signer: Signer::default(),
            verification: None,
            unpacked: false,
        };

        package.validate()?;

        Ok(package)
    }

    /// Load a package received from elsewhere. The archive is only checked for
    /// zip syntax. Its contents are not read until after verification.
    pub fn reconstruct(archive: Vec<u8>, descriptor: &[u8]) -> Result<Self> {
        archive::check_syntax(&archive)?;

        let descriptor = Descriptor::parse(descriptor)?;
        descriptor.validate()?;

        let hash = hash_archive(&archive)?;

        debug!(
            "Reconstructed package with {} signatures: {}",
            descriptor.len(),
            hex::encode(hash),
        );

        Ok(Self {
            raw: Some(archive),
            descriptor,
            hash: Some(hash),
            manifest: Manifest::default(),
            kernel: Vec::new(),
            initramfs: Vec::new(),
            signer: Signer::default(),
            verification: None,
            unpacked: false,
        })
    }

    /// Select the algorithm used by [`Self::sign`] and [`Self::verify`].
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn signer(&self) -> Signer {
        self.signer
    }

    pub fn state(&self) -> State {
        if self.unpacked {
            State::Unpacked
        } else if self.verification.is_some() {
            State::Verified
        } else if self.raw.is_some() {
            State::Packed
        } else {
            State::Created
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The manifest. For a reconstructed package, this is only populated after
    /// [`Self::os_image`] succeeds.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// SHA-256 digest of the archive bytes, if the archive has been packed.
    pub fn hash(&self) -> Option<&[u8; 32]> {
        self.hash.as_ref()
    }

    /// Whether [`Self::verify`] has completed. This is set no matter how many
    /// signatures were valid. Use [`Self::meets_threshold`] to make trust
    /// decisions.
    pub fn is_verified(&self) -> bool {
        self.verification.is_some()
    }

    /// The counts from the last call to [`Self::verify`].
    pub fn verification(&self) -> Option<Verification> {
        self.verification
    }

    /// Whether the package has been verified and at least `threshold`
    /// signatures were valid.
    pub fn meets_threshold(&self, threshold: usize) -> bool {
        self.verification
            .is_some_and(|v| v.meets_threshold(threshold))
    }

    fn validate(&self) -> Result<()> {
        validate_contents(&self.manifest, &self.kernel, &self.initramfs)?;
        self.descriptor.validate()?;

        Ok(())
    }

    /// Get the archive bytes, packing the in-memory contents on first use.
    pub fn archive_bytes(&mut self) -> Result<&[u8]> {
        let raw = match self.raw.take() {
            Some(r) => r,
            None => {
                let data = archive::zip(&self.manifest, &self.kernel, &self.initramfs)?;
                let hash = hash_archive(&data)?;

                debug!("Packed {} byte archive: {}", data.len(), hex::encode(hash));

                self.hash = Some(hash);
                data
            }
        };

        Ok(self.raw.insert(raw).as_slice())
    }

    pub fn descriptor_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.descriptor.serialize()?)
    }

    fn current_hash(&mut self) -> Result<[u8; 32]> {
        let hash = hash_archive(self.archive_bytes()?)?;
        self.hash = Some(hash);

        Ok(hash)
    }

    /// Sign the archive and append the certificate and signature to the
    /// descriptor. A certificate can only be used once per package. Any
    /// previous verification result is discarded.
    pub fn sign(&mut self, key: &PrivateKey, cert: &Certificate) -> Result<()> {
        let hash = self.current_hash()?;
        let cert_der = crypto::encode_der_cert(cert)?;

        for (i, entry) in self.descriptor.entries().iter().enumerate() {
            let existing = crypto::parse_pem_cert(&entry.certificate)
                .map_err(|e| Error::ParseCertificate(i, e))?;

            if crypto::encode_der_cert(&existing)? == cert_der {
                return Err(Error::CertificateAlreadyUsed);
            }
        }

        let signature = self.signer.sign(key, &hash)?;
        let cert_pem = crypto::encode_pem_cert(cert)?;

        self.descriptor.push(cert_pem.into_bytes(), signature);

        // Earlier results describe a different set of signatures.
        self.verification = None;
        self.unpacked = false;

        debug!("Added signature #{}", self.descriptor.len());

        Ok(())
    }

    /// Parse a PKCS8 DER private key and a DER certificate and sign with them.
    pub fn sign_der(&mut self, key: &[u8], cert: &[u8]) -> Result<()> {
        let key = crypto::parse_private_key_der(key)?;
        let cert = crypto::parse_der_cert(cert)?;

        self.sign(&key, &cert)
    }

    /// Count the signatures that were made by certificates issued by `root`.
    ///
    /// A certificate that cannot be parsed aborts verification with an error.
    /// A certificate that is not issued by `root`, a certificate that was
    /// already seen in an earlier slot, or an invalid signature only causes
    /// that slot to be skipped. Certificate validity dates and key usage are not
    /// checked.
    ///
    /// The package is marked as verified regardless of the number of valid
    /// signatures. Enforcing a threshold is the caller's responsibility. See
    /// [`Self::meets_threshold`].
    pub fn verify(&mut self, root: &Certificate) -> Result<Verification> {
        let hash = self.current_hash()?;
        let mut result = Verification::default();
        let mut seen = HashSet::new();

        for (i, entry) in self.descriptor.entries().iter().enumerate() {
            result.found += 1;

            let cert = crypto::parse_pem_cert(&entry.certificate)
                .map_err(|e| Error::ParseCertificate(i, e))?;
            let cert_der =
                crypto::encode_der_cert(&cert).map_err(|e| Error::ParseCertificate(i, e))?;

            if let Err(e) = crypto::verify_cert_issued_by(&cert, root) {
                debug!("Skipping signature #{i}: certificate not issued by root: {e}");
                continue;
            }

            if !seen.insert(cert_der) {
                debug!("Skipping signature #{i}: duplicate certificate");
                continue;
            }

            let public_key = match crypto::get_public_key(&cert) {
                Ok(k) => k,
                Err(e) => {
                    debug!("Skipping signature #{i}: unusable public key: {e}");
                    continue;
                }
            };

            if let Err(e) = self.signer.verify(&entry.signature, &hash, &public_key) {
                debug!("Skipping signature #{i}: {e}");
                continue;
            }

            trace!("Signature #{i} is valid");

            result.valid += 1;
        }

        debug!(
            "Found {} signatures, {} valid: {}",
            result.found,
            result.valid,
            hex::encode(hash),
        );

        self.verification = Some(result);

        Ok(result)
    }

    /// Decode the verified archive and return the boot image. Fails if
    /// [`Self::verify`] has not run. The caller must check
    /// [`Self::meets_threshold`] before calling this. The package is left
    /// untouched if the archive contents are invalid.
    pub fn os_image(&mut self) -> Result<BootImage> {
        if !self.is_verified() {
            return Err(Error::NotVerified);
        }

        let contents = archive::unzip(self.archive_bytes()?)?;
        validate_contents(&contents.manifest, &contents.kernel, &contents.initramfs)?;

        self.manifest = contents.manifest;
        self.kernel = contents.kernel;
        self.initramfs = contents.initramfs;
        self.unpacked = true;

        Ok(BootImage {
            label: self.manifest.label.clone(),
            kernel: self.kernel.clone(),
            initramfs: self.initramfs.clone(),
            cmdline: self.manifest.cmdline.clone(),
        })
    }
}
