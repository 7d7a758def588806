// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Candidate selection. Each candidate is fetched, verified, and checked
//! against the trust policy in turn. The first one that passes is measured and
//! unpacked. If none pass, the caller must not boot anything.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};
use x509_cert::Certificate;

use crate::{
    acquire::{self, PackageSource},
    config::TrustPolicy,
    crypto,
    ospkg::{self, BootImage, OsPackage},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to fetch package")]
    Fetch(#[from] acquire::Error),
    #[error("Invalid package")]
    Package(#[from] ospkg::Error),
    #[error("Only {valid} of {found} signatures are valid, but {threshold} are required")]
    BelowThreshold {
        found: usize,
        valid: usize,
        threshold: usize,
    },
    #[error("Failed to encode root certificate")]
    Root(#[source] crypto::Error),
    #[error("Failed to measure {0}")]
    Measure(Event, #[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("No valid OS package among {} candidates", .0.len())]
    NoValidPackage(Vec<Rejection>),
}

type Result<T> = std::result::Result<T, Error>;

/// A candidate that did not pass, and why.
#[derive(Debug)]
pub struct Rejection {
    pub name: String,
    pub error: Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    OsPackageArchive,
    OsPackageDescriptor,
    SigningRoot,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OsPackageArchive => "OS package archive",
            Self::OsPackageDescriptor => "OS package descriptor",
            Self::SigningRoot => "signing root certificate",
        };

        f.write_str(name)
    }
}

/// Receives the opaque blobs that make up the boot decision, eg. to extend
/// them into TPM PCRs.
pub trait Measurer {
    fn measure(
        &mut self,
        event: Event,
        data: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A measurer that records the SHA-256 digest of each event in memory.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    pub entries: Vec<(Event, [u8; 32])>,
}

impl Measurer for EventLog {
    fn measure(
        &mut self,
        event: Event,
        data: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let digest = ring::digest::digest(&ring::digest::SHA256, data);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(digest.as_ref());

        self.entries.push((event, hash));

        Ok(())
    }
}

fn measure(measurer: &mut dyn Measurer, event: Event, data: &[u8]) -> Result<()> {
    measurer
        .measure(event, data)
        .map_err(|e| Error::Measure(event, e))
}

/// Fetch, verify, and unpack a single candidate.
pub fn load_package(
    source: &mut dyn PackageSource,
    root: &Certificate,
    policy: &TrustPolicy,
    measurer: &mut dyn Measurer,
) -> Result<BootImage> {
    let fetched = source.fetch()?;

    let mut package =
        OsPackage::reconstruct(fetched.archive, &fetched.descriptor)?.with_signer(policy.signer);
    let verification = package.verify(root)?;

    if !package.meets_threshold(policy.signature_threshold) {
        return Err(Error::BelowThreshold {
            found: verification.found,
            valid: verification.valid,
            threshold: policy.signature_threshold,
        });
    }

    let root_der = crypto::encode_der_cert(root).map_err(Error::Root)?;

    measure(measurer, Event::OsPackageArchive, package.archive_bytes()?)?;
    measure(measurer, Event::OsPackageDescriptor, &fetched.descriptor)?;
    measure(measurer, Event::SigningRoot, &root_der)?;

    Ok(package.os_image()?)
}

/// Try each candidate in order and return the first image that passes the
/// trust policy. If none pass, the error lists every rejected candidate.
pub fn load_first_valid(
    sources: &mut [Box<dyn PackageSource>],
    root: &Certificate,
    policy: &TrustPolicy,
    measurer: &mut dyn Measurer,
) -> Result<BootImage> {
    let mut rejected = vec![];

    for source in sources.iter_mut() {
        let name = source.name();

        match load_package(source.as_mut(), root, policy, measurer) {
            Ok(image) => {
                info!("Selected OS package: {name}: {:?}", image.label());
                return Ok(image);
            }
            Err(error) => {
                warn!("Rejected OS package: {name}: {error}");
                rejected.push(Rejection { name, error });
            }
        }
    }

    Err(Error::NoValidPackage(rejected))
}
