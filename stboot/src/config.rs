// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Signer;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read trust policy: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse trust policy: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Signature threshold must be at least 1")]
    ZeroThreshold,
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMethod {
    /// Packages are read from local candidate directories.
    #[default]
    Local,
}

fn default_fetch_attempts() -> u32 {
    1
}

/// Rules that decide whether a package may be booted.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrustPolicy {
    /// Minimum number of valid signatures from distinct certificates.
    pub signature_threshold: usize,
    #[serde(default)]
    pub signer: Signer,
    #[serde(default)]
    pub fetch_method: FetchMethod,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default)]
    pub fetch_retry_delay_ms: u64,
}

impl TrustPolicy {
    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        let policy: Self = toml_edit::de::from_str(contents)
            .map_err(|e| Error::Parse(path.to_owned(), e))?;

        policy.validate()?;

        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signature_threshold == 0 {
            return Err(Error::ZeroThreshold);
        }

        Ok(())
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }
}

pub fn load_trust_policy(path: &Path) -> Result<TrustPolicy> {
    let contents = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

    TrustPolicy::parse(path, &contents)
}
