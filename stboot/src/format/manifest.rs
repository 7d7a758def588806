// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

/// Name of the manifest entry at the root of the package archive.
pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse manifest")]
    Parse(#[source] serde_json::Error),
    #[error("Failed to serialize manifest")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid manifest: {0}")]
    Invalid(Invalid),
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("Failed to write file: {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Invalid {
    #[error("version {0} is not supported (expected {MANIFEST_VERSION})")]
    Version(u32),
    #[error("missing kernel path")]
    MissingKernel,
    #[error("missing initramfs path")]
    MissingInitramfs,
}

type Result<T> = std::result::Result<T, Error>;

/// Boot instructions stored inside the package archive.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "kernel")]
    pub kernel_path: String,
    #[serde(default, rename = "initramfs")]
    pub initramfs_path: String,
    #[serde(default)]
    pub cmdline: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            label: String::new(),
            kernel_path: String::new(),
            initramfs_path: String::new(),
            cmdline: String::new(),
        }
    }
}

impl Manifest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(Error::Parse)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(Error::Serialize)
    }

    /// The label and command line are free-form. Everything else is
    /// mandatory.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(Error::Invalid(Invalid::Version(self.version)));
        } else if self.kernel_path.is_empty() {
            return Err(Error::Invalid(Invalid::MissingKernel));
        } else if self.initramfs_path.is_empty() {
            return Err(Error::Invalid(Invalid::MissingInitramfs));
        }

        Ok(())
    }

    /// Write [`MANIFEST_NAME`] into an existing directory. Returns the path of
    /// the written file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir.to_owned()));
        }

        let path = dir.join(MANIFEST_NAME);
        let data = self.serialize()?;

        fs::write(&path, data).map_err(|e| Error::WriteFile(path.clone(), e))?;

        Ok(path)
    }
}
