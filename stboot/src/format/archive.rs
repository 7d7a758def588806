// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Zip container of an OS package. The layout is fixed:
//!
//! ```text
//! boot/
//! <kernel path from manifest>
//! <initramfs path from manifest>   (omitted if empty)
//! manifest.json
//! ```
//!
//! Every entry is deflate-compressed with a zero DOS timestamp so that packing
//! the same inputs always produces the same bytes.

use std::io::{self, Cursor, Read, Write};

use thiserror::Error;
use tracing::trace;
use zip::{
    CompressionMethod, DateTime, ZipArchive, ZipWriter, result::ZipError,
    write::SimpleFileOptions,
};

use crate::format::manifest::{self, MANIFEST_NAME, Manifest};

/// Directory entry that holds the kernel and initramfs.
pub const BOOT_DIR: &str = "boot/";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to write zip archive")]
    ZipWrite(#[source] ZipError),
    #[error("Failed to write zip entry: {0:?}")]
    EntryWrite(String, #[source] io::Error),
    #[error("Not a valid zip archive")]
    ZipRead(#[source] ZipError),
    #[error("Entry not found in zip archive: {0:?}")]
    EntryNotFound(String),
    #[error("Failed to read zip entry: {0:?}")]
    EntryRead(String, #[source] io::Error),
    #[error("Failed to read manifest from zip archive")]
    Manifest(#[source] manifest::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Decoded archive contents.
#[derive(Clone, Debug)]
pub struct Contents {
    pub manifest: Manifest,
    pub kernel: Vec<u8>,
    pub initramfs: Vec<u8>,
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .last_modified_time(DateTime::default())
        .compression_method(CompressionMethod::Deflated)
}

fn write_entry<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    data: &[u8],
) -> Result<()> {
    trace!("Adding {name:?} ({} bytes)", data.len());

    writer
        .start_file(name, file_options())
        .map_err(Error::ZipWrite)?;
    writer
        .write_all(data)
        .map_err(|e| Error::EntryWrite(name.to_owned(), e))?;

    Ok(())
}

/// Pack the manifest, kernel, and initramfs into a zip archive. The kernel and
/// initramfs are stored at the paths declared in the manifest.
pub fn zip(manifest: &Manifest, kernel: &[u8], initramfs: &[u8]) -> Result<Vec<u8>> {
    let manifest_data = manifest.serialize().map_err(Error::Manifest)?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer
        .add_directory(BOOT_DIR, file_options())
        .map_err(Error::ZipWrite)?;

    write_entry(&mut writer, &manifest.kernel_path, kernel)?;

    if !initramfs.is_empty() {
        write_entry(&mut writer, &manifest.initramfs_path, initramfs)?;
    }

    write_entry(&mut writer, MANIFEST_NAME, &manifest_data)?;

    let raw_writer = writer.finish().map_err(Error::ZipWrite)?;

    Ok(raw_writer.into_inner())
}

/// Check that the data has a readable zip central directory without
/// decompressing any entries.
pub fn check_syntax(data: &[u8]) -> Result<()> {
    ZipArchive::new(Cursor::new(data)).map_err(Error::ZipRead)?;

    Ok(())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(ZipError::FileNotFound) => return Err(Error::EntryNotFound(name.to_owned())),
        Err(e) => return Err(Error::ZipRead(e)),
    };

    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| Error::EntryRead(name.to_owned(), e))?;

    Ok(data)
}

/// Unpack an archive. The manifest is read first to find the kernel and
/// initramfs entries. The manifest is parsed, but not validated.
pub fn unzip(data: &[u8]) -> Result<Contents> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(Error::ZipRead)?;

    let manifest_data = read_entry(&mut archive, MANIFEST_NAME)?;
    let manifest = Manifest::parse(&manifest_data).map_err(Error::Manifest)?;

    let kernel = read_entry(&mut archive, &manifest.kernel_path)?;
    let initramfs = read_entry(&mut archive, &manifest.initramfs_path)?;

    Ok(Contents {
        manifest,
        kernel,
        initramfs,
    })
}
