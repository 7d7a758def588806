// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Sources of OS package candidates. A source produces the archive and the
//! descriptor together or fails.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::ospkg::{DEFAULT_OS_PKG_NAME, DESCRIPTOR_EXT, OS_PKG_EXT};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to list directory: {0:?}")]
    ListDir(PathBuf, #[source] io::Error),
    #[error("Gave up after {attempts} attempts: {name}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Raw bytes of a package as received. Nothing has been checked yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedPackage {
    pub archive: Vec<u8>,
    pub descriptor: Vec<u8>,
}

pub trait PackageSource: fmt::Debug {
    /// Human-readable name used in log messages.
    fn name(&self) -> String;

    fn fetch(&mut self) -> Result<FetchedPackage>;
}

/// A package stored as `<base>.zip` and `<base>.json` in a directory.
#[derive(Clone, Debug)]
pub struct LocalSource {
    dir: PathBuf,
    base_name: String,
}

impl LocalSource {
    pub fn new(dir: &Path, base_name: &str) -> Self {
        Self {
            dir: dir.to_owned(),
            base_name: base_name.to_owned(),
        }
    }

    /// Source for [`DEFAULT_OS_PKG_NAME`] in `dir`.
    pub fn with_default_name(dir: &Path) -> Self {
        Self::new(dir, DEFAULT_OS_PKG_NAME)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{OS_PKG_EXT}", self.base_name))
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{DESCRIPTOR_EXT}", self.base_name))
    }
}

impl PackageSource for LocalSource {
    fn name(&self) -> String {
        self.archive_path().display().to_string()
    }

    fn fetch(&mut self) -> Result<FetchedPackage> {
        let descriptor_path = self.descriptor_path();
        let descriptor =
            fs::read(&descriptor_path).map_err(|e| Error::ReadFile(descriptor_path, e))?;

        let archive_path = self.archive_path();
        let archive = fs::read(&archive_path).map_err(|e| Error::ReadFile(archive_path, e))?;

        Ok(FetchedPackage {
            archive,
            descriptor,
        })
    }
}

/// Find every `<base>.json` in `dir` that has a matching `<base>.zip`. The
/// candidates are sorted by base name.
pub fn local_candidates(dir: &Path) -> Result<Vec<LocalSource>> {
    let mut names = vec![];

    for entry in fs::read_dir(dir).map_err(|e| Error::ListDir(dir.to_owned(), e))? {
        let entry = entry.map_err(|e| Error::ListDir(dir.to_owned(), e))?;
        let path = entry.path();

        if path.extension().is_none_or(|e| e != DESCRIPTOR_EXT) {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            debug!("Skipping non-UTF-8 file name: {path:?}");
            continue;
        };

        if path.with_extension(OS_PKG_EXT).is_file() {
            names.push(stem.to_owned());
        } else {
            debug!("Skipping descriptor without archive: {path:?}");
        }
    }

    names.sort();

    Ok(names.iter().map(|n| LocalSource::new(dir, n)).collect())
}

/// Retry a source a bounded number of times with a fixed delay between
/// attempts.
#[derive(Debug)]
pub struct RetrySource<S> {
    inner: S,
    attempts: u32,
    delay: Duration,
}

impl<S: PackageSource> RetrySource<S> {
    pub fn new(inner: S, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl<S: PackageSource> PackageSource for RetrySource<S> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn fetch(&mut self) -> Result<FetchedPackage> {
        let mut attempt = 1;

        loop {
            match self.inner.fetch() {
                Ok(p) => return Ok(p),
                Err(e) if attempt >= self.attempts => {
                    return Err(Error::RetriesExhausted {
                        name: self.inner.name(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Attempt {attempt}/{} failed: {}: {e}",
                        self.attempts,
                        self.inner.name(),
                    );

                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug)]
    struct FlakySource {
        failures: u32,
        calls: u32,
    }

    impl PackageSource for FlakySource {
        fn name(&self) -> String {
            "flaky".to_owned()
        }

        fn fetch(&mut self) -> Result<FetchedPackage> {
            self.calls += 1;

            if self.calls <= self.failures {
                Err(Error::ReadFile(
                    PathBuf::from("flaky"),
                    io::Error::other("unavailable"),
                ))
            } else {
                Ok(FetchedPackage {
                    archive: b"zip".to_vec(),
                    descriptor: b"json".to_vec(),
                })
            }
        }
    }

    #[test]
    fn retry_until_success() {
        let inner = FlakySource {
            failures: 2,
            calls: 0,
        };
        let mut source = RetrySource::new(inner, 3, Duration::ZERO);

        let package = source.fetch().unwrap();
        assert_eq!(package.archive, b"zip");
        assert_eq!(source.inner.calls, 3);
    }

    #[test]
    fn retry_exhausted() {
        let inner = FlakySource {
            failures: 5,
            calls: 0,
        };
        let mut source = RetrySource::new(inner, 2, Duration::ZERO);

        assert_matches!(
            source.fetch(),
            Err(Error::RetriesExhausted { attempts: 2, .. })
        );
        assert_eq!(source.inner.calls, 2);
    }

    #[test]
    fn local_candidates_sorted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();

        for name in ["b", "a", "c"] {
            fs::write(dir.join(format!("{name}.json")), name).unwrap();
        }
        fs::write(dir.join("a.zip"), b"a").unwrap();
        fs::write(dir.join("b.zip"), b"b").unwrap();
        fs::write(dir.join("d.zip"), b"d").unwrap();

        let candidates = local_candidates(dir).unwrap();
        let names = candidates.iter().map(|c| c.base_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["a", "b"]);

        let mut source = candidates[1].clone();
        assert_eq!(
            source.fetch().unwrap(),
            FetchedPackage {
                archive: b"b".to_vec(),
                descriptor: b"b".to_vec(),
            },
        );
    }

    #[test]
    fn local_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut source = LocalSource::with_default_name(temp_dir.path());

        assert_matches!(source.fetch(), Err(Error::ReadFile(p, _)) if p.ends_with("ospkg.json"));
    }
}
