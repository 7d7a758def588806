// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! The descriptor is the JSON document that travels alongside the OS package
//! archive. It carries the signatures over the archive and the certificates
//! needed to check them.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::Url;

pub const DESCRIPTOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse descriptor")]
    Parse(#[source] serde_json::Error),
    #[error("Failed to serialize descriptor")]
    Serialize(#[source] serde_json::Error),
    #[error("Descriptor has {certificates} certificates, but {signatures} signatures")]
    LengthMismatch {
        certificates: usize,
        signatures: usize,
    },
    #[error("Invalid descriptor: {0}")]
    Invalid(Invalid),
}

/// Reasons a descriptor fails validation.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Invalid {
    #[error("version {0} is not supported (expected {DESCRIPTOR_VERSION})")]
    Version(u32),
    #[error("malformed OS package URL: {0:?}")]
    MalformedUrl(String, #[source] url::ParseError),
    #[error("unsupported scheme {scheme:?} in OS package URL: {url:?}")]
    UnsupportedUrlScheme { scheme: String, url: String },
}

type Result<T> = std::result::Result<T, Error>;

/// Check that a non-empty OS package URL is a well-formed absolute http or
/// https URL. An empty URL is accepted.
pub fn validate_url(url: &str) -> std::result::Result<(), Invalid> {
    if url.is_empty() {
        return Ok(());
    }

    let parsed = Url::parse(url).map_err(|e| Invalid::MalformedUrl(url.to_owned(), e))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(Invalid::UnsupportedUrlScheme {
            scheme: scheme.to_owned(),
            url: url.to_owned(),
        }),
    }
}

/// One signature slot: a PEM-encoded X509 certificate and the raw signature
/// produced by the matching private key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignatureEntry {
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    pub version: u32,
    pub os_pkg_url: String,
    entries: Vec<SignatureEntry>,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            os_pkg_url: String::new(),
            entries: Vec::new(),
        }
    }
}

impl Descriptor {
    pub fn new(os_pkg_url: impl Into<String>) -> Self {
        Self {
            os_pkg_url: os_pkg_url.into(),
            ..Default::default()
        }
    }

    /// Parse a descriptor from its JSON representation. The certificate and
    /// signature arrays must have the same length.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw: RawDescriptor = serde_json::from_slice(data).map_err(Error::Parse)?;
        let certificates = raw.certificates.unwrap_or_default();
        let signatures = raw.signatures.unwrap_or_default();

        if certificates.len() != signatures.len() {
            return Err(Error::LengthMismatch {
                certificates: certificates.len(),
                signatures: signatures.len(),
            });
        }

        let entries = certificates
            .into_iter()
            .zip(signatures)
            .map(|(certificate, signature)| SignatureEntry {
                certificate: certificate.0,
                signature: signature.0,
            })
            .collect();

        Ok(Self {
            version: raw.version,
            os_pkg_url: raw.os_pkg_url,
            entries,
        })
    }

    /// Serialize to indented JSON.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let (certificates, signatures): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .map(|e| {
                (
                    Base64Bytes(e.certificate.clone()),
                    Base64Bytes(e.signature.clone()),
                )
            })
            .unzip();

        let raw = RawDescriptor {
            version: self.version,
            os_pkg_url: self.os_pkg_url.clone(),
            certificates: Some(certificates),
            signatures: Some(signatures),
        };

        serde_json::to_vec_pretty(&raw).map_err(Error::Serialize)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != DESCRIPTOR_VERSION {
            return Err(Error::Invalid(Invalid::Version(self.version)));
        }

        validate_url(&self.os_pkg_url).map_err(Error::Invalid)
    }

    pub fn os_pkg_url(&self) -> &str {
        &self.os_pkg_url
    }

    /// Replace the package URL. The new value is checked by [`Self::validate`].
    pub fn set_os_pkg_url(&mut self, url: impl Into<String>) {
        self.os_pkg_url = url.into();
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a certificate and its signature as one slot.
    pub fn push(&mut self, certificate: Vec<u8>, signature: Vec<u8>) {
        self.entries.push(SignatureEntry {
            certificate,
            signature,
        });
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Base64Bytes(Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let data = STANDARD.decode(s).map_err(serde::de::Error::custom)?;

        Ok(Self(data))
    }
}

/// Wire format. Both arrays may be `null` when there are no signatures.
#[derive(Deserialize, Serialize)]
struct RawDescriptor {
    version: u32,
    #[serde(default)]
    os_pkg_url: String,
    #[serde(default)]
    certificates: Option<Vec<Base64Bytes>>,
    #[serde(default)]
    signatures: Option<Vec<Base64Bytes>>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn round_trip() {
        let mut descriptor = Descriptor::new("https://example.com/ospkg.zip");
        descriptor.push(b"cert 1".to_vec(), b"sig 1".to_vec());
        descriptor.push(b"cert 2".to_vec(), vec![0xff, 0x00, 0x7f]);

        let data = descriptor.serialize().unwrap();
        let parsed = Descriptor::parse(&data).unwrap();

        assert_eq!(parsed, descriptor);
        parsed.validate().unwrap();
    }

    #[test]
    fn wire_format() {
        let mut descriptor = Descriptor::new("http://example.com/a.zip");
        descriptor.push(b"abc".to_vec(), b"xyz".to_vec());

        let value: serde_json::Value =
            serde_json::from_slice(&descriptor.serialize().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "version": 1,
                "os_pkg_url": "http://example.com/a.zip",
                "certificates": ["YWJj"],
                "signatures": ["eHl6"],
            }),
        );
    }

    #[test]
    fn null_arrays() {
        let data = br#"{"version": 1, "os_pkg_url": "", "certificates": null, "signatures": null}"#;
        let descriptor = Descriptor::parse(data).unwrap();

        assert!(descriptor.is_empty());
        descriptor.validate().unwrap();
    }

    #[test]
    fn length_mismatch() {
        let data = br#"{"version": 1, "certificates": ["YWJj"], "signatures": []}"#;

        assert_matches!(
            Descriptor::parse(data),
            Err(Error::LengthMismatch {
                certificates: 1,
                signatures: 0,
            })
        );
    }

    #[test]
    fn malformed() {
        assert_matches!(Descriptor::parse(b"{"), Err(Error::Parse(_)));
        assert_matches!(
            Descriptor::parse(br#"{"version": 1, "certificates": ["!!"], "signatures": ["AA=="]}"#),
            Err(Error::Parse(_))
        );
    }

    #[test]
    fn bad_version() {
        let descriptor = Descriptor {
            version: 2,
            ..Default::default()
        };

        assert_matches!(
            descriptor.validate(),
            Err(Error::Invalid(Invalid::Version(2)))
        );
    }

    #[test]
    fn url_schemes() {
        for url in ["", "http://host/pkg.zip", "https://host/pkg.zip", "HTTPS://host"] {
            Descriptor::new(url).validate().unwrap();
        }

        let mut descriptor = Descriptor::default();
        descriptor.set_os_pkg_url("ftp://host/pkg.zip");
        assert_eq!(descriptor.os_pkg_url(), "ftp://host/pkg.zip");
        assert_matches!(
            descriptor.validate(),
            Err(Error::Invalid(Invalid::UnsupportedUrlScheme { scheme, .. })) if scheme == "ftp"
        );

        for url in [
            "host/pkg.zip",
            "://host",
            "https://exa mple.com/pkg.zip",
            "http://host:notaport/x",
            "https://[::1/x",
        ] {
            assert_matches!(
                Descriptor::new(url).validate(),
                Err(Error::Invalid(Invalid::MalformedUrl(u, _))) if u == url
            );
        }
    }
}
