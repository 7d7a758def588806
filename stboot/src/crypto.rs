// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env::{self, VarError},
    ffi::{OsStr, OsString},
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use const_oid::db::{rfc5912, rfc8410};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use passterm::PromptError;
use pkcs8::{
    DecodePrivateKey, EncodePrivateKey, EncodePublicKey, EncryptedPrivateKeyInfo, LineEnding,
    PrivateKeyInfo, SecretDocument,
    pkcs5::{pbes2, scrypt},
};
use rand::RngCore;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey, traits::PublicKeyParts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{Keypair, SignatureEncoding};
use thiserror::Error;
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    der::{
        Decode, DecodePem, Encode, EncodePem, asn1::BitString, pem::PemLabel,
        referenced::OwnedToRef,
    },
    serial_number::SerialNumber,
    spki::{
        AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
    time::Validity,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{signer:?} signer cannot use {key:?} key")]
    KeyMismatch { signer: Signer, key: KeyKind },
    #[error("Key algorithm not supported: {0}")]
    UnsupportedKeyAlgorithm(const_oid::ObjectIdentifier),
    #[error("Certificate signature algorithm not supported: {0}")]
    UnsupportedSignatureAlgorithm(const_oid::ObjectIdentifier),
    #[error("RSA key size ({}) not supported", .0 * 8)]
    UnsupportedKeySize(usize),
    #[error("Certificate issuer does not match root subject")]
    IssuerMismatch,
    #[error("Certificate signature algorithm {algorithm} cannot use {key:?} issuer key")]
    IssuerKeyMismatch {
        algorithm: const_oid::ObjectIdentifier,
        key: KeyKind,
    },
    #[error("Certificate signature bit string has unused bits")]
    MalformedCertSignature,
    #[error("Passphrase prompt requires an interactive terminal")]
    NotInteractive(#[source] io::Error),
    #[error("Failed to prompt for passphrase")]
    PassphrasePrompt(#[source] PromptError),
    #[error("Passphrases do not match")]
    ConfirmPassphrase,
    #[error("Failed to read environment variable: {0:?}")]
    InvalidEnvVar(OsString, #[source] VarError),
    #[error("PEM has start tag, but no end tag")]
    PemNoEndTag,
    #[error("Unexpected PEM label: {0:?}")]
    UnexpectedPemLabel(String),
    #[error("Failed to load encrypted private key")]
    LoadKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to load unencrypted private key")]
    LoadKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to save encrypted private key")]
    SaveKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to save unencrypted private key")]
    SaveKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to load public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to save public key")]
    SavePubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to load X509 certificate")]
    LoadCert(#[source] x509_cert::der::Error),
    #[error("Failed to save X509 certificate")]
    SaveCert(#[source] x509_cert::der::Error),
    #[error("Failed to generate RSA key")]
    RsaGenerate(#[source] Box<rsa::Error>),
    #[error("Failed to RSA sign data")]
    RsaSign(#[source] Box<rsa::Error>),
    #[error("Failed to RSA verify signature")]
    RsaVerify(#[source] Box<rsa::Error>),
    #[error("Failed to Ed25519 verify signature")]
    Ed25519Verify(#[source] ed25519_dalek::SignatureError),
    #[error("Failed to generate X509 certificate")]
    CertGenerate(#[source] x509_cert::builder::Error),
    #[error("Invalid parameters for X509 certificate generation")]
    CertParams(#[source] x509_cert::der::Error),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// The kinds of key material that can be loaded from PKCS8 files and
/// certificates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum KeyKind {
    Ed25519,
    Rsa,
}

#[derive(Clone)]
pub enum PrivateKey {
    Ed25519(SigningKey),
    Rsa(RsaPrivateKey),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.kind()).finish()
    }
}

impl PrivateKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Ed25519(_) => KeyKind::Ed25519,
            Self::Rsa(_) => KeyKind::Rsa,
        }
    }

    /// Get the public key portion of the private key.
    pub fn to_public_key(&self) -> PublicKey {
        match self {
            Self::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
            Self::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
        }
    }

    /// Encode as an unencrypted PKCS8 DER document.
    pub fn to_pkcs8_der(&self) -> pkcs8::Result<SecretDocument> {
        match self {
            Self::Ed25519(key) => key.to_pkcs8_der(),
            Self::Rsa(key) => key.to_pkcs8_der(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Ed25519(_) => KeyKind::Ed25519,
            Self::Rsa(_) => KeyKind::Rsa,
        }
    }

    fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let der = match self {
            Self::Ed25519(key) => key.to_public_key_der(),
            Self::Rsa(key) => key.to_public_key_der(),
        }
        .map_err(Error::SavePubKey)?;

        SubjectPublicKeyInfoOwned::from_der(der.as_bytes()).map_err(Error::CertParams)
    }
}

/// Signing and verification algorithm used for OS package signatures. The
/// signature always covers the SHA-256 digest of the package archive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signer {
    /// Raw Ed25519 over the input. No additional hashing.
    #[default]
    Ed25519,
    /// RSASSA-PSS over the SHA-256 of the input, with the salt length equal to
    /// the digest length.
    RsaPss,
    /// Produces 8 random bytes and accepts every signature. For test fixtures
    /// only. It cannot be selected from a trust policy or the command line.
    #[serde(skip)]
    Dummy,
}

impl Signer {
    pub fn sign(self, key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>> {
        match (self, key) {
            (Self::Ed25519, PrivateKey::Ed25519(k)) => Ok(k.sign(data).to_bytes().to_vec()),
            (Self::RsaPss, PrivateKey::Rsa(k)) => {
                check_key_size(k.size())?;

                let digest = Sha256::digest(data);
                let mut rng = rand::thread_rng();

                k.sign_with_rng(&mut rng, Pss::new::<Sha256>(), &digest)
                    .map_err(|e| Error::RsaSign(Box::new(e)))
            }
            (Self::Dummy, _) => {
                let mut signature = vec![0u8; 8];
                rand::thread_rng().fill_bytes(&mut signature);
                Ok(signature)
            }
            (signer, key) => Err(Error::KeyMismatch {
                signer,
                key: key.kind(),
            }),
        }
    }

    pub fn verify(self, signature: &[u8], data: &[u8], key: &PublicKey) -> Result<()> {
        match (self, key) {
            (Self::Ed25519, PublicKey::Ed25519(k)) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(Error::Ed25519Verify)?;

                k.verify(data, &signature).map_err(Error::Ed25519Verify)
            }
            (Self::RsaPss, PublicKey::Rsa(k)) => {
                check_key_size(k.size())?;

                let digest = Sha256::digest(data);

                k.verify(Pss::new::<Sha256>(), &digest, signature)
                    .map_err(|e| Error::RsaVerify(Box::new(e)))
            }
            (Self::Dummy, _) => Ok(()),
            (signer, key) => Err(Error::KeyMismatch {
                signer,
                key: key.kind(),
            }),
        }
    }
}

#[derive(Clone)]
pub enum PassphraseSource {
    Prompt(String),
    EnvVar(OsString),
    File(PathBuf),
}

impl PassphraseSource {
    pub fn new(key_file: &Path, pass_file: Option<&Path>, env_var: Option<&OsStr>) -> Self {
        #[allow(clippy::option_if_let_else)]
        if let Some(v) = env_var {
            Self::EnvVar(v.to_owned())
        } else if let Some(p) = pass_file {
            Self::File(p.to_owned())
        } else {
            Self::Prompt(format!("Enter passphrase for {key_file:?}: "))
        }
    }

    fn prompt(prompt: &str) -> Result<String> {
        match passterm::prompt_password_tty(Some(prompt)) {
            Ok(p) => Ok(p),
            Err(e) => {
                #[cfg(unix)]
                if let PromptError::IOError(io_e) = e {
                    if let Some(errno) = io_e.raw_os_error()
                        && (errno == libc::ENXIO || errno == libc::ENOTTY)
                    {
                        return Err(Error::NotInteractive(io_e));
                    }

                    return Err(Error::PassphrasePrompt(PromptError::IOError(io_e)));
                }

                Err(Error::PassphrasePrompt(e))
            }
        }
    }

    pub fn acquire(&self, confirm: bool) -> Result<String> {
        let passphrase = match self {
            Self::Prompt(p) => {
                let first = Self::prompt(p)?;

                if confirm {
                    let second = Self::prompt("Confirm: ")?;

                    if first != second {
                        return Err(Error::ConfirmPassphrase);
                    }
                }

                first
            }
            Self::EnvVar(v) => env::var(v).map_err(|e| Error::InvalidEnvVar(v.clone(), e))?,
            Self::File(p) => fs::read_to_string(p)
                .map_err(|e| Error::ReadFile(p.clone(), e))?
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };

        Ok(passphrase)
    }
}

fn check_key_size(size: usize) -> Result<()> {
    // RustCrypto does not support 8192-bit keys.
    if size > 4096 / 8 {
        return Err(Error::UnsupportedKeySize(size));
    }

    Ok(())
}

/// Generate a new key pair. RSA keys are always 4096 bits.
pub fn generate_key_pair(kind: KeyKind) -> Result<PrivateKey> {
    let mut rng = rand::thread_rng();

    let key = match kind {
        KeyKind::Ed25519 => PrivateKey::Ed25519(SigningKey::generate(&mut rng)),
        KeyKind::Rsa => PrivateKey::Rsa(
            RsaPrivateKey::new(&mut rng, 4096).map_err(|e| Error::RsaGenerate(Box::new(e)))?,
        ),
    };

    Ok(key)
}

/// Ed25519 signature as it appears in a certificate's signature bit string.
#[derive(Clone, Debug)]
struct CertSignature(ed25519_dalek::Signature);

impl TryFrom<&[u8]> for CertSignature {
    type Error = signature::Error;

    fn try_from(bytes: &[u8]) -> std::result::Result<Self, Self::Error> {
        ed25519_dalek::Signature::from_slice(bytes).map(Self)
    }
}

impl From<CertSignature> for [u8; ed25519_dalek::SIGNATURE_LENGTH] {
    fn from(signature: CertSignature) -> Self {
        signature.0.to_bytes()
    }
}

impl SignatureEncoding for CertSignature {
    type Repr = [u8; ed25519_dalek::SIGNATURE_LENGTH];
}

impl SignatureBitStringEncoding for CertSignature {
    fn to_bitstring(&self) -> x509_cert::der::Result<BitString> {
        BitString::new(0, self.0.to_bytes().to_vec())
    }
}

/// Ed25519 issuer key for [`CertificateBuilder`], which needs the algorithm
/// identifier and a bit string encodable signature.
struct CertSigner<'a>(&'a SigningKey);

impl Keypair for CertSigner<'_> {
    type VerifyingKey = VerifyingKey;

    fn verifying_key(&self) -> Self::VerifyingKey {
        self.0.verifying_key()
    }
}

impl DynSignatureAlgorithmIdentifier for CertSigner<'_> {
    fn signature_algorithm_identifier(&self) -> x509_cert::spki::Result<AlgorithmIdentifierOwned> {
        Ok(AlgorithmIdentifierOwned {
            oid: rfc8410::ID_ED_25519,
            parameters: None,
        })
    }
}

impl signature::Signer<CertSignature> for CertSigner<'_> {
    fn try_sign(&self, msg: &[u8]) -> std::result::Result<CertSignature, signature::Error> {
        self.0.try_sign(msg).map(CertSignature)
    }
}

fn build_cert(
    profile: Profile,
    serial: u64,
    validity: Duration,
    subject: &str,
    public_key: &PublicKey,
    issuer_key: &PrivateKey,
) -> Result<Certificate> {
    let serial_number = SerialNumber::from(serial);
    let validity = Validity::from_now(validity).map_err(Error::CertParams)?;
    let subject = subject.parse().map_err(Error::CertParams)?;
    let spki = public_key.to_spki()?;

    match issuer_key {
        PrivateKey::Ed25519(key) => {
            let signer = CertSigner(key);

            CertificateBuilder::new(profile, serial_number, validity, subject, spki, &signer)
                .map_err(Error::CertGenerate)?
                .build::<CertSignature>()
                .map_err(Error::CertGenerate)
        }
        PrivateKey::Rsa(key) => {
            let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());

            CertificateBuilder::new(profile, serial_number, validity, subject, spki, &signing_key)
                .map_err(Error::CertGenerate)?
                .build::<rsa::pkcs1v15::Signature>()
                .map_err(Error::CertGenerate)
        }
    }
}

/// Generate a self-signed root certificate.
pub fn generate_cert(
    key: &PrivateKey,
    serial: u64,
    validity: Duration,
    subject: &str,
) -> Result<Certificate> {
    build_cert(
        Profile::Root,
        serial,
        validity,
        subject,
        &key.to_public_key(),
        key,
    )
}

/// Generate a leaf certificate for `public_key` issued by the specified root.
pub fn generate_leaf_cert(
    public_key: &PublicKey,
    issuer_key: &PrivateKey,
    issuer_cert: &Certificate,
    serial: u64,
    validity: Duration,
    subject: &str,
) -> Result<Certificate> {
    let profile = Profile::Leaf {
        issuer: issuer_cert.tbs_certificate.subject.clone(),
        enable_key_agreement: false,
        enable_key_encipherment: false,
    };

    build_cert(profile, serial, validity, subject, public_key, issuer_key)
}

/// The x509_cert PEM decoder follows rfc7468 strictly and rejects base64 lines
/// longer than 64 characters. Certificates embedded in descriptors by other
/// tools may not be wrapped, so rewrap them before decoding.
fn reformat_pem(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = vec![];
    let mut base64 = vec![];
    let mut inside_base64 = false;

    for mut line in data.split(|&c| c == b'\n') {
        while !line.is_empty() && line[line.len() - 1].is_ascii_whitespace() {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            continue;
        } else if line.starts_with(b"-----BEGIN CERTIFICATE-----") {
            inside_base64 = true;

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if line.starts_with(b"-----END CERTIFICATE-----") {
            inside_base64 = false;

            for chunk in base64.chunks(64) {
                result.extend_from_slice(chunk);
                result.push(b'\n');
            }

            base64.clear();

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if inside_base64 {
            base64.extend_from_slice(line);
            continue;
        }
    }

    if inside_base64 {
        return Err(Error::PemNoEndTag);
    }

    Ok(result)
}

/// Parse a PEM-encoded certificate from memory.
pub fn parse_pem_cert(data: &[u8]) -> Result<Certificate> {
    let data = reformat_pem(data)?;

    Certificate::from_pem(data).map_err(Error::LoadCert)
}

/// Encode a certificate as PEM.
pub fn encode_pem_cert(cert: &Certificate) -> Result<String> {
    cert.to_pem(LineEnding::LF).map_err(Error::SaveCert)
}

/// Parse a DER-encoded certificate.
pub fn parse_der_cert(data: &[u8]) -> Result<Certificate> {
    Certificate::from_der(data).map_err(Error::LoadCert)
}

/// Encode a certificate as DER.
pub fn encode_der_cert(cert: &Certificate) -> Result<Vec<u8>> {
    cert.to_der().map_err(Error::SaveCert)
}

/// Read PEM-encoded certificate from a reader.
pub fn read_pem_cert(path: &Path, mut reader: impl Read) -> Result<Certificate> {
    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    parse_pem_cert(&data)
}

/// Write PEM-encoded certificate to a writer.
pub fn write_pem_cert(path: &Path, mut writer: impl Write, cert: &Certificate) -> Result<()> {
    let data = encode_pem_cert(cert)?;

    writer
        .write_all(data.as_bytes())
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    Ok(())
}

/// Read PEM-encoded certificate from a file.
pub fn read_pem_cert_file(path: &Path) -> Result<Certificate> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_cert(path, reader)
}

/// Write PEM-encoded certificate to a file.
pub fn write_pem_cert_file(path: &Path, cert: &Certificate) -> Result<()> {
    let writer = File::create(path).map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    write_pem_cert(path, writer, cert)
}

/// Parse an unencrypted PKCS8 DER private key. The key type is determined by
/// the algorithm identifier in the key info.
pub fn parse_private_key_der(data: &[u8]) -> Result<PrivateKey> {
    let info = PrivateKeyInfo::from_der(data)
        .map_err(|e| Error::LoadKeyUnencrypted(pkcs8::Error::Asn1(e)))?;

    let key = match info.algorithm.oid {
        rfc8410::ID_ED_25519 => PrivateKey::Ed25519(
            SigningKey::from_pkcs8_der(data).map_err(Error::LoadKeyUnencrypted)?,
        ),
        rfc5912::RSA_ENCRYPTION => PrivateKey::Rsa(
            RsaPrivateKey::from_pkcs8_der(data).map_err(Error::LoadKeyUnencrypted)?,
        ),
        oid => return Err(Error::UnsupportedKeyAlgorithm(oid)),
    };

    Ok(key)
}

/// Read PEM-encoded PKCS8 private key from a reader. The passphrase is only
/// requested if the key is encrypted.
pub fn read_pem_key(
    path: &Path,
    mut reader: impl Read,
    source: &PassphraseSource,
) -> Result<PrivateKey> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    let (label, document) = SecretDocument::from_pem(&data)
        .map_err(|e| Error::LoadKeyUnencrypted(pkcs8::Error::Asn1(e)))?;

    if label == EncryptedPrivateKeyInfo::PEM_LABEL {
        let passphrase = source.acquire(false)?;

        let encrypted = EncryptedPrivateKeyInfo::from_der(document.as_bytes())
            .map_err(|e| Error::LoadKeyEncrypted(pkcs8::Error::Asn1(e)))?;
        let decrypted = encrypted
            .decrypt(passphrase)
            .map_err(Error::LoadKeyEncrypted)?;

        parse_private_key_der(decrypted.as_bytes())
    } else if label == PrivateKeyInfo::PEM_LABEL {
        parse_private_key_der(document.as_bytes())
    } else {
        Err(Error::UnexpectedPemLabel(label.to_owned()))
    }
}

/// Write PEM-encoded PKCS8 private key to a writer.
pub fn write_pem_key(
    path: &Path,
    mut writer: impl Write,
    key: &PrivateKey,
    source: &PassphraseSource,
) -> Result<()> {
    let passphrase = source.acquire(true)?;

    let plain_text_der = key.to_pkcs8_der().map_err(Error::SaveKeyUnencrypted)?;

    let data = if passphrase.is_empty() {
        plain_text_der
            .to_pem(PrivateKeyInfo::PEM_LABEL, LineEnding::LF)
            .map_err(pkcs8::Error::Asn1)
            .map_err(Error::SaveKeyUnencrypted)?
    } else {
        let mut rng = rand::thread_rng();

        // The default scrypt parameters of the pkcs8 crate use n = 32768,
        // which openssl refuses to read with `memory limit exceeded`. Match
        // openssl's defaults instead: N=16384, r=8, p=1, AES-256-CBC.
        let mut salt = [0u8; 16];
        rng.fill_bytes(&mut salt);

        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut iv);

        // 14 = log_2(16384), 32 bytes = 256 bits
        let scrypt_params = scrypt::Params::new(14, 8, 1, 32)
            .map_err(|_| Error::SaveKeyEncrypted(pkcs8::Error::ParametersMalformed))?;
        let pbes2_params = pbes2::Parameters::scrypt_aes256cbc(scrypt_params, &salt, &iv)
            .map_err(|e| Error::SaveKeyEncrypted(pkcs8::Error::EncryptedPrivateKey(e)))?;

        let private_key_info =
            PrivateKeyInfo::try_from(plain_text_der.as_bytes()).map_err(Error::SaveKeyEncrypted)?;

        let secret_doc = private_key_info
            .encrypt_with_params(pbes2_params, passphrase)
            .map_err(Error::SaveKeyEncrypted)?;

        secret_doc
            .to_pem(EncryptedPrivateKeyInfo::PEM_LABEL, LineEnding::LF)
            .map_err(pkcs8::Error::Asn1)
            .map_err(Error::SaveKeyEncrypted)?
    };

    writer
        .write_all(data.as_bytes())
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    Ok(())
}

/// Read PEM-encoded PKCS8 private key from a file.
pub fn read_pem_key_file(path: &Path, source: &PassphraseSource) -> Result<PrivateKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_key(path, reader, source)
}

/// Save PEM-encoded PKCS8 private key to a file.
pub fn write_pem_key_file(path: &Path, key: &PrivateKey, source: &PassphraseSource) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    options.create(true);
    options.truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let writer = options
        .open(path)
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    write_pem_key(path, writer, key, source)
}

/// Get the public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<PublicKey> {
    let spki = &cert.tbs_certificate.subject_public_key_info;

    let key = match spki.algorithm.oid {
        rfc8410::ID_ED_25519 => {
            let raw: &[u8; 32] = spki
                .subject_public_key
                .as_bytes()
                .and_then(|b| <&[u8; 32]>::try_from(b).ok())
                .ok_or(Error::LoadPubKey(pkcs8::spki::Error::KeyMalformed))?;
            let key = VerifyingKey::from_bytes(raw)
                .map_err(|_| Error::LoadPubKey(pkcs8::spki::Error::KeyMalformed))?;

            PublicKey::Ed25519(key)
        }
        rfc5912::RSA_ENCRYPTION => PublicKey::Rsa(
            RsaPublicKey::try_from(spki.owned_to_ref()).map_err(Error::LoadPubKey)?,
        ),
        oid => return Err(Error::UnsupportedKeyAlgorithm(oid)),
    };

    Ok(key)
}

/// Check if a certificate matches a private key.
pub fn cert_matches_key(cert: &Certificate, key: &PrivateKey) -> Result<bool> {
    let public_key = get_public_key(cert)?;

    Ok(key.to_public_key() == public_key)
}

/// Check that `cert` was issued by `root`, using `root` as the only trust
/// anchor. Only the issuer name and the signature are checked. Validity dates,
/// key usage, extended key usage, and basic constraints are ignored. Packages
/// signed with certificates that have since expired must keep booting.
pub fn verify_cert_issued_by(cert: &Certificate, root: &Certificate) -> Result<()> {
    if cert == root {
        return Ok(());
    }

    if cert.tbs_certificate.issuer != root.tbs_certificate.subject {
        return Err(Error::IssuerMismatch);
    }

    let tbs = cert.tbs_certificate.to_der().map_err(Error::LoadCert)?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or(Error::MalformedCertSignature)?;
    let root_key = get_public_key(root)?;

    let (scheme, digest) = match cert.signature_algorithm.oid {
        rfc8410::ID_ED_25519 => {
            return Signer::Ed25519.verify(signature, &tbs, &root_key);
        }
        rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
            (Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(&tbs).to_vec())
        }
        rfc5912::SHA_384_WITH_RSA_ENCRYPTION => {
            (Pkcs1v15Sign::new::<Sha384>(), Sha384::digest(&tbs).to_vec())
        }
        rfc5912::SHA_512_WITH_RSA_ENCRYPTION => {
            (Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(&tbs).to_vec())
        }
        oid => return Err(Error::UnsupportedSignatureAlgorithm(oid)),
    };

    let PublicKey::Rsa(root_key) = root_key else {
        return Err(Error::IssuerKeyMismatch {
            algorithm: cert.signature_algorithm.oid,
            key: root_key.kind(),
        });
    };

    check_key_size(root_key.size())?;

    root_key
        .verify(scheme, &digest, signature)
        .map_err(|e| Error::RsaVerify(Box::new(e)))
}
