// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, time::Duration};

use assert_matches::assert_matches;
use ed25519_dalek::SigningKey;
use rsa::RsaPrivateKey;
use x509_cert::Certificate;

use stboot::{
    crypto::{self, PrivateKey, Signer},
    format::{
        descriptor::Descriptor,
        manifest::{self, Manifest},
    },
    ospkg::{self, OsPackage, State, Verification},
};

const VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

fn ed25519_key(seed: u8) -> PrivateKey {
    PrivateKey::Ed25519(SigningKey::from_bytes(&[seed; 32]))
}

fn root(key: &PrivateKey, subject: &str) -> Certificate {
    crypto::generate_cert(key, 1, VALIDITY, subject).unwrap()
}

fn leaf(key: &PrivateKey, issuer_key: &PrivateKey, issuer_cert: &Certificate) -> Certificate {
    crypto::generate_leaf_cert(
        &key.to_public_key(),
        issuer_key,
        issuer_cert,
        2,
        VALIDITY,
        "CN=Test Signer",
    )
    .unwrap()
}

/// Incompressible data so that the archive is dominated by the entry bytes.
fn noise(len: usize, mut state: u32) -> Vec<u8> {
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn sample_package() -> OsPackage {
    let manifest = Manifest {
        label: "Test OS".to_owned(),
        kernel_path: "boot/kernel".to_owned(),
        initramfs_path: "boot/initramfs".to_owned(),
        cmdline: "console=ttyS0".to_owned(),
        ..Default::default()
    };

    OsPackage::from_contents(
        manifest,
        Descriptor::new("https://example.com/ospkg.zip"),
        noise(4096, 1),
        noise(1024, 2),
    )
    .unwrap()
}

struct Fixture {
    root_key: PrivateKey,
    root_cert: Certificate,
    signer_key: PrivateKey,
    signer_cert: Certificate,
}

fn fixture() -> Fixture {
    let root_key = ed25519_key(1);
    let root_cert = root(&root_key, "CN=Test Root");
    let signer_key = ed25519_key(2);
    let signer_cert = leaf(&signer_key, &root_key, &root_cert);

    Fixture {
        root_key,
        root_cert,
        signer_key,
        signer_cert,
    }
}

/// Sign a fresh package and return the archive and descriptor as they would be
/// stored on disk.
fn signed_package(f: &Fixture) -> (Vec<u8>, Vec<u8>) {
    let mut package = sample_package();
    let archive = package.archive_bytes().unwrap().to_vec();

    package.sign(&f.signer_key, &f.signer_cert).unwrap();

    (archive, package.descriptor_bytes().unwrap())
}

#[test]
fn sign_and_verify() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    assert_eq!(package.state(), State::Packed);

    let verification = package.verify(&f.root_cert).unwrap();
    assert_eq!(verification, Verification { found: 1, valid: 1 });
    assert!(package.is_verified());
    assert!(package.meets_threshold(1));
    assert!(!package.meets_threshold(2));
    assert_eq!(package.state(), State::Verified);

    let image = package.os_image().unwrap();
    assert_eq!(image.label(), "Test OS");
    assert_eq!(image.cmdline(), "console=ttyS0");
    assert_eq!(image.kernel(), noise(4096, 1));
    assert_eq!(image.initramfs(), noise(1024, 2));
    assert_eq!(package.manifest().kernel_path, "boot/kernel");
    assert_eq!(package.state(), State::Unpacked);
}

#[test]
fn create_from_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    let kernel_path = temp_dir.path().join("vmlinuz");
    let initramfs_path = temp_dir.path().join("initrd.img");
    fs::write(&kernel_path, b"kernel").unwrap();
    fs::write(&initramfs_path, b"initramfs").unwrap();

    let mut package = OsPackage::create(
        "label",
        "http://example.com/os.zip",
        &kernel_path,
        &initramfs_path,
        "quiet",
    )
    .unwrap();

    assert_eq!(package.state(), State::Created);
    assert_eq!(package.hash(), None);
    assert_eq!(package.manifest().kernel_path, "boot/vmlinuz");
    assert_eq!(package.manifest().initramfs_path, "boot/initrd.img");
    assert_eq!(package.descriptor().os_pkg_url, "http://example.com/os.zip");

    let archive = package.archive_bytes().unwrap().to_vec();
    assert_eq!(package.state(), State::Packed);
    assert_eq!(package.hash(), Some(&ospkg::hash_archive(&archive).unwrap()));
}

#[test]
fn end_to_end_from_files() {
    let f = fixture();
    let temp_dir = tempfile::tempdir().unwrap();
    let kernel_path = temp_dir.path().join("vmlinuz");
    let initramfs_path = temp_dir.path().join("initrd.img");
    fs::write(&kernel_path, noise(4096, 3)).unwrap();
    fs::write(&initramfs_path, noise(2048, 4)).unwrap();

    let mut package = OsPackage::create(
        "Test OS",
        "https://example.com/ospkg.zip",
        &kernel_path,
        &initramfs_path,
        "console=ttyS0",
    )
    .unwrap();
    let archive = package.archive_bytes().unwrap().to_vec();
    package.sign(&f.signer_key, &f.signer_cert).unwrap();
    let descriptor = package.descriptor_bytes().unwrap();
    drop(package);

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    assert_eq!(package.descriptor().os_pkg_url(), "https://example.com/ospkg.zip");
    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 1, valid: 1 },
    );
    assert!(package.meets_threshold(1));

    let image = package.os_image().unwrap();
    assert_eq!(image.label(), "Test OS");
    assert_eq!(image.cmdline(), "console=ttyS0");
    assert_eq!(image.kernel(), noise(4096, 3));
    assert_eq!(image.initramfs(), noise(2048, 4));
    assert_eq!(package.manifest().kernel_path, "boot/vmlinuz");
    assert_eq!(package.manifest().initramfs_path, "boot/initrd.img");
    assert_eq!(package.state(), State::Unpacked);
}

#[test]
fn create_rejects_bad_input() {
    let temp_dir = tempfile::tempdir().unwrap();
    let kernel_path = temp_dir.path().join("kernel");
    let initramfs_path = temp_dir.path().join("initramfs");
    fs::write(&kernel_path, b"kernel").unwrap();
    fs::write(&initramfs_path, b"").unwrap();

    assert_matches!(
        OsPackage::create("", "ftp://example.com", &kernel_path, &initramfs_path, ""),
        Err(ospkg::Error::Url(_))
    );
    assert_matches!(
        OsPackage::create("", "", &kernel_path, &initramfs_path, ""),
        Err(ospkg::Error::EmptyInitramfs)
    );
    assert_matches!(
        OsPackage::create("", "", &temp_dir.path().join("missing"), &initramfs_path, ""),
        Err(ospkg::Error::ReadFile(_, _))
    );
}

#[test]
fn archive_is_memoized() {
    let mut package = sample_package();

    let first = package.archive_bytes().unwrap().to_vec();
    let second = package.archive_bytes().unwrap().to_vec();
    assert_eq!(first, second);

    // Packing the same contents again produces identical bytes.
    let mut other = sample_package();
    assert_eq!(other.archive_bytes().unwrap(), first);
}

#[test]
fn tampered_archive() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    for offset in 0..archive.len() {
        let mut tampered = archive.clone();
        tampered[offset] ^= 0xff;

        // Damage to the zip structure is caught before verification.
        let Ok(mut package) = OsPackage::reconstruct(tampered, &descriptor) else {
            continue;
        };

        let verification = package.verify(&f.root_cert).unwrap();
        assert_eq!(
            verification,
            Verification { found: 1, valid: 0 },
            "offset {offset}",
        );
        assert!(package.is_verified());
        assert!(!package.meets_threshold(1));
    }
}

#[test]
fn duplicate_certificate_in_sign() {
    let f = fixture();
    let mut package = sample_package();

    package.sign(&f.signer_key, &f.signer_cert).unwrap();
    assert_eq!(package.descriptor().len(), 1);

    assert_matches!(
        package.sign(&f.signer_key, &f.signer_cert),
        Err(ospkg::Error::CertificateAlreadyUsed)
    );
    assert_eq!(package.descriptor().len(), 1);
}

#[test]
fn duplicate_certificate_in_verify() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let original = Descriptor::parse(&descriptor).unwrap();
    let entry = &original.entries()[0];

    let mut doubled = Descriptor::new(original.os_pkg_url.clone());
    doubled.push(entry.certificate.clone(), entry.signature.clone());
    doubled.push(entry.certificate.clone(), entry.signature.clone());

    let mut package = OsPackage::reconstruct(archive, &doubled.serialize().unwrap()).unwrap();
    let verification = package.verify(&f.root_cert).unwrap();

    assert_eq!(verification, Verification { found: 2, valid: 1 });
    assert!(!package.meets_threshold(2));
}

#[test]
fn multiple_signers() {
    let root_key = ed25519_key(1);
    let root_cert = root(&root_key, "CN=Test Root");
    let keys = [ed25519_key(2), ed25519_key(3), ed25519_key(4)];

    let mut package = sample_package();

    for key in &keys {
        let cert = leaf(key, &root_key, &root_cert);
        package.sign(key, &cert).unwrap();
    }

    let verification = package.verify(&root_cert).unwrap();
    assert_eq!(verification, Verification { found: 3, valid: 3 });
    assert!(package.meets_threshold(3));
}

#[test]
fn no_signatures() {
    let f = fixture();
    let mut package = sample_package();
    let archive = package.archive_bytes().unwrap().to_vec();
    let descriptor = package.descriptor_bytes().unwrap();

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    let verification = package.verify(&f.root_cert).unwrap();

    assert_eq!(verification, Verification { found: 0, valid: 0 });
    assert!(package.is_verified());
    assert!(package.meets_threshold(0));
    assert!(!package.meets_threshold(1));
}

#[test]
fn null_signature_arrays() {
    let f = fixture();
    let mut package = sample_package();
    let archive = package.archive_bytes().unwrap().to_vec();
    let descriptor =
        br#"{"version":1,"os_pkg_url":"","certificates":null,"signatures":null}"#;

    let mut package = OsPackage::reconstruct(archive, descriptor).unwrap();

    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 0, valid: 0 },
    );
}

#[test]
fn image_requires_verification() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();

    assert_matches!(package.os_image(), Err(ospkg::Error::NotVerified));
    assert_eq!(package.manifest(), &Manifest::default());
}

#[test]
fn image_after_zero_valid_signatures() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let other_root = root(&ed25519_key(9), "CN=Other Root");

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    assert_eq!(
        package.verify(&other_root).unwrap(),
        Verification { found: 1, valid: 0 },
    );
    assert!(!package.meets_threshold(1));

    // Unpacking only requires that verification ran. The threshold is the
    // caller's decision.
    let image = package.os_image().unwrap();
    assert_eq!(image.cmdline(), "console=ttyS0");
    assert_eq!(package.state(), State::Unpacked);
}

#[test]
fn invalid_manifest_leaves_package_untouched() {
    let manifest = Manifest {
        version: 7,
        label: "evil".to_owned(),
        kernel_path: "boot/kernel".to_owned(),
        initramfs_path: "boot/initramfs".to_owned(),
        cmdline: "init=/bin/sh".to_owned(),
    };
    let archive = stboot::format::archive::zip(&manifest, b"kernel", b"initramfs").unwrap();
    let descriptor = Descriptor::default().serialize().unwrap();

    let mut package = OsPackage::reconstruct(archive, &descriptor)
        .unwrap()
        .with_signer(Signer::Dummy);
    assert_eq!(
        package.verify(&fixture().root_cert).unwrap(),
        Verification { found: 0, valid: 0 },
    );

    assert_matches!(
        package.os_image(),
        Err(ospkg::Error::Manifest(manifest::Error::Invalid(
            manifest::Invalid::Version(7)
        )))
    );
    assert_eq!(package.state(), State::Verified);
    assert_eq!(package.manifest(), &Manifest::default());
}

#[test]
fn sign_after_verify_resets_verification() {
    let f = fixture();
    let mut package = sample_package();

    package.sign(&f.signer_key, &f.signer_cert).unwrap();
    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 1, valid: 1 },
    );
    package.os_image().unwrap();
    assert_eq!(package.state(), State::Unpacked);

    let second_key = ed25519_key(5);
    let second_cert = leaf(&second_key, &f.root_key, &f.root_cert);
    package.sign(&second_key, &second_cert).unwrap();

    assert!(!package.is_verified());
    assert_eq!(package.verification(), None);
    assert!(!package.meets_threshold(1));
    assert_eq!(package.state(), State::Packed);
    assert_matches!(package.os_image(), Err(ospkg::Error::NotVerified));

    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 2, valid: 2 },
    );
}

#[test]
fn foreign_root() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let other_root = root(&ed25519_key(9), "CN=Other Root");

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    let verification = package.verify(&other_root).unwrap();

    assert_eq!(verification, Verification { found: 1, valid: 0 });
}

#[test]
fn impostor_root_with_same_subject() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let impostor = root(&ed25519_key(9), "CN=Test Root");

    let mut package = OsPackage::reconstruct(archive, &descriptor).unwrap();
    let verification = package.verify(&impostor).unwrap();

    assert_eq!(verification, Verification { found: 1, valid: 0 });
}

#[test]
fn malformed_certificate() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    let original = Descriptor::parse(&descriptor).unwrap();
    let entry = &original.entries()[0];

    let mut broken = Descriptor::new("");
    broken.push(entry.certificate.clone(), entry.signature.clone());
    broken.push(b"not a certificate".to_vec(), vec![0u8; 64]);

    let mut package = OsPackage::reconstruct(archive, &broken.serialize().unwrap()).unwrap();

    assert_matches!(
        package.verify(&f.root_cert),
        Err(ospkg::Error::ParseCertificate(1, _))
    );
    assert!(!package.is_verified());
}

#[test]
fn reconstruct_rejects_bad_input() {
    let f = fixture();
    let (archive, descriptor) = signed_package(&f);

    assert_matches!(
        OsPackage::reconstruct(b"not a zip".to_vec(), &descriptor),
        Err(ospkg::Error::Archive(_))
    );
    assert_matches!(
        OsPackage::reconstruct(archive.clone(), b"{"),
        Err(ospkg::Error::Descriptor(_))
    );
    assert_matches!(
        OsPackage::reconstruct(
            archive,
            br#"{"version":2,"os_pkg_url":"","certificates":[],"signatures":[]}"#,
        ),
        Err(ospkg::Error::Descriptor(_))
    );
}

#[test]
fn dummy_signer() {
    let f = fixture();
    let mut package = sample_package().with_signer(Signer::Dummy);

    package.sign(&f.signer_key, &f.signer_cert).unwrap();
    assert_eq!(package.descriptor().entries()[0].signature.len(), 8);

    let verification = package.verify(&f.root_cert).unwrap();
    assert_eq!(verification, Verification { found: 1, valid: 1 });

    // The dummy signature is meaningless to a real verifier.
    let mut package = sample_package();
    package.sign(&f.signer_key, &f.signer_cert).unwrap();
    let entry = package.descriptor().entries()[0].clone();

    let mut descriptor = Descriptor::new("");
    descriptor.push(entry.certificate, vec![0u8; 8]);
    let archive = package.archive_bytes().unwrap().to_vec();

    let mut package = OsPackage::reconstruct(archive, &descriptor.serialize().unwrap()).unwrap();
    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 1, valid: 0 },
    );
}

#[test]
fn rsa_pss() {
    let root_key = ed25519_key(1);
    let root_cert = root(&root_key, "CN=Test Root");
    let rsa_key = PrivateKey::Rsa(RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap());
    let rsa_cert = leaf(&rsa_key, &root_key, &root_cert);

    let mut package = sample_package().with_signer(Signer::RsaPss);
    package.sign(&rsa_key, &rsa_cert).unwrap();
    assert_eq!(package.descriptor().entries()[0].signature.len(), 256);

    assert_eq!(
        package.verify(&root_cert).unwrap(),
        Verification { found: 1, valid: 1 },
    );

    // An Ed25519 verifier cannot use an RSA certificate.
    let mut package = package.with_signer(Signer::Ed25519);
    assert_eq!(
        package.verify(&root_cert).unwrap(),
        Verification { found: 1, valid: 0 },
    );
}

#[test]
fn signer_key_mismatch() {
    let f = fixture();
    let mut package = sample_package().with_signer(Signer::RsaPss);

    assert_matches!(
        package.sign(&f.signer_key, &f.signer_cert),
        Err(ospkg::Error::Crypto(crypto::Error::KeyMismatch { .. }))
    );
    assert!(package.descriptor().is_empty());
}

#[test]
fn sign_der() {
    let f = fixture();
    let mut package = sample_package();

    let key_der = f.signer_key.to_pkcs8_der().unwrap();
    let cert_der = crypto::encode_der_cert(&f.signer_cert).unwrap();

    package.sign_der(key_der.as_bytes(), &cert_der).unwrap();

    assert_eq!(
        package.verify(&f.root_cert).unwrap(),
        Verification { found: 1, valid: 1 },
    );
}

#[test]
fn signed_by_root_itself() {
    let root_key = ed25519_key(1);
    let root_cert = root(&root_key, "CN=Test Root");

    let mut package = sample_package();
    package.sign(&root_key, &root_cert).unwrap();

    assert_eq!(
        package.verify(&root_cert).unwrap(),
        Verification { found: 1, valid: 1 },
    );
}

#[test]
fn hash_empty_archive() {
    assert_matches!(ospkg::hash_archive(b""), Err(ospkg::Error::EmptyArchive));
}
