//! Offline integration tests for the generation side of the pipeline:
//! profile discovery, CA lifecycle, and per-role issuance against a fresh
//! artifact directory. Keystore conversion and secret publication talk to
//! external tools and the cluster, so they are covered by their own module
//! tests.

use std::path::Path;

use certmesh::ca::{self, CA_CERT_FILE, CA_CSR_FILE, CA_KEY_FILE};
use certmesh::config::CaConfig;
use certmesh::issuer;
use certmesh::profile::{self, Role, SecretConvention};

fn write_profile(root: &Path, service: &str, yaml: &str) {
    let dir = root.join(service);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{service}-csr.yaml")), yaml).unwrap();
}

fn test_ca_config() -> CaConfig {
    CaConfig {
        common_name: "Integration Test Root CA".to_string(),
        organization: "certmesh-tests".to_string(),
        validity_days: 365,
    }
}

#[test]
fn fresh_directory_full_generation_run() {
    let workspace = tempfile::tempdir().unwrap();
    let profiles_dir = workspace.path().join("profiles");
    let ca_dir = workspace.path().join("tls").join("ca");

    write_profile(
        &profiles_dir,
        "api",
        "commonName: api.example.com\nhosts:\n  - api.example.com\n",
    );
    write_profile(
        &profiles_dir,
        "kafka-cluster",
        "commonName: kafka.example.com\n",
    );

    // CA is created once and shared read-only by all issuance
    let ca = ca::ensure_ca(&ca_dir, &test_ca_config(), false).unwrap();
    assert!(ca_dir.join(CA_CERT_FILE).is_file());
    assert!(ca_dir.join(CA_KEY_FILE).is_file());
    assert!(ca_dir.join(CA_CSR_FILE).is_file());

    let profiles = profile::discover(&profiles_dir, "dev").unwrap();
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].name, "api");
    assert_eq!(profiles[0].convention, SecretConvention::Standard);
    assert_eq!(profiles[1].convention, SecretConvention::BrokerOperator);

    // Every (service, role) pair gets a certificate that chains to the CA
    for p in &profiles {
        for role in &p.roles {
            let material = issuer::issue(&ca, p, *role).unwrap();
            issuer::verify_chain(&material.cert_pem, ca.ca_cert_pem()).unwrap();
            assert_eq!(material.chain_pem.matches("BEGIN CERTIFICATE").count(), 2);
        }
    }
}

#[test]
fn ca_survives_rerun_and_force_replaces_it() {
    let workspace = tempfile::tempdir().unwrap();
    let ca_dir = workspace.path().join("ca");
    let config = test_ca_config();

    ca::ensure_ca(&ca_dir, &config, false).unwrap();
    let cert_before = std::fs::read(ca_dir.join(CA_CERT_FILE)).unwrap();
    let key_before = std::fs::read(ca_dir.join(CA_KEY_FILE)).unwrap();

    // Re-run without force: byte-for-byte unchanged
    let reused = ca::ensure_ca(&ca_dir, &config, false).unwrap();
    assert_eq!(cert_before, std::fs::read(ca_dir.join(CA_CERT_FILE)).unwrap());
    assert_eq!(key_before, std::fs::read(ca_dir.join(CA_KEY_FILE)).unwrap());

    // Certificates issued before the re-run still validate
    let profiles_dir = workspace.path().join("profiles");
    write_profile(&profiles_dir, "postgres", "commonName: postgres.example.com\n");
    let profiles = profile::discover(&profiles_dir, "dev").unwrap();
    let material = issuer::issue(&reused, &profiles[0], Role::Server).unwrap();
    issuer::verify_chain(&material.cert_pem, &String::from_utf8(cert_before.clone()).unwrap())
        .unwrap();

    // Force: both cert and key replaced
    ca::ensure_ca(&ca_dir, &config, true).unwrap();
    assert_ne!(cert_before, std::fs::read(ca_dir.join(CA_CERT_FILE)).unwrap());
    assert_ne!(key_before, std::fs::read(ca_dir.join(CA_KEY_FILE)).unwrap());
}

#[test]
fn issued_material_does_not_validate_against_replaced_ca() {
    let workspace = tempfile::tempdir().unwrap();
    let ca_dir = workspace.path().join("ca");
    let profiles_dir = workspace.path().join("profiles");
    write_profile(&profiles_dir, "nginx", "commonName: nginx.example.com\n");

    let config = test_ca_config();
    let old_ca = ca::ensure_ca(&ca_dir, &config, false).unwrap();
    let profiles = profile::discover(&profiles_dir, "dev").unwrap();
    let material = issuer::issue(&old_ca, &profiles[0], Role::Server).unwrap();

    let new_ca = ca::ensure_ca(&ca_dir, &config, true).unwrap();
    assert!(issuer::verify_chain(&material.cert_pem, new_ca.ca_cert_pem()).is_err());
}
