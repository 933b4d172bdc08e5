//! Root certificate authority lifecycle
//!
//! The CA is created at most once per generation cycle and persisted under
//! the CA directory as `ca.pem`, `ca-key.pem`, and `ca.csr`. A later run
//! reuses the persisted material unmodified - trust already distributed to
//! consumers survives regeneration of the leaf certificates - unless the
//! force flag is set or any of the three files is absent.

use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};

use crate::config::CaConfig;
use crate::error::Error;
use crate::Result;

/// File name of the persisted CA certificate
pub const CA_CERT_FILE: &str = "ca.pem";
/// File name of the persisted CA private key
pub const CA_KEY_FILE: &str = "ca-key.pem";
/// File name of the persisted CA signing request
pub const CA_CSR_FILE: &str = "ca.csr";

/// The root certificate authority
///
/// Owned exclusively by this module; every other component sees it read-only.
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (re-parsed on each signing operation,
    /// KeyPair is not Clone)
    ca_key_pem: String,
    /// PEM-encoded CA certificate for distribution
    ca_cert_pem: String,
    /// PEM-encoded CA signing request, persisted for bookkeeping
    ca_csr_pem: String,
}

impl CertificateAuthority {
    /// Generate a new self-signed root CA
    pub fn generate(config: &CaConfig) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(config.common_name.clone()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(config.organization.clone()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(config.validity_days);

        let key_pair = KeyPair::generate()
            .map_err(|e| Error::generation("generate CA key pair", e.to_string()))?;
        let ca_key_pem = key_pair.serialize_pem();

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::generation("serialize CA signing request", e.to_string()))?;
        let ca_csr_pem = csr
            .pem()
            .map_err(|e| Error::generation("encode CA signing request", e.to_string()))?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::generation("self-sign CA certificate", e.to_string()))?;

        Ok(Self {
            ca_key_pem,
            ca_cert_pem: cert.pem(),
            ca_csr_pem,
        })
    }

    /// Load a CA from PEM strings, validating that both parse
    pub fn from_pem(cert_pem: &str, key_pem: &str, csr_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| Error::generation("parse CA key", e.to_string()))?;
        ::pem::parse(cert_pem.as_bytes())
            .map_err(|e| Error::generation("parse CA certificate", e.to_string()))?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
            ca_csr_pem: csr_pem.to_string(),
        })
    }

    /// The CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// The CA private key in PEM format
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// The CA signing request in PEM format
    pub fn ca_csr_pem(&self) -> &str {
        &self.ca_csr_pem
    }

    /// Load the key pair from the stored PEM
    pub(crate) fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| Error::generation("load CA key", e.to_string()))
    }

    /// Write the CA material into the CA directory
    fn persist(&self, ca_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(ca_dir)?;
        std::fs::write(ca_dir.join(CA_CERT_FILE), &self.ca_cert_pem)?;
        std::fs::write(ca_dir.join(CA_KEY_FILE), &self.ca_key_pem)?;
        std::fs::write(ca_dir.join(CA_CSR_FILE), &self.ca_csr_pem)?;
        Ok(())
    }
}

/// Return true when all three persisted CA files are present
fn ca_exists(ca_dir: &Path) -> bool {
    [CA_CERT_FILE, CA_KEY_FILE, CA_CSR_FILE]
        .iter()
        .all(|f| ca_dir.join(f).is_file())
}

/// Remove whatever subset of the CA files is present
fn clear_stale(ca_dir: &Path) -> Result<()> {
    for file in [CA_CERT_FILE, CA_KEY_FILE, CA_CSR_FILE] {
        let path = ca_dir.join(file);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Ensure the root CA exists, reusing persisted material where allowed
///
/// With `force == false` and a complete set of persisted files, the CA is
/// returned byte-for-byte unmodified. Otherwise any stale subset is cleared
/// and a fresh CA is generated and persisted.
pub fn ensure_ca(ca_dir: &Path, config: &CaConfig, force: bool) -> Result<CertificateAuthority> {
    if !force && ca_exists(ca_dir) {
        tracing::info!(dir = %ca_dir.display(), "reusing persisted CA");
        let cert_pem = std::fs::read_to_string(ca_dir.join(CA_CERT_FILE))?;
        let key_pem = std::fs::read_to_string(ca_dir.join(CA_KEY_FILE))?;
        let csr_pem = std::fs::read_to_string(ca_dir.join(CA_CSR_FILE))?;
        return CertificateAuthority::from_pem(&cert_pem, &key_pem, &csr_pem);
    }

    if force {
        tracing::info!(dir = %ca_dir.display(), "force flag set, regenerating CA");
    } else {
        tracing::info!(dir = %ca_dir.display(), "no persisted CA, generating");
    }

    std::fs::create_dir_all(ca_dir)?;
    clear_stale(ca_dir)?;

    let ca = CertificateAuthority::generate(config)?;
    ca.persist(ca_dir)?;
    Ok(ca)
}
