//! Per-service, per-role certificate issuance
//!
//! Issuance follows the CSR model: a fresh key pair is generated, a signing
//! request carrying the service's subject is serialized, then re-parsed and
//! signed by the CA. The signing side overrides subject, validity,
//! extensions, and SANs, so the CSR contents never control what gets issued.

use rcgen::{
    string::Ia5String, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use ::time::{Duration, OffsetDateTime};
use x509_parser::prelude::*;

use crate::ca::CertificateAuthority;
use crate::error::Error;
use crate::profile::{Role, ServiceProfile, SubjectAltName};
use crate::{Result, LEAF_VALIDITY_DAYS};

/// Issued certificate material for one (service, role) pair
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    /// Service the certificate was issued for
    pub service: String,
    /// Role the certificate was issued for
    pub role: Role,
    /// PEM-encoded leaf certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
    /// PEM-encoded CA certificate
    pub ca_pem: String,
    /// Leaf certificate followed by the CA certificate
    pub chain_pem: String,
}

/// Extended key usages for a role: server-auth for servers, client-auth for
/// clients, both for peers
fn extended_usages(role: Role) -> Vec<ExtendedKeyUsagePurpose> {
    match role {
        Role::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
        Role::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        Role::Peer => vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ],
    }
}

fn subject(profile: &ServiceProfile) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(profile.common_name.clone()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(profile.organization.clone()),
    );
    dn
}

fn san_types(profile: &ServiceProfile) -> Result<Vec<SanType>> {
    let mut sans = Vec::with_capacity(profile.subject_alt_names.len());
    for san in &profile.subject_alt_names {
        match san {
            SubjectAltName::Dns(name) => {
                let ia5 = Ia5String::try_from(name.clone()).map_err(|e| {
                    Error::generation(
                        format!("encode SAN {name} for {}", profile.name),
                        e.to_string(),
                    )
                })?;
                sans.push(SanType::DnsName(ia5));
            }
            SubjectAltName::Ip(addr) => sans.push(SanType::IpAddress(*addr)),
        }
    }
    Ok(sans)
}

/// Issue a certificate for the given service profile and role
///
/// Deterministic given identical inputs except for key randomness. Any
/// signing error is fatal and aborts the whole run.
pub fn issue(
    ca: &CertificateAuthority,
    profile: &ServiceProfile,
    role: Role,
) -> Result<CertificateMaterial> {
    let operation = format!("issue {} certificate for {}", role, profile.name);

    // Subject key pair and signing request
    let key_pair = KeyPair::generate()
        .map_err(|e| Error::generation(operation.clone(), format!("generate key: {e}")))?;
    let key_pem = key_pair.serialize_pem();

    let mut request_params = CertificateParams::default();
    request_params.distinguished_name = subject(profile);
    let csr_pem = request_params
        .serialize_request(&key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| Error::generation(operation.clone(), format!("build CSR: {e}")))?;

    // Re-parse and sign; the CA side controls every issued field
    let mut csr_params = CertificateSigningRequestParams::from_pem(&csr_pem)
        .map_err(|e| Error::generation(operation.clone(), format!("parse CSR: {e}")))?;

    csr_params.params.distinguished_name = subject(profile);
    csr_params.params.is_ca = IsCa::NoCa;
    csr_params.params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    csr_params.params.extended_key_usages = extended_usages(role);

    let now = OffsetDateTime::now_utc();
    csr_params.params.not_before = now;
    csr_params.params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

    csr_params.params.subject_alt_names = san_types(profile)?;

    let ca_key = ca.load_key_pair()?;
    let issuer = Issuer::from_ca_cert_pem(ca.ca_cert_pem(), &ca_key)
        .map_err(|e| Error::generation(operation.clone(), format!("load issuer: {e}")))?;

    let signed = csr_params
        .signed_by(&issuer)
        .map_err(|e| Error::generation(operation.clone(), format!("sign certificate: {e}")))?;
    let cert_pem = signed.pem();

    let ca_pem = ca.ca_cert_pem().to_string();
    let chain_pem = concat_chain(&cert_pem, &ca_pem);

    verify_chain(&cert_pem, &ca_pem)?;

    Ok(CertificateMaterial {
        service: profile.name.clone(),
        role,
        cert_pem,
        key_pem,
        ca_pem,
        chain_pem,
    })
}

/// Concatenate leaf and CA certificates into a chain file (no intermediate)
pub fn concat_chain(cert_pem: &str, ca_pem: &str) -> String {
    let mut chain = String::with_capacity(cert_pem.len() + ca_pem.len() + 1);
    chain.push_str(cert_pem);
    if !chain.ends_with('\n') {
        chain.push('\n');
    }
    chain.push_str(ca_pem);
    chain
}

/// Verify that a leaf certificate was signed by the given CA
pub fn verify_chain(cert_pem: &str, ca_pem: &str) -> Result<()> {
    let cert_der = pem_to_der(cert_pem, "leaf certificate")?;
    let ca_der = pem_to_der(ca_pem, "CA certificate")?;

    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| Error::generation("parse leaf certificate", e.to_string()))?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_der)
        .map_err(|e| Error::generation("parse CA certificate", e.to_string()))?;

    cert.verify_signature(Some(ca_cert.public_key()))
        .map_err(|_| {
            Error::generation(
                "verify certificate chain",
                "leaf signature does not validate against the CA",
            )
        })
}

fn pem_to_der(pem_data: &str, what: &str) -> Result<Vec<u8>> {
    let parsed = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| Error::generation(format!("parse {what} PEM"), e.to_string()))?;
    Ok(parsed.contents().to_vec())
}
