//! certmesh - private PKI provisioning and Kubernetes secret distribution
//!
//! certmesh builds a small trust hierarchy for a multi-service deployment
//! (one self-signed root CA, per-service per-role leaf certificates) and
//! materializes the key material into the cluster secret store under
//! per-service naming and packaging conventions.
//!
//! The pipeline is strictly sequential: the CA is ensured once, then for
//! each service and each role (server, peer, client) a certificate is
//! issued, bundled into password-protected PKCS#12 and JKS stores, and
//! published as a namespaced `Secret`. Secret replacement is
//! delete-then-create, so a re-run converges to identical content.
//!
//! # Modules
//!
//! - [`profile`] - Service profiles, roles, and packaging conventions
//! - [`ca`] - Root certificate authority lifecycle
//! - [`issuer`] - Per-service, per-role certificate issuance
//! - [`keystore`] - Keystore/truststore bundling and password management
//! - [`publish`] - Secret publication with per-service conventions
//! - [`pipeline`] - Orchestration of build and deploy runs
//! - [`config`] - Immutable run configuration
//! - [`error`] - Error types for the pipeline

#![deny(missing_docs)]

pub mod ca;
pub mod config;
pub mod error;
pub mod issuer;
pub mod keystore;
pub mod pipeline;
pub mod profile;
pub mod publish;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace used for services the routing table does not recognize
pub const DEFAULT_NAMESPACE: &str = "default";

/// Alias under which the CA certificate is stored in every truststore
pub const CA_ALIAS: &str = "CARoot";

/// Leaf certificate validity window in days
pub const LEAF_VALIDITY_DAYS: i64 = 730;

/// Default root CA validity in days
pub const DEFAULT_CA_VALIDITY_DAYS: i64 = 3650;
