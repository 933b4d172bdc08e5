//! Immutable run configuration
//!
//! All configuration is resolved once at startup - CLI flags, the CA config
//! file, and the password override environment variables - and threaded
//! through the pipeline as an immutable value. No component reads the
//! environment or the current working directory after this point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;
use crate::profile::Role;
use crate::{Result, DEFAULT_CA_VALIDITY_DAYS};

/// Subject and validity settings for the root CA
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaConfig {
    /// Common name of the root certificate
    #[serde(default = "default_ca_common_name")]
    pub common_name: String,
    /// Organization of the root certificate
    #[serde(default = "default_ca_organization")]
    pub organization: String,
    /// Validity of the root certificate in days
    #[serde(default = "default_ca_validity_days")]
    pub validity_days: i64,
}

fn default_ca_common_name() -> String {
    "certmesh-root-ca".to_string()
}

fn default_ca_organization() -> String {
    "certmesh".to_string()
}

fn default_ca_validity_days() -> i64 {
    DEFAULT_CA_VALIDITY_DAYS
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            common_name: default_ca_common_name(),
            organization: default_ca_organization(),
            validity_days: default_ca_validity_days(),
        }
    }
}

impl CaConfig {
    /// Load a CA config from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::invalid_config(format!("failed to parse CA config {}: {}", path.display(), e))
        })
    }
}

/// Which store a password protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// The keystore holding the private key and chain
    Keystore,
    /// The truststore holding the CA certificate
    Truststore,
}

impl StoreKind {
    fn env_infix(&self) -> &'static str {
        match self {
            Self::Keystore => "KEYSTORE",
            Self::Truststore => "TRUSTSTORE",
        }
    }
}

/// Per-role keystore/truststore password overrides
///
/// Read from `TLS_<ROLE>_KEYSTORE_PASSWORD` and
/// `TLS_<ROLE>_TRUSTSTORE_PASSWORD` exactly once at startup. Setting these
/// makes regeneration deterministic instead of drawing random passwords.
#[derive(Debug, Clone, Default)]
pub struct PasswordOverrides {
    overrides: HashMap<(Role, StoreKind), String>,
}

impl PasswordOverrides {
    /// Read all override variables from the process environment
    pub fn from_env() -> Self {
        let mut overrides = HashMap::new();
        for role in Role::ALL {
            for store in [StoreKind::Keystore, StoreKind::Truststore] {
                let var = Self::var_name(role, store);
                if let Ok(value) = std::env::var(&var) {
                    if !value.is_empty() {
                        overrides.insert((role, store), value);
                    }
                }
            }
        }
        Self { overrides }
    }

    /// The environment variable consulted for a (role, store) pair
    pub fn var_name(role: Role, store: StoreKind) -> String {
        format!(
            "TLS_{}_{}_PASSWORD",
            role.as_str().to_uppercase(),
            store.env_infix()
        )
    }

    /// Look up an override for the given role and store
    pub fn get(&self, role: Role, store: StoreKind) -> Option<&str> {
        self.overrides.get(&(role, store)).map(String::as_str)
    }

    /// Insert an override directly (used by tests and the library API)
    pub fn set(&mut self, role: Role, store: StoreKind, password: impl Into<String>) {
        self.overrides.insert((role, store), password.into());
    }
}

/// Configuration for a build run (CA + issuance + bundling)
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory scanned for service profile descriptors
    pub profiles_dir: PathBuf,
    /// Root of the generated artifact layout
    pub out_dir: PathBuf,
    /// Root CA subject and validity
    pub ca: CaConfig,
    /// Namespace baked into in-cluster SANs and used for routing
    pub namespace: String,
    /// Regenerate the CA even if one is already persisted
    pub force: bool,
    /// Keystore/truststore password overrides
    pub passwords: PasswordOverrides,
}

impl BuildConfig {
    /// Directory holding the persisted CA material
    pub fn ca_dir(&self) -> PathBuf {
        self.out_dir.join("ca")
    }

    /// Directory holding one service's generated artifacts
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.out_dir.join(service)
    }
}

/// Configuration for a deploy run (publication)
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Directory scanned for service profile descriptors
    pub profiles_dir: PathBuf,
    /// Root of the generated artifact layout
    pub out_dir: PathBuf,
    /// Target namespace for recognized services
    pub namespace: String,
    /// Override path for the CA certificate (defaults to `<out>/ca/ca.pem`)
    pub ca_cert_path: Option<PathBuf>,
    /// Override path for the CA private key (defaults to `<out>/ca/ca-key.pem`)
    pub ca_key_path: Option<PathBuf>,
}

impl DeployConfig {
    /// Resolved path of the CA certificate
    pub fn ca_cert(&self) -> PathBuf {
        self.ca_cert_path
            .clone()
            .unwrap_or_else(|| self.out_dir.join("ca").join("ca.pem"))
    }

    /// Resolved path of the CA private key
    pub fn ca_key(&self) -> PathBuf {
        self.ca_key_path
            .clone()
            .unwrap_or_else(|| self.out_dir.join("ca").join("ca-key.pem"))
    }

    /// Directory holding one service's generated artifacts
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.out_dir.join(service)
    }
}
