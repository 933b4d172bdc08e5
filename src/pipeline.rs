//! Orchestration of build and deploy runs
//!
//! Both pipelines are strictly sequential and single-writer: each sub-step
//! (signing, exporting, converting, publishing) is a blocking external
//! operation and the pipeline waits for it before proceeding. There is no
//! retry and no rollback - the first failure aborts the run, and recovery
//! is a full re-run relying on the CA reuse policy plus the idempotent
//! delete-then-create publish step. Running two instances against the same
//! CA directory concurrently is undefined behavior.

use std::path::Path;

use tokio::process::Command;

use crate::ca::{self, CA_CERT_FILE};
use crate::config::{BuildConfig, DeployConfig};
use crate::error::Error;
use crate::issuer::{self, CertificateMaterial};
use crate::keystore::{self, KeystoreBundler, RoleArtifacts};
use crate::profile::{self, Role, ServiceProfile};
use crate::{publish, Result};

/// External tools the keystore conversions depend on
const REQUIRED_TOOLS: &[(&str, &str)] = &[
    (
        "openssl",
        "Install OpenSSL 3.x: https://openssl-library.org/source/",
    ),
    (
        "keytool",
        "Install a JDK, e.g. Temurin: https://adoptium.net/installation/",
    ),
];

/// Check if a tool is available on PATH
async fn check_tool(tool: &str) -> Result<bool> {
    let result = Command::new("which").arg(tool).output().await?;
    Ok(result.status.success())
}

/// Check that all required external tools are installed
///
/// Run upfront so a missing tool fails the run before any artifact is
/// touched.
pub async fn check_prerequisites() -> Result<()> {
    println!("=== Checking prerequisites ===\n");
    for (tool, hint) in REQUIRED_TOOLS {
        print!("  Checking {tool}... ");
        if check_tool(tool).await? {
            println!("OK");
        } else {
            println!("NOT FOUND");
            return Err(Error::ToolNotFound {
                tool: tool.to_string(),
                hint: hint.to_string(),
            });
        }
    }
    println!();
    Ok(())
}

/// The build pipeline: CA, issuance, and keystore bundling
pub struct BuildPipeline {
    config: BuildConfig,
}

impl BuildPipeline {
    /// Create a build pipeline with the given configuration
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Run the full build: CA -> issue -> bundle for every service and role
    pub async fn run(&self) -> Result<()> {
        check_prerequisites().await?;

        println!("[Phase 1] Discovering service profiles...\n");
        let profiles = profile::discover(&self.config.profiles_dir, &self.config.namespace)?;
        if profiles.is_empty() {
            return Err(Error::invalid_config(format!(
                "no service profiles found under {}",
                self.config.profiles_dir.display()
            )));
        }
        for p in &profiles {
            println!("  {} ({} roles)", p.name, p.roles.len());
        }
        println!();

        println!("[Phase 2] Ensuring root CA...\n");
        let ca_dir = self.config.ca_dir();
        let ca = ca::ensure_ca(&ca_dir, &self.config.ca, self.config.force)?;
        println!("  CA ready at {}\n", ca_dir.display());

        println!("[Phase 3] Issuing certificates and bundling keystores...\n");
        let bundler = KeystoreBundler::new(self.config.passwords.clone());
        let ca_cert_path = ca_dir.join(CA_CERT_FILE);
        let mut bundles = 0usize;

        for p in &profiles {
            let service_dir = self.config.service_dir(&p.name);
            for role in &p.roles {
                println!("  [{}] issuing {role} certificate...", p.name);
                let material = issuer::issue(&ca, p, *role)?;
                bundler.bundle(&material, &service_dir, &ca_cert_path).await?;
                bundles += 1;
            }
        }

        println!("\n=== Build complete ===");
        println!(
            "Generated {} bundle(s) for {} service(s) under {}",
            bundles,
            profiles.len(),
            self.config.out_dir.display()
        );
        Ok(())
    }
}

/// The deploy pipeline: load generated artifacts and publish secrets
pub struct DeployPipeline {
    config: DeployConfig,
}

impl DeployPipeline {
    /// Create a deploy pipeline with the given configuration
    pub fn new(config: DeployConfig) -> Self {
        Self { config }
    }

    /// Run the full deploy: publish every (service, role) secret
    pub async fn run(&self) -> Result<()> {
        println!("[Phase 1] Loading CA material...\n");
        let ca_pem = read_text(&self.config.ca_cert()).await?;
        let ca_key_pem = read_text(&self.config.ca_key()).await?;
        println!("  CA certificate: {}\n", self.config.ca_cert().display());

        println!("[Phase 2] Discovering service profiles...\n");
        let profiles = profile::discover(&self.config.profiles_dir, &self.config.namespace)?;
        if profiles.is_empty() {
            return Err(Error::invalid_config(format!(
                "no service profiles found under {}",
                self.config.profiles_dir.display()
            )));
        }
        for p in &profiles {
            println!("  {} -> namespace {}", p.name, p.namespace);
        }
        println!();

        println!("[Phase 3] Connecting to the cluster...\n");
        let client = kube::Client::try_default().await?;

        println!("[Phase 4] Publishing secrets...\n");
        let mut published = Vec::new();
        for p in &profiles {
            let service_dir = self.config.service_dir(&p.name);
            for role in &p.roles {
                let material = load_material(&service_dir, p, *role, &ca_pem).await?;
                let bundle = keystore::load_bundle(&service_dir, &p.name, *role).await?;
                let names =
                    publish::publish(&client, p, *role, &material, &bundle, &ca_key_pem).await?;
                for name in &names {
                    println!("  created {name} (namespace {})", p.namespace);
                }
                published.extend(names);
            }
        }

        println!("\n=== Deploy complete ===");
        println!("Published {} secret(s)", published.len());
        Ok(())
    }
}

/// Load issued material for a (service, role) pair from the artifact layout
///
/// Re-checks the chain-of-trust invariant so stale or mixed artifacts are
/// caught before anything reaches the cluster.
pub async fn load_material(
    service_dir: &Path,
    profile: &ServiceProfile,
    role: Role,
    ca_pem: &str,
) -> Result<CertificateMaterial> {
    let paths = RoleArtifacts::new(service_dir, role);
    let cert_pem = String::from_utf8_lossy(&keystore::read_artifact(&paths.cert).await?).into_owned();
    let key_pem = String::from_utf8_lossy(&keystore::read_artifact(&paths.key).await?).into_owned();
    let chain_pem =
        String::from_utf8_lossy(&keystore::read_artifact(&paths.chain).await?).into_owned();

    issuer::verify_chain(&cert_pem, ca_pem)?;

    Ok(CertificateMaterial {
        service: profile.name.clone(),
        role,
        cert_pem,
        key_pem,
        ca_pem: ca_pem.to_string(),
        chain_pem,
    })
}

/// Read a required text artifact, mapping absence to `MissingInput`
async fn read_text(path: &Path) -> Result<String> {
    Ok(String::from_utf8_lossy(&keystore::read_artifact(path).await?).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use crate::config::CaConfig;
    use crate::profile::{SecretConvention, SubjectAltName};

    fn test_profile(name: &str) -> ServiceProfile {
        ServiceProfile {
            name: name.to_string(),
            namespace: "dev".to_string(),
            convention: SecretConvention::Standard,
            roles: Role::ALL.to_vec(),
            common_name: format!("{name}.example.com"),
            organization: "certmesh-tests".to_string(),
            subject_alt_names: vec![SubjectAltName::Dns(name.to_string())],
        }
    }

    #[tokio::test]
    async fn load_material_requires_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let profile = test_profile("api");

        let result = load_material(dir.path(), &profile, Role::Server, "CA").await;
        assert!(matches!(result, Err(Error::MissingInput(_))));
    }

    #[tokio::test]
    async fn load_material_round_trips_issued_certs() {
        let dir = tempfile::tempdir().unwrap();
        let profile = test_profile("api");
        let ca = CertificateAuthority::generate(&CaConfig {
            common_name: "Pipeline Test CA".to_string(),
            organization: "certmesh-tests".to_string(),
            validity_days: 365,
        })
        .unwrap();

        let issued = issuer::issue(&ca, &profile, Role::Server).unwrap();
        let paths = RoleArtifacts::new(dir.path(), Role::Server);
        tokio::fs::write(&paths.cert, &issued.cert_pem).await.unwrap();
        tokio::fs::write(&paths.key, &issued.key_pem).await.unwrap();
        tokio::fs::write(&paths.chain, &issued.chain_pem).await.unwrap();

        let loaded = load_material(dir.path(), &profile, Role::Server, ca.ca_cert_pem())
            .await
            .unwrap();
        assert_eq!(loaded.cert_pem, issued.cert_pem);
        assert_eq!(loaded.chain_pem, issued.chain_pem);
    }

    #[tokio::test]
    async fn load_material_rejects_foreign_ca() {
        let dir = tempfile::tempdir().unwrap();
        let profile = test_profile("api");
        let config = CaConfig {
            common_name: "Pipeline Test CA".to_string(),
            organization: "certmesh-tests".to_string(),
            validity_days: 365,
        };
        let ca = CertificateAuthority::generate(&config).unwrap();
        let other_ca = CertificateAuthority::generate(&config).unwrap();

        let issued = issuer::issue(&ca, &profile, Role::Server).unwrap();
        let paths = RoleArtifacts::new(dir.path(), Role::Server);
        tokio::fs::write(&paths.cert, &issued.cert_pem).await.unwrap();
        tokio::fs::write(&paths.key, &issued.key_pem).await.unwrap();
        tokio::fs::write(&paths.chain, &issued.chain_pem).await.unwrap();

        let result =
            load_material(dir.path(), &profile, Role::Server, other_ca.ca_cert_pem()).await;
        assert!(matches!(result, Err(Error::Generation { .. })));
    }
}
