//! Keystore/truststore bundling and password management
//!
//! Converts issued certificate material into password-protected PKCS#12 and
//! JKS stores via `openssl` and `keytool`, invoked with typed argument
//! vectors. Passwords cross the process boundary through environment
//! variables only - they never appear on a command line. Every store is
//! re-opened with its recorded password immediately after creation, so a
//! bundle that cannot be read back never reaches the publisher.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tokio::process::Command;

use crate::config::{PasswordOverrides, StoreKind};
use crate::error::Error;
use crate::issuer::CertificateMaterial;
use crate::profile::Role;
use crate::{Result, CA_ALIAS};

/// Env var carrying a store password into `openssl`/`keytool`
const PASS_ENV: &str = "CERTMESH_STOREPASS";
/// Env var carrying the source store password into `keytool -importkeystore`
const SRC_PASS_ENV: &str = "CERTMESH_SRC_STOREPASS";
/// Env var carrying the destination store password into `keytool -importkeystore`
const DEST_PASS_ENV: &str = "CERTMESH_DEST_STOREPASS";

/// A complete keystore/truststore bundle for one (service, role) pair
///
/// Regenerated every run; read-only input to the publisher.
#[derive(Debug, Clone)]
pub struct KeystoreBundle {
    /// Service the bundle belongs to
    pub service: String,
    /// Role the bundle belongs to
    pub role: Role,
    /// PKCS#12 keystore holding the chain and private key
    pub keystore_p12: Vec<u8>,
    /// PKCS#12 truststore holding the CA certificate under `CARoot`
    pub truststore_p12: Vec<u8>,
    /// JKS keystore converted from the PKCS#12 keystore
    pub keystore_jks: Vec<u8>,
    /// JKS truststore holding the CA certificate under `CARoot`
    pub truststore_jks: Vec<u8>,
    /// Password protecting both keystore encodings
    pub keystore_password: String,
    /// Password protecting both truststore encodings
    pub truststore_password: String,
}

/// On-disk artifact paths for one (service, role) pair
#[derive(Debug, Clone)]
pub struct RoleArtifacts {
    /// `<role>.pem` - leaf certificate
    pub cert: PathBuf,
    /// `<role>-key.pem` - private key
    pub key: PathBuf,
    /// `<role>-chain.pem` - leaf followed by CA
    pub chain: PathBuf,
    /// `<role>-keystore.p12`
    pub keystore_p12: PathBuf,
    /// `<role>-truststore.p12`
    pub truststore_p12: PathBuf,
    /// `<role>-keystore.jks`
    pub keystore_jks: PathBuf,
    /// `<role>-truststore.jks`
    pub truststore_jks: PathBuf,
    /// `<role>-keystore-password`
    pub keystore_password: PathBuf,
    /// `<role>-truststore-password`
    pub truststore_password: PathBuf,
}

impl RoleArtifacts {
    /// Artifact paths for a role inside a service directory
    pub fn new(service_dir: &Path, role: Role) -> Self {
        let file = |suffix: &str| service_dir.join(format!("{role}{suffix}"));
        Self {
            cert: file(".pem"),
            key: file("-key.pem"),
            chain: file("-chain.pem"),
            keystore_p12: file("-keystore.p12"),
            truststore_p12: file("-truststore.p12"),
            keystore_jks: file("-keystore.jks"),
            truststore_jks: file("-truststore.jks"),
            keystore_password: file("-keystore-password"),
            truststore_password: file("-truststore-password"),
        }
    }
}

/// Generate a random opaque password token
pub fn generate_password() -> Result<String> {
    let mut raw = [0u8; 24];
    aws_lc_rs::rand::fill(&mut raw)
        .map_err(|_| Error::generation("generate store password", "random generation failed"))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Bundles certificate material into keystore/truststore artifacts
pub struct KeystoreBundler {
    passwords: PasswordOverrides,
}

impl KeystoreBundler {
    /// Create a bundler with the given password overrides
    pub fn new(passwords: PasswordOverrides) -> Self {
        Self { passwords }
    }

    /// Resolve a store password: env override, or a fresh random token
    fn resolve_password(&self, role: Role, store: StoreKind) -> Result<String> {
        match self.passwords.get(role, store) {
            Some(p) => Ok(p.to_string()),
            None => generate_password(),
        }
    }

    /// Build the full bundle for one (service, role) pair
    ///
    /// Writes the complete per-role artifact set under `service_dir` and
    /// returns the bundle contents. Any sub-step failure is fatal - no
    /// partial bundle is ever published.
    pub async fn bundle(
        &self,
        material: &CertificateMaterial,
        service_dir: &Path,
        ca_cert_path: &Path,
    ) -> Result<KeystoreBundle> {
        let role = material.role;
        let service = material.service.as_str();
        let paths = RoleArtifacts::new(service_dir, role);

        tokio::fs::create_dir_all(service_dir).await?;
        tokio::fs::write(&paths.cert, &material.cert_pem).await?;
        tokio::fs::write(&paths.key, &material.key_pem).await?;
        tokio::fs::write(&paths.chain, &material.chain_pem).await?;

        // Passwords are resolved once and persisted; later verification
        // against the same bundle reuses the recorded value.
        let keystore_password = self.resolve_password(role, StoreKind::Keystore)?;
        let truststore_password = self.resolve_password(role, StoreKind::Truststore)?;
        tokio::fs::write(&paths.keystore_password, &keystore_password).await?;
        tokio::fs::write(&paths.truststore_password, &truststore_password).await?;

        // PKCS#12 keystore: chain + key under the service alias
        run_tool(
            "openssl",
            &pkcs12_export_args(&paths.chain, Some(&paths.key), &paths.keystore_p12, service),
            &[(PASS_ENV, &keystore_password)],
        )
        .await?;
        run_tool(
            "openssl",
            &pkcs12_verify_args(&paths.keystore_p12),
            &[(PASS_ENV, &keystore_password)],
        )
        .await?;

        // PKCS#12 truststore: CA only under the CARoot alias
        run_tool(
            "openssl",
            &pkcs12_export_args(ca_cert_path, None, &paths.truststore_p12, CA_ALIAS),
            &[(PASS_ENV, &truststore_password)],
        )
        .await?;
        run_tool(
            "openssl",
            &pkcs12_verify_args(&paths.truststore_p12),
            &[(PASS_ENV, &truststore_password)],
        )
        .await?;

        // JKS keystore: converted from PKCS#12, same alias and password,
        // then the CA under CARoot and the full chain under the service alias
        run_tool(
            "keytool",
            &jks_convert_args(&paths.keystore_p12, &paths.keystore_jks, service),
            &[
                (SRC_PASS_ENV, keystore_password.as_str()),
                (DEST_PASS_ENV, keystore_password.as_str()),
            ],
        )
        .await?;
        run_tool(
            "keytool",
            &jks_import_cert_args(ca_cert_path, &paths.keystore_jks, CA_ALIAS),
            &[(PASS_ENV, &keystore_password)],
        )
        .await?;
        run_tool(
            "keytool",
            &jks_import_cert_args(&paths.chain, &paths.keystore_jks, service),
            &[(PASS_ENV, &keystore_password)],
        )
        .await?;
        run_tool(
            "keytool",
            &jks_list_args(&paths.keystore_jks),
            &[(PASS_ENV, &keystore_password)],
        )
        .await?;

        // JKS truststore: CARoot only
        run_tool(
            "keytool",
            &jks_import_cert_args(ca_cert_path, &paths.truststore_jks, CA_ALIAS),
            &[(PASS_ENV, &truststore_password)],
        )
        .await?;
        run_tool(
            "keytool",
            &jks_list_args(&paths.truststore_jks),
            &[(PASS_ENV, &truststore_password)],
        )
        .await?;

        Ok(KeystoreBundle {
            service: service.to_string(),
            role,
            keystore_p12: tokio::fs::read(&paths.keystore_p12).await?,
            truststore_p12: tokio::fs::read(&paths.truststore_p12).await?,
            keystore_jks: tokio::fs::read(&paths.keystore_jks).await?,
            truststore_jks: tokio::fs::read(&paths.truststore_jks).await?,
            keystore_password,
            truststore_password,
        })
    }
}

/// Load a previously generated bundle from the artifact layout
///
/// Used by the deploy operation. A missing file is the typed
/// [`Error::MissingInput`] naming the exact path.
pub async fn load_bundle(service_dir: &Path, service: &str, role: Role) -> Result<KeystoreBundle> {
    let paths = RoleArtifacts::new(service_dir, role);
    Ok(KeystoreBundle {
        service: service.to_string(),
        role,
        keystore_p12: read_artifact(&paths.keystore_p12).await?,
        truststore_p12: read_artifact(&paths.truststore_p12).await?,
        keystore_jks: read_artifact(&paths.keystore_jks).await?,
        truststore_jks: read_artifact(&paths.truststore_jks).await?,
        keystore_password: String::from_utf8_lossy(&read_artifact(&paths.keystore_password).await?)
            .into_owned(),
        truststore_password: String::from_utf8_lossy(
            &read_artifact(&paths.truststore_password).await?,
        )
        .into_owned(),
    })
}

/// Read a required artifact, mapping absence to `MissingInput`
pub async fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::MissingInput(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// `openssl pkcs12 -export` argument vector
///
/// With a key: exports chain + key as a keystore. Without: a cert-only
/// truststore. The password is referenced via `env:` only.
fn pkcs12_export_args(
    certs: &Path,
    key: Option<&Path>,
    out: &Path,
    alias: &str,
) -> Vec<String> {
    let mut args = vec![
        "pkcs12".to_string(),
        "-export".to_string(),
        "-in".to_string(),
        path_arg(certs),
    ];
    match key {
        Some(key) => {
            args.push("-inkey".to_string());
            args.push(path_arg(key));
        }
        None => args.push("-nokeys".to_string()),
    }
    args.extend([
        "-out".to_string(),
        path_arg(out),
        "-name".to_string(),
        alias.to_string(),
        "-passout".to_string(),
        format!("env:{PASS_ENV}"),
    ]);
    args
}

/// `openssl pkcs12 -info -noout` argument vector (open-verification)
fn pkcs12_verify_args(store: &Path) -> Vec<String> {
    vec![
        "pkcs12".to_string(),
        "-in".to_string(),
        path_arg(store),
        "-info".to_string(),
        "-noout".to_string(),
        "-passin".to_string(),
        format!("env:{PASS_ENV}"),
    ]
}

/// `keytool -importkeystore` PKCS#12 -> JKS argument vector
fn jks_convert_args(src: &Path, dest: &Path, alias: &str) -> Vec<String> {
    vec![
        "-importkeystore".to_string(),
        "-noprompt".to_string(),
        "-srckeystore".to_string(),
        path_arg(src),
        "-srcstoretype".to_string(),
        "PKCS12".to_string(),
        "-srcstorepass:env".to_string(),
        SRC_PASS_ENV.to_string(),
        "-srcalias".to_string(),
        alias.to_string(),
        "-destkeystore".to_string(),
        path_arg(dest),
        "-deststoretype".to_string(),
        "JKS".to_string(),
        "-deststorepass:env".to_string(),
        DEST_PASS_ENV.to_string(),
        "-destalias".to_string(),
        alias.to_string(),
    ]
}

/// `keytool -importcert` argument vector (creates the store if absent)
fn jks_import_cert_args(cert: &Path, store: &Path, alias: &str) -> Vec<String> {
    vec![
        "-importcert".to_string(),
        "-noprompt".to_string(),
        "-alias".to_string(),
        alias.to_string(),
        "-file".to_string(),
        path_arg(cert),
        "-keystore".to_string(),
        path_arg(store),
        "-storetype".to_string(),
        "JKS".to_string(),
        "-storepass:env".to_string(),
        PASS_ENV.to_string(),
    ]
}

/// `keytool -list` argument vector (open-verification)
fn jks_list_args(store: &Path) -> Vec<String> {
    vec![
        "-list".to_string(),
        "-keystore".to_string(),
        path_arg(store),
        "-storepass:env".to_string(),
        PASS_ENV.to_string(),
    ]
}

/// Run an external tool with typed arguments and password-carrying env vars
///
/// The composed command line (without env values) is reproduced in the
/// error for manual inspection.
async fn run_tool(cmd: &str, args: &[String], envs: &[(&str, &str)]) -> Result<()> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }

    let composed = format!("{} {}", cmd, args.join(" "));
    tracing::debug!(command = %composed, "running keystore tool");

    let output = command.output().await?;
    if !output.status.success() {
        return Err(Error::generation(
            composed,
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_opaque_and_distinct() {
        let a = generate_password().unwrap();
        let b = generate_password().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32); // 24 raw bytes, url-safe base64, no padding
        assert!(!a.contains('='));
    }

    #[test]
    fn bundler_prefers_env_override() {
        let mut overrides = PasswordOverrides::default();
        overrides.set(Role::Server, StoreKind::Keystore, "pinned");
        let bundler = KeystoreBundler::new(overrides);

        assert_eq!(
            bundler
                .resolve_password(Role::Server, StoreKind::Keystore)
                .unwrap(),
            "pinned"
        );
        // No override for the truststore slot: a random token is drawn
        let random = bundler
            .resolve_password(Role::Server, StoreKind::Truststore)
            .unwrap();
        assert_ne!(random, "pinned");
    }

    #[test]
    fn artifact_layout_is_role_scoped() {
        let paths = RoleArtifacts::new(Path::new("out/api"), Role::Peer);
        assert_eq!(paths.cert, Path::new("out/api/peer.pem"));
        assert_eq!(paths.keystore_p12, Path::new("out/api/peer-keystore.p12"));
        assert_eq!(paths.truststore_jks, Path::new("out/api/peer-truststore.jks"));
        assert_eq!(
            paths.keystore_password,
            Path::new("out/api/peer-keystore-password")
        );
    }

    #[test]
    fn passwords_never_appear_on_argument_vectors() {
        let chain = Path::new("out/api/server-chain.pem");
        let key = Path::new("out/api/server-key.pem");
        let p12 = Path::new("out/api/server-keystore.p12");
        let jks = Path::new("out/api/server-keystore.jks");

        let all_args: Vec<String> = pkcs12_export_args(chain, Some(key), p12, "api")
            .into_iter()
            .chain(pkcs12_verify_args(p12))
            .chain(jks_convert_args(p12, jks, "api"))
            .chain(jks_import_cert_args(chain, jks, "api"))
            .chain(jks_list_args(jks))
            .collect();

        // Every password-bearing argument is an env indirection; no arg
        // builder even accepts a password value.
        for arg in all_args.iter().filter(|a| a.contains("pass")) {
            let is_env_flag = arg.ends_with("pass:env");
            let is_env_ref = arg.starts_with("env:CERTMESH_");
            let is_flag = matches!(arg.as_str(), "-passout" | "-passin");
            assert!(
                is_env_flag || is_env_ref || is_flag,
                "non-env password argument: {arg}"
            );
        }
        assert!(all_args.iter().any(|a| a == "env:CERTMESH_STOREPASS"));
        assert!(all_args.iter().any(|a| a == "CERTMESH_SRC_STOREPASS"));
    }

    #[test]
    fn truststore_export_is_keyless_with_ca_alias() {
        let args = pkcs12_export_args(
            Path::new("out/ca/ca.pem"),
            None,
            Path::new("out/api/server-truststore.p12"),
            CA_ALIAS,
        );
        assert!(args.contains(&"-nokeys".to_string()));
        assert!(args.contains(&"CARoot".to_string()));
        assert!(!args.contains(&"-inkey".to_string()));
    }

    #[test]
    fn jks_conversion_preserves_alias() {
        let args = jks_convert_args(
            Path::new("server-keystore.p12"),
            Path::new("server-keystore.jks"),
            "kafka-cluster",
        );
        let src_idx = args.iter().position(|a| a == "-srcalias").unwrap();
        let dest_idx = args.iter().position(|a| a == "-destalias").unwrap();
        assert_eq!(args[src_idx + 1], "kafka-cluster");
        assert_eq!(args[dest_idx + 1], "kafka-cluster");
    }

    #[tokio::test]
    async fn read_artifact_maps_absence_to_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server-keystore.p12");

        let result = read_artifact(&path).await;
        match result {
            Err(Error::MissingInput(p)) => assert!(p.contains("server-keystore.p12")),
            other => panic!("expected MissingInput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_bundle_round_trips_written_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RoleArtifacts::new(dir.path(), Role::Client);
        for (path, content) in [
            (&paths.keystore_p12, b"p12".as_slice()),
            (&paths.truststore_p12, b"tp12".as_slice()),
            (&paths.keystore_jks, b"jks".as_slice()),
            (&paths.truststore_jks, b"tjks".as_slice()),
            (&paths.keystore_password, b"kpass".as_slice()),
            (&paths.truststore_password, b"tpass".as_slice()),
        ] {
            tokio::fs::write(path, content).await.unwrap();
        }

        let bundle = load_bundle(dir.path(), "api", Role::Client).await.unwrap();
        assert_eq!(bundle.keystore_p12, b"p12");
        assert_eq!(bundle.keystore_password, "kpass");
        assert_eq!(bundle.truststore_password, "tpass");
    }
}
