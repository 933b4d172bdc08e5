//! Service profiles, roles, and packaging conventions
//!
//! A service is any immediate subdirectory of the profiles root that carries
//! a certificate-signing-request descriptor (a file suffixed `-csr.yaml`).
//! The descriptor supplies the subject and SANs; the routing table fixes the
//! packaging convention and target namespace per well-known service name.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::{Result, DEFAULT_NAMESPACE};

/// Certificate usage category
///
/// The role determines the key-usage extensions on the issued certificate
/// and which consumer mounts the resulting secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Server-auth certificate for the service's listening endpoints
    Server,
    /// Dual-usage certificate for service-to-service links
    Peer,
    /// Client-auth certificate for consumers of the service
    Client,
}

impl Role {
    /// All roles, in publication order
    pub const ALL: [Role; 3] = [Role::Server, Role::Peer, Role::Client];

    /// Lowercase name used in file names and secret names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Peer => "peer",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "peer" => Ok(Self::Peer),
            "client" => Ok(Self::Client),
            _ => Err(Error::invalid_config(format!(
                "invalid role: {s}, expected one of: server, peer, client"
            ))),
        }
    }
}

/// Packaging convention applied at publish time
///
/// Resolved once per service profile and dispatched via a single match in
/// the publisher - service names are never string-compared downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretConvention {
    /// Canonical `<service>-*.pem` keys plus the convenience alias set
    Standard,
    /// Container-specific `server.cert`/`server.key` keys (pgadmin-style)
    AdminUi,
    /// Message-broker operator layout with the CA fan-out on the server role
    BrokerOperator,
}

/// A subject alternative name, DNS or IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    /// DNS name entry
    Dns(String),
    /// IP address entry
    Ip(IpAddr),
}

impl SubjectAltName {
    /// Classify a descriptor host entry as an IP or DNS SAN
    pub fn parse(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Dns(host.to_string()),
        }
    }
}

/// One service to process: subject profile plus packaging convention
#[derive(Debug, Clone)]
pub struct ServiceProfile {
    /// Service name (the profile directory name)
    pub name: String,
    /// Namespace the service's secrets are published into
    pub namespace: String,
    /// Packaging convention for this service
    pub convention: SecretConvention,
    /// Roles to issue for this service
    pub roles: Vec<Role>,
    /// Subject common name for issued certificates
    pub common_name: String,
    /// Subject organization for issued certificates
    pub organization: String,
    /// Subject alternative names, including in-cluster service DNS names
    pub subject_alt_names: Vec<SubjectAltName>,
}

/// On-disk CSR profile descriptor (`<name>-csr.yaml`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CsrDescriptor {
    common_name: String,
    #[serde(default)]
    organization: Option<String>,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    roles: Option<Vec<Role>>,
}

/// Fixed routing table of well-known service names
///
/// Recognized services publish into the configured target namespace with
/// their fixed convention; unrecognized names fall back to [`Standard`]
/// packaging in the default namespace.
///
/// [`Standard`]: SecretConvention::Standard
const WELL_KNOWN_SERVICES: &[(&str, SecretConvention)] = &[
    ("api", SecretConvention::Standard),
    ("control-plane", SecretConvention::Standard),
    ("kafka-cluster", SecretConvention::BrokerOperator),
    ("pgadmin", SecretConvention::AdminUi),
    ("postgres", SecretConvention::Standard),
    ("nginx", SecretConvention::Standard),
    ("schema-registry", SecretConvention::Standard),
    ("zookeeper", SecretConvention::Standard),
];

/// Resolve a service name to its namespace and packaging convention
pub fn route(name: &str, target_namespace: &str) -> (String, SecretConvention) {
    match WELL_KNOWN_SERVICES
        .iter()
        .find(|(known, _)| *known == name)
    {
        Some((_, convention)) => (target_namespace.to_string(), *convention),
        None => (DEFAULT_NAMESPACE.to_string(), SecretConvention::Standard),
    }
}

/// In-cluster DNS names every certificate must be valid for
fn cluster_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.cluster.local"),
    ]
}

/// Discover service profiles under the profiles root
///
/// A directory is a service if and only if it contains a `-csr.yaml`
/// descriptor; everything else is skipped. Results are sorted by service
/// name so runs are deterministic.
pub fn discover(profiles_dir: &Path, target_namespace: &str) -> Result<Vec<ServiceProfile>> {
    let mut by_name = BTreeMap::new();

    for entry in std::fs::read_dir(profiles_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        let Some(descriptor_path) = find_descriptor(&dir)? else {
            tracing::debug!(service = %name, "no -csr.yaml descriptor, skipping directory");
            continue;
        };

        let content = std::fs::read_to_string(&descriptor_path)?;
        let descriptor: CsrDescriptor = serde_yaml::from_str(&content).map_err(|e| {
            Error::invalid_config(format!(
                "failed to parse profile {}: {}",
                descriptor_path.display(),
                e
            ))
        })?;

        let (namespace, convention) = route(&name, target_namespace);

        let mut subject_alt_names: Vec<SubjectAltName> = cluster_dns_names(&name, &namespace)
            .into_iter()
            .map(SubjectAltName::Dns)
            .collect();
        for host in &descriptor.hosts {
            let san = SubjectAltName::parse(host);
            if !subject_alt_names.contains(&san) {
                subject_alt_names.push(san);
            }
        }

        by_name.insert(
            name.clone(),
            ServiceProfile {
                name,
                namespace,
                convention,
                roles: descriptor.roles.unwrap_or_else(|| Role::ALL.to_vec()),
                common_name: descriptor.common_name,
                organization: descriptor
                    .organization
                    .unwrap_or_else(|| "certmesh".to_string()),
                subject_alt_names,
            },
        );
    }

    Ok(by_name.into_values().collect())
}

/// Locate the `-csr.yaml` descriptor inside a service directory
fn find_descriptor(dir: &Path) -> Result<Option<std::path::PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if file_name.ends_with("-csr.yaml") && entry.file_type()?.is_file() {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_descriptor(dir: &Path, service: &str, yaml: &str) {
        let service_dir = dir.join(service);
        std::fs::create_dir_all(&service_dir).unwrap();
        let mut f =
            std::fs::File::create(service_dir.join(format!("{service}-csr.yaml"))).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in Role::ALL {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn routing_table_fixes_conventions() {
        assert_eq!(
            route("kafka-cluster", "dev"),
            ("dev".to_string(), SecretConvention::BrokerOperator)
        );
        assert_eq!(
            route("pgadmin", "dev"),
            ("dev".to_string(), SecretConvention::AdminUi)
        );
        assert_eq!(
            route("api", "dev"),
            ("dev".to_string(), SecretConvention::Standard)
        );
    }

    #[test]
    fn unknown_services_fall_back_to_default_namespace() {
        let (namespace, convention) = route("telemetry-sidecar", "dev");
        assert_eq!(namespace, DEFAULT_NAMESPACE);
        assert_eq!(convention, SecretConvention::Standard);
    }

    #[test]
    fn san_classification() {
        assert_eq!(
            SubjectAltName::parse("10.0.0.1"),
            SubjectAltName::Ip("10.0.0.1".parse().unwrap())
        );
        assert_eq!(
            SubjectAltName::parse("api.example.com"),
            SubjectAltName::Dns("api.example.com".to_string())
        );
    }

    #[test]
    fn discovery_requires_descriptor() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(root.path(), "api", "commonName: api.example.com\n");
        // A directory without a descriptor is not a service
        std::fs::create_dir_all(root.path().join("scratch")).unwrap();

        let profiles = discover(root.path(), "dev").unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "api");
        assert_eq!(profiles[0].roles, Role::ALL.to_vec());
    }

    #[test]
    fn discovery_is_sorted_and_merges_sans() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(
            root.path(),
            "postgres",
            "commonName: postgres.example.com\nhosts:\n  - db.example.com\n  - 10.1.2.3\n",
        );
        write_descriptor(root.path(), "api", "commonName: api.example.com\n");

        let profiles = discover(root.path(), "dev").unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "api");
        assert_eq!(profiles[1].name, "postgres");

        let postgres = &profiles[1];
        assert!(postgres
            .subject_alt_names
            .contains(&SubjectAltName::Dns("postgres.dev.svc.cluster.local".to_string())));
        assert!(postgres
            .subject_alt_names
            .contains(&SubjectAltName::Dns("db.example.com".to_string())));
        assert!(postgres
            .subject_alt_names
            .contains(&SubjectAltName::Ip("10.1.2.3".parse().unwrap())));
    }

    #[test]
    fn descriptor_roles_restrict_issuance() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(
            root.path(),
            "nginx",
            "commonName: nginx.example.com\nroles:\n  - server\n",
        );

        let profiles = discover(root.path(), "dev").unwrap();
        assert_eq!(profiles[0].roles, vec![Role::Server]);
    }

    #[test]
    fn malformed_descriptor_is_invalid_config() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(root.path(), "api", "commonName: [not, a, string]\n");

        let result = discover(root.path(), "dev");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
