//! Secret publication with per-service packaging conventions
//!
//! Every publish is a full replacement: the existing secret is deleted
//! (not-found tolerated) and a new one created from the freshly generated
//! artifacts. Replacement is not atomic - between delete and create the
//! secret does not exist, and consumers must treat mount failures during
//! that window as retryable.
//!
//! The packaging convention is dispatched in exactly one place,
//! [`build_primary_secret`], on the profile's resolved
//! [`SecretConvention`] - service names are never string-compared here.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;

use crate::error::Error;
use crate::issuer::CertificateMaterial;
use crate::keystore::KeystoreBundle;
use crate::profile::{Role, SecretConvention, ServiceProfile};
use crate::Result;

/// Label recognized by the broker operator's rotation bookkeeping
pub const BROKER_KIND_LABEL: &str = "strimzi.io/kind";
/// Resource kind value for the broker kind label
pub const BROKER_KIND_VALUE: &str = "Kafka";
/// Label binding an auxiliary secret to its broker cluster
pub const BROKER_CLUSTER_LABEL: &str = "strimzi.io/cluster";
/// Annotation tracking the CA certificate generation (fixed at zero)
pub const BROKER_CA_CERT_GENERATION: &str = "strimzi.io/ca-cert-generation";
/// Annotation tracking the CA key generation (fixed at zero)
pub const BROKER_CA_KEY_GENERATION: &str = "strimzi.io/ca-key-generation";

/// Compute the primary secret name for a (service, role) pair
pub fn secret_name(service: &str, role: Role) -> String {
    format!("tls-{service}-{role}")
}

fn entry(data: &mut BTreeMap<String, ByteString>, key: impl Into<String>, value: &[u8]) {
    data.insert(key.into(), ByteString(value.to_vec()));
}

/// Convenience alias entries shared by every convention except the broker
/// client role: CA material, chain, both store encodings, both passwords.
fn convenience_entries(
    data: &mut BTreeMap<String, ByteString>,
    material: &CertificateMaterial,
    bundle: &KeystoreBundle,
    ca_key_pem: &str,
) {
    entry(data, "ca.pem", material.ca_pem.as_bytes());
    entry(data, "ca-key.pem", ca_key_pem.as_bytes());
    entry(data, "chain.pem", material.chain_pem.as_bytes());
    entry(data, "keystore.p12", &bundle.keystore_p12);
    entry(data, "truststore.p12", &bundle.truststore_p12);
    entry(data, "keystore.jks", &bundle.keystore_jks);
    entry(data, "truststore.jks", &bundle.truststore_jks);
    entry(data, "keystore-password", bundle.keystore_password.as_bytes());
    entry(
        data,
        "truststore-password",
        bundle.truststore_password.as_bytes(),
    );
}

/// Assemble the primary secret's data map for a (service, role) pair
pub fn build_data(
    profile: &ServiceProfile,
    role: Role,
    material: &CertificateMaterial,
    bundle: &KeystoreBundle,
    ca_key_pem: &str,
) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    let service = profile.name.as_str();

    match (profile.convention, role) {
        // Consumer-facing aliases only, no convenience set
        (SecretConvention::BrokerOperator, Role::Client) => {
            entry(&mut data, "ca.crt", material.ca_pem.as_bytes());
            entry(&mut data, "user.crt", material.cert_pem.as_bytes());
            entry(&mut data, "user.key", material.key_pem.as_bytes());
            entry(&mut data, "user.p12", &bundle.keystore_p12);
            entry(&mut data, "user.password", bundle.keystore_password.as_bytes());
        }
        // Container-specific key names substituted for the canonical triple
        (SecretConvention::AdminUi, _) => {
            entry(&mut data, "server.cert", material.cert_pem.as_bytes());
            entry(&mut data, "server.key", material.key_pem.as_bytes());
            convenience_entries(&mut data, material, bundle, ca_key_pem);
        }
        // Canonical service-prefixed triple plus the convenience set
        (SecretConvention::Standard, _) | (SecretConvention::BrokerOperator, _) => {
            entry(&mut data, format!("{service}-ca.pem"), material.ca_pem.as_bytes());
            entry(&mut data, format!("{service}-crt.pem"), material.cert_pem.as_bytes());
            entry(&mut data, format!("{service}-key.pem"), material.key_pem.as_bytes());
            convenience_entries(&mut data, material, bundle, ca_key_pem);
        }
    }

    data
}

/// Build the primary secret for a (service, role) pair
pub fn build_primary_secret(
    profile: &ServiceProfile,
    role: Role,
    material: &CertificateMaterial,
    bundle: &KeystoreBundle,
    ca_key_pem: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(&profile.name, role)),
            namespace: Some(profile.namespace.clone()),
            ..Default::default()
        },
        data: Some(build_data(profile, role, material, bundle, ca_key_pem)),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

fn broker_labels(profile: &ServiceProfile) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BROKER_KIND_LABEL.to_string(), BROKER_KIND_VALUE.to_string()),
        (BROKER_CLUSTER_LABEL.to_string(), profile.name.clone()),
    ])
}

fn broker_aux_secret(
    profile: &ServiceProfile,
    name: String,
    key: &str,
    value: &str,
    generation_annotation: &str,
) -> Secret {
    let mut data = BTreeMap::new();
    entry(&mut data, key, value.as_bytes());
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(profile.namespace.clone()),
            labels: Some(broker_labels(profile)),
            annotations: Some(BTreeMap::from([(
                generation_annotation.to_string(),
                "0".to_string(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Build the four auxiliary CA secrets the broker operator expects
///
/// Published alongside the server-role secret only: cluster CA cert/key and
/// clients CA cert/key, each carrying the operator's kind/cluster labels
/// and a generation annotation fixed at zero (no rotation tracking).
pub fn broker_aux_secrets(
    profile: &ServiceProfile,
    material: &CertificateMaterial,
    ca_key_pem: &str,
) -> Vec<Secret> {
    let ns = profile.namespace.as_str();
    vec![
        broker_aux_secret(
            profile,
            format!("{ns}-cluster-ca-cert"),
            "ca.crt",
            &material.ca_pem,
            BROKER_CA_CERT_GENERATION,
        ),
        broker_aux_secret(
            profile,
            format!("{ns}-cluster-ca"),
            "ca.key",
            ca_key_pem,
            BROKER_CA_KEY_GENERATION,
        ),
        broker_aux_secret(
            profile,
            format!("{ns}-clients-ca-cert"),
            "ca.crt",
            &material.ca_pem,
            BROKER_CA_CERT_GENERATION,
        ),
        broker_aux_secret(
            profile,
            format!("{ns}-clients-ca"),
            "ca.key",
            ca_key_pem,
            BROKER_CA_KEY_GENERATION,
        ),
    ]
}

/// All secrets to publish for a (service, role) pair, primary first
pub fn build_secrets(
    profile: &ServiceProfile,
    role: Role,
    material: &CertificateMaterial,
    bundle: &KeystoreBundle,
    ca_key_pem: &str,
) -> Vec<Secret> {
    let mut secrets = vec![build_primary_secret(profile, role, material, bundle, ca_key_pem)];
    if profile.convention == SecretConvention::BrokerOperator && role == Role::Server {
        secrets.extend(broker_aux_secrets(profile, material, ca_key_pem));
    }
    secrets
}

/// A command line for decoding and inspecting a published certificate
fn inspect_hint(name: &str, namespace: &str, data: &BTreeMap<String, ByteString>) -> String {
    // Prefer a certificate-bearing key for the openssl decode step
    let key = ["ca.pem", "ca.crt", "server.cert"]
        .into_iter()
        .find(|k| data.contains_key(*k))
        .unwrap_or("ca.pem");
    format!(
        "kubectl get secret {name} -n {namespace} -o jsonpath='{{.data.{key}}}' \
         | base64 -d | openssl x509 -noout -text"
    )
}

/// Delete-then-create one secret, tolerating not-found on delete
async fn replace_secret(api: &Api<Secret>, namespace: &str, secret: &Secret) -> Result<String> {
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::invalid_config("secret has no name"))?;
    let empty = BTreeMap::new();
    let hint = inspect_hint(&name, namespace, secret.data.as_ref().unwrap_or(&empty));

    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => tracing::debug!(secret = %name, "deleted existing secret"),
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => {
            return Err(Error::publish(
                format!("delete secret {name} -n {namespace}"),
                e.to_string(),
                hint,
            ))
        }
    }

    api.create(&PostParams::default(), secret)
        .await
        .map_err(|e| {
            Error::publish(
                format!("create secret {name} -n {namespace}"),
                e.to_string(),
                hint.clone(),
            )
        })?;

    tracing::info!(secret = %name, namespace = %namespace, "published secret");
    Ok(name)
}

/// Publish the secret(s) for one (service, role) pair
///
/// Returns the created secret names, primary first. Any delete or create
/// failure is fatal and carries a manual-inspection command.
pub async fn publish(
    client: &Client,
    profile: &ServiceProfile,
    role: Role,
    material: &CertificateMaterial,
    bundle: &KeystoreBundle,
    ca_key_pem: &str,
) -> Result<Vec<String>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &profile.namespace);
    let secrets = build_secrets(profile, role, material, bundle, ca_key_pem);

    let mut created = Vec::with_capacity(secrets.len());
    for secret in &secrets {
        created.push(replace_secret(&api, &profile.namespace, secret).await?);
    }
    Ok(created)
}
