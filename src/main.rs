//! certmesh - private PKI provisioning and Kubernetes secret distribution

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use certmesh::config::{BuildConfig, CaConfig, DeployConfig, PasswordOverrides};
use certmesh::pipeline::{BuildPipeline, DeployPipeline};

/// certmesh - provision a private PKI and distribute it as cluster secrets
#[derive(Parser, Debug)]
#[command(name = "certmesh", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the CA, per-service certificates, and keystore bundles
    ///
    /// Re-running without --force reuses the persisted CA byte-for-byte,
    /// preserving trust already distributed to consumers; leaf material is
    /// regenerated on every run.
    Build(BuildArgs),

    /// Publish generated artifacts as namespaced secrets
    ///
    /// Each secret is fully replaced (delete-then-create), so repeated
    /// deploys converge to identical content.
    Deploy(DeployArgs),
}

/// Build mode arguments
#[derive(Parser, Debug)]
struct BuildArgs {
    /// Directory scanned for service profile descriptors (*-csr.yaml)
    #[arg(long, default_value = "profiles")]
    profiles: PathBuf,

    /// Output directory for the generated artifact layout
    #[arg(short = 'o', long, default_value = "tls")]
    out: PathBuf,

    /// Path to the CA config YAML (commonName, organization, validityDays)
    #[arg(long)]
    ca_config: Option<PathBuf>,

    /// Namespace baked into in-cluster certificate SANs
    #[arg(short = 'n', long, env = "CERTMESH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Regenerate the CA even if one is already persisted
    #[arg(long)]
    force: bool,
}

/// Deploy mode arguments
#[derive(Parser, Debug)]
struct DeployArgs {
    /// Directory scanned for service profile descriptors (*-csr.yaml)
    #[arg(long, default_value = "profiles")]
    profiles: PathBuf,

    /// Directory holding the generated artifact layout
    #[arg(short = 'o', long, default_value = "tls")]
    out: PathBuf,

    /// Target namespace for recognized services
    #[arg(short = 'n', long, env = "CERTMESH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Override path for the CA certificate
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Override path for the CA private key
    #[arg(long)]
    ca_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the aws-lc-rs crypto provider for the rustls-backed kube
    // client before anything opens a TLS connection.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: failed to install the aws-lc-rs crypto provider: {:?}. \
             The cluster client cannot operate without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => run_build(args).await,
        Commands::Deploy(args) => run_deploy(args).await,
    }
}

/// Run the build pipeline: CA + issuance + keystore bundling
async fn run_build(args: BuildArgs) -> anyhow::Result<()> {
    let ca = match &args.ca_config {
        Some(path) => CaConfig::load(path)?,
        None => CaConfig::default(),
    };

    let config = BuildConfig {
        profiles_dir: args.profiles,
        out_dir: args.out,
        ca,
        namespace: args.namespace,
        force: args.force,
        // Password overrides are read from the environment exactly once;
        // every later component sees only this immutable snapshot.
        passwords: PasswordOverrides::from_env(),
    };

    BuildPipeline::new(config).run().await?;
    Ok(())
}

/// Run the deploy pipeline: publish generated artifacts as secrets
async fn run_deploy(args: DeployArgs) -> anyhow::Result<()> {
    let config = DeployConfig {
        profiles_dir: args.profiles,
        out_dir: args.out,
        namespace: args.namespace,
        ca_cert_path: args.ca_cert,
        ca_key_path: args.ca_key,
    };

    DeployPipeline::new(config).run().await?;
    Ok(())
}
