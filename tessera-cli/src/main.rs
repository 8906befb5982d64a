//! tessera - attestation client and enrollment administration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tessera_cli::config::AttestConfig;
use tessera_cli::hook::{CommandHook, InstallHook};
use tessera_cli::{driver, enroll, unseal, ApiClient, ClientOptions};
use tessera_core::wire::InitialContext;
use tessera_core::QuoteBundle;
use tessera_ports::{EmulatedTpm, Tpm2Tools, TpmPort};
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// tessera - TPM attestation client
#[derive(Parser)]
#[command(name = "tessera", version, about)]
struct Cli {
    /// Attestation server URL
    #[arg(long, env = "TESSERA_API_URL", global = true)]
    api: Option<String>,

    /// CA bundle for the server certificate
    #[arg(long, env = "TESSERA_API_CACERT", global = true)]
    cacert: Option<PathBuf>,

    /// Skip server certificate verification
    #[arg(long, global = true)]
    noverify: bool,

    /// Client certificate (PEM)
    #[arg(long, env = "TESSERA_API_CLIENTCERT", global = true)]
    clientcert: Option<PathBuf>,

    /// Client key (PEM), if not in --clientcert
    #[arg(long, env = "TESSERA_API_CLIENTKEY", global = true)]
    clientkey: Option<PathBuf>,

    /// Retries after a transport failure
    #[arg(long, default_value = "0", global = true)]
    retries: u32,

    /// Seconds between retries
    #[arg(long, default_value = "0", global = true)]
    pause: u64,

    /// Request and tool timeout in seconds
    #[arg(long, default_value = "600", global = true)]
    timeout: u64,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run initiate, quote, complete and unseal
    Attest {
        /// Attester config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Request a ticket for this host
    Initiate {
        #[command(flatten)]
        tpm: TpmArgs,

        /// Write the initial context here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Quote against an initial context
    Quote {
        #[command(flatten)]
        tpm: TpmArgs,

        /// Initial context (JSON)
        #[arg(long)]
        initial: PathBuf,

        /// Quote bundle output
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Submit a quote and save the asset archive
    Complete {
        /// Initial context (JSON)
        #[arg(long)]
        initial: PathBuf,

        /// Quote bundle
        #[arg(long)]
        quote: PathBuf,

        /// Asset archive output
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Install an asset archive
    Unseal {
        /// Asset archive
        archive: PathBuf,

        /// Output directory
        #[arg(short, long)]
        outdir: PathBuf,

        /// Attester config (TOML), for the TPM, sealer and verifier
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Install hook, run as `<hook> pre|post <name> <path>`
        #[arg(long)]
        hook: Option<PathBuf>,
    },

    /// Print this host's ekpubhash
    Ekpubhash {
        #[command(flatten)]
        tpm: TpmArgs,
    },

    /// Enrollment administration
    Enroll {
        #[command(subcommand)]
        action: EnrollAction,
    },

    /// Check that the server is up
    Health,
}

#[derive(clap::Args)]
struct TpmArgs {
    /// Use the emulated TPM kept in this directory
    #[arg(long, env = "TESSERA_EMULATED_TPM")]
    emulated: Option<PathBuf>,

    /// tpm2 program
    #[arg(long, default_value = "tpm2")]
    tpm2: PathBuf,
}

impl TpmArgs {
    fn open(&self, timeout: Duration) -> Result<Arc<dyn TpmPort>> {
        Ok(match &self.emulated {
            Some(dir) => Arc::new(EmulatedTpm::open(dir)?),
            None => Arc::new(Tpm2Tools::new(&self.tpm2, timeout)),
        })
    }
}

#[derive(Subcommand)]
enum EnrollAction {
    /// Enroll a host by its ek.pub
    Add {
        /// Identity public key file
        ekpub: PathBuf,

        /// Profile (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// List enrolled hosts by hash prefix
    Query {
        #[arg(default_value = "")]
        prefix: String,

        /// Omit file listings
        #[arg(long)]
        nofiles: bool,
    },

    /// Remove every host matching a prefix
    Delete {
        prefix: String,

        #[arg(long)]
        nofiles: bool,
    },

    /// List hosts due for re-enrollment
    Reenroll {
        prefix: String,

        #[arg(long)]
        nofiles: bool,
    },

    /// Sweep abandoned staging state and rebuild the index
    Janitor,

    /// Print the asset signer verification key
    Signer,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Connect to `--api`, else `api`. `--cacert` wins over `cacert`.
    fn client(&self, api: Option<&str>, cacert: Option<&Path>) -> Result<ApiClient> {
        let api = self
            .api
            .as_deref()
            .or(api)
            .context("no server given (use --api or TESSERA_API_URL)")?;
        let options = ClientOptions {
            cacert: self.cacert.clone().or_else(|| cacert.map(Path::to_path_buf)),
            noverify: self.noverify,
            clientcert: self.clientcert.clone(),
            clientkey: self.clientkey.clone(),
            timeout: self.timeout(),
            retries: self.retries,
            pause: Duration::from_secs(self.pause),
        };
        Ok(ApiClient::new(api, &options)?)
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Attest { config } => cmd_attest(&cli, config.as_deref()).await,
        Commands::Initiate { tpm, out } => {
            let tpm = tpm.open(cli.timeout())?;
            let initial = driver::initiate(&cli.client(None, None)?, tpm.as_ref()).await?;
            let json = serde_json::to_string_pretty(&initial)?;
            match out {
                Some(path) => write_file(path, json.as_bytes()),
                None => {
                    println!("{json}");
                    Ok(())
                }
            }
        }
        Commands::Quote { tpm, initial, out } => {
            let tpm = tpm.open(cli.timeout())?;
            let initial = read_initial(initial)?;
            let bundle = driver::quote(tpm.as_ref(), &initial).await?;
            write_file(out, &bundle.to_archive()?)
        }
        Commands::Complete {
            initial,
            quote,
            out,
        } => {
            let initial = read_initial(initial)?;
            let bytes = std::fs::read(quote)
                .with_context(|| format!("Failed to read {}", quote.display()))?;
            let bundle = QuoteBundle::from_archive(&bytes).context("Invalid quote bundle")?;
            let archive = driver::complete(&cli.client(None, None)?, &initial, &bundle).await?;
            write_file(out, &archive)
        }
        Commands::Unseal {
            archive,
            outdir,
            config,
            hook,
        } => {
            let config = AttestConfig::load(config.as_deref())?;
            let signer = if config.verifier.is_none() && (cli.api.is_some() || config.api.is_some())
            {
                let client = cli.client(config.api.as_deref(), config.cacert.as_deref())?;
                Some(client.asset_signer().await?)
            } else {
                None
            };
            let (_, sealer) = config.backends(cli.timeout(), signer.as_deref())?;
            let bytes = std::fs::read(archive)
                .with_context(|| format!("Failed to read {}", archive.display()))?;
            let hook = hook
                .as_ref()
                .map(|program| CommandHook::new(program, outdir, config.callback_timeout()));
            let report = unseal::unseal(
                &bytes,
                outdir,
                sealer.as_ref(),
                hook.as_ref().map(|h| h as &dyn InstallHook),
            )
            .await?;
            for name in &report.installed {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Ekpubhash { tpm } => {
            let tpm = tpm.open(cli.timeout())?;
            println!("{}", driver::ekpubhash(tpm.as_ref()).await?);
            Ok(())
        }
        Commands::Enroll { action } => cmd_enroll(&cli, action).await,
        Commands::Health => {
            let health = cli.client(None, None)?.health().await?;
            println!("{} {}", health.status, health.version);
            Ok(())
        }
    }
}

// ============================================================================
// Attest
// ============================================================================

async fn cmd_attest(cli: &Cli, config_path: Option<&Path>) -> Result<()> {
    let config = AttestConfig::load(config_path)?;
    let client = cli.client(config.api.as_deref(), config.cacert.as_deref())?;

    let signer = match config.verifier {
        Some(_) => None,
        None => Some(client.asset_signer().await?),
    };
    let (tpm, sealer) = config.backends(cli.timeout(), signer.as_deref())?;
    let hook = config
        .callback
        .as_ref()
        .map(|program| CommandHook::new(program, &config.assetdir, config.callback_timeout()));

    let report = driver::attest(
        &client,
        tpm.as_ref(),
        sealer.as_ref(),
        &config.assetdir,
        hook.as_ref().map(|h| h as &dyn InstallHook),
    )
    .await?;
    eprintln!(
        "{} installed, {} unchanged in {}",
        report.installed.len(),
        report.unchanged.len(),
        config.assetdir.display()
    );
    Ok(())
}

// ============================================================================
// Enrollment
// ============================================================================

async fn cmd_enroll(cli: &Cli, action: &EnrollAction) -> Result<()> {
    let client = cli.client(None, None)?;
    match action {
        EnrollAction::Add { ekpub, profile } => {
            let hash = enroll::add(&client, ekpub, profile.as_deref()).await?;
            println!("{hash}");
        }
        EnrollAction::Query { prefix, nofiles } => {
            let list = client.query(prefix, !nofiles).await?;
            print!("{}", enroll::format_entries(&list));
        }
        EnrollAction::Delete { prefix, nofiles } => {
            let list = client.delete(prefix, !nofiles).await?;
            print!("{}", enroll::format_entries(&list));
        }
        EnrollAction::Reenroll { prefix, nofiles } => {
            let list = client.reenroll(prefix, !nofiles).await?;
            print!("{}", enroll::format_entries(&list));
        }
        EnrollAction::Janitor => {
            let report = client.janitor().await?;
            print!("{}", enroll::format_janitor(&report));
        }
        EnrollAction::Signer => println!("{}", client.asset_signer().await?),
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn read_initial(path: &Path) -> Result<InitialContext> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse initial context {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
