// SPDX-License-Identifier: AGPL-3.0-or-later
//! ioa-setup: set up an Internet of Agents server on this host
//!
//! Every run flag also reads from the environment, and a `.env` file in the
//! working directory is loaded first when present.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ioa_setup::config::{DEFAULT_REGISTRY_URL, DEFAULT_SMITHERY_KEY};
use ioa_setup::{ApiKeys, Orchestrator, PlaybookLocator, ProvisionConfig, SetupError, Settings};

/// ioa-setup: Internet of Agents server provisioning
///
/// Automates configuring a server with DNS, SSL certificates and the agent
/// software by running the bundled Ansible playbook against this host.
#[derive(Parser, Debug)]
#[command(name = "ioa-setup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = "ioa-setup.toml", global = true)]
    config: PathBuf,

    /// Anthropic API key for the agent (required)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    /// Complete domain name, e.g. myapp.example.com (required)
    #[arg(long, env = "DOMAIN")]
    domain: Option<String>,

    /// Smithery API key for the MCP connections
    #[arg(long, env = "SMITHERY_API_KEY", hide_env_values = true)]
    smithery_key: Option<String>,

    /// Agent ID; 0 generates one
    #[arg(long, env = "AGENT_ID", default_value_t = 0)]
    agent_id: u32,

    /// Number of agents to run
    #[arg(long, env = "NUM_AGENTS", default_value_t = 1)]
    num_agents: u32,

    /// URL of the NANDA registry
    #[arg(long, env = "REGISTRY_URL", default_value = DEFAULT_REGISTRY_URL)]
    registry_url: String,

    /// Enable verbose output for the Ansible playbook
    #[arg(
        short,
        long,
        env = "VERBOSE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    verbose: bool,

    /// Directory for generated artifacts (default: a fresh temporary directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Generate artifacts but do not run ansible-playbook
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision this host (the default)
    Setup,

    /// Initialize a new settings file
    Init {
        /// Force overwrite existing settings
        #[arg(short, long)]
        force: bool,
    },

    /// Show effective settings
    Config,

    /// Print the playbook that would be used
    Locate,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = Settings::load_or_default(&cli.config);
    init_logging(&cli, settings.as_ref().ok());

    match &dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(e) => debug!(error = %e, "No .env file found or error loading it"),
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("ioa-setup v{}", env!("CARGO_PKG_VERSION"));
            println!("Internet of Agents server provisioning");
            Ok(ExitCode::SUCCESS)
        }

        Some(Commands::Init { force }) => init_settings(&cli.config, force),

        Some(Commands::Config) => {
            let settings = load(settings, &cli.config)?;
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }

        Some(Commands::Locate) => {
            let settings = load(settings, &cli.config)?;
            locate_playbook(&settings)
        }

        Some(Commands::Setup) | None => {
            let settings = load(settings, &cli.config)?;
            run_setup(&cli, &settings).await
        }
    }
}

fn init_logging(cli: &Cli, settings: Option<&Settings>) {
    let logging = settings.map(|s| s.logging.clone()).unwrap_or_default();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(settings: ioa_setup::Result<Settings>, path: &Path) -> anyhow::Result<Settings> {
    settings.with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// Write a default settings file
fn init_settings(path: &Path, force: bool) -> anyhow::Result<ExitCode> {
    if path.exists() && !force {
        anyhow::bail!(
            "Settings file already exists: {}. Use --force to overwrite.",
            path.display()
        );
    }

    let default_settings = r#"# SPDX-License-Identifier: AGPL-3.0-or-later
# ioa-setup settings

# Public IP lookup services, tried in order
ip_services = ["https://api.ipify.org", "https://ifconfig.me/ip", "https://icanhazip.com"]
lookup_timeout_secs = 10

ansible_program = "ansible-playbook"
# ansible_timeout_secs = 1800

# Playbook locations, first match wins
playbook_candidates = [
    "ansible/playbook.yml",
    "../ansible/playbook.yml",
    "/usr/local/share/go-nanda-sdk/ansible/playbook.yml",
    "/opt/go-nanda-sdk/ansible/playbook.yml",
    "./ansible/playbook.yml",
]

# Artifacts go to a fresh temporary directory unless set
# work_dir = "/var/lib/ioa-setup"

[logging]
level = "info"
format = "text"
"#;

    std::fs::write(path, default_settings)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Created settings file: {}", path.display());
    println!("Created settings file: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn locate_playbook(settings: &Settings) -> anyhow::Result<ExitCode> {
    let locator = PlaybookLocator::from_current_dir(settings.playbook_candidates.clone())?;

    match locator.locate() {
        Some(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => Err(SetupError::PlaybookNotFound {
            searched: locator.search_paths(),
        }
        .into()),
    }
}

/// Where one run writes its artifacts
enum WorkDir {
    Fixed(PathBuf),
    Temp(TempDir),
}

impl WorkDir {
    fn prepare(requested: Option<PathBuf>) -> anyhow::Result<Self> {
        match requested {
            Some(dir) => {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create work dir {}", dir.display()))?;
                Ok(WorkDir::Fixed(dir))
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("ioa-setup-")
                    .tempdir()
                    .context("Failed to create temporary work dir")?;
                Ok(WorkDir::Temp(temp))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            WorkDir::Fixed(dir) => dir,
            WorkDir::Temp(temp) => temp.path(),
        }
    }
}

/// Provision this host
async fn run_setup(cli: &Cli, settings: &Settings) -> anyhow::Result<ExitCode> {
    let anthropic_key = cli.anthropic_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
        anyhow::anyhow!(
            "anthropic API key is required (set ANTHROPIC_API_KEY in .env or use --anthropic-key)"
        )
    })?;
    let domain = cli
        .domain
        .clone()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| anyhow::anyhow!("domain is required (set DOMAIN in .env or use --domain)"))?;
    let smithery_key = cli
        .smithery_key
        .clone()
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| DEFAULT_SMITHERY_KEY.to_string());
    let keys = ApiKeys::new(anthropic_key, smithery_key);

    let mut rng = StdRng::from_entropy();
    let config = ProvisionConfig::new(
        domain,
        cli.num_agents,
        cli.registry_url.clone(),
        cli.agent_id,
        &mut rng,
    )?;

    let work_dir = WorkDir::prepare(cli.work_dir.clone().or_else(|| settings.work_dir.clone()))?;
    let search_root = std::env::current_dir()?;
    let orchestrator =
        Orchestrator::from_settings(config, settings, work_dir.path(), &search_root, cli.dry_run)?;

    let outcome = tokio::select! {
        outcome = orchestrator.setup(&keys, cli.verbose) => Some(outcome),
        Ok(()) = tokio::signal::ctrl_c() => None,
    };
    drop(work_dir);

    match outcome {
        Some(Ok(output)) => {
            if cli.dry_run {
                println!("{}", output);
            }
            println!("Setup completed successfully");
            Ok(ExitCode::SUCCESS)
        }
        Some(Err(e)) => {
            println!("Setup failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
        None => {
            warn!("Interrupted, generated artifacts removed");
            println!("Setup interrupted");
            Ok(ExitCode::from(130))
        }
    }
}
