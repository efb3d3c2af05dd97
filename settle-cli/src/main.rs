use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::debug;

use settle_core::{
    Cancellation, ControlPlane, FinalState, LifecycleOptions, NotFoundPolicy, OperationHandle,
    Reconciler, ResourceRef, StateSets, WaitConfig,
};
use settle_provider_http::{HttpControlPlane, ProviderConfig, TokenCache};

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG_FILE: &str = "settle.json";

#[derive(Parser)]
#[command(name = "settle")]
#[command(about = "Drive asynchronous control-plane resources to a settled state", long_about = None)]
struct Cli {
    /// Provider configuration file (JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log requests and poll iterations
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current status of a resource
    Get {
        resource_type: String,
        id: String,
    },
    /// List every resource of a type
    List {
        resource_type: String,

        /// Page size requested from the server
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Give up after this many pages
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        resource_type: String,
        id: String,

        /// Status reported while the deletion is in progress
        #[arg(long)]
        pending: Vec<String>,

        /// Seconds to wait for the resource to disappear
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Wait until a resource reaches a target status
    Wait {
        resource_type: String,
        id: String,

        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Wait until an asynchronous job finishes
    Job {
        resource_type: String,
        job_id: String,

        /// Resource the job belongs to, for job paths that need it
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct WaitArgs {
    /// Status that ends the wait successfully
    #[arg(long, required = true)]
    target: Vec<String>,

    /// Status that keeps the wait going (any status when omitted)
    #[arg(long)]
    pending: Vec<String>,

    /// Status that aborts the wait
    #[arg(long)]
    failure: Vec<String>,

    /// Seconds before giving up
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Seconds between reads; 0 backs off exponentially
    #[arg(long, default_value_t = 10)]
    interval: u64,

    /// Seconds before the first read
    #[arg(long, default_value_t = 0)]
    delay: u64,

    /// Consecutive target reads required
    #[arg(long, default_value_t = 1)]
    confirm: u32,

    /// Treat up to N "not found" reads as still pending
    #[arg(long)]
    tolerate_missing: Option<u32>,
}

impl WaitArgs {
    fn states(&self) -> StateSets {
        StateSets::new(self.pending.clone(), self.target.clone()).with_failure(self.failure.clone())
    }

    fn to_config(&self, states: StateSets) -> WaitConfig {
        let not_found = match self.tolerate_missing {
            Some(n) => NotFoundPolicy::Tolerate(n),
            None => NotFoundPolicy::Fail,
        };
        WaitConfig::new(states)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_poll_interval(Duration::from_secs(self.interval))
            .with_initial_delay(Duration::from_secs(self.delay))
            .with_continuous_target_occurrence(self.confirm)
            .with_not_found(not_found)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping...".yellow());
            trigger.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Load the config file (explicit, or `settle.json` when present), apply
/// environment overrides and validate
fn load_config(path: Option<&Path>) -> Result<ProviderConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()));

    let config = match &path {
        Some(path) => ProviderConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .apply_env(),
        None => ProviderConfig::from_env(),
    };

    config.validate()?;
    debug!(
        "Using endpoint {} with {} resource kinds",
        config.endpoint,
        config.resources.len()
    );
    Ok(config)
}

async fn run(cli: Cli, cancel: Cancellation) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let tokens = Arc::new(TokenCache::new(config.token_ttl()));
    let plane = HttpControlPlane::from_config(&config, tokens)?.with_cancellation(cancel.clone());
    let reconciler = Reconciler::new(plane).with_cancellation(cancel);

    match cli.command {
        Commands::Get { resource_type, id } => run_get(&reconciler, resource_type, id).await,
        Commands::List {
            resource_type,
            limit,
            max_pages,
        } => run_list(&reconciler, &resource_type, limit, max_pages).await,
        Commands::Delete {
            resource_type,
            id,
            pending,
            timeout,
        } => run_delete(&reconciler, resource_type, id, pending, timeout).await,
        Commands::Wait {
            resource_type,
            id,
            wait,
        } => run_wait(&reconciler, resource_type, id, &wait).await,
        Commands::Job {
            resource_type,
            job_id,
            id,
            wait,
        } => run_job(&reconciler, resource_type, job_id, id, &wait).await,
    }
}

async fn run_get(
    reconciler: &Reconciler<HttpControlPlane>,
    resource_type: String,
    id: String,
) -> Result<()> {
    let resource = ResourceRef::new(resource_type, id);
    match reconciler.read(&resource, &LifecycleOptions::new()).await? {
        Some(observation) => {
            println!("{} {}", resource.to_string().bold(), observation.status.cyan());
            println!("{}", serde_json::to_string_pretty(&observation.payload)?);
        }
        None => println!("{} {}", resource.to_string().bold(), "gone".yellow()),
    }
    Ok(())
}

async fn run_list(
    reconciler: &Reconciler<HttpControlPlane>,
    resource_type: &str,
    limit: usize,
    max_pages: Option<usize>,
) -> Result<()> {
    let items = reconciler.list(resource_type, limit, max_pages).await?;
    for item in &items {
        println!("{}", serde_json::to_string(item)?);
    }
    eprintln!("{}", format!("{} {} listed.", items.len(), resource_type).green());
    Ok(())
}

async fn run_delete(
    reconciler: &Reconciler<HttpControlPlane>,
    resource_type: String,
    id: String,
    pending: Vec<String>,
    timeout: u64,
) -> Result<()> {
    let resource = ResourceRef::new(resource_type, id);
    let options = LifecycleOptions::new().with_resource_wait(
        WaitConfig::for_deletion(pending).with_timeout(Duration::from_secs(timeout)),
    );
    reconciler.delete(&resource, &options).await?;
    println!("{} {} deleted", "✓".green(), resource);
    Ok(())
}

async fn run_wait(
    reconciler: &Reconciler<HttpControlPlane>,
    resource_type: String,
    id: String,
    wait: &WaitArgs,
) -> Result<()> {
    let states = reconciler.plane().states_for(&resource_type, wait.states());
    let resource = ResourceRef::new(resource_type, id);
    let config = wait
        .to_config(states)
        .with_not_found_rules(reconciler.plane().not_found_rules(&resource.resource_type));
    let settled = reconciler.await_resource(&resource, &config).await?;
    print_settled(&resource.to_string(), &settled);
    Ok(())
}

async fn run_job(
    reconciler: &Reconciler<HttpControlPlane>,
    resource_type: String,
    job_id: String,
    id: Option<String>,
    wait: &WaitArgs,
) -> Result<()> {
    let resource = ResourceRef::new(resource_type, id.unwrap_or_default());
    let handle = OperationHandle::new(job_id, resource);
    let label = format!("job {}", handle.id);
    let settled = reconciler
        .await_operation(handle, &wait.to_config(wait.states()))
        .await?;
    print_settled(&label, &settled);
    Ok(())
}

fn print_settled(label: &str, settled: &FinalState) {
    println!(
        "{} {} reached {} after {} reads ({:.1}s)",
        "✓".green(),
        label,
        settled.status().unwrap_or("absence").bold(),
        settled.reads,
        settled.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_wait() {
        let cli = Cli::try_parse_from([
            "settle",
            "wait",
            "vpn_gateway",
            "gw-1",
            "--target",
            "ACTIVE",
            "--pending",
            "PENDING_CREATE",
            "--failure",
            "ERROR",
            "--interval",
            "0",
            "--confirm",
            "2",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Wait {
            resource_type,
            id,
            wait,
        } = cli.command
        else {
            panic!("expected wait");
        };
        assert_eq!(resource_type, "vpn_gateway");
        assert_eq!(id, "gw-1");

        let config = wait.to_config(wait.states());
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.continuous_target_occurrence, 2);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.not_found, NotFoundPolicy::Fail);
        assert!(config.states.is_failure("ERROR"));
    }

    #[test]
    fn test_wait_requires_target() {
        assert!(Cli::try_parse_from(["settle", "wait", "vpn_gateway", "gw-1"]).is_err());
    }

    #[test]
    fn test_parse_job_with_tolerance() {
        let cli = Cli::try_parse_from([
            "settle",
            "--config",
            "prod.json",
            "job",
            "dcs_instance",
            "ff80",
            "--target",
            "SUCCESS",
            "--tolerate-missing",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("prod.json")));
        let Commands::Job { id, wait, .. } = cli.command else {
            panic!("expected job");
        };
        assert!(id.is_none());
        assert_eq!(
            wait.to_config(wait.states()).not_found,
            NotFoundPolicy::Tolerate(3)
        );
    }

    #[test]
    fn test_parse_list_defaults() {
        let cli = Cli::try_parse_from(["settle", "list", "volume"]).unwrap();
        let Commands::List {
            limit, max_pages, ..
        } = cli.command
        else {
            panic!("expected list");
        };
        assert_eq!(limit, 100);
        assert!(max_pages.is_none());
    }

    #[test]
    fn test_parse_delete_pending() {
        let cli = Cli::try_parse_from([
            "settle", "delete", "volume", "v-1", "--pending", "deleting", "--timeout", "60",
        ])
        .unwrap();
        let Commands::Delete {
            pending, timeout, ..
        } = cli.command
        else {
            panic!("expected delete");
        };
        assert_eq!(pending, vec!["deleting"]);
        assert_eq!(timeout, 60);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"endpoint": "https://vpn.example.com", "resources": [
                {"name": "vpn_gateway", "collection_path": "v5/{project_id}/vpn-gateways"}
            ]}"#,
        )
        .unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert!(config.resource("vpn_gateway").is_some());
    }

    #[test]
    fn test_load_config_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.json"));
    }
}
