//! taskfs - issue trackers as a filesystem.
//!
//! Mounts a tree of tracker services, tasks and comments. Services are added
//! at startup from the configuration file, or at runtime by writing
//! `add <kind> <token> [<baseURL>]` to the root `ctl` file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use taskfs_fs::{MountConfig, Registry, RootDir};

/// Mount issue trackers as a filesystem.
#[derive(Parser)]
#[command(name = "taskfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mount point path
    mount_point: Option<PathBuf>,

    /// Turn on debug output
    #[arg(short, long)]
    debug: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.taskfs/config.toml")]
    config: PathBuf,
}

/// A service added before mounting.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceEntry {
    kind: String,
    token: String,
    base_url: Option<String>,
}

impl ServiceEntry {
    /// Arguments for the `add` command.
    fn args(&self) -> Vec<String> {
        let mut args = vec![self.kind.clone(), self.token.clone()];
        args.extend(self.base_url.clone());
        args
    }
}

/// Binary configuration.
#[derive(Debug, Clone, Default)]
struct Config {
    mount: MountConfig,
    services: Vec<ServiceEntry>,
}

/// Load configuration from TOML file.
fn load_config(path: &Path) -> Result<Config> {
    let path = expand_tilde(path);

    if !path.exists() {
        info!("No config file found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Result<Config> {
    let toml: toml::Value = content.parse().context("Failed to parse config file")?;

    let mut config = Config::default();

    // Parse [mount] section
    if let Some(mount) = toml.get("mount") {
        if let Some(mount_point) = mount.get("mount_point").and_then(|v| v.as_str()) {
            config.mount.mount_point = expand_tilde(Path::new(mount_point));
        }
        if let Some(allow_other) = mount.get("allow_other").and_then(|v| v.as_bool()) {
            config.mount.allow_other = allow_other;
        }
        if let Some(auto_unmount) = mount.get("auto_unmount").and_then(|v| v.as_bool()) {
            config.mount.auto_unmount = auto_unmount;
        }
        if let Some(ttl_ms) = mount.get("ttl_ms").and_then(|v| v.as_integer()) {
            let ttl = Duration::from_millis(u64::try_from(ttl_ms).context("Invalid ttl_ms")?);
            config.mount.attr_ttl = ttl;
            config.mount.entry_ttl = ttl;
        }
        if let Some(secs) = mount.get("request_timeout_secs").and_then(|v| v.as_integer()) {
            let secs = u64::try_from(secs).context("Invalid request_timeout_secs")?;
            config.mount.request_timeout = Duration::from_secs(secs);
        }
    }

    // Parse [[service]] tables
    if let Some(services) = toml.get("service").and_then(|v| v.as_array()) {
        for (i, service) in services.iter().enumerate() {
            let kind = service
                .get("kind")
                .and_then(|v| v.as_str())
                .with_context(|| format!("service #{} has no kind", i + 1))?;
            let token = service.get("token").and_then(|v| v.as_str()).unwrap_or_default();
            let base_url = service
                .get("base_url")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from);
            config.services.push(ServiceEntry {
                kind: kind.to_string(),
                token: token.to_string(),
                base_url,
            });
        }
    }

    Ok(config)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn log_level(verbose: u8, debug: bool) -> Level {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    if debug && level < Level::DEBUG {
        Level::DEBUG
    } else {
        level
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose, cli.debug))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    // Load configuration
    let mut config = load_config(&cli.config)?;
    if let Some(mount_point) = cli.mount_point {
        config.mount.mount_point = expand_tilde(&mount_point);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let registry = Arc::new(Registry::new());
    taskfs_backends::register_builtin(&registry).context("Failed to register backends")?;
    let root = RootDir::new(registry);

    for service in &config.services {
        if let Err(e) = runtime.block_on(root.add_service(&service.args())) {
            warn!(kind = %service.kind, error = %e, "Skipping service");
        }
    }

    info!(
        mount_point = %config.mount.mount_point.display(),
        services = root.service_names().len(),
        "Starting taskfs"
    );
    let mount_point = config.mount.mount_point.clone();
    taskfs_fs::mount(root.into_node(), runtime.handle().clone(), config.mount)
        .with_context(|| format!("Failed to mount {}", mount_point.display()))?;

    Ok(())
}
