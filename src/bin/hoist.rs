// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use hoist::{
    config::{HoistConfig, SyncSettings},
    deploy::{
        executor::{DryRunExecutor, LocalShellExecutor, OpenSshExecutor, RemoteExecutor},
        id::{DeploymentId, IdGenerator, RandomIds},
        Deployer, Phase, Rollout,
    },
    path::locate_config,
    sync::ResourceSync,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "hoist [options] <hoist-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config_path = locate_config(self.config.as_deref());
        match self.command {
            Command::Init(opts) => run_init(config_path, opts),
            Command::Sync(opts) => run_sync(load(config_path)?, opts),
            Command::Plan(opts) => run_plan(load(config_path)?, opts),
            Command::Deploy(opts) => run_deploy(load(config_path)?, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write default configuration file.
    #[command(override_usage = "hoist init [options]")]
    Init(InitOptions),

    /// Mirror client build output into server static resources.
    #[command(override_usage = "hoist sync [options]")]
    Sync(SyncOptions),

    /// Show what a rollout would do without doing it.
    #[command(override_usage = "hoist plan [options]")]
    Plan(TargetOptions),

    /// Roll packaged server artifact out to remote host.
    #[command(override_usage = "hoist deploy [options]")]
    Deploy(DeployOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Domain name of remote host.
    #[arg(short, long, value_name = "domain")]
    pub domain: Option<String>,

    /// Path to packaged server artifact.
    #[arg(short, long, value_name = "path")]
    pub artifact: Option<PathBuf>,

    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Client build output directory.
    #[arg(short, long, value_name = "path")]
    pub source: Option<PathBuf>,

    /// Server static-resources root.
    #[arg(short, long, value_name = "path")]
    pub destination: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TargetOptions {
    /// Path to packaged server artifact.
    #[arg(short, long, value_name = "path")]
    pub artifact: Option<PathBuf>,

    /// Domain name of remote host.
    #[arg(short, long, value_name = "domain")]
    pub domain: Option<String>,

    /// Use fixed deployment identifier instead of a random one.
    #[arg(long, value_name = "id")]
    pub id: Option<DeploymentId>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    #[command(flatten)]
    pub target: TargetOptions,

    /// Log remote side effects without performing them.
    #[arg(long, group = "executor")]
    pub dry_run: bool,

    /// Treat local directory as remote home instead of connecting.
    #[arg(long, group = "executor", value_name = "path")]
    pub local_root: Option<PathBuf>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load(path: PathBuf) -> Result<HoistConfig> {
    HoistConfig::load(&path).with_context(|| format!("cannot load {:?}", path.display()))
}

fn run_init(path: PathBuf, opts: InitOptions) -> Result<()> {
    if path.exists() && !opts.force {
        bail!("{:?} already exists, pass --force to overwrite", path.display());
    }

    let mut config = HoistConfig {
        sync: Some(SyncSettings {
            source: "../client/build".into(),
            destination: "build/resources/main".into(),
            subpath: "static".into(),
            exclude: None,
        }),
        ..HoistConfig::default()
    };
    config.deploy.artifact = Some(
        opts.artifact
            .unwrap_or_else(|| PathBuf::from("build/libs/server-all.jar")),
    );
    config.deploy.domain = opts.domain;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, config.to_string())?;
    info!("wrote {:?}", path.display());

    Ok(())
}

fn run_sync(config: HoistConfig, opts: SyncOptions) -> Result<()> {
    let mut settings = config.sync_settings()?.clone();
    if let Some(source) = opts.source {
        settings.source = source;
    }
    if let Some(destination) = opts.destination {
        settings.destination = destination;
    }

    let report = ResourceSync::from_settings(&settings)?.run()?;
    if report.is_noop() {
        info!("static resources already up to date");
    }

    Ok(())
}

fn run_plan(config: HoistConfig, opts: TargetOptions) -> Result<()> {
    let artifact = artifact_path(&config, &opts)?;
    let rollout = match opts.id {
        Some(id) => plan(DryRunExecutor, fixed_id(id), &config, artifact)?,
        None => plan(DryRunExecutor, RandomIds, &config, artifact)?,
    };

    let target = match config.deploy.remote_host(opts.domain.as_deref()) {
        Ok(host) => host.target(),
        Err(error) => {
            warn!("{error}");
            format!("{}@<domain>", config.deploy.user)
        }
    };

    println!("deployment id:   {}", rollout.id);
    println!("stage:           {}", rollout.staged_artifact.display());
    println!(
        "transfer:        {} -> {target}:{}/",
        rollout.local_dir.display(),
        rollout.remote_base
    );
    println!("cleanup session: {}", rollout.cleanup);
    println!("launch session:  {}", rollout.launch);
    println!("remote log:      {}", rollout.log_file);

    Ok(())
}

fn run_deploy(config: HoistConfig, opts: DeployOptions) -> Result<()> {
    let artifact = artifact_path(&config, &opts.target)?;
    let executor: Box<dyn RemoteExecutor> = if opts.dry_run {
        Box::new(DryRunExecutor)
    } else if let Some(root) = opts.local_root.clone() {
        Box::new(LocalShellExecutor::new(root))
    } else {
        let host = config.deploy.remote_host(opts.target.domain.as_deref())?;
        if !opts.yes && !confirm(&host.target())? {
            warn!("rollout cancelled");
            return Ok(());
        }
        Box::new(OpenSshExecutor::new(host))
    };

    let layout = config.deploy.layout();
    match opts.target.id {
        Some(id) => roll_out(Deployer::with_ids(executor, fixed_id(id), layout), artifact),
        None => roll_out(Deployer::new(executor, layout), artifact),
    }
}

fn plan<E: RemoteExecutor, G: IdGenerator>(
    executor: E,
    ids: G,
    config: &HoistConfig,
    artifact: PathBuf,
) -> Result<Rollout> {
    Ok(Deployer::with_ids(executor, ids, config.deploy.layout()).plan(artifact)?)
}

fn roll_out<E: RemoteExecutor, G: IdGenerator>(
    mut deployer: Deployer<E, G>,
    artifact: PathBuf,
) -> Result<()> {
    let rollout = deployer.plan(&artifact)?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message(format!("staging deployment {}", rollout.id));

    let result = deployer.execute(&rollout, |phase| {
        let next = match phase {
            Phase::Idle => "staging",
            Phase::Staged => "transferring",
            Phase::Transferred => "cleaning up remote host",
            Phase::RemoteCleaned => "launching server",
            Phase::Started | Phase::Done => "finishing",
        };
        bar.set_message(format!("{next} deployment {}", rollout.id));
    });

    match result {
        Ok(()) => {
            bar.finish_with_message(format!(
                "deployment {} running, log at {}",
                rollout.id, rollout.log_file
            ));
            Ok(())
        }
        Err(error) => {
            bar.abandon_with_message(format!(
                "deployment {} stopped after {} phase",
                rollout.id,
                error.phase()
            ));
            Err(error.into())
        }
    }
}

fn artifact_path(config: &HoistConfig, opts: &TargetOptions) -> Result<PathBuf> {
    opts.artifact
        .clone()
        .or_else(|| config.deploy.artifact.clone())
        .ok_or_else(|| anyhow!("no artifact configured, set deploy.artifact or pass --artifact"))
}

fn fixed_id(id: DeploymentId) -> impl FnMut() -> u64 {
    move || id.get()
}

fn confirm(target: &str) -> Result<bool> {
    Ok(Confirm::new(format!("Replace running server on {target}?").as_str())
        .with_default(false)
        .prompt()?)
}
