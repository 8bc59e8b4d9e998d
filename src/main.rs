use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drudge::orchestrator::Orchestrator;
use drudge::{config, init, report, serve, watch};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drudge")]
#[command(version, about = "Configurable static-site build pipeline")]
#[command(long_about = "\
Configurable static-site build pipeline

Stages run in a fixed order; each is enabled by its table in drudge.toml:

  pre-build:validate-js    pre-build:lint-js        pre-build:lint-sass
  build:setup              build:templates          build:sass
  build:collect-assets     build:minify-js          build:minify-html
  build:clean-css          build:minify-css         build:sitemap
  build:browserconfig      build:generate-images    build:optimize-images
  build:revision           build:clean
  post-build:validate-html post-build:report

Everything is built in build_path; dist_path is replaced only when every
stage succeeds.

Run 'drudge gen-config' to print a documented drudge.toml.")]
struct Cli {
    /// Configuration file (default: drudge.toml or drudge.json in the current directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once
    Build,
    /// Build, serve the output with live reload, rebuild on change
    Serve,
    /// Build, then rebuild on change
    Watch,
    /// Create a starter source tree and drudge.toml
    Init,
    /// Validate the configuration and list the stages it enables
    Check,
    /// Print a stock drudge.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cwd = std::env::current_dir().context("cannot determine current directory")?;

    match cli.command {
        Command::Build => {
            let orchestrator = Orchestrator::new(load(cli.config.as_deref(), &cwd)?)?;
            let summary = orchestrator.build().await?;
            report::print_summary(&summary);
        }
        Command::Serve => {
            let orchestrator = Orchestrator::new(load(cli.config.as_deref(), &cwd)?)?;
            serve::serve(orchestrator).await?;
        }
        Command::Watch => {
            let orchestrator = Orchestrator::new(load(cli.config.as_deref(), &cwd)?)?;
            let (events, _) = tokio::sync::broadcast::channel(16);
            watch::watch(orchestrator, events).await?;
        }
        Command::Init => {
            let dir = cli
                .config
                .as_deref()
                .and_then(Path::parent)
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(&cwd);
            let created = init::init(dir)?;
            for file in &created.files {
                println!("created {}", file.display());
            }
            match &created.config {
                Some(path) => println!("created {}", path.display()),
                None => println!("kept existing configuration"),
            }
        }
        Command::Check => {
            let config = load(cli.config.as_deref(), &cwd)?;
            let stages = config.stages()?;
            println!("==> Configuration is valid");
            report::print_stage_list(&stages);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `info` by default, `debug` with `-v`; `RUST_LOG` overrides both.
fn init_logging(verbose: bool) {
    let default = if verbose { "drudge=debug" } else { "drudge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();
}

fn load(path: Option<&Path>, cwd: &Path) -> Result<config::BuildConfig> {
    let config = config::load_config(path, cwd).with_context(|| match path {
        Some(p) => format!("failed to load {}", p.display()),
        None => format!("failed to load configuration from {}", cwd.display()),
    })?;
    Ok(config)
}
