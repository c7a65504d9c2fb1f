//! `schorle` - build and render pages from the current project.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use schorle_bridge::{
    BuildOrchestrator, CommandBundler, Config, ProcessRenderEngine, RequestContext, SsrRenderer,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "schorle", version)]
#[command(about = "Build and server-render file-routed pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every page under app/pages
    Build,
    /// Render one built page to stdout
    Render {
        /// Page identity, e.g. "settings/Profile"
        page: String,
        /// Props handle, as the backend would send in x-schorle-props-id
        #[arg(long)]
        props_id: Option<String>,
        /// Extra request header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))
}

fn main() -> ExitCode {
    // stdout carries rendered markup; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let project_root = std::env::current_dir().context("cannot determine project root")?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    match cli.command {
        Commands::Build => {
            let config = Config::for_build(&project_root).context("invalid build configuration")?;
            let bundler = Arc::new(CommandBundler::new(config.bundler.clone()));
            let orchestrator = BuildOrchestrator::new(config, bundler);

            let result = runtime
                .block_on(orchestrator.build_all())
                .context("build aborted")?;

            for failure in result.failures() {
                if let Err(e) = &failure.outcome {
                    eprintln!("✗ {}: {e}", failure.page.identity);
                }
            }
            for problem in &result.discovery_errors {
                eprintln!("! {problem}");
            }
            println!("{} of {} page(s) built", result.succeeded(), result.pages.len());

            Ok(if result.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Render {
            page,
            props_id,
            headers,
        } => {
            let config =
                Config::for_render(&project_root).context("invalid render configuration")?;
            let engine = Arc::new(ProcessRenderEngine::from_config(&config));
            let renderer =
                SsrRenderer::new(&config, engine).context("invalid render configuration")?;

            let mut ctx = RequestContext::new();
            for (name, value) in headers {
                ctx = ctx.with_header(&name, value);
            }
            if let Some(handle) = props_id {
                ctx = ctx.with_header(schorle_bridge::constants::PROPS_HANDLE_HEADER, handle);
            }

            let outcome = runtime.block_on(async {
                let mut stdout = tokio::io::stdout();
                renderer.render(&page, &ctx, &mut stdout).await
            });

            match outcome {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(e) if e.is_not_found() => {
                    eprintln!("not found: {e}");
                    Ok(ExitCode::from(2))
                }
                Err(e) => Err(e).with_context(|| format!("failed to render page '{page}'")),
            }
        }
    }
}
