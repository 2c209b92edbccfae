mod cli;

use mediarun::{config, render};
use mediarun_av::{Preset, PresetOptions, ProcessTool};
use mediarun_jobs::{scheduler, EventKind, JobId, JobRequest, JobService};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::StreamExt;

struct RunArgs {
    preset: String,
    input: String,
    output: PathBuf,
    options: PresetOptions,
    sse: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediarun=debug,mediarun_av=debug,mediarun_jobs=debug".to_string()
        } else {
            "mediarun=info,mediarun_av=warn,mediarun_jobs=warn".to_string()
        }
    });

    // stdout carries the event stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tool(cli.config.as_deref()))
        }
        Commands::Run {
            preset,
            input,
            output,
            crf,
            x264_preset,
            bitrate,
            at,
            sse,
        } => {
            let args = RunArgs {
                preset,
                input,
                output,
                options: PresetOptions {
                    crf,
                    preset: x264_preset,
                    audio_bitrate: bitrate,
                    at_seconds: at,
                },
                sse,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_preset(args, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediarun {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn check_tool(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let tool = ProcessTool::new(config.tool);

    let ready = tool
        .ensure_ready()
        .await
        .with_context(|| format!("{} is not ready", tool.name()))?;
    println!("✓ {} {} - {}", tool.name(), ready.version, ready.path.display());
    Ok(())
}

async fn run_preset(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let preset: Preset = args.preset.parse()?;

    let display_name = args
        .output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| preset.default_output_name().to_string());

    let service = JobService::new(Arc::new(ProcessTool::new(config.tool)), config.jobs);
    service
        .ensure_tool()
        .await
        .with_context(|| format!("{} is not ready", service.tool().name()))?;

    let artifact_path = service
        .output_path(&display_name)
        .context("Failed to reserve output file")?;

    let command = preset.build(
        &args.input,
        &artifact_path.to_string_lossy(),
        &args.options,
    );
    let id = service.start_job(JobRequest {
        command,
        input: args.input.clone(),
        output: artifact_path,
        display_name,
    });
    tracing::info!(job_id = %id, preset = %preset, input = %args.input, "Started");

    let mut events = service.subscribe(&id)?;
    let mut failed = false;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if args.sse {
                    print!("{}", event.to_sse_frame());
                } else {
                    println!("{}", render::human_line(&event));
                }
                failed |= event.kind == EventKind::Error;
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::warn!(job_id = %id, "Interrupted, stopping job");
                interrupted = true;
                service.cancel(&id)?;
            }
        }
    }

    let result = if failed {
        Err(anyhow::anyhow!("job {id} failed"))
    } else {
        deliver(&service, &id, &args.output)
    };

    // The reserved artifact goes with the job, whatever the outcome.
    scheduler::evict(service.store(), &id);
    service.shutdown();
    result
}

/// Copy a finished job's artifact to `output`.
fn deliver(service: &JobService, id: &JobId, output: &Path) -> Result<()> {
    let artifact = service.artifact(id)?;
    std::fs::copy(&artifact.path, output).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            artifact.path.display(),
            output.display()
        )
    })?;
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            let warnings = config::validate_config(&config)?;
            println!("✓ Configuration is valid");
            println!("  Tool: {}", config.tool.program.display());
            match config.tool.run_timeout() {
                Some(limit) => println!("  Run timeout: {}s", limit.as_secs()),
                None => println!("  Run timeout: none"),
            }
            println!("  Retention: {}s", config.jobs.retention_secs);
            println!("  Subscriber buffer: {}", config.jobs.subscriber_buffer);
            for warning in warnings {
                println!("  ! {warning}");
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Tool: {}", config.tool.program.display());
            println!("  Retention: {}s", config.jobs.retention_secs);
        }
    }

    Ok(())
}
