//! nestwalk command-line front end
//!
//! - `nestwalk run`: compile a pipeline and apply it to a directory or file
//! - `nestwalk check`: compile a pipeline and print its action tree

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use nestwalk::{
    Action, AssociatedInfo, ExecutionContext, ManagerOptions, PipelineConfig, ProcessorManager,
    ProcessorRegistry, Properties, ResolutionMode,
};
use nestwalk_logging::{init_logging, LogConfig};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "nestwalk",
    version,
    about = "Walk nested containers with a configured processor pipeline"
)]
struct Cli {
    /// Mirror info logs on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a pipeline to a directory tree or a single file
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the (possibly rewritten) structure here; file inputs only
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Directory or file to process
        input: PathBuf,
    },

    /// Compile a pipeline and print its action tree
    Check {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Placeholder values (TOML table of scalars)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Placeholder value, overriding the properties file
    #[arg(short = 'D', long = "property", value_name = "KEY=VALUE")]
    property: Vec<String>,

    /// Resolve placeholders in nested mode (`${outer-${inner}}`)
    #[arg(long)]
    nested: bool,

    /// Directory for extracted nested containers
    #[arg(long, env = "NESTWALK_TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "nestwalk",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            pipeline,
            output,
            json,
            input,
        } => cmd_run(&pipeline, &input, output.as_deref(), json),
        Commands::Check { pipeline } => cmd_check(&pipeline),
    }
}

fn build_manager(args: &PipelineArgs) -> Result<ProcessorManager> {
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("Failed to load pipeline {}", args.config.display()))?;

    let mut properties = match &args.properties {
        Some(path) => Properties::load(path)
            .with_context(|| format!("Failed to load properties {}", path.display()))?,
        None => Properties::new(),
    };
    for pair in &args.property {
        let (key, value) = Properties::parse_pair(pair)?;
        properties.insert(key, value);
    }

    let options = ManagerOptions {
        resolution: if args.nested {
            ResolutionMode::Nested
        } else {
            ResolutionMode::NonNested
        },
        temp_dir: args.temp_dir.clone(),
    };

    let mut manager = ProcessorManager::new(
        Arc::new(ProcessorRegistry::with_builtins()),
        properties,
        config.pipeline,
    )
    .with_options(options);
    manager
        .prepare()
        .with_context(|| format!("Failed to compile pipeline {}", args.config.display()))?;
    Ok(manager)
}

fn cmd_run(args: &PipelineArgs, input: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let manager = build_manager(args)?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let mut ctx = ExecutionContext::new(name.as_str());
    let started_at = Utc::now();

    if input.is_dir() {
        if output.is_some() {
            bail!("--output is only supported for file inputs");
        }
        manager
            .apply_path(&name, input, &mut ctx)
            .with_context(|| format!("Failed to process {}", input.display()))?;
    } else {
        let file = File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        let mut reader = BufReader::new(file);
        match output {
            Some(output_path) => {
                let out = File::create(output_path)
                    .with_context(|| format!("Failed to create {}", output_path.display()))?;
                let mut writer = BufWriter::new(out);
                manager
                    .apply(&name, &mut reader, Some(&mut writer), &mut ctx)
                    .with_context(|| format!("Failed to process {}", input.display()))?;
                writer.flush()?;
            }
            None => manager
                .apply(&name, &mut reader, None, &mut ctx)
                .with_context(|| format!("Failed to process {}", input.display()))?,
        }
    }

    if let Err(err) = ctx.verify_balanced() {
        warn!(error = %err, "Context stack not balanced after run");
    }

    let records = ctx.associated_information();
    info!(input = %input.display(), records = records.len(), "Run complete");

    if json {
        let report = serde_json::json!({
            "input": input.display().to_string(),
            "started_at": started_at.to_rfc3339(),
            "finished_at": Utc::now().to_rfc3339(),
            "records": records,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_records(&records);
    }
    Ok(())
}

fn print_records(records: &[AssociatedInfo]) {
    if records.is_empty() {
        println!("No records.");
        return;
    }
    let path_width = records.iter().map(|r| r.path.len()).max().unwrap_or(0);
    for record in records {
        let properties: Vec<String> = record
            .properties
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        println!(
            "{:<path_width$}  [{}]  {}",
            record.path,
            record.claimant,
            properties.join(" "),
            path_width = path_width
        );
    }
    println!();
    println!("{} record(s)", records.len());
}

fn cmd_check(args: &PipelineArgs) -> Result<()> {
    let manager = build_manager(args)?;
    let actions = manager.actions()?;
    println!("Pipeline {} compiled:", args.config.display());
    print_actions(actions, 1);
    Ok(())
}

fn print_actions(actions: &[Action], depth: usize) {
    for action in actions {
        let processor = action.processor();
        let selection = if action.selection().accepts_everything() {
            "all entries"
        } else {
            "selected entries"
        };
        println!(
            "{:indent$}{} ({}, {}) op={} on {}",
            "",
            action.alias(),
            processor.implementation(),
            processor.capability().kind(),
            action.operation(),
            selection,
            indent = depth * 2
        );
        if processor.configuration().is_some() {
            println!("{:indent$}(opaque configuration)", "", indent = (depth + 1) * 2);
        }
        print_actions(processor.actions(), depth + 1);
    }
}
