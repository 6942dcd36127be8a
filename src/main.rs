//! wdl2cwl CLI - WDL to CWL converter

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use wdl2cwl::error::{ConvertError, FixSuggestion, Severity};
use wdl2cwl::{
    analyze, load, ConversionReport, ConvertConfig, ConvertRequest, Converter, ValidationStatus,
};

#[derive(Parser)]
#[command(name = "wdl2cwl")]
#[command(about = "Convert WDL workflows and tasks into CWL v1.2")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a .wdl file or every .wdl file under a directory
    Convert {
        /// Source file or directory
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Only convert these workflows, tasks or file stems (repeatable)
        #[arg(short = 'm', long = "only", value_name = "NAME")]
        only: Vec<String>,

        /// Run the external validator on every written document
        #[arg(long)]
        validate: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,

        /// Config file (default: ./wdl2cwl.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Summarize the workflow of a .wdl file
    Analyze {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[tokio::main]
async fn main() {
    // Report output goes to stdout; keep logs quiet unless RUST_LOG asks
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            only,
            validate,
            format,
            config,
        } => {
            let request = ConvertRequest {
                input,
                output_dir: output,
                filter: only,
                validate,
            };
            convert(request, format, config.as_deref()).await
        }
        Commands::Analyze { file, format } => analyze_file(&file, format),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

/// Returns whether every unit succeeded
async fn convert(
    request: ConvertRequest,
    format: Format,
    config: Option<&Path>,
) -> Result<bool, ConvertError> {
    let config = ConvertConfig::load(config)?.with_env()?;
    let converter = Converter::new(config);

    let cancel = converter.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = converter.convert(request).await?;
    match format {
        Format::Json => print_json(&report)?,
        Format::Text => print_report(&report),
    }
    Ok(report.is_success())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ConvertError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ConvertError::Write {
        unit: "report".to_string(),
        reason: e.to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn print_report(report: &ConversionReport) {
    for unit in &report.units {
        let symbol = if unit.success { "✓".green() } else { "✗".red() };
        let target = unit
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| unit.source.display().to_string());
        println!("  {} {} {}", symbol, unit.unit.bold(), target.dimmed());

        match &unit.validation {
            ValidationStatus::NotRequested => {}
            ValidationStatus::Passed => println!("      {}", "valid".green()),
            ValidationStatus::Failed { reason } => {
                println!("      {} {}", "invalid:".red(), reason)
            }
            ValidationStatus::Skipped { reason } => {
                println!("      {} {}", "validation skipped:".yellow(), reason)
            }
        }

        for diagnostic in &unit.diagnostics {
            let label = match diagnostic.severity {
                Severity::Error => "error".red().bold(),
                Severity::Warning => "warning".yellow(),
            };
            println!("      {} {}", label, diagnostic.message);
            if let Some(snippet) = &diagnostic.snippet {
                println!("        {}", snippet.dimmed());
            }
            if let Some(suggestion) = &diagnostic.suggestion {
                println!("        {} {}", "Fix:".yellow(), suggestion);
            }
        }
    }

    let summary = format!(
        "{} converted, {} failed",
        report.succeeded(),
        report.failed()
    );
    if report.failed() == 0 {
        println!("{} {}", "✓".green(), summary);
    } else {
        println!("{} {}", "✗".red(), summary);
    }
    if report.cancelled {
        println!("{} cancelled before all files were scheduled", "!".yellow());
    }
}

fn analyze_file(file: &Path, format: Format) -> Result<bool, ConvertError> {
    let loaded = load(file)?;
    let Some(workflow) = loaded.document.workflow.as_ref() else {
        println!(
            "{} '{}' has no workflow ({} task(s))",
            "→".cyan(),
            file.display(),
            loaded.document.tasks.len()
        );
        return Ok(true);
    };

    let summary = analyze(workflow, &loaded.namespace);
    match format {
        Format::Json => print_json(&summary)?,
        Format::Text => {
            println!("{} Workflow '{}'", "✓".green(), summary.name.bold());
            println!("  Inputs: {}", summary.inputs);
            println!("  Outputs: {}", summary.outputs);
            println!("  Calls: {}", summary.calls);
            println!("  Tasks: {}", summary.tasks.join(", "));
            println!("  Scatters: {}", summary.scatters);
            println!("  Conditionals: {}", summary.conditionals);
            println!("  Max parallelism: {}", summary.max_parallelism);
            if summary.has_cycles {
                println!("  {} call graph has a cycle", "!".yellow());
            }
        }
    }
    Ok(!summary.has_cycles)
}
