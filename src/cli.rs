use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::commands::digest_run::DigestOptions;
use crate::digest::model::RunMode;

#[derive(Parser)]
#[command(
    name = "topic-digest",
    version,
    about = "Distill incidents or knowledge-base articles about a topic from chat channels"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Print the command report as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build a dated incident report for a topic")]
    Incidents(RunArgs),
    #[command(about = "Build a categorized knowledge base for a topic")]
    Kb(RunArgs),
    #[command(about = "Check which LLM backends are available")]
    Providers {
        #[arg(long, help = "Only check this provider (cli, api, lmstudio, ollama)")]
        provider: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, help = "Topic to search for")]
    topic: String,
    #[arg(
        long,
        value_delimiter = ',',
        conflicts_with = "urls",
        help = "Channel names or ids fetched through the Slack API"
    )]
    channels: Vec<String>,
    #[arg(long, value_delimiter = ',', help = "Channel URLs read from local exports")]
    urls: Vec<String>,
    #[arg(long, help = "LLM provider (cli, api, lmstudio, ollama)")]
    provider: Option<String>,
    #[arg(long, help = "Model name for the selected provider")]
    model: Option<String>,
    #[arg(long, short = 'o', help = "Report file (incidents) or directory (kb)")]
    output: Option<PathBuf>,
    #[arg(long, help = "Days of history to fetch through the API")]
    days: Option<u64>,
    #[arg(long, help = "Ignore cached channel messages")]
    no_cache: bool,
    #[arg(long, help = "Override the message cache directory")]
    cache_dir: Option<PathBuf>,
    #[arg(long, help = "Override the scraped export directory")]
    export_dir: Option<PathBuf>,
}

impl From<RunArgs> for DigestOptions {
    fn from(args: RunArgs) -> Self {
        Self {
            topic: args.topic,
            channels: args.channels,
            urls: args.urls,
            provider: args.provider,
            model: args.model,
            output: args.output,
            days: args.days,
            no_cache: args.no_cache,
            cache_dir: args.cache_dir,
            export_dir: args.export_dir,
        }
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Commands::Incidents(args) => commands::digest_run::run(RunMode::Incidents, &args.into())?,
        Commands::Kb(args) => commands::digest_run::run(RunMode::Kb, &args.into())?,
        Commands::Providers { provider } => commands::providers::run(provider.as_deref())?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} failed", report.command);
    }
    Ok(())
}
