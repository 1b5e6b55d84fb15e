//! qreport - weekly quality report pipeline
//!
//! Builds a quality report for one component and week from exported data,
//! git history and an LLM-written narrative.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use qreport::config::{ConfigLocations, ConfigValidator, PROJECT_CONFIG_FILE};
use qreport::prompt::ReportType;
use qreport::{
    ConflictPolicy, Pipeline, QualityError, ReportIndex, RunRequest, Settings, SourceMode,
};

#[derive(Parser)]
#[command(name = "qreport")]
#[command(version)]
#[command(about = "Weekly quality report generation from exported quality signals", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Explicit configuration file (highest file layer)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where PRBs and bugs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    /// Exported files in the week folder
    Local,
    /// The remote reports API
    Api,
}

impl From<SourceArg> for SourceMode {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Local => SourceMode::Local,
            SourceArg::Api => SourceMode::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConflictArg {
    /// Write a .v2, .v3, ... sibling
    Version,
    /// Refuse to write
    Fail,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Version => ConflictPolicy::Version,
            ConflictArg::Fail => ConflictPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportTypeArg {
    /// Every section in full
    Comprehensive,
    /// Short sections
    Compact,
}

impl From<ReportTypeArg> for ReportType {
    fn from(arg: ReportTypeArg) -> Self {
        match arg {
            ReportTypeArg::Comprehensive => ReportType::Comprehensive,
            ReportTypeArg::Compact => ReportType::Compact,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
struct TargetArgs {
    /// Week id (folder under the weeks directory), e.g. cw38
    #[arg(short, long)]
    week: String,

    /// Component name (folder under the week)
    #[arg(short, long)]
    component: String,

    /// Input source
    #[arg(long, value_enum, default_value = "local")]
    source: SourceArg,

    /// Reference date for the reporting window (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    report_end_date: Option<NaiveDate>,

    /// Report detail level (defaults to `prompt.report_type`)
    #[arg(long, value_enum)]
    report_type: Option<ReportTypeArg>,
}

impl TargetArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(report_type) = self.report_type {
            settings.prompt.report_type = report_type.into();
        }
    }

    fn request(&self) -> RunRequest {
        RunRequest::new(&self.week, &self.component)
            .with_mode(self.source.into())
            .with_report_end_date(self.report_end_date)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the report: collect, prompt, call the LLM, write artifacts
    Generate {
        #[command(flatten)]
        target: TargetArgs,

        /// Git repository to analyze
        #[arg(long, value_name = "PATH")]
        git_repo: Option<PathBuf>,

        /// Skip git analysis
        #[arg(long)]
        no_git: bool,

        /// Also write a timestamped archive copy of the data
        #[arg(long)]
        archive: bool,

        /// What to do when a report already exists for today
        #[arg(long, value_enum, default_value = "version")]
        on_conflict: ConflictArg,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Prompt size budget in characters
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Build the prompt without calling the LLM
    Prompt {
        #[command(flatten)]
        target: TargetArgs,

        /// Write the prompt to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List persisted reports, newest first
    List {
        /// Component name
        #[arg(short, long)]
        component: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    Validate,

    /// Show configuration file paths
    Paths,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = report_error(&err);
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "qreport=debug,info" } else { "qreport=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Print an error with its remediation hint; returns the exit code.
fn report_error(err: &anyhow::Error) -> i32 {
    eprintln!("{} {}", "Error:".red().bold(), err);
    match err.downcast_ref::<QualityError>() {
        Some(quality) => {
            if let Some(hint) = quality.remediation() {
                eprintln!("{} {}", "Hint:".yellow().bold(), hint);
            }
            quality.exit_code()
        }
        None => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project = cli.project.canonicalize().unwrap_or_else(|_| cli.project.clone());
    if !project.is_dir() {
        anyhow::bail!("Project directory does not exist: {}", project.display());
    }

    match cli.command {
        Commands::Config { action } => config_command(&project, cli.config.as_deref(), action),
        Commands::List { component, json } => {
            let (settings, _) = Settings::load(&project, cli.config.as_deref())?;
            list_command(&settings, &component, json)
        }
        Commands::Prompt { target, output } => {
            let settings =
                load_validated(&project, cli.config.as_deref(), |settings| target.apply(settings))?;
            prompt_command(settings, &target, output.as_deref()).await
        }
        Commands::Generate {
            target,
            git_repo,
            no_git,
            archive,
            on_conflict,
            model,
            max_chars,
        } => {
            let settings = load_validated(&project, cli.config.as_deref(), |settings| {
                target.apply(settings);
                if let Some(repo) = git_repo {
                    settings.git.repo_path = Some(repo);
                }
                if no_git {
                    settings.git.enabled = false;
                }
                if let Some(model) = model {
                    settings.llm.model = model;
                }
                if let Some(max_chars) = max_chars {
                    settings.prompt.max_chars = max_chars;
                }
            })?;
            let request = target
                .request()
                .with_archive(archive)
                .with_conflict_policy(on_conflict.into());
            generate_command(settings, &request).await
        }
    }
}

/// Load settings, apply CLI overrides and refuse to continue on errors.
fn load_validated(
    project: &Path,
    explicit: Option<&Path>,
    overrides: impl FnOnce(&mut Settings),
) -> anyhow::Result<Settings> {
    let (mut settings, chain) = Settings::load(project, explicit)?;
    overrides(&mut settings);

    let report = ConfigValidator::new(&settings)
        .with_chain(chain)
        .with_environment_check(false)
        .validate();
    for warning in &report.warnings {
        tracing::warn!("Config: {}", warning);
    }
    if let Some(err) = report.into_error() {
        return Err(err.into());
    }
    Ok(settings)
}

async fn generate_command(settings: Settings, request: &RunRequest) -> anyhow::Result<i32> {
    let pipeline = Pipeline::new(settings);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!(
        "Generating {} report for {}...",
        request.week, request.component
    ));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = pipeline.run(request).await;
    spinner.finish_and_clear();
    let outcome = result?;

    println!("{} Report generated", "OK".green().bold());
    println!("   Report: {}", outcome.written.report_path.display());
    println!("   Data:   {}", outcome.written.data_path.display());
    if let Some(archive) = &outcome.written.archive_path {
        println!("   Archive: {}", archive.display());
    }
    println!(
        "   Prompt: {} chars (~{} tokens), model {}",
        outcome.prompt.chars, outcome.prompt.estimated_tokens, outcome.completion.model
    );
    if outcome.prompt.was_truncated() {
        println!(
            "   {} prompt truncated, {} items omitted",
            "Note:".yellow(),
            outcome.prompt.total_omitted()
        );
    }
    let skipped = outcome.data.summary.total_skipped();
    if skipped > 0 {
        println!("   {} {} unparseable lines skipped", "Note:".yellow(), skipped);
    }
    Ok(0)
}

async fn prompt_command(
    settings: Settings,
    target: &TargetArgs,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    let prepared = Pipeline::new(settings).prepare(&target.request()).await?;

    match output {
        Some(path) => {
            std::fs::write(path, &prepared.prompt.text)
                .with_context(|| format!("Failed to write prompt to {}", path.display()))?;
            eprintln!(
                "{} Prompt written to {} ({} chars, ~{} tokens)",
                "OK".green().bold(),
                path.display(),
                prepared.prompt.chars,
                prepared.prompt.estimated_tokens
            );
        }
        None => print!("{}", prepared.prompt.text),
    }
    Ok(0)
}

fn list_command(settings: &Settings, component: &str, json: bool) -> anyhow::Result<i32> {
    let artifacts = ReportIndex::new(&settings.paths.reports_dir).list(component)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(0);
    }
    if artifacts.is_empty() {
        println!("{} No reports found for {}", "Info:".blue(), component);
        return Ok(0);
    }

    println!("\n{} Reports for {}", "Reports:".cyan().bold(), component);
    println!("{}", "─".repeat(40));
    for artifact in &artifacts {
        let week = artifact.week.as_deref().unwrap_or("-");
        let path = artifact.report_path.as_ref().unwrap_or(&artifact.data_path);
        println!(
            "   {} {:<8} v{} {}",
            artifact.date,
            week,
            artifact.version,
            path.display()
        );
    }
    Ok(0)
}

fn config_command(
    project: &Path,
    explicit: Option<&Path>,
    action: ConfigAction,
) -> anyhow::Result<i32> {
    match action {
        ConfigAction::Show { json } => {
            let (settings, chain) = Settings::load(project, explicit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("\n{} Settings", "Config:".cyan().bold());
                println!("{}", "─".repeat(40));
                println!("   LLM endpoint: {}", settings.llm.endpoint);
                println!("   Model: {}", settings.llm.model);
                println!("   Prompt budget: {} chars", settings.prompt.max_chars);
                println!("   Report type: {}", settings.prompt.report_type);
                println!("   Weeks: {}", settings.paths.weeks_dir.display());
                println!("   Reports: {}", settings.paths.reports_dir.display());
                println!(
                    "   Git: {}",
                    match (&settings.git.repo_path, settings.git.enabled) {
                        (Some(repo), true) => repo.display().to_string(),
                        _ => "disabled".to_string(),
                    }
                );
                println!();
                println!("{}", chain.describe());
            }
            Ok(0)
        }

        ConfigAction::Validate => {
            let (settings, chain) = Settings::load(project, explicit)?;
            let report = ConfigValidator::new(&settings).with_chain(chain).validate();
            println!("{}", report.verbose_report());
            if report.is_valid() {
                println!("{} {}", "OK".green().bold(), report.summary());
            } else {
                eprintln!("{} {}", "Error:".red().bold(), report.summary());
            }
            Ok(report.exit_code())
        }

        ConfigAction::Paths => {
            let locations = ConfigLocations::new();
            println!("\n{} Configuration Paths", "Config:".cyan().bold());
            println!("{}", "─".repeat(40));
            println!(
                "   User: {}",
                locations
                    .user_path()
                    .map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
            );
            println!(
                "   Project: {}",
                ConfigLocations::project_path(project).display()
            );
            if let Some(path) = explicit {
                println!("   Explicit: {}", path.display());
            }
            println!("   Project file name: {PROJECT_CONFIG_FILE}");
            println!("   Environment: {}", project.join(".env").display());
            Ok(0)
        }
    }
}
