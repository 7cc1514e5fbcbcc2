// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use ipfspod::metadata::normalize_channel_name;
use ipfspod::{
    Channel, ChannelStore, Config, ContentStore, DistributionVerifier, Enclosure, EpisodeDraft,
    IpfsStore, NoopReporter, ProgressEvent, ProgressReporter, PublicationPipeline,
    ProbeOutcome, PublishOptions, PublishOutcome, ReqwestClient, SharedProgressReporter, SkipReason,
    VerificationReport, VerifyOptions,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static PAGE: Emoji<'_, '_> = Emoji("📄 ", "[~] ");
static SATELLITE: Emoji<'_, '_> = Emoji("📡 ", "[~] ");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "[^] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Publish podcasts stored on IPFS through a git mirror
#[derive(Parser, Debug)]
#[command(name = "ipfspod")]
#[command(about = "Publish podcasts stored on IPFS through a git mirror")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./ipfspod.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More diagnostic output (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a channel, or overwrite the settings of an existing one
    New(NewArgs),
    /// Append an episode to a channel
    Add(AddArgs),
    /// Render the feed and push the channel to the mirror repository
    Publish(PublishArgs),
    /// Check that episode media resolves through public IPFS gateways
    #[command(name = "test_gateway", alias = "test-gateway")]
    TestGateway(TestGatewayArgs),
}

#[derive(Args, Debug)]
struct NewArgs {
    channel_name: String,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(short, long)]
    link: Option<String>,
    #[arg(long)]
    copyright: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(short = 'a', long, alias = "author")]
    managing_editor: Option<String>,
    #[arg(long)]
    ttl: Option<u32>,
    /// Publishing key name
    #[arg(short, long)]
    key: Option<String>,
}

#[derive(Args, Debug)]
struct AddArgs {
    channel: String,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(short, long)]
    link: Option<String>,
    #[arg(short, long)]
    author: Option<String>,
    /// Category path, e.g. "Technology/Podcasting" (repeatable)
    #[arg(short = 'c', long = "category")]
    categories: Vec<String>,
    /// Media file to add to IPFS (repeatable)
    #[arg(short = 'f', long = "file")]
    files: Vec<PathBuf>,
    /// Already stored content (repeatable)
    #[arg(
        short = 'e',
        long = "enclosure",
        num_args = 3,
        value_names = ["HASH", "LEN", "MIME"],
        action = clap::ArgAction::Append
    )]
    enclosures: Vec<String>,
    /// Link to the feed this episode was taken from
    #[arg(short, long)]
    source: Option<String>,
}

#[derive(Args, Debug)]
struct PublishArgs {
    channel: String,
    /// Only render the feed; do not touch the mirror
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct TestGatewayArgs {
    channel: String,
    /// Gateway host to probe instead of the configured list (repeatable)
    #[arg(short, long = "gateway")]
    gateways: Vec<String>,
    /// Probes in flight per gateway
    #[arg(short, long)]
    concurrency: Option<usize>,
    /// Per-probe timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Write every probe result as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    /// Exit with an error when any probe fails
    #[arg(long)]
    strict: bool,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::with_template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn gateway_bar(&self, gateway: &str, probes: usize) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bar) = bars.get(gateway) {
            return bar.clone();
        }

        let style = ProgressStyle::with_template(&format!(
            "  {SATELLITE}{{prefix:24}} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} {{wide_msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(probes as u64));
        bar.set_style(style);
        bar.set_prefix(truncate(gateway, 24));
        bars.insert(gateway.to_string(), bar.clone());
        bar
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FeedWritten { path, episodes } => {
                self.main_bar.set_message(format!(
                    "{PAGE}Rendered {} episodes into {}",
                    episodes.to_string().cyan(),
                    path.display().to_string().cyan()
                ));
            }

            ProgressEvent::DryRunFinished { path } => {
                self.main_bar.finish_and_clear();
                println!(
                    "{PAGE}{} feed written to {}, mirror untouched",
                    "Dry run:".bold().yellow(),
                    path.display().to_string().cyan()
                );
            }

            ProgressEvent::Cloning { remote, path } => {
                self.main_bar.set_message(format!(
                    "Cloning {} into {}",
                    remote.cyan(),
                    path.display()
                ));
            }

            ProgressEvent::Syncing {
                source,
                destination,
            } => {
                self.main_bar.set_message(format!(
                    "Syncing {} -> {}",
                    source.display(),
                    destination.display()
                ));
            }

            ProgressEvent::Synced { changes } => {
                self.main_bar.set_message(format!(
                    "{} changes in mirror",
                    changes.to_string().cyan()
                ));
            }

            ProgressEvent::Committed { commit } => {
                self.main_bar
                    .set_message(format!("Committed {}", short_commit(&commit).yellow()));
            }

            ProgressEvent::Reconciling { attempt } => {
                self.main_bar.set_message(format!(
                    "{ROCKET}Fetching upstream and pushing (attempt {})",
                    attempt.to_string().cyan()
                ));
            }

            ProgressEvent::PushRejected { attempt, .. } => {
                self.main_bar.println(format!(
                    "  {CROSS}{} (attempt {attempt}), upstream moved",
                    "Push rejected".yellow()
                ));
            }

            ProgressEvent::Pushed { commit, attempts } => {
                self.main_bar.finish_and_clear();
                println!(
                    "{SUCCESS}{} {} ({} attempt{})",
                    "Pushed".bold().green(),
                    short_commit(&commit).yellow(),
                    attempts,
                    if attempts == 1 { "" } else { "s" }
                );
            }

            ProgressEvent::NothingToPublish => {
                self.main_bar.finish_and_clear();
                println!("{SUCCESS}{}", "Mirror already up to date".green());
            }

            ProgressEvent::GatewayStarting { gateway, probes } => {
                self.main_bar
                    .set_message(format!("{SATELLITE}Probing {}", gateway.cyan()));
                self.gateway_bar(&gateway, probes);
            }

            ProgressEvent::ProbeFinished {
                gateway,
                episode_title,
                success,
                detail,
                ..
            } => {
                let bar = self.gateway_bar(&gateway, 0);
                bar.inc(1);
                if success {
                    bar.set_message(truncate(&episode_title, 40));
                } else {
                    bar.set_message(format!(
                        "{} - {}",
                        truncate(&episode_title, 30).red(),
                        detail.red()
                    ));
                }
            }

            ProgressEvent::GatewayFinished {
                gateway,
                succeeded,
                failed,
            } => {
                let bar = self.gateway_bar(&gateway, 0);
                let message = if failed == 0 {
                    format!("{SUCCESS}{} ok", succeeded.to_string().green())
                } else {
                    format!(
                        "{FAILURE}{} ok, {} failed",
                        succeeded.to_string().yellow(),
                        failed.to_string().red().bold()
                    )
                };
                bar.finish_with_message(message);
            }

            ProgressEvent::VerificationCompleted {
                gateways,
                succeeded,
                failed,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} gateways, {} probes ok, {} failed",
                    "Verification complete:".bold().green(),
                    gateways.to_string().cyan(),
                    succeeded.to_string().green().bold(),
                    if failed > 0 {
                        failed.to_string().red().bold()
                    } else {
                        failed.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn",
        1 => "warn,ipfspod=info",
        2 => "info,ipfspod=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_new(config: &Config, args: NewArgs) -> Result<()> {
    let name = normalize_channel_name(&args.channel_name)?;
    let link = args.link.unwrap_or_else(|| {
        format!("{}/{}/", config.public_base_url.trim_end_matches('/'), name)
    });

    let mut channel = Channel::with_defaults(&name, link);
    if let Some(title) = args.title {
        channel.description = title.clone();
        channel.title = title;
    }
    if let Some(description) = args.description {
        channel.description = description;
    }
    if let Some(copyright) = args.copyright {
        channel.copyright = copyright;
    }
    if let Some(language) = args.language {
        channel.language = language;
    }
    if let Some(editor) = args.managing_editor {
        channel.managing_editor = editor;
    }
    if let Some(ttl) = args.ttl {
        channel.ttl = ttl;
    }
    channel.key = args.key;

    let store = ChannelStore::new(config.channels_dir.clone());
    let path = store
        .save_channel(&name, &channel)
        .with_context(|| format!("Failed to create channel '{name}'"))?;

    println!(
        "{SUCCESS}Channel {} written to {}",
        channel.title.bold().green(),
        path.display().to_string().cyan()
    );
    Ok(())
}

async fn cmd_add(config: &Config, args: AddArgs) -> Result<()> {
    let store = ChannelStore::new(config.channels_dir.clone());
    let name = normalize_channel_name(&args.channel)?;
    let channel = store
        .load_channel(&name)
        .with_context(|| format!("Cannot add to channel '{name}'"))?;

    let mut enclosures = Vec::new();
    for triple in args.enclosures.chunks(3) {
        let [hash, len, mime] = triple else {
            bail!("--enclosure takes HASH LEN MIME");
        };
        let length: u64 = len
            .parse()
            .with_context(|| format!("Invalid enclosure length '{len}'"))?;
        enclosures.push(Enclosure::new(hash.clone(), length, mime.clone())?);
    }

    if !args.files.is_empty() {
        let content_store = IpfsStore::new(config.store.api_url.clone());
        for file in &args.files {
            let stored = content_store
                .put(file)
                .await
                .with_context(|| format!("Failed to add {} to IPFS", file.display()))?;
            println!(
                "{SUCCESS}{} -> {}",
                file.display(),
                stored.content_id.cyan()
            );
            enclosures.push(stored.into_enclosure()?);
        }
    }

    let draft = EpisodeDraft {
        title: args.title,
        description: args.description,
        link: args.link,
        author: args.author,
        categories: args.categories,
        enclosures,
        fallback_title: args
            .files
            .first()
            .and_then(|f| f.file_stem())
            .map(|stem| stem.to_string_lossy().to_string()),
        source: args.source,
    };
    let episode = draft.into_episode(&channel, Utc::now())?;
    store
        .append_episode(&name, &episode)
        .with_context(|| format!("Failed to record episode in '{name}'"))?;

    println!(
        "{SUCCESS}Added {} to {}",
        episode.title.bold().green(),
        channel.title.cyan()
    );
    Ok(())
}

async fn cmd_publish(
    config: &Config,
    args: PublishArgs,
    reporter: SharedProgressReporter,
) -> Result<bool> {
    let pipeline = PublicationPipeline::from_config(config, reporter);
    let options = PublishOptions {
        dry_run: args.dry_run,
    };
    let channel = args.channel;

    // Git and filesystem work is blocking
    let run = tokio::task::spawn_blocking(move || pipeline.publish_channel(&channel, &options))
        .await
        .context("Publish task panicked")?
        .context("Publishing failed")?;

    match &run.outcome {
        PublishOutcome::Succeeded { .. } | PublishOutcome::Skipped(SkipReason::NoOp) => {
            println!("\n{ROCKET}Feed: {}\n", run.public_url.cyan().bold());
            Ok(true)
        }
        PublishOutcome::Skipped(SkipReason::DryRun) => Ok(true),
        PublishOutcome::Failed(e) => {
            eprintln!(
                "\n{FAILURE}{} channel '{}' ({}): {}",
                "Publishing failed for".red().bold(),
                run.channel,
                run.destination
                    .as_deref()
                    .unwrap_or(run.feed_path.as_path())
                    .display(),
                e
            );
            Ok(false)
        }
    }
}

async fn cmd_test_gateway(
    config: &Config,
    args: TestGatewayArgs,
    reporter: SharedProgressReporter,
    quiet: bool,
) -> Result<bool> {
    let store = ChannelStore::new(config.channels_dir.clone());
    let name = normalize_channel_name(&args.channel)?;
    store
        .load_channel(&name)
        .with_context(|| format!("Cannot test channel '{name}'"))?;
    let episodes = store
        .load_episodes(&name)
        .with_context(|| format!("Cannot read episodes of '{name}'"))?;

    let gateways = if args.gateways.is_empty() {
        config.verify.gateways.clone()
    } else {
        args.gateways
    };
    let options = VerifyOptions {
        concurrency: args.concurrency.unwrap_or(config.verify.concurrency),
        probe_timeout: args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.verify.timeout()),
    };

    let client = ReqwestClient::with_connect_timeout(options.probe_timeout)
        .context("Failed to create HTTP client")?;
    let verifier = DistributionVerifier::new(client, options, reporter);

    let token = verifier.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let report = verifier.verify(&gateways, &episodes).await?;

    if !quiet {
        print_failures(&report);
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_vec_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    Ok(!(args.strict && report.failed() > 0))
}

fn print_failures(report: &VerificationReport) {
    for gateway in &report.gateways {
        if gateway.failed() == 0 {
            continue;
        }
        println!(
            "\n{} {} ({}/{} ok)",
            "Failures on".red().bold(),
            gateway.gateway.yellow(),
            gateway.succeeded(),
            gateway.results.len()
        );
        for result in gateway.failures() {
            if let ProbeOutcome::Failure { reason } = &result.outcome {
                println!(
                    "  {}{} - {}",
                    CROSS,
                    result.episode_title.yellow(),
                    reason.to_string().dimmed()
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if !cli.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "ipfspod".bold().magenta(),
            "- IPFS Podcast Publisher".dimmed()
        );
    }

    let ui = (!cli.quiet).then(|| Arc::new(IndicatifReporter::new()));
    let reporter: SharedProgressReporter = match &ui {
        Some(ui) => ui.clone() as SharedProgressReporter,
        None => NoopReporter::shared(),
    };

    let succeeded = match cli.command {
        Command::New(args) => cmd_new(&config, args).map(|_| true),
        Command::Add(args) => cmd_add(&config, args).await.map(|_| true),
        Command::Publish(args) => cmd_publish(&config, args, reporter).await,
        Command::TestGateway(args) => {
            cmd_test_gateway(&config, args, reporter, cli.quiet).await
        }
    };

    if let Some(ui) = &ui {
        ui.finish();
    }

    if !succeeded? {
        std::process::exit(1);
    }

    Ok(())
}
