//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use hush_core::custodian::AckMode;
use hush_core::key_requests::{AppendOutcome, FulfillOutcome};
use hush_crypto::PublicId;

use crate::channel::KeyContext;
use crate::config::{CliOverrides, Config};
use crate::identity::IdentityFile;
use crate::output::{OutputFormat, OutputFormatter};
use crate::{requests, signer, ExitCode};

/// hush - delegated signing and channel key distribution
#[derive(Parser, Debug)]
#[command(name = "hush")]
#[command(version, about = "hush - delegated signing and channel key distribution")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet (overrides config)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "HUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Relay URL (can be specified multiple times)
    #[arg(long = "relay-url", global = true)]
    pub relay_urls: Vec<String>,

    /// Identity file (overrides config)
    #[arg(long, global = true, env = "HUSH_IDENTITY")]
    pub identity_file: Option<PathBuf>,

    /// Key database (overrides config)
    #[arg(long, global = true, env = "HUSH_DB")]
    pub db: Option<PathBuf>,
}

impl Cli {
    /// Flags that take precedence over the config file.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            output_format: self.output.map(|f| f.to_string()),
            verbose: self.verbose.then_some(true),
            debug: self.debug.then_some(true),
            relay_urls: (!self.relay_urls.is_empty()).then(|| self.relay_urls.clone()),
            identity_path: self.identity_file.clone(),
            db_path: self.db.clone(),
        }
    }

    /// Execute the command with a resolved configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let formatter = formatter_for(&config);
        match self.command {
            Commands::Identity(args) => args.execute(&config, &formatter).await,
            Commands::Signer(args) => args.execute(&config, &formatter).await,
            Commands::Channel(args) => args.execute(&config, &formatter).await,
            Commands::Requests(args) => args.execute(&config, &formatter).await,
        }
    }
}

pub fn formatter_for(config: &Config) -> OutputFormatter {
    let format = config.output.format.parse().unwrap_or_default();
    OutputFormatter::new(format, config.output.verbose)
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the local identity
    Identity(IdentityArgs),
    /// Remote signer connection descriptors
    Signer(SignerArgs),
    /// Administer channel keys
    Channel(ChannelArgs),
    /// Work the key request ledger
    Requests(RequestsArgs),
}

fn emit(out: String) {
    if !out.is_empty() {
        println!("{out}");
    }
}

// ---------------------------------------------------------------------------
// identity

#[derive(Parser, Debug)]
pub struct IdentityArgs {
    #[command(subcommand)]
    pub action: IdentityAction,
}

#[derive(Subcommand, Debug)]
pub enum IdentityAction {
    /// Generate a new identity
    Generate {
        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },
    /// Show the current identity
    Show,
}

impl IdentityArgs {
    pub async fn execute(self, config: &Config, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let file = IdentityFile::new(config.identity_path());
        match self.action {
            IdentityAction::Generate { force } => {
                if force && file.exists() {
                    formatter.warning("Replacing the existing identity; keys wrapped for it become unreadable.");
                }
                let (_, info) = file.generate(force)?;
                formatter.success(&format!("Identity written to {}", info.path.display()));
                emit(formatter.format_identity(&info));
            }
            IdentityAction::Show => {
                formatter.progress("Loading identity...");
                let (_, info) = file.load()?;
                emit(formatter.format_identity(&info));
            }
        }
        Ok(ExitCode::Success)
    }
}

// ---------------------------------------------------------------------------
// signer

#[derive(Parser, Debug)]
pub struct SignerArgs {
    #[command(subcommand)]
    pub action: SignerAction,
}

#[derive(Subcommand, Debug)]
pub enum SignerAction {
    /// Generate a connection descriptor for a new session
    Descriptor {
        /// Also render the URI as a QR code
        #[arg(long)]
        qr: bool,
        /// Application name shown to the signer (overrides config)
        #[arg(long)]
        name: Option<String>,
        /// Application URL shown to the signer (overrides config)
        #[arg(long)]
        url: Option<String>,
        /// Application icon URL (overrides config)
        #[arg(long)]
        image: Option<String>,
    },
    /// Parse and validate a connection descriptor URI
    Inspect {
        /// hushconnect:// URI
        uri: String,
    },
    /// Run a loopback handshake with the local identity as custodian
    Check {
        /// Answer the connect request with "ack" instead of the secret
        #[arg(long)]
        ack: bool,
    },
}

impl SignerArgs {
    pub async fn execute(self, config: &Config, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        match self.action {
            SignerAction::Descriptor { qr, name, url, image } => {
                let mut section = config.signer.clone();
                section.name = name.or(section.name);
                section.url = url.or(section.url);
                section.image = image.or(section.image);

                let descriptor = signer::new_descriptor(section.to_signer_config())?;
                emit(formatter.format_descriptor(&descriptor, "signer descriptor"));
                if qr && formatter.format() == OutputFormat::Table {
                    println!("{}", signer::render_qr(&descriptor.to_uri())?);
                }
                Ok(ExitCode::Success)
            }
            SignerAction::Inspect { uri } => {
                let descriptor = signer::inspect(&uri)?;
                emit(formatter.format_descriptor(&descriptor, "signer inspect"));
                Ok(ExitCode::Success)
            }
            SignerAction::Check { ack } => {
                let (identity, _) = IdentityFile::new(config.identity_path()).load_or_generate()?;
                let mode = if ack { AckMode::Ack } else { AckMode::EchoSecret };
                formatter.progress("Running loopback handshake...");

                let report =
                    signer::loopback_check(identity, signer::loopback_config(config.signer.to_signer_config()), mode)
                        .await?;
                if formatter.format() == OutputFormat::Table {
                    for step in &report.steps {
                        formatter.success(&format!("{} ({} ms) {}", step.step, step.elapsed_ms, step.detail));
                    }
                }
                emit(formatter.format_success(&report, "signer check"));
                Ok(ExitCode::Success)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// channel

#[derive(Parser, Debug)]
pub struct ChannelArgs {
    #[command(subcommand)]
    pub action: ChannelAction,
}

#[derive(Subcommand, Debug)]
pub enum ChannelAction {
    /// Create the first key for a channel
    Create { resource: String },
    /// Authorize a member for a channel
    Grant {
        resource: String,
        /// Member public id (64 hex characters)
        member: PublicId,
        /// Display name for the member
        #[arg(long)]
        name: Option<String>,
    },
    /// Wrap the current key for every member still missing it
    Distribute { resource: String },
    /// Replace the channel key and rewrap it for every member
    Rotate { resource: String },
    /// Encrypt a message with the current channel key
    Encrypt { resource: String, message: String },
    /// Decrypt a channel message
    Decrypt { resource: String, ciphertext: String },
    /// Show key versions and member wraps
    Status { resource: String },
}

#[derive(Serialize)]
struct VersionOutput<'a> {
    resource_id: &'a str,
    key_version: u32,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    resource_id: &'a str,
    text: String,
    placeholder: bool,
}

impl ChannelArgs {
    pub async fn execute(self, config: &Config, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let ctx = KeyContext::open(config)?;
        match self.action {
            ChannelAction::Create { resource } => {
                let key_version = ctx.create(&resource).await?;
                formatter.success(&format!("Created key for {resource} (version {key_version})"));
                emit(formatter.format_success(
                    &VersionOutput {
                        resource_id: &resource,
                        key_version,
                    },
                    "channel create",
                ));
            }
            ChannelAction::Grant { resource, member, name } => {
                if ctx.grant(&resource, member, name).await? {
                    formatter.success(&format!("Authorized {} for {resource}", member.short()));
                } else {
                    formatter.info(&format!("{} was already authorized for {resource}", member.short()));
                }
                formatter.info("Run `hush channel distribute` to wrap the key for new members.");
            }
            ChannelAction::Distribute { resource } => {
                let report = ctx.distribute(&resource).await?;
                emit(formatter.format_distribution(&report, "channel distribute"));
                if !report.failed.is_empty() {
                    formatter.warning(&format!("{} wrap(s) failed", report.failed.len()));
                    return Ok(ExitCode::GeneralError);
                }
            }
            ChannelAction::Rotate { resource } => {
                let key_version = ctx.rotate(&resource).await?;
                formatter.success(&format!("Rotated {resource} to version {key_version}"));
                emit(formatter.format_success(
                    &VersionOutput {
                        resource_id: &resource,
                        key_version,
                    },
                    "channel rotate",
                ));
            }
            ChannelAction::Encrypt { resource, message } => {
                let sealed = ctx.encrypt(&resource, &message).await?;
                match formatter.format() {
                    OutputFormat::Table => println!("{sealed}"),
                    _ => emit(formatter.format_success(&sealed, "channel encrypt")),
                }
            }
            ChannelAction::Decrypt { resource, ciphertext } => {
                let (view, error) = ctx.decrypt(&resource, &ciphertext).await;
                match formatter.format() {
                    OutputFormat::Table => println!("{view}"),
                    _ => emit(formatter.format_success(
                        &MessageOutput {
                            resource_id: &resource,
                            text: view.to_string(),
                            placeholder: view.is_placeholder(),
                        },
                        "channel decrypt",
                    )),
                }
                if let Some(e) = error {
                    return Ok(ExitCode::from_error(&e.into()));
                }
            }
            ChannelAction::Status { resource } => {
                let status = ctx.status(&resource).await?;
                emit(formatter.format_channel_status(&status));
            }
        }
        Ok(ExitCode::Success)
    }
}

// ---------------------------------------------------------------------------
// requests

#[derive(Parser, Debug)]
pub struct RequestsArgs {
    #[command(subcommand)]
    pub action: RequestsAction,
}

#[derive(Subcommand, Debug)]
pub enum RequestsAction {
    /// Ask holders to wrap a channel key for this identity
    Create {
        resource: String,
        /// Display name shown to holders
        #[arg(long)]
        name: Option<String>,
    },
    /// List pending key requests
    List {
        /// Only requests for this channel
        #[arg(long)]
        resource: Option<String>,
    },
    /// Fulfill one request, or every pending request this identity can
    Fulfill {
        /// Request id; omit to fulfill all pending requests
        id: Option<String>,
        /// Only requests for this channel
        #[arg(long, conflicts_with = "id")]
        resource: Option<String>,
        /// Keep polling for new requests until interrupted
        #[arg(long, conflicts_with = "id")]
        watch: bool,
        /// Polling interval in seconds [default: 5]
        #[arg(long, requires = "watch")]
        interval: Option<u64>,
    },
}

#[derive(Serialize)]
struct RequestOutcomeOutput<'a> {
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

impl RequestsArgs {
    pub async fn execute(self, config: &Config, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let ctx = KeyContext::open(config)?;
        match self.action {
            RequestsAction::Create { resource, name } => {
                let outcome = requests::create(&ctx, &resource, name).await?;
                let (label, request_id) = match &outcome {
                    AppendOutcome::Created(r) => ("created", Some(r.id.as_str())),
                    AppendOutcome::AlreadyPending(r) => ("already_pending", Some(r.id.as_str())),
                    AppendOutcome::AlreadyHolds => ("already_holds", None),
                };
                match &outcome {
                    AppendOutcome::Created(r) => formatter.success(&format!("Key request {} created", r.id)),
                    AppendOutcome::AlreadyPending(r) => {
                        formatter.info(&format!("Key request {} is already pending", r.id))
                    }
                    AppendOutcome::AlreadyHolds => {
                        formatter.success(&format!("This identity already holds the current key for {resource}"))
                    }
                }
                emit(formatter.format_success(
                    &RequestOutcomeOutput {
                        outcome: label,
                        request_id,
                    },
                    "requests create",
                ));
            }
            RequestsAction::List { resource } => {
                let pending = requests::list(&ctx, resource.as_deref()).await?;
                emit(formatter.format_requests(&pending));
            }
            RequestsAction::Fulfill {
                id: Some(id), ..
            } => {
                let outcome = requests::fulfill_one(&ctx, &id).await?;
                let label = match outcome {
                    FulfillOutcome::Fulfilled => {
                        formatter.success(&format!("Fulfilled key request {id}"));
                        "fulfilled"
                    }
                    FulfillOutcome::AlreadyFulfilled => {
                        formatter.info(&format!("Key request {id} was already fulfilled"));
                        "already_fulfilled"
                    }
                };
                emit(formatter.format_success(
                    &RequestOutcomeOutput {
                        outcome: label,
                        request_id: Some(&id),
                    },
                    "requests fulfill",
                ));
            }
            RequestsAction::Fulfill {
                id: None,
                resource,
                watch,
                interval,
            } => {
                let report = requests::fulfill_pending(&ctx, resource.as_deref()).await?;
                emit(formatter.format_catch_up(&report));
                if watch {
                    formatter.info("Watching for new key requests (Ctrl-C to stop)...");
                    requests::watch(&ctx, Duration::from_secs(interval.unwrap_or(5).max(1))).await?;
                }
            }
        }
        Ok(ExitCode::Success)
    }
}
