//! Output formatting for CLI results
//!
//! Three output formats:
//! - Table: human-readable tables (default)
//! - JSON: structured responses for scripting
//! - Quiet: no output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use hush_core::channel_keys::DistributionReport;
use hush_core::descriptor::ConnectionDescriptor;
use hush_core::key_requests::CatchUpReport;
use hush_core::types::KeyRequestView;

use crate::channel::ChannelStatus;
use crate::identity::IdentityInfo;
use crate::ExitCode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_identity(&self, info: &IdentityInfo) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Public ID", &info.public_id.to_hex()]);
                table.add_row(vec!["Fingerprint", &info.fingerprint]);
                table.add_row(vec!["Created At", &format_time(info.created_at)]);
                table.add_row(vec!["File", &info.path.display().to_string()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&IdentityOutput::from(info), "identity show"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_descriptor(&self, descriptor: &ConnectionDescriptor, command: &str) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Client ID", &descriptor.public_id.to_hex()]);
                table.add_row(vec!["Relays", &descriptor.relays.join("\n")]);
                table.add_row(vec!["Name", descriptor.metadata.name.as_deref().unwrap_or("-")]);
                table.add_row(vec!["URL", descriptor.metadata.url.as_deref().unwrap_or("-")]);
                table.add_row(vec!["Image", descriptor.metadata.image.as_deref().unwrap_or("-")]);
                table.add_row(vec!["URI", &descriptor.to_uri()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&DescriptorOutput::from(descriptor), command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_distribution(&self, report: &DistributionReport, command: &str) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Resource", &report.resource_id]);
                table.add_row(vec!["Key Version", &report.key_version.to_string()]);
                table.add_row(vec!["Newly Wrapped", &report.writes().to_string()]);
                table.add_row(vec!["Already Current", &report.already_current.to_string()]);
                let failed = report
                    .failed
                    .iter()
                    .map(|(id, reason)| format!("{}: {reason}", id.short()))
                    .collect::<Vec<_>>();
                table.add_row(vec![
                    "Failed",
                    &if failed.is_empty() { "-".to_string() } else { failed.join("\n") },
                ]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&DistributionOutput::from(report), command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_channel_status(&self, status: &ChannelStatus) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut summary = property_table();
                summary.add_row(vec!["Resource", &status.resource_id]);
                summary.add_row(vec![
                    "Current Version",
                    &status.current_version.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                ]);
                summary.add_row(vec![
                    "Held Versions",
                    &if status.held_versions.is_empty() {
                        "none".to_string()
                    } else {
                        join_versions(&status.held_versions)
                    },
                ]);

                if status.members.is_empty() {
                    return summary.to_string();
                }
                let mut members = Table::new();
                members.load_preset(UTF8_FULL);
                members.set_header(vec!["Member", "Name", "Wrapped Version", "State"]);
                for m in &status.members {
                    members.add_row(vec![
                        m.public_id.to_hex(),
                        m.display_name.clone().unwrap_or_else(|| "-".into()),
                        m.wrapped_version.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                        m.state().to_string(),
                    ]);
                }
                format!("{summary}\n{members}")
            }
            OutputFormat::Json => self.to_json_response(status, "channel status"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_requests(&self, requests: &[KeyRequestView]) -> String {
        match self.format {
            OutputFormat::Table => {
                if requests.is_empty() {
                    return "No pending key requests.".to_string();
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Request ID", "Resource", "Requester", "Name", "Status"]);
                for r in requests {
                    table.add_row(vec![
                        r.id.clone(),
                        r.resource_id.clone(),
                        r.requester_public_id.short(),
                        r.requester_display_name.clone().unwrap_or_else(|| "-".into()),
                        r.status.to_string(),
                    ]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&requests, "requests list"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_catch_up(&self, report: &CatchUpReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Fulfilled", &report.fulfilled.to_string()]);
                table.add_row(vec!["Already Fulfilled", &report.already_fulfilled.to_string()]);
                table.add_row(vec!["Skipped", &report.skipped.to_string()]);
                table.add_row(vec!["Failed", &report.failed.to_string()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&CatchUpOutput::from(report), "requests fulfill"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// JSON for an arbitrary payload; table mode prints nothing.
    pub fn format_success<T: Serialize>(&self, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Table | OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_error_with_code(&self, message: &str, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {message}"),
            OutputFormat::Json => {
                let output = ErrorOutput {
                    response: JsonResponse::error(message),
                    exit_code: code as i32,
                    exit_code_name: code.name(),
                };
                self.to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message, verbose table mode only
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("⚠ {message}");
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            println!("ℹ {message}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }
}

fn property_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table
}

fn join_versions(versions: &[u32]) -> String {
    versions.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn format_time(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_time_iso(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.to_rfc3339()
}

// JSON output structures

#[derive(Serialize)]
struct ErrorOutput {
    #[serde(flatten)]
    response: JsonResponse<()>,
    exit_code: i32,
    exit_code_name: &'static str,
}

#[derive(Serialize)]
struct IdentityOutput {
    public_id: String,
    fingerprint: String,
    created_at: String,
    path: String,
}

impl From<&IdentityInfo> for IdentityOutput {
    fn from(info: &IdentityInfo) -> Self {
        Self {
            public_id: info.public_id.to_hex(),
            fingerprint: info.fingerprint.clone(),
            created_at: format_time_iso(info.created_at),
            path: info.path.display().to_string(),
        }
    }
}

#[derive(Serialize)]
struct DescriptorOutput {
    uri: String,
    public_id: String,
    relays: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

impl From<&ConnectionDescriptor> for DescriptorOutput {
    fn from(d: &ConnectionDescriptor) -> Self {
        Self {
            uri: d.to_uri(),
            public_id: d.public_id.to_hex(),
            relays: d.relays.clone(),
            name: d.metadata.name.clone(),
            url: d.metadata.url.clone(),
            image: d.metadata.image.clone(),
        }
    }
}

#[derive(Serialize)]
struct DistributionOutput {
    resource_id: String,
    key_version: u32,
    wrapped: Vec<String>,
    already_current: usize,
    failed: Vec<FailedWrap>,
}

#[derive(Serialize)]
struct FailedWrap {
    recipient: String,
    reason: String,
}

impl From<&DistributionReport> for DistributionOutput {
    fn from(r: &DistributionReport) -> Self {
        Self {
            resource_id: r.resource_id.clone(),
            key_version: r.key_version,
            wrapped: r.wrapped.iter().map(|id| id.to_hex()).collect(),
            already_current: r.already_current,
            failed: r
                .failed
                .iter()
                .map(|(id, reason)| FailedWrap {
                    recipient: id.to_hex(),
                    reason: reason.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct CatchUpOutput {
    fulfilled: usize,
    already_fulfilled: usize,
    skipped: usize,
    failed: usize,
}

impl From<&CatchUpReport> for CatchUpOutput {
    fn from(r: &CatchUpReport) -> Self {
        Self {
            fulfilled: r.fulfilled,
            already_fulfilled: r.already_fulfilled,
            skipped: r.skipped,
            failed: r.failed,
        }
    }
}
