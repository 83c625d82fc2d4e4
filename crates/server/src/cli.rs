use clap::{Parser, ValueEnum};
use mcp_grafana_tools::{ToolCategory, ToolSelection};
use mcp_grafana_upstream::{ExecutionConfig, TlsConfig};
use std::path::PathBuf;

const ALL_CATEGORIES: &str =
    "search,datasource,incident,prometheus,loki,alerting,dashboard,oncall,asserts,admin,pyroscope";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Sse,
    StreamableHttp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "mcp-grafana",
    version,
    about = "MCP server for Grafana: dashboards, datasources, alerting, incidents and on-call as tools"
)]
pub struct Cli {
    /// Transport to serve MCP over
    #[arg(short = 't', long, value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Listen address for the sse and streamable-http transports
    #[arg(long, default_value = "localhost:8000")]
    pub address: String,

    /// Path prefix for the sse transport endpoints
    #[arg(long, default_value = "")]
    pub base_path: String,

    /// Path of the streamable-http endpoint
    #[arg(long, default_value = "/mcp")]
    pub endpoint_path: String,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Comma-separated tool categories to enable
    #[arg(long, default_value = ALL_CATEGORIES)]
    pub enabled_tools: String,

    #[arg(long)]
    pub disable_search: bool,
    #[arg(long)]
    pub disable_datasource: bool,
    #[arg(long)]
    pub disable_incident: bool,
    #[arg(long)]
    pub disable_prometheus: bool,
    #[arg(long)]
    pub disable_loki: bool,
    #[arg(long)]
    pub disable_alerting: bool,
    #[arg(long)]
    pub disable_dashboard: bool,
    #[arg(long)]
    pub disable_oncall: bool,
    #[arg(long)]
    pub disable_asserts: bool,
    #[arg(long)]
    pub disable_admin: bool,
    #[arg(long)]
    pub disable_pyroscope: bool,

    /// Log every upstream Grafana call
    #[arg(long)]
    pub debug: bool,

    /// Client certificate for mTLS to Grafana
    #[arg(long)]
    pub tls_cert_file: Option<PathBuf>,

    /// Client key for mTLS to Grafana
    #[arg(long)]
    pub tls_key_file: Option<PathBuf>,

    /// CA bundle used to verify Grafana
    #[arg(long)]
    pub tls_ca_file: Option<PathBuf>,

    /// Skip TLS verification (insecure)
    #[arg(long)]
    pub tls_skip_verify: bool,
}

impl Cli {
    /// The session base config: what the command line decides, before any credential source.
    #[must_use]
    pub fn base_config(&self) -> ExecutionConfig {
        ExecutionConfig::new().with_debug(self.debug).with_tls(TlsConfig::from_flags(
            self.tls_cert_file.clone(),
            self.tls_key_file.clone(),
            self.tls_ca_file.clone(),
            self.tls_skip_verify,
        ))
    }

    /// `--enabled-tools` minus every `--disable-*` flag.
    #[must_use]
    pub fn tool_selection(&self) -> ToolSelection {
        let disabled = [
            (self.disable_search, ToolCategory::Search),
            (self.disable_datasource, ToolCategory::Datasource),
            (self.disable_incident, ToolCategory::Incident),
            (self.disable_prometheus, ToolCategory::Prometheus),
            (self.disable_loki, ToolCategory::Loki),
            (self.disable_alerting, ToolCategory::Alerting),
            (self.disable_dashboard, ToolCategory::Dashboard),
            (self.disable_oncall, ToolCategory::OnCall),
            (self.disable_asserts, ToolCategory::Asserts),
            (self.disable_admin, ToolCategory::Admin),
            (self.disable_pyroscope, ToolCategory::Pyroscope),
        ];
        disabled
            .into_iter()
            .filter(|(off, _)| *off)
            .fold(
                ToolSelection::from_enabled_list(&self.enabled_tools),
                |selection, (_, category)| selection.without(category),
            )
    }
}
