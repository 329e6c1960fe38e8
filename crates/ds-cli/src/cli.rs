//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ds_mqtt_channel::{AuthMode, MqttSettings};
use ds_shadow_client::ClientConfig;

/// dshadow: observe and mutate device shadows
#[derive(Parser, Debug)]
#[command(name = "dshadow", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub options: Options,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    /// TOML config file
    #[arg(long, global = true, env = "DSHADOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Platform API as host:port, overriding config and environment
    #[arg(long, global = true)]
    pub api: Option<String>,

    /// Use plain HTTP for the platform API
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Options {
    /// Config file (if any), then `DSHADOW_*` variables, then flags.
    pub fn load_config(&self) -> anyhow::Result<ClientConfig> {
        let base = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        let mut config = base.with_env();
        if let Some(api) = &self.api {
            config.api_host = api.clone();
        }
        if self.insecure {
            config.insecure = true;
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read, patch, report, remove or stream device state
    State(StateArgs),
    /// Exchange desired and reported deltas through the MQTT broker
    Mqtt(MqttArgs),
    /// Issue a token scoped to the given devices
    #[command(alias = "tok")]
    Token(TokenArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct StateArgs {
    /// Devices to read or stream; the first one is the target of
    /// --patch, --report and --remove
    #[arg(required = true)]
    pub devices: Vec<String>,

    /// Device token (a new one is obtained if not present)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Patch desired state with a JSON object
    #[arg(short, long)]
    pub patch: Option<String>,

    /// Report state with a JSON object
    #[arg(short, long)]
    pub report: Option<String>,

    /// Remove a state key as <reported|desired>.<key.path>
    #[arg(long)]
    pub remove: Option<String>,

    /// Stream device state
    #[arg(short, long)]
    pub stream: bool,

    /// Stream only what changed since the last item per device
    #[arg(short, long)]
    pub delta: bool,

    /// Send current state upon connection
    #[arg(long)]
    pub sync: bool,

    /// Request post rights when obtaining a token
    #[arg(long)]
    pub allow_post: bool,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct MqttArgs {
    /// Path to certificate file
    #[arg(short, long)]
    pub crt: Option<PathBuf>,

    /// Path to private key file
    #[arg(short, long)]
    pub key: Option<PathBuf>,

    /// CA bundle for verifying the broker
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// Basic auth string (login:pass); takes precedence over certificates
    #[arg(short, long)]
    pub basic: Option<String>,

    /// Broker host (derived from the API host by default)
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port (8883 with certificates, 1883 with basic auth)
    #[arg(long)]
    pub port: Option<u16>,

    /// MQTT client id (defaults to the hostname)
    #[arg(short = 'i', long)]
    pub client_id: Option<String>,

    /// Subscribe to desired state deltas
    #[arg(short, long)]
    pub desired: bool,

    /// Report state: JSON published as a reported delta
    #[arg(short, long, requires = "device")]
    pub report: Option<String>,

    /// Device the reported delta is published for
    #[arg(long)]
    pub device: Option<String>,
}

impl MqttArgs {
    pub fn settings(&self) -> MqttSettings {
        let auth = AuthMode::select(
            self.basic.clone(),
            self.crt.clone(),
            self.key.clone(),
            self.ca.clone(),
        );
        let mut settings = MqttSettings::new(auth);
        settings.broker_host = self.host.clone();
        settings.broker_port = self.port;
        if let Some(id) = self.client_id.as_ref().filter(|id| !id.is_empty()) {
            settings.client_id = id.clone();
        }
        settings
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct TokenArgs {
    /// Devices the token should cover
    #[arg(required = true)]
    pub devices: Vec<String>,

    /// Allow posting device states
    #[arg(long)]
    pub allow_post: bool,
}
