//! The `dshadow` command line: wiring between flags, sessions and output.

pub mod cli;
pub mod mqtt;
pub mod output;
pub mod state;
pub mod token;

use ds_mqtt_channel::MqttBridge;
use ds_protocol::ShadowError;
use ds_shadow_client::{HttpTokenIssuer, TransportSelector};

use crate::cli::{Args, Commands};
use crate::output::JsonLines;

/// Execute one invocation, writing results to stdout.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.options.load_config()?;
    tracing::debug!(config = ?config, "configuration loaded");
    let mut out = JsonLines::new(std::io::stdout().lock());

    match &args.command {
        Commands::State(state_args) => {
            let plan = state::StatePlan::from_args(state_args)?;
            let selector = TransportSelector::new(config)?;
            let session = selector.open(state::session_request(state_args)).await?;
            state::run_and_close(&plan, session, &mut out).await
        }
        Commands::Mqtt(mqtt_args) => {
            let settings = mqtt_args.settings();
            let bridge = MqttBridge::connect(&settings, config.host())
                .await
                .map_err(ShadowError::from)?;
            mqtt::run(mqtt_args, bridge, &mut out).await
        }
        Commands::Token(token_args) => {
            let issuer = HttpTokenIssuer::new(&config)?;
            token::run(token_args, &issuer, &mut out).await
        }
    }
}
