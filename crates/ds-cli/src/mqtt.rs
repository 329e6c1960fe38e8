//! `dshadow mqtt`: report and watch state through the broker.

use std::io::Write;

use anyhow::{Context, bail};
use futures::StreamExt;

use ds_mqtt_channel::{Channel, MqttBridge};
use ds_protocol::document;

use crate::cli::MqttArgs;
use crate::output::JsonLines;

/// Publish the reported delta if one was given, then follow desired
/// deltas if asked to. The bridge is disconnected when there is nothing
/// left to wait for.
pub async fn run<C: Channel, W: Write>(
    args: &MqttArgs,
    mut bridge: MqttBridge<C>,
    out: &mut JsonLines<W>,
) -> anyhow::Result<()> {
    if let Some(report) = &args.report {
        let device = args
            .device
            .as_deref()
            .context("--report needs --device")?;
        // Catch malformed JSON before it reaches other subscribers.
        document::parse_patch(report)?;
        bridge.publish_reported_delta(device, report).await?;
        tracing::info!(device_id = %device, "reported delta published");
    }

    if args.desired {
        let mut deltas = bridge.subscribe_desired_delta().await?;
        while let Some(message) = deltas.next().await {
            out.emit(&message?)?;
        }
        bail!("desired delta subscription ended without an error");
    }

    bridge.disconnect().await?;
    Ok(())
}
