//! MQTT bridge: subscribe to desired deltas, publish reported deltas.
//!
//! `connect` resolves settings, waits for the broker's CONNACK and then
//! hands the event loop to a driver task that forwards incoming publishes
//! into a bounded inbox. The driver never reconnects: a dropped connection
//! becomes the terminal item of the delta stream.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use rumqttc::{ConnectReturnCode, Event, EventLoop, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ds_protocol::topics;

use crate::channel::{Channel, MqttChannel};
use crate::config::MqttSettings;
use crate::error::{MqttError, MqttResult};
use crate::handler::{DeltaMessage, IncomingMessage, classify};

const INBOX_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

type Inbox = mpsc::Receiver<MqttResult<Publish>>;

/// A live connection to the broker.
pub struct MqttBridge<C: Channel = MqttChannel> {
    channel: C,
    inbox: Option<Inbox>,
    driver: Option<JoinHandle<()>>,
}

impl MqttBridge<MqttChannel> {
    /// Connect to the broker, blocking until the handshake completes.
    ///
    /// Credential problems fail with `Config` before any socket is opened;
    /// a handshake that fails or times out fails with `Connection`.
    pub async fn connect(settings: &MqttSettings, api_host: &str) -> MqttResult<Self> {
        let endpoint = settings.resolve(api_host)?;
        let (channel, mut eventloop) = MqttChannel::new(&endpoint, settings)?;

        tracing::info!(
            broker = %endpoint.uri(),
            client_id = %settings.client_id,
            "connecting to MQTT broker"
        );

        let timeout = Duration::from_secs(settings.connect_timeout_secs);
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                MqttError::Connection(format!(
                    "no CONNACK from {} within {}s",
                    endpoint.uri(),
                    timeout.as_secs()
                ))
            })??;

        tracing::info!(broker = %endpoint.uri(), "MQTT connection established");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let driver = tokio::spawn(drive(eventloop, tx));
        Ok(Self {
            channel,
            inbox: Some(rx),
            driver: Some(driver),
        })
    }
}

impl<C: Channel> MqttBridge<C> {
    /// Assemble a bridge from an already-connected channel and the inbox
    /// its event loop feeds.
    pub fn with_channel(channel: C, inbox: Inbox) -> Self {
        Self {
            channel,
            inbox: Some(inbox),
            driver: None,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Subscribe to desired deltas of every device visible to this
    /// connection.
    ///
    /// The returned stream yields one raw payload per message in arrival
    /// order. It can be taken once per bridge.
    pub async fn subscribe_desired_delta(&mut self) -> MqttResult<DesiredDeltas> {
        let inbox = self
            .inbox
            .take()
            .ok_or_else(|| MqttError::Other("desired deltas already subscribed".into()))?;

        let filter = topics::all_desired_deltas();
        if let Err(e) = self.channel.subscribe(&filter, QoS::AtLeastOnce).await {
            self.inbox = Some(inbox);
            return Err(e);
        }
        tracing::info!(filter = %filter, "subscribed to desired deltas");

        Ok(DesiredDeltas {
            inbox,
            finished: false,
        })
    }

    /// Publish a reported delta for `device_id`.
    ///
    /// Returns once the message is queued locally; broker acknowledgement
    /// is not surfaced.
    pub async fn publish_reported_delta(&self, device_id: &str, payload: &str) -> MqttResult<()> {
        if device_id.is_empty() || device_id.contains(['+', '#', '/']) {
            return Err(MqttError::Config(format!(
                "'{device_id}' is not a valid device id for a publish topic"
            )));
        }
        let topic = topics::reported_delta(device_id);
        self.channel
            .publish(&topic, payload.as_bytes(), QoS::AtLeastOnce)
            .await?;
        tracing::debug!(topic = %topic, bytes = payload.len(), "reported delta queued");
        Ok(())
    }

    /// Disconnect, giving queued publishes a short grace period to flush.
    pub async fn disconnect(mut self) -> MqttResult<()> {
        let result = self.channel.disconnect().await;
        if let Some(mut driver) = self.driver.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
                .await
                .is_err()
            {
                driver.abort();
            }
        }
        result
    }
}

impl<C: Channel> Drop for MqttBridge<C> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Poll until the broker accepts or rejects the connection.
async fn wait_for_connack(eventloop: &mut EventLoop) -> MqttResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(MqttError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(MqttError::Connection(e.to_string())),
        }
    }
}

/// Drive the event loop, forwarding publishes until the connection drops,
/// the client disconnects, or the consumer goes away.
async fn drive(mut eventloop: EventLoop, tx: mpsc::Sender<MqttResult<Publish>>) {
    loop {
        let event = tokio::select! {
            () = tx.closed() => {
                tracing::debug!("delta consumer gone, stopping MQTT driver");
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if tx.send(Ok(publish)).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = tx
                    .send(Err(MqttError::Connection("broker closed the connection".into())))
                    .await;
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT connection lost");
                let _ = tx.send(Err(MqttError::Connection(e.to_string()))).await;
                break;
            }
        }
    }
}

/// Unbounded, non-restartable stream of desired-delta payloads.
///
/// Ends after yielding the error that terminated the connection.
pub struct DesiredDeltas {
    inbox: Inbox,
    finished: bool,
}

impl Stream for DesiredDeltas {
    type Item = MqttResult<DeltaMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        loop {
            match self.inbox.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(MqttError::Connection(
                        "MQTT connection closed".into(),
                    ))));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(publish))) => match classify(&publish) {
                    IncomingMessage::DesiredDelta(message) => {
                        return Poll::Ready(Some(Ok(message)));
                    }
                    other => {
                        tracing::debug!(incoming = ?other, "ignoring non-desired publish");
                    }
                },
            }
        }
    }
}
