//! In-memory `Channel` for bridge tests.
//!
//! Keeps every publish, subscription filter and disconnect so tests can
//! assert on what would have reached the broker.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rumqttc::QoS;

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};

/// One publish as the broker would have received it.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Channel that never touches the network.
#[derive(Default)]
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    disconnected: AtomicBool,
    offline: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish and subscribe fail as if the
    /// connection had dropped.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|(f, _)| f == filter)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> MqttResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(MqttError::Connection("mock channel is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        self.check_online()?;
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.check_online()?;
        self.subscriptions
            .lock()
            .unwrap()
            .push((filter.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORTED_A: &str = "devices/a/state/reported/delta";
    const REPORTED_B: &str = "devices/b/state/reported/delta";

    #[tokio::test]
    async fn records_reported_deltas_per_topic() {
        let channel = MockChannel::new();
        channel
            .publish(REPORTED_A, br#"{"temp":20}"#, QoS::AtLeastOnce)
            .await
            .unwrap();
        channel
            .publish(REPORTED_B, br#"{"fan":"on"}"#, QoS::AtLeastOnce)
            .await
            .unwrap();

        let sent = channel.published();
        let topics: Vec<_> = sent.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, [REPORTED_A, REPORTED_B]);
        assert_eq!(sent[0].payload_str(), r#"{"temp":20}"#);
        assert_eq!(channel.last_published().unwrap().topic, REPORTED_B);
        assert_eq!(channel.published_to(REPORTED_A).len(), 1);
    }

    #[tokio::test]
    async fn remembers_wildcard_filter_and_qos() {
        let channel = MockChannel::new();
        channel
            .subscribe("devices/+/state/desired/delta", QoS::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(
            channel.subscriptions(),
            vec![("devices/+/state/desired/delta".to_string(), QoS::AtLeastOnce)]
        );
        assert!(!channel.is_subscribed_to("devices/+/state/reported/delta"));
    }

    #[tokio::test]
    async fn offline_channel_refuses_traffic() {
        let channel = MockChannel::new();
        channel.go_offline();
        let publish = channel.publish(REPORTED_A, b"{}", QoS::AtLeastOnce).await;
        assert!(matches!(publish, Err(MqttError::Connection(_))));
        let subscribe = channel
            .subscribe("devices/+/state/desired/delta", QoS::AtLeastOnce)
            .await;
        assert!(subscribe.is_err());
        assert!(channel.published().is_empty());
        assert!(channel.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_recorded() {
        let channel = MockChannel::new();
        assert!(!channel.is_disconnected());
        channel.disconnect().await.unwrap();
        assert!(channel.is_disconnected());
    }
}
