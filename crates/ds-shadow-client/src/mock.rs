//! In-memory shadow service and token issuer for tests.
//!
//! `MockShadowService` applies the real merge/remove semantics to a map of
//! shadows and fans every mutation out to its live streams, so it can stand
//! in for the platform either directly (as a `ShadowTransport`) or behind
//! an HTTP server.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use ds_protocol::{
    AccessLevel, DeltaTracker, DeviceToken, Document, KeyPath, Shadow, ShadowError, ShadowPatch,
    ShadowResult, StateKey, StreamRequest,
};

use crate::token::TokenIssuer;
use crate::transport::{ShadowEvents, ShadowTransport};

const EVENT_CAPACITY: usize = 256;

/// Shadow service backed by process memory.
pub struct MockShadowService {
    shadows: RwLock<BTreeMap<String, Shadow>>,
    events: broadcast::Sender<Shadow>,
}

impl Default for MockShadowService {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shadows: RwLock::new(BTreeMap::new()),
            events,
        }
    }
}

impl MockShadowService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current shadow for one device, absent if never written.
    pub fn snapshot(&self, device_id: &str) -> Shadow {
        self.shadows
            .read()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| Shadow::absent(device_id))
    }

    /// Number of live streams.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, shadow: &Shadow) {
        // No receivers is fine.
        let _ = self.events.send(shadow.clone());
    }

    /// Apply a patch and return the resulting shadow.
    pub fn apply_patch(&self, patch: &ShadowPatch) -> Shadow {
        let next = {
            let mut shadows = self.shadows.write().unwrap();
            let current = shadows
                .get(&patch.device)
                .cloned()
                .unwrap_or_else(|| Shadow::absent(&patch.device));
            let next = current.patched(patch.key, &patch.document);
            shadows.insert(patch.device.clone(), next.clone());
            next
        };
        self.publish(&next);
        next
    }

    /// Remove a key and return the resulting shadow and whether it existed.
    pub fn apply_remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> (Shadow, bool) {
        let (next, found) = {
            let mut shadows = self.shadows.write().unwrap();
            let current = shadows
                .get(device_id)
                .cloned()
                .unwrap_or_else(|| Shadow::absent(device_id));
            let (next, found) = current.removed(key, path);
            if found {
                shadows.insert(device_id.to_string(), next.clone());
            }
            (next, found)
        };
        if found {
            self.publish(&next);
        }
        (next, found)
    }

    /// Batch read; an empty pool means every recorded device.
    pub fn read(&self, device_ids: &[String]) -> Vec<Shadow> {
        if device_ids.is_empty() {
            return self.shadows.read().unwrap().values().cloned().collect();
        }
        device_ids.iter().map(|id| self.snapshot(id)).collect()
    }

    /// Subscribe to mutations, optionally preceded by every current shadow.
    ///
    /// The subscription is taken before the snapshot so nothing written in
    /// between is lost. A delta subscription without the backlog still
    /// diffs against the snapshot.
    pub fn subscribe(&self, request: StreamRequest) -> ShadowEvents {
        let rx = self.events.subscribe();
        let backlog: VecDeque<Shadow> = if request.sync {
            self.read(&[]).into()
        } else {
            VecDeque::new()
        };

        let mut tracker = DeltaTracker::new();
        if request.only_delta && !request.sync {
            for shadow in self.read(&[]) {
                tracker.seed(shadow);
            }
        }

        let state = Subscription {
            backlog,
            rx,
            tracker,
            only_delta: request.only_delta,
            done: false,
        };
        futures::stream::unfold(state, |mut sub| async move {
            let item = sub.next_item().await?;
            Some((item, sub))
        })
        .boxed()
    }
}

struct Subscription {
    backlog: VecDeque<Shadow>,
    rx: broadcast::Receiver<Shadow>,
    tracker: DeltaTracker,
    only_delta: bool,
    done: bool,
}

impl Subscription {
    async fn next_item(&mut self) -> Option<ShadowResult<Shadow>> {
        if self.done {
            return None;
        }
        loop {
            let shadow = match self.backlog.pop_front() {
                Some(shadow) => shadow,
                None => match self.rx.recv().await {
                    Ok(shadow) => shadow,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.done = true;
                        return Some(Err(ShadowError::Transport(format!(
                            "subscriber fell behind by {n} updates"
                        ))));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.done = true;
                        return Some(Err(ShadowError::Transport("service shut down".into())));
                    }
                },
            };
            if let Some(item) = self.tracker.observe(shadow, self.only_delta) {
                return Some(Ok(item));
            }
        }
    }
}

#[async_trait]
impl ShadowTransport for MockShadowService {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get(&self, device_ids: &[String]) -> ShadowResult<Vec<Shadow>> {
        Ok(self.read(device_ids))
    }

    async fn patch(
        &self,
        device_id: &str,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Shadow> {
        let patch = ShadowPatch::new(device_id, key, document)?;
        Ok(self.apply_patch(&patch))
    }

    async fn remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> ShadowResult<Shadow> {
        Ok(self.apply_remove(device_id, key, path).0)
    }

    async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowEvents> {
        Ok(self.subscribe(request))
    }
}

/// Token issuer that records requests and hands out numbered tokens.
#[derive(Default)]
pub struct MockTokenIssuer {
    requests: Mutex<Vec<(Vec<String>, AccessLevel)>>,
    denied: HashSet<String>,
    rejected: bool,
}

impl MockTokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse tokens covering `device_id` with `ScopeDenied`.
    pub fn deny(mut self, device_id: impl Into<String>) -> Self {
        self.denied.insert(device_id.into());
        self
    }

    /// Refuse every request with `AuthFailure`.
    pub fn reject_credentials(mut self) -> Self {
        self.rejected = true;
        self
    }

    pub fn requests(&self) -> Vec<(Vec<String>, AccessLevel)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenIssuer for MockTokenIssuer {
    async fn issue(&self, device_ids: &[String], level: AccessLevel) -> ShadowResult<DeviceToken> {
        if self.rejected {
            return Err(ShadowError::AuthFailure("credentials expired".into()));
        }
        if let Some(id) = device_ids.iter().find(|id| self.denied.contains(*id)) {
            return Err(ShadowError::ScopeDenied(format!("no access to device '{id}'")));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push((device_ids.to_vec(), level));
        Ok(DeviceToken::new(
            format!("mock-token-{}", requests.len()),
            device_ids.to_vec(),
            level,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn patches_merge_and_remove_deletes() {
        let service = MockShadowService::new();
        service
            .patch("a", StateKey::Desired, json!({"temp": 20}))
            .await
            .unwrap();
        service
            .patch("a", StateKey::Desired, json!({"fan": "on"}))
            .await
            .unwrap();

        let shadows = service.get(&ids(&["a"])).await.unwrap();
        assert_eq!(
            shadows[0].desired.as_ref().unwrap().data,
            json!({"temp": 20, "fan": "on"})
        );

        let path: KeyPath = "temp".parse().unwrap();
        let (shadow, found) = service.apply_remove("a", StateKey::Desired, &path);
        assert!(found);
        assert_eq!(shadow.desired.unwrap().data, json!({"fan": "on"}));

        let (_, found) = service.apply_remove("a", StateKey::Desired, &path);
        assert!(!found);
    }

    #[tokio::test]
    async fn unknown_device_reads_as_absent() {
        let service = MockShadowService::new();
        let shadows = service.get(&ids(&["b"])).await.unwrap();
        assert_eq!(shadows, vec![Shadow::absent("b")]);
    }

    #[tokio::test]
    async fn sync_stream_starts_with_current_state() {
        let service = MockShadowService::new();
        service
            .patch("a", StateKey::Reported, json!({"temp": 20}))
            .await
            .unwrap();

        let mut events = service
            .subscribe(StreamRequest {
                only_delta: false,
                sync: true,
            });
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first, service.snapshot("a"));

        service
            .patch("a", StateKey::Reported, json!({"temp": 21}))
            .await
            .unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.reported.unwrap().data, json!({"temp": 21}));
    }

    #[tokio::test]
    async fn delta_stream_without_sync_starts_from_current_state() {
        let service = MockShadowService::new();
        service
            .patch("a", StateKey::Desired, json!({"temp": 20}))
            .await
            .unwrap();
        service
            .patch("a", StateKey::Reported, json!({"up": true}))
            .await
            .unwrap();

        let mut events = service.subscribe(StreamRequest {
            only_delta: true,
            sync: false,
        });
        service
            .patch("a", StateKey::Desired, json!({"fan": "on"}))
            .await
            .unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.desired.unwrap().data, json!({"fan": "on"}));
        assert!(first.reported.is_none());
    }

    #[tokio::test]
    async fn dropping_a_stream_unsubscribes() {
        let service = MockShadowService::new();
        let events = service.subscribe(StreamRequest::default());
        assert_eq!(service.subscriber_count(), 1);
        drop(events);
        assert_eq!(service.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn issuer_records_and_refuses() {
        let issuer = MockTokenIssuer::new().deny("forbidden");
        let token = issuer.issue(&ids(&["a"]), AccessLevel::None).await.unwrap();
        assert_eq!(token.as_str(), "mock-token-1");
        assert_eq!(issuer.requests(), vec![(ids(&["a"]), AccessLevel::None)]);

        let err = issuer
            .issue(&ids(&["a", "forbidden"]), AccessLevel::None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShadowError::ScopeDenied(_)));

        let err = MockTokenIssuer::new()
            .reject_credentials()
            .issue(&ids(&["a"]), AccessLevel::None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShadowError::AuthFailure(_)));
    }
}
