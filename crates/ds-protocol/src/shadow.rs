use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{self, Document, KeyPath};
use crate::error::{ShadowError, ShadowResult};

/// One facet of a shadow: a document and the time it was last written.
///
/// A facet that was never written is not a `State` at all; it is `None`
/// on the owning [`Shadow`]. An explicitly empty document is `Some` with
/// `data == {}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub data: Document,
    pub timestamp: DateTime<Utc>,
}

impl State {
    pub fn new(data: Document) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }

    /// Return a new state with `patch` deep-merged in. `self` is untouched.
    pub fn merged(&self, patch: &Document) -> Self {
        let mut data = self.data.clone();
        document::deep_merge(&mut data, patch);
        Self::new(data)
    }

    /// Return a new state with `path` removed, and whether it existed.
    ///
    /// The timestamp only moves when something was actually removed.
    pub fn without(&self, path: &KeyPath) -> (Self, bool) {
        let mut data = self.data.clone();
        if document::remove_path(&mut data, path) {
            (Self::new(data), true)
        } else {
            (self.clone(), false)
        }
    }
}

/// Merge a patch into a facet that may not exist yet.
pub fn merge(base: Option<&State>, patch: &Document) -> State {
    match base {
        Some(state) => state.merged(patch),
        None => State::new(Document::Object(Default::default())).merged(patch),
    }
}

/// Remove a key path from a facet that may not exist yet.
///
/// Removing from an absent facet is a no-op: the facet stays absent.
pub fn remove(base: Option<&State>, path: &KeyPath) -> (Option<State>, bool) {
    match base {
        Some(state) => {
            let (state, found) = state.without(path);
            (Some(state), found)
        }
        None => (None, false),
    }
}

/// True only for the "never written" sentinel.
pub fn is_absent(state: Option<&State>) -> bool {
    state.is_none()
}

/// Which facet of a shadow an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    Reported,
    Desired,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reported => "reported",
            Self::Desired => "desired",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reported" => Ok(Self::Reported),
            "desired" => Ok(Self::Desired),
            other => Err(ShadowError::Validation(format!(
                "unknown state key '{other}', expected 'reported' or 'desired'"
            ))),
        }
    }
}

/// Per-device record of reported and desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub device: String,
    #[serde(default)]
    pub reported: Option<State>,
    #[serde(default)]
    pub desired: Option<State>,
}

impl Shadow {
    /// A shadow with both facets absent.
    pub fn absent(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            reported: None,
            desired: None,
        }
    }

    pub fn state(&self, key: StateKey) -> Option<&State> {
        match key {
            StateKey::Reported => self.reported.as_ref(),
            StateKey::Desired => self.desired.as_ref(),
        }
    }

    pub fn state_mut(&mut self, key: StateKey) -> &mut Option<State> {
        match key {
            StateKey::Reported => &mut self.reported,
            StateKey::Desired => &mut self.desired,
        }
    }

    pub fn is_absent(&self) -> bool {
        is_absent(self.reported.as_ref()) && is_absent(self.desired.as_ref())
    }

    /// Apply a merge patch to one facet, returning the updated shadow.
    pub fn patched(&self, key: StateKey, patch: &Document) -> Self {
        let mut next = self.clone();
        *next.state_mut(key) = Some(merge(self.state(key), patch));
        next
    }

    /// Remove a key path from one facet, returning the updated shadow.
    pub fn removed(&self, key: StateKey, path: &KeyPath) -> (Self, bool) {
        let mut next = self.clone();
        let (state, found) = remove(self.state(key), path);
        *next.state_mut(key) = state;
        (next, found)
    }
}

/// A patch addressed to one facet of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowPatch {
    pub device: String,
    pub key: StateKey,
    pub document: Document,
}

impl ShadowPatch {
    /// Build a patch, rejecting documents that are not objects.
    pub fn new(
        device: impl Into<String>,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Self> {
        document::validate_patch(&document)?;
        Ok(Self {
            device: device.into(),
            key,
            document,
        })
    }

    /// Wire form: a shadow carrying only the addressed facet.
    pub fn to_shadow(&self) -> Shadow {
        let mut shadow = Shadow::absent(&self.device);
        *shadow.state_mut(self.key) = Some(State::new(self.document.clone()));
        shadow
    }
}

/// A key removal addressed to one facet of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub device: String,
    pub state_key: StateKey,
    pub key: String,
}

/// Parse the `<reported|desired>.<key.path>` form used on the command line.
pub fn parse_remove_target(target: &str) -> ShadowResult<(StateKey, KeyPath)> {
    let (key, path) = target.split_once('.').ok_or_else(|| {
        ShadowError::Validation(format!(
            "remove target '{target}' must look like <reported|desired>.<key>"
        ))
    })?;
    Ok((key.parse()?, path.parse()?))
}

/// Batch read request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub pool: Vec<String>,
}

/// Batch read response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetResponse {
    #[serde(default)]
    pub shadows: Vec<Shadow>,
}

/// Parameters for opening a shadow stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub only_delta: bool,
    pub sync: bool,
}
