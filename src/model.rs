//! Core data model.
//!
//! A work item is one schedulable unit of crawl work. Seeds come from user
//! input at depth 0; every other item was spawned by a parent and sits one
//! level below it. Discovered entities are identified by fingerprint so that
//! two discovery paths to the same entity collapse into one result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of crawl work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier, assigned at creation.
    pub id: WorkId,

    /// The item whose execution spawned this one. None for seeds.
    pub parent_id: Option<WorkId>,

    /// Distance from the seed. Seeds are 0.
    pub depth: u32,

    /// Query or resource locator to execute.
    pub target: String,

    /// Caller-supplied id from the seed line (`query #!# id`), inherited by
    /// every descendant.
    pub input_id: Option<String>,

    /// Shared execution parameters. Opaque to the core.
    pub params: Params,

    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a depth-0 seed item.
    pub fn seed(target: impl Into<String>, params: Params, input_id: Option<String>) -> Self {
        Self {
            id: WorkId::new(),
            parent_id: None,
            depth: 0,
            target: target.into(),
            input_id,
            params,
            created_at: Utc::now(),
        }
    }

    /// Derive a child item one level deeper.
    ///
    /// Returns `None` when the child would exceed `max_depth`; such an item
    /// is never constructed.
    pub fn spawn_child(&self, spec: ChildSpec, max_depth: u32) -> Option<WorkItem> {
        let depth = self.depth + 1;
        if depth > max_depth {
            return None;
        }

        Some(WorkItem {
            id: WorkId::new(),
            parent_id: Some(self.id),
            depth,
            target: spec.target,
            input_id: self.input_id.clone(),
            params: spec.params.unwrap_or_else(|| self.params.clone()),
            created_at: Utc::now(),
        })
    }

    pub fn is_seed(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

/// A child the executor asks the pipeline to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSpec {
    pub target: String,
    /// Overrides the parent's parameters. None inherits them unchanged.
    #[serde(default)]
    pub params: Option<Params>,
}

impl ChildSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            params: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Per-run execution parameters, copied from the seed onto every descendant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub lang: String,
    pub geo: Option<GeoPoint>,
    pub zoom: u8,
    pub radius: f64,
    pub email: bool,
    pub extra_reviews: bool,
    pub fast_mode: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            geo: None,
            zoom: 15,
            radius: 10_000.0,
            email: false,
            extra_reviews: false,
            fast_mode: false,
        }
    }
}

/// A latitude/longitude pair, written `lat,lon` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl std::str::FromStr for GeoPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| Error::Config(format!("invalid geo coordinates: {s}")))?;

        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid latitude: {lat}")))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid longitude: {lon}")))?;

        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::Config(format!("latitude out of range: {lat}")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::Config(format!("longitude out of range: {lon}")));
        }

        Ok(Self { lat, lon })
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint + Entity
// ---------------------------------------------------------------------------

/// Identity key. Equal identities yield equal fingerprints no matter which
/// work item discovered them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a discovered entity from its stable identifier.
    ///
    /// Identifiers are case-sensitive (`ChIJ...` place ids), so the key is
    /// only trimmed.
    pub fn entity(key: &str) -> Self {
        Self(format!("entity:{}", key.trim()))
    }

    /// Fingerprint of a seed query. Case and runs of whitespace are folded,
    /// so `Coffee  Berlin` and `coffee berlin` are the same query.
    pub fn query(query: &str) -> Self {
        Self(format!("query:{}", normalize(query)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase and collapse runs of whitespace to a single space.
fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// An entity discovered while executing a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier (e.g. a place id). Source of the fingerprint.
    pub key: String,
    /// Extracted fields. Opaque to the core.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Entity {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::entity(&self.key)
    }
}

/// What the writer receives for each entity that passed the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub work_id: WorkId,
    pub input_id: Option<String>,
    pub query: String,
    pub depth: u32,
    pub key: String,
    pub data: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(item: &WorkItem, entity: Entity) -> Self {
        Self {
            work_id: item.id,
            input_id: item.input_id.clone(),
            query: item.target.clone(),
            depth: item.depth,
            key: entity.key,
            data: entity.data,
            discovered_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Lifecycle event reported by the pipeline to the quiescence monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A child item was created and queued.
    Spawned { id: WorkId, parent_id: WorkId },
    /// An item finished successfully.
    Completed { id: WorkId },
    /// An item finished with an error. Counts as done.
    Failed { id: WorkId },
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Spawned { .. } => EventKind::Spawned,
            LifecycleEvent::Completed { .. } => EventKind::Completed,
            LifecycleEvent::Failed { .. } => EventKind::Failed,
        }
    }

    pub fn id(&self) -> WorkId {
        match *self {
            LifecycleEvent::Spawned { id, .. }
            | LifecycleEvent::Completed { id }
            | LifecycleEvent::Failed { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Spawned,
    Completed,
    Failed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Spawned => "spawned",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Run State
// ---------------------------------------------------------------------------

/// Lifecycle state of one run, owned by the quiescence monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Monitor created, seed count not yet known.
    Idle,
    /// Seeds primed, no lifecycle event seen yet.
    Active,
    /// At least one event seen, work still outstanding.
    Draining,
    /// Outstanding count reached zero.
    Quiescent,
    /// Cancel hook is firing.
    Cancelling,
    /// Hook returned. Terminal.
    Closed,
}

impl RunState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, to),
            (Idle, Active)
                | (Idle, Quiescent)       // primed with zero seeds
                | (Idle, Cancelling)      // interrupted before priming
                | (Active, Draining)
                | (Active, Quiescent)
                | (Active, Cancelling)    // inactivity timeout or interrupt
                | (Draining, Quiescent)
                | (Draining, Cancelling)  // inactivity timeout or interrupt
                | (Quiescent, Cancelling)
                | (Cancelling, Closed)
        )
    }

    /// Has the cancel hook already been (or being) invoked?
    pub fn is_shutting_down(self) -> bool {
        matches!(self, RunState::Cancelling | RunState::Closed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Active => "active",
            RunState::Draining => "draining",
            RunState::Quiescent => "quiescent",
            RunState::Cancelling => "cancelling",
            RunState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Exit Reason
// ---------------------------------------------------------------------------

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every item reached a terminal event.
    Quiescent,
    /// No event arrived within the inactivity window.
    Stalled,
    /// The surrounding context was cancelled (signal, caller).
    Interrupted,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Quiescent => "quiescent",
            ExitReason::Stalled => "stalled",
            ExitReason::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
