//! Compose records keyed by uuid.

use crate::target::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;
use weldr_schema::{Blueprint, PackageSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComposeState {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl ComposeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ComposeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComposeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            other => Err(other.to_owned()),
        }
    }
}

/// Why a compose failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeFailure {
    pub kind: String,
    pub reason: String,
}

impl ComposeFailure {
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    pub id: Uuid,
    pub blueprint: Blueprint,
    pub image_type: String,
    #[serde(default)]
    pub distro: String,
    #[serde(default)]
    pub arch: String,
    pub image_size: u64,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub job_id: Option<Uuid>,
    pub state: ComposeState,
    pub job_created: DateTime<Utc>,
    #[serde(default)]
    pub job_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub job_finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<ComposeFailure>,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
    #[serde(default)]
    pub manifest: serde_json::Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Compose {
    pub fn new(
        id: Uuid,
        blueprint: Blueprint,
        image_type: impl Into<String>,
        image_size: u64,
    ) -> Self {
        Self {
            id,
            blueprint,
            image_type: image_type.into(),
            distro: String::new(),
            arch: String::new(),
            image_size,
            targets: Vec::new(),
            job_id: None,
            state: ComposeState::Waiting,
            job_created: Utc::now(),
            job_started: None,
            job_finished: None,
            error: None,
            packages: Vec::new(),
            manifest: serde_json::Value::Null,
            extra: BTreeMap::new(),
        }
    }
}

/// All compose records behind a single mutex.
#[derive(Debug, Default)]
pub struct ComposeRegistry {
    inner: Mutex<BTreeMap<Uuid, Compose>>,
}

impl ComposeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(composes: BTreeMap<Uuid, Compose>) -> Self {
        Self {
            inner: Mutex::new(composes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Uuid, Compose>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> BTreeMap<Uuid, Compose> {
        self.lock().clone()
    }

    pub fn insert(&self, compose: Compose) {
        self.lock().insert(compose.id, compose);
    }

    pub fn get(&self, id: Uuid) -> Option<Compose> {
        self.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> Option<Compose> {
        self.lock().remove(&id)
    }

    /// Every compose, ordered by uuid.
    pub fn all(&self) -> Vec<Compose> {
        self.lock().values().cloned().collect()
    }

    /// `(compose id, job id)` of every compose that is not yet terminal.
    pub fn pending_jobs(&self) -> Vec<(Uuid, Uuid)> {
        self.lock()
            .values()
            .filter(|c| !c.state.is_terminal())
            .filter_map(|c| c.job_id.map(|job| (c.id, job)))
            .collect()
    }

    /// Run `f` on the compose under the registry lock.
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Compose) -> R) -> Option<R> {
        self.lock().get_mut(&id).map(f)
    }

    /// Remove the compose when `check` accepts it; otherwise return the
    /// check's error and leave the record in place.
    pub fn remove_if<E>(
        &self,
        id: Uuid,
        check: impl FnOnce(&Compose) -> Result<(), E>,
    ) -> Option<Result<Compose, E>> {
        let mut map = self.lock();
        let compose = map.get(&id)?;
        if let Err(e) = check(compose) {
            return Some(Err(e));
        }
        map.remove(&id).map(Ok)
    }
}
