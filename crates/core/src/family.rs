//! Traits shared by every schedulable entity family.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::policy::Verdict;
use crate::Time;

/// The entity families the scheduler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Offers closed at a fixed deadline
    Offer,
    /// Processes finished once their duration has elapsed
    Process,
}

impl Family {
    /// Lowercase name used in logs, config and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Offer => "offer",
            Family::Process => "process",
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offer" | "offers" => Ok(Family::Offer),
            "process" | "processes" => Ok(Family::Process),
            other => Err(format!("unknown entity family: {other}")),
        }
    }
}

/// A two-state lifecycle: one live status and one terminal status.
///
/// Transitions only ever go from `LIVE` to `TERMINAL`.
pub trait LifecycleStatus:
    Copy + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// Status an entity is created with.
    const LIVE: Self;
    /// Status the scheduler moves an entity into.
    const TERMINAL: Self;

    /// Whether this is the terminal status.
    fn is_terminal(self) -> bool {
        self == Self::TERMINAL
    }

    /// Stable storage representation.
    fn as_str(self) -> &'static str;

    /// Parse the storage representation.
    fn parse(s: &str) -> Option<Self>;
}

/// An entity whose validity is bounded in time.
pub trait Schedulable:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Identifier type.
    type Id: Copy
        + Eq
        + Ord
        + Hash
        + Debug
        + Display
        + FromStr<Err = ulid::DecodeError>
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;

    /// Lifecycle status type.
    type Status: LifecycleStatus;

    /// Family tag.
    const FAMILY: Family;

    /// Entity identifier.
    fn id(&self) -> Self::Id;

    /// Current status.
    fn status(&self) -> Self::Status;

    /// Timestamp the store-side coarse filter compares with `now`.
    fn coarse_time(&self) -> Time;

    /// Precise deadline verdict at `now`.
    fn verdict(&self, now: Time) -> Verdict;

    /// Set the status and stamp `updated_at`.
    fn mark(&mut self, status: Self::Status, at: Time);
}
