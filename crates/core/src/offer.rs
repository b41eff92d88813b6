//! Offer model - open until a fixed deadline.

use serde::{Deserialize, Serialize};

use crate::family::{Family, LifecycleStatus, Schedulable};
use crate::id::OfferId;
use crate::policy::{offer_verdict, Verdict};
use crate::Time;

/// An offer accepts responses until its deadline passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Unique identifier
    pub id: OfferId,

    /// Current status
    pub status: OfferStatus,

    /// Instant the offer closes; immutable after creation
    pub deadline: Time,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Offer {
    /// Create an open offer closing at `deadline`.
    pub fn new(deadline: Time) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: OfferId::new(),
            status: OfferStatus::Open,
            deadline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an offer with an explicit id and status.
    pub fn with_status(id: OfferId, status: OfferStatus, deadline: Time) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            status,
            deadline,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Offer lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    /// Accepting responses
    Open,
    /// Closed for good
    Closed,
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LifecycleStatus for OfferStatus {
    const LIVE: Self = OfferStatus::Open;
    const TERMINAL: Self = OfferStatus::Closed;

    fn as_str(self) -> &'static str {
        match self {
            OfferStatus::Open => "OPEN",
            OfferStatus::Closed => "CLOSED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(OfferStatus::Open),
            "CLOSED" => Some(OfferStatus::Closed),
            _ => None,
        }
    }
}

impl Schedulable for Offer {
    type Id = OfferId;
    type Status = OfferStatus;

    const FAMILY: Family = Family::Offer;

    fn id(&self) -> OfferId {
        self.id
    }

    fn status(&self) -> OfferStatus {
        self.status
    }

    fn coarse_time(&self) -> Time {
        self.deadline
    }

    fn verdict(&self, now: Time) -> Verdict {
        offer_verdict(self, now)
    }

    fn mark(&mut self, status: OfferStatus, at: Time) {
        self.status = status;
        self.updated_at = at;
    }
}
