//! Lapse core data models.
//!
//! This crate defines the schedulable entity families, the pure deadline
//! policy that decides when they are due, and the clock the scheduler reads.

#![warn(missing_docs)]

// Core identities
mod id;

// Entity families
mod family;
mod offer;
mod process;

// Time and policy
mod clock;
mod policy;

// Re-exports
pub use id::*;

pub use family::{Family, LifecycleStatus, Schedulable};
pub use offer::{Offer, OfferStatus};
pub use process::{Process, ProcessStatus};

pub use clock::{Clock, ManualClock, SystemClock};
pub use policy::{offer_verdict, process_verdict, Malformed, Verdict};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
