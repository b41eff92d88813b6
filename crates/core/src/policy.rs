//! Deadline policy - pure due checks per entity family.
//!
//! Every function here is total: a malformed record yields
//! [`Verdict::Malformed`] instead of an error, so one bad row never blocks
//! the rest of a batch.

use crate::offer::{Offer, OfferStatus};
use crate::process::{Process, ProcessStatus};
use crate::Time;

/// Outcome of evaluating an entity against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Must transition now
    Due,
    /// Still live, or already terminal
    NotDue,
    /// Record cannot be evaluated; never due
    Malformed(Malformed),
}

/// Why a record could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    /// Duration below zero
    #[error("negative duration: {0} minutes")]
    NegativeDuration(i64),

    /// `start_at + duration` leaves the representable range
    #[error("end time out of range")]
    EndOutOfRange,
}

/// `OPEN && now >= deadline`.
pub fn offer_verdict(offer: &Offer, now: Time) -> Verdict {
    if offer.status == OfferStatus::Open && now >= offer.deadline {
        Verdict::Due
    } else {
        Verdict::NotDue
    }
}

/// `RUNNING && now >= start_at && now >= start_at + duration`.
///
/// The started guard runs first; it is the same comparison the store pushes
/// down, so a process that has not started is never due whatever its
/// duration says.
pub fn process_verdict(process: &Process, now: Time) -> Verdict {
    if process.status != ProcessStatus::Running || now < process.start_at {
        return Verdict::NotDue;
    }
    if process.duration_minutes < 0 {
        return Verdict::Malformed(Malformed::NegativeDuration(process.duration_minutes));
    }
    match process.end_at() {
        Some(end_at) if now >= end_at => Verdict::Due,
        Some(_) => Verdict::NotDue,
        None => Verdict::Malformed(Malformed::EndOutOfRange),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OfferId;
    use chrono::{Duration, TimeZone, Utc};

    fn at(h: u32, m: u32, s: u32) -> Time {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn offer_due_exactly_at_deadline() {
        let deadline = at(12, 0, 0);
        let offer = Offer::new(deadline);

        assert_eq!(offer_verdict(&offer, deadline), Verdict::Due);
        assert_eq!(
            offer_verdict(&offer, deadline - Duration::seconds(1)),
            Verdict::NotDue
        );
        assert_eq!(
            offer_verdict(&offer, deadline - Duration::milliseconds(1)),
            Verdict::NotDue
        );
        assert_eq!(
            offer_verdict(&offer, deadline + Duration::days(30)),
            Verdict::Due
        );
    }

    #[test]
    fn closed_offer_is_never_due() {
        let offer = Offer::with_status(OfferId::new(), OfferStatus::Closed, at(0, 0, 0));
        for now in [at(0, 0, 0), at(23, 59, 59)] {
            assert_eq!(offer_verdict(&offer, now), Verdict::NotDue);
        }
    }

    #[test]
    fn offer_predicate_matches_definition() {
        let deadline = at(6, 0, 0);
        for status in [OfferStatus::Open, OfferStatus::Closed] {
            let offer = Offer::with_status(OfferId::new(), status, deadline);
            for offset in -3..=3 {
                let now = deadline + Duration::seconds(offset);
                let expected = status == OfferStatus::Open && now >= deadline;
                assert_eq!(offer_verdict(&offer, now) == Verdict::Due, expected);
            }
        }
    }

    #[test]
    fn process_due_once_duration_elapsed() {
        let process = Process::new(at(10, 0, 0), 30);

        assert_eq!(process_verdict(&process, at(9, 59, 59)), Verdict::NotDue);
        assert_eq!(process_verdict(&process, at(10, 0, 0)), Verdict::NotDue);
        assert_eq!(process_verdict(&process, at(10, 29, 59)), Verdict::NotDue);
        assert_eq!(process_verdict(&process, at(10, 30, 0)), Verdict::Due);
    }

    #[test]
    fn zero_duration_is_due_at_start() {
        let process = Process::new(at(10, 0, 0), 0);
        assert_eq!(process_verdict(&process, at(10, 0, 0)), Verdict::Due);
        assert_eq!(process_verdict(&process, at(9, 59, 59)), Verdict::NotDue);
    }

    #[test]
    fn future_start_never_due_even_with_past_end() {
        let now = at(12, 0, 0);
        let process = Process::new(now + Duration::hours(1), -120);

        // start + duration lands an hour before now
        assert!(process.end_at().unwrap() < now);
        assert_eq!(process_verdict(&process, now), Verdict::NotDue);
    }

    #[test]
    fn negative_duration_after_start_is_malformed() {
        let process = Process::new(at(10, 0, 0), -5);
        assert_eq!(
            process_verdict(&process, at(11, 0, 0)),
            Verdict::Malformed(Malformed::NegativeDuration(-5))
        );
    }

    #[test]
    fn overflowing_duration_is_malformed() {
        let process = Process::new(at(10, 0, 0), i64::MAX);
        assert_eq!(
            process_verdict(&process, at(11, 0, 0)),
            Verdict::Malformed(Malformed::EndOutOfRange)
        );
    }

    #[test]
    fn finished_process_is_never_due() {
        let mut process = Process::new(at(10, 0, 0), 1);
        process.status = ProcessStatus::Finished;
        assert_eq!(process_verdict(&process, at(23, 0, 0)), Verdict::NotDue);
    }
}
