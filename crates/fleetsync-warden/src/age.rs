//! Age gate helpers.
//!
//! Drift is acted on only once it has persisted for the whole age gate. A
//! record is mature when `now - timestamp >= gate`.

use chrono::{DateTime, TimeDelta, Utc};

/// Returns true once `gate` has elapsed since `timestamp`.
#[must_use]
pub fn is_mature(timestamp: DateTime<Utc>, now: DateTime<Utc>, gate: TimeDelta) -> bool {
    now.signed_duration_since(timestamp) >= gate
}

/// Returns the item with the latest timestamp.
pub fn youngest<'a, I, F>(items: &'a [I], timestamp: F) -> Option<&'a I>
where
    F: Fn(&I) -> DateTime<Utc>,
{
    items.iter().max_by_key(|item| timestamp(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maturity_truth_table() {
        let now = Utc::now();
        let gate = TimeDelta::minutes(5);
        let cases = [
            (TimeDelta::zero(), false),
            (TimeDelta::minutes(4), false),
            (TimeDelta::minutes(5) - TimeDelta::milliseconds(1), false),
            (TimeDelta::minutes(5), true),
            (TimeDelta::minutes(6), true),
            (TimeDelta::hours(1), true),
            // clock skew: a timestamp from the future is never mature
            (TimeDelta::minutes(-10), false),
        ];
        for (age, mature) in cases {
            assert_eq!(is_mature(now - age, now, gate), mature, "age {age}");
        }
    }

    #[test]
    fn zero_gate_is_always_mature() {
        let now = Utc::now();
        assert!(is_mature(now, now, TimeDelta::zero()));
    }

    #[test]
    fn youngest_picks_latest() {
        let now = Utc::now();
        let items = [now - TimeDelta::hours(2), now, now - TimeDelta::hours(1)];
        assert_eq!(youngest(&items, |t| *t), Some(&now));
        assert_eq!(youngest::<DateTime<Utc>, _>(&[], |t| *t), None);
    }
}
