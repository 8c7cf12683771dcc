use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn system_clock() -> NowProvider {
    Arc::new(Utc::now)
}

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// `now`, or one millisecond past `previous` when the clock has not moved.
pub fn advance_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let first = next_id("tsk");
        let second = next_id("tsk");
        assert!(first.starts_with("tsk-"));
        assert_ne!(first, second);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let previous = Utc::now();
        let bumped = advance_timestamp(previous, previous - Duration::seconds(5));
        assert!(bumped > previous);
        let later = previous + Duration::seconds(1);
        assert_eq!(advance_timestamp(previous, later), later);
    }
}
