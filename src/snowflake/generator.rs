use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::core::Result;
use crate::snowflake::{Id, SnowflakeLayout};

/// Millisecond clock. Injectable so tests can move time by hand.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

struct GeneratorState {
    /// Timestamp of the most recent issue, unset until the first call.
    last_timestamp_ms: Option<i64>,
    sequence: i64,
}

/// Process-wide snowflake identifier generator.
///
/// Hands out unique, time-ordered identifiers. The whole
/// read-check-increment-store decision runs under one mutex; concurrent
/// unsynchronized access could issue duplicate or out-of-order ids.
///
/// `next()` never fails: backward clock movement and sequence
/// exhaustion are absorbed by bounded waiting.
pub struct SnowflakeGenerator {
    layout: SnowflakeLayout,
    state: Mutex<GeneratorState>,
    clock: Clock,
}

impl SnowflakeGenerator {
    /// Build a generator, validating the layout. Layout problems are
    /// startup-time configuration errors, never per-call ones.
    pub fn new(layout: SnowflakeLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self::unchecked(layout, system_clock()))
    }

    /// Build a generator with a custom clock. Skips the wall-clock part
    /// of validation since the clock may be artificial.
    pub fn with_clock(layout: SnowflakeLayout, clock: Clock) -> Self {
        Self::unchecked(layout, clock)
    }

    fn unchecked(layout: SnowflakeLayout, clock: Clock) -> Self {
        Self {
            layout,
            state: Mutex::new(GeneratorState {
                last_timestamp_ms: None,
                sequence: 0,
            }),
            clock,
        }
    }

    pub fn layout(&self) -> &SnowflakeLayout {
        &self.layout
    }

    /// Issue the next identifier.
    pub async fn next(&self) -> Id {
        let mut state = self.state.lock().await;

        loop {
            let now = (self.clock)();
            let last = state.last_timestamp_ms;

            if let Some(last) = last {
                if now < last {
                    // Identifiers must never be issued out of timestamp
                    // order; wait until real time catches up.
                    warn!(last_timestamp_ms = last, now, "clock is moving backwards, waiting");
                    tokio::time::sleep(Duration::from_millis((last - now) as u64)).await;
                    continue;
                }

                if now == last {
                    state.sequence = (state.sequence + 1) & self.layout.sequence_mask;
                    if state.sequence == 0 {
                        // This millisecond is exhausted.
                        warn!(timestamp_ms = now, "sequence overflow, waiting for next tick");
                        state.sequence = self.layout.sequence_mask;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        continue;
                    }
                } else {
                    state.sequence = 0;
                }
            } else {
                state.sequence = 0;
            }

            state.last_timestamp_ms = Some(now);
            return self
                .layout
                .compose(now, self.layout.machine_id, state.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn stepping_clock(start: i64) -> (Clock, Arc<AtomicI64>) {
        let t = Arc::new(AtomicI64::new(start));
        let handle = Arc::clone(&t);
        let clock: Clock = Arc::new(move || t.load(Ordering::SeqCst));
        (clock, handle)
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing_within_a_millisecond() {
        let (clock, _) = stepping_clock(crate::snowflake::layout::DEFAULT_EPOCH_MS + 5_000);
        let generator = SnowflakeGenerator::with_clock(SnowflakeLayout::default(), clock);

        let a = generator.next().await;
        let b = generator.next().await;
        let c = generator.next().await;

        assert!(a < b && b < c);
        assert_eq!(generator.layout().sequence_of(a), 0);
        assert_eq!(generator.layout().sequence_of(b), 1);
        assert_eq!(generator.layout().sequence_of(c), 2);
    }

    #[tokio::test]
    async fn test_sequence_resets_on_new_millisecond() {
        let (clock, time) = stepping_clock(crate::snowflake::layout::DEFAULT_EPOCH_MS + 5_000);
        let generator = SnowflakeGenerator::with_clock(SnowflakeLayout::default(), clock);

        let _ = generator.next().await;
        let _ = generator.next().await;
        time.fetch_add(1, Ordering::SeqCst);
        let id = generator.next().await;

        assert_eq!(generator.layout().sequence_of(id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_clock_never_goes_backwards() {
        let start = crate::snowflake::layout::DEFAULT_EPOCH_MS + 10_000;
        let time = Arc::new(AtomicI64::new(start));
        let handle = Arc::clone(&time);
        // The fake clock advances with tokio's paused time, so the wait
        // loop terminates as soon as the generator has slept past the
        // regression.
        let base = tokio::time::Instant::now();
        let clock: Clock = Arc::new(move || {
            handle.load(Ordering::SeqCst) + base.elapsed().as_millis() as i64
        });
        let generator = SnowflakeGenerator::with_clock(SnowflakeLayout::default(), clock);

        let a = generator.next().await;
        // Yank the clock 50ms into the past between calls.
        time.fetch_sub(50, Ordering::SeqCst);
        let b = generator.next().await;

        let layout = generator.layout();
        assert!(layout.timestamp_of(b) >= layout.timestamp_of(a));
        assert_ne!(a, b);
    }
}
