use std::sync::Arc;

use crate::events::{Event, TimedEvent};

/// Immutable, absolutely-timed event list shared between transports.
#[derive(Debug, Clone)]
pub struct EventSequence {
    events: Arc<[TimedEvent]>,
}

impl EventSequence {
    /// Accumulates relative delays into absolute times and sorts the result.
    ///
    /// Negative, NaN or infinite delays count as zero so the timeline never
    /// jumps backwards. The sort is stable, so events sharing a timestamp keep
    /// the order they were encountered in (chord note-ons before the
    /// following note-offs).
    pub fn build<I>(delays: I) -> Self
    where
        I: IntoIterator<Item = (f64, Event)>,
    {
        let mut absolute_time = 0.0;
        let mut events: Vec<TimedEvent> = delays
            .into_iter()
            .map(|(delay, event)| {
                absolute_time += sanitize_delay(delay);
                TimedEvent {
                    time: absolute_time,
                    event,
                }
            })
            .collect();

        events.sort_by(|a, b| a.time.total_cmp(&b.time));

        Self {
            events: events.into(),
        }
    }

    pub fn empty() -> Self {
        Self {
            events: Arc::new([]),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimedEvent> {
        self.events.get(index)
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn total_duration(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.time)
    }

    /// Index of the first event strictly later than `time`.
    pub fn first_after(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time <= time)
    }
}

fn sanitize_delay(delay: f64) -> f64 {
    if delay.is_finite() && delay > 0.0 {
        delay
    } else {
        0.0
    }
}
