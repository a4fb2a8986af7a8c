use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Notes currently sounding, after transposition, for the presentation layer.
///
/// The owner mutates it and publishes an immutable snapshot; readers only see
/// snapshots. Counts are kept per pitch so two channels sounding the same
/// note keep it lit until both are released.
#[derive(Debug)]
pub struct NoteDisplay {
    counts: BTreeMap<u8, usize>,
    published: Arc<ArcSwap<BTreeSet<u8>>>,
}

/// Read side of a [`NoteDisplay`].
#[derive(Debug, Clone)]
pub struct DisplayReader {
    published: Arc<ArcSwap<BTreeSet<u8>>>,
}

impl NoteDisplay {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
            published: Arc::new(ArcSwap::from_pointee(BTreeSet::new())),
        }
    }

    pub fn reader(&self) -> DisplayReader {
        DisplayReader {
            published: self.published.clone(),
        }
    }

    pub fn insert(&mut self, note: u8) {
        *self.counts.entry(note).or_insert(0) += 1;
        self.publish();
    }

    pub fn remove(&mut self, note: u8) {
        if let Some(count) = self.counts.get_mut(&note) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&note);
            }
            self.publish();
        }
    }

    pub fn clear(&mut self) {
        if !self.counts.is_empty() {
            self.counts.clear();
            self.publish();
        }
    }

    pub fn contains(&self, note: u8) -> bool {
        self.counts.contains_key(&note)
    }

    fn publish(&self) {
        self.published
            .store(Arc::new(self.counts.keys().copied().collect()));
    }
}

impl Default for NoteDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayReader {
    pub fn snapshot(&self) -> Arc<BTreeSet<u8>> {
        self.published.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_sees_published_notes() {
        let mut display = NoteDisplay::new();
        let reader = display.reader();

        display.insert(60);
        display.insert(64);
        assert_eq!(*reader.snapshot(), BTreeSet::from([60, 64]));

        display.remove(60);
        assert_eq!(*reader.snapshot(), BTreeSet::from([64]));
    }

    #[test]
    fn test_same_pitch_on_two_channels() {
        let mut display = NoteDisplay::new();
        display.insert(60);
        display.insert(60);
        display.remove(60);
        assert!(display.contains(60));
        display.remove(60);
        assert!(!display.contains(60));
        display.remove(60);
        assert!(display.reader().snapshot().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut display = NoteDisplay::new();
        let reader = display.reader();
        display.insert(1);
        display.insert(2);
        display.clear();
        assert!(reader.snapshot().is_empty());
    }
}
