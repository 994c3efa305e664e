//! Completion tracking of frames received in several items (ports).

use crate::error::{AffinityError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Weak;
use tracing::trace;

/// Notified once every item of a frame is finished.
pub trait FrameFinishedCallback: Send + Sync {
    fn frame_finished(&self, frame: i64);
}

/// Per-frame set of items still pending.
///
/// `last_seq_finished_frame` is the highest frame such that it and all the
/// previous ones are finished; frames finished out of order wait in
/// `non_seq_finished_frames` until the gap closes.
pub struct FrameMap {
    nb_items: usize,
    pending: BTreeMap<i64, BTreeSet<usize>>,
    last_seq_finished_frame: i64,
    non_seq_finished_frames: BTreeSet<i64>,
    callback: Option<Weak<dyn FrameFinishedCallback>>,
}

impl Default for FrameMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMap {
    pub fn new() -> Self {
        Self {
            nb_items: 0,
            pending: BTreeMap::new(),
            last_seq_finished_frame: -1,
            non_seq_finished_frames: BTreeSet::new(),
            callback: None,
        }
    }

    pub fn set_nb_items(&mut self, nb_items: usize) {
        self.nb_items = nb_items;
    }

    pub fn nb_items(&self) -> usize {
        self.nb_items
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.non_seq_finished_frames.clear();
        self.last_seq_finished_frame = -1;
    }

    pub fn set_callback(&mut self, callback: Option<Weak<dyn FrameFinishedCallback>>) {
        self.callback = callback;
    }

    pub fn last_seq_finished_frame(&self) -> i64 {
        self.last_seq_finished_frame
    }

    pub fn non_seq_finished_frames(&self) -> &BTreeSet<i64> {
        &self.non_seq_finished_frames
    }

    /// Items not yet finished for `frame`; empty when the frame was never
    /// seen or is already finished.
    pub fn frame_pending_items(&self, frame: i64) -> Vec<usize> {
        self.pending
            .get(&frame)
            .map(|items| items.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Records `item` of `frame` as finished. Returns true when this
    /// completed the frame.
    pub fn frame_item_finished(&mut self, frame: i64, item: usize) -> Result<bool> {
        if self.nb_items == 0 {
            return Err(AffinityError::FrameMap("no items defined".into()));
        }
        if item >= self.nb_items {
            return Err(AffinityError::FrameMap(format!(
                "invalid item {} (nb_items={})",
                item, self.nb_items
            )));
        }
        if self.is_finished(frame) {
            return Err(AffinityError::FrameMap(format!(
                "item {} already finished for frame {}",
                item, frame
            )));
        }

        let nb_items = self.nb_items;
        let items = self
            .pending
            .entry(frame)
            .or_insert_with(|| (0..nb_items).collect());
        if !items.remove(&item) {
            return Err(AffinityError::FrameMap(format!(
                "item {} already finished for frame {}",
                item, frame
            )));
        }
        if !items.is_empty() {
            return Ok(false);
        }
        self.pending.remove(&frame);

        if frame == self.last_seq_finished_frame + 1 {
            self.last_seq_finished_frame = frame;
            while self.non_seq_finished_frames.remove(&(self.last_seq_finished_frame + 1)) {
                self.last_seq_finished_frame += 1;
            }
        } else {
            self.non_seq_finished_frames.insert(frame);
        }
        trace!("frame {} finished", frame);

        if let Some(cb) = self.callback.as_ref().and_then(Weak::upgrade) {
            cb.frame_finished(frame);
        }
        Ok(true)
    }

    fn is_finished(&self, frame: i64) -> bool {
        frame <= self.last_seq_finished_frame || self.non_seq_finished_frames.contains(&frame)
    }
}

impl fmt::Display for FrameMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<nb_items={}, last_seq_finished_frame={}, non_seq_finished_frames={:?}, pending={:?}>",
            self.nb_items, self.last_seq_finished_frame, self.non_seq_finished_frames, self.pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collect(Mutex<Vec<i64>>);

    impl FrameFinishedCallback for Collect {
        fn frame_finished(&self, frame: i64) {
            self.0.lock().unwrap().push(frame);
        }
    }

    fn map(nb_items: usize) -> FrameMap {
        let mut m = FrameMap::new();
        m.set_nb_items(nb_items);
        m
    }

    #[test]
    fn test_no_items_defined() {
        let mut m = FrameMap::new();
        assert!(matches!(m.frame_item_finished(0, 0), Err(AffinityError::FrameMap(_))));
    }

    #[test]
    fn test_item_out_of_range() {
        let mut m = map(2);
        let err = m.frame_item_finished(0, 2).unwrap_err();
        assert!(err.to_string().contains("nb_items=2"));
    }

    #[test]
    fn test_frame_finished_when_all_items_done() {
        let mut m = map(3);
        assert!(!m.frame_item_finished(0, 1).unwrap());
        assert_eq!(m.frame_pending_items(0), vec![0, 2]);
        assert!(!m.frame_item_finished(0, 0).unwrap());
        assert!(m.frame_item_finished(0, 2).unwrap());
        assert_eq!(m.last_seq_finished_frame(), 0);
        assert!(m.frame_pending_items(0).is_empty());
    }

    #[test]
    fn test_duplicate_item() {
        let mut m = map(2);
        m.frame_item_finished(4, 1).unwrap();
        let err = m.frame_item_finished(4, 1).unwrap_err();
        assert!(err.to_string().contains("already finished"));

        m.frame_item_finished(4, 0).unwrap();
        assert!(m.frame_item_finished(4, 0).is_err());
    }

    #[test]
    fn test_single_item_finishes_immediately() {
        let mut m = map(1);
        assert!(m.frame_item_finished(0, 0).unwrap());
        assert!(m.frame_item_finished(1, 0).unwrap());
        assert_eq!(m.last_seq_finished_frame(), 1);
    }

    #[test]
    fn test_out_of_order_frames() {
        let mut m = map(1);
        m.frame_item_finished(2, 0).unwrap();
        m.frame_item_finished(1, 0).unwrap();
        assert_eq!(m.last_seq_finished_frame(), -1);
        assert_eq!(m.non_seq_finished_frames().iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        m.frame_item_finished(0, 0).unwrap();
        assert_eq!(m.last_seq_finished_frame(), 2);
        assert!(m.non_seq_finished_frames().is_empty());

        m.clear();
        assert_eq!(m.last_seq_finished_frame(), -1);
    }

    #[test]
    fn test_callback() {
        let cb = Arc::new(Collect::default());
        let weak = Arc::downgrade(&cb);
        let weak: Weak<dyn FrameFinishedCallback> = weak;
        let mut m = map(2);
        m.set_callback(Some(weak));

        m.frame_item_finished(1, 0).unwrap();
        m.frame_item_finished(1, 1).unwrap();
        m.frame_item_finished(0, 1).unwrap();
        m.frame_item_finished(0, 0).unwrap();
        assert_eq!(*cb.0.lock().unwrap(), vec![1, 0]);

        drop(cb);
        m.frame_item_finished(2, 0).unwrap();
        assert!(m.frame_item_finished(2, 1).unwrap());
    }
}
