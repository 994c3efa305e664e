//! Detection of the end of image post-processing.
//!
//! The image pipeline reports per-frame progress through
//! [`ProcessingFinishedEvent::image_status_changed`]. Once every counter
//! reached the last frame, the owning manager is told through a weak
//! [`ProcessingFinishedListener`] handle. Callbacks are rate limited since
//! each may trigger affinity changes.

use crate::error::{AffinityError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Default minimum interval between two handled status callbacks.
pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Progress counters of an acquisition; -1 means no frame yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStatus {
    pub last_image_acquired: i64,
    pub last_image_ready: i64,
    pub last_counter_ready: i64,
    pub last_image_saved: i64,
}

impl Default for ImageStatus {
    fn default() -> Self {
        Self {
            last_image_acquired: -1,
            last_image_ready: -1,
            last_counter_ready: -1,
            last_image_saved: -1,
        }
    }
}

impl ImageStatus {
    /// Every counter at `frame`.
    pub fn all_at(frame: i64) -> Self {
        Self {
            last_image_acquired: frame,
            last_image_ready: frame,
            last_counter_ready: frame,
            last_image_saved: frame,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingMode {
    #[default]
    Manual,
    AutoFrame,
    AutoHeader,
}

/// Acquisition control queried when an acquisition is prepared.
pub trait AcqControl: Send + Sync {
    fn acq_nb_frames(&self) -> u64;

    /// True when an external counting (sink) task is active.
    fn sink_task_active(&self) -> bool;

    fn saving_mode(&self) -> SavingMode;
}

/// Receives the end-of-processing notification.
pub trait ProcessingFinishedListener: Send + Sync {
    fn lima_finished(&self) -> Result<()>;
}

/// Per-acquisition parameters of the completion test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcqProgress {
    pub nb_frames: u64,
    pub cnt_act: bool,
    pub saving_act: bool,
    pub stopped: bool,
}

impl AcqProgress {
    pub fn is_finished(&self, status: &ImageStatus) -> bool {
        let max_frame = self.nb_frames as i64 - 1;
        let last_frame = status.last_image_acquired;
        let mut finished = self.stopped || last_frame == max_frame;
        finished &= status.last_image_ready == last_frame;
        finished &= !self.cnt_act || status.last_counter_ready == last_frame;
        finished &= self.stopped || !self.saving_act || status.last_image_saved == last_frame;
        finished
    }
}

struct EventState {
    progress: AcqProgress,
    last_cb_ts: Instant,
    control: Option<Arc<dyn AcqControl>>,
}

pub struct ProcessingFinishedEvent {
    listener: Weak<dyn ProcessingFinishedListener>,
    min_update_interval: Duration,
    state: Mutex<EventState>,
}

impl ProcessingFinishedEvent {
    pub fn new(listener: Weak<dyn ProcessingFinishedListener>, min_update_interval: Duration) -> Self {
        Self {
            listener,
            min_update_interval,
            state: Mutex::new(EventState {
                progress: AcqProgress::default(),
                last_cb_ts: Instant::now(),
                control: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventState> {
        self.state.lock().expect("processing event lock poisoned")
    }

    pub fn register_status_callback(&self, control: Arc<dyn AcqControl>) -> Result<()> {
        let mut state = self.lock();
        if state.control.is_some() {
            return Err(AffinityError::AlreadyRegistered);
        }
        state.control = Some(control);
        Ok(())
    }

    pub fn unregister_status_callback(&self) {
        self.lock().control = None;
    }

    pub fn is_registered(&self) -> bool {
        self.lock().control.is_some()
    }

    pub fn progress(&self) -> AcqProgress {
        self.lock().progress
    }

    /// Reads the acquisition parameters from the registered control.
    pub fn prepare_acq(&self) {
        let mut state = self.lock();
        let Some(control) = state.control.clone() else {
            return;
        };
        state.progress = AcqProgress {
            nb_frames: control.acq_nb_frames(),
            cnt_act: control.sink_task_active(),
            saving_act: control.saving_mode() != SavingMode::Manual,
            stopped: false,
        };
        debug!("prepare_acq: {:?}", state.progress);
    }

    pub fn stop_acq(&self) {
        self.lock().progress.stopped = true;
    }

    pub fn update_last_callback_timestamp(&self) {
        self.lock().last_cb_ts = Instant::now();
    }

    pub fn last_callback_timestamp(&self) -> Instant {
        self.lock().last_cb_ts
    }

    fn limit_update_rate(&self) {
        let next_ts = self.last_callback_timestamp() + self.min_update_interval;
        let now = Instant::now();
        if next_ts > now {
            thread::sleep(next_ts - now);
        }
    }

    /// Status callback of the image pipeline.
    pub fn image_status_changed(&self, status: &ImageStatus) {
        self.limit_update_rate();
        let finished = {
            let mut state = self.lock();
            state.last_cb_ts = Instant::now();
            state.progress.is_finished(status)
        };
        trace!("image status {:?}: finished={}", status, finished);
        if finished {
            self.processing_finished();
        }
    }

    fn processing_finished(&self) {
        match self.listener.upgrade() {
            Some(listener) => {
                if let Err(e) = listener.lima_finished() {
                    error!("error restoring affinity after processing: {}", e);
                }
            }
            None => debug!("processing finished without listener"),
        }
    }
}
