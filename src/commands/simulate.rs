//! Simulate command implementation.
//!
//! Drives a synthetic acquisition through the affinity state machine:
//! receiver items complete frames in random order, then post-processing
//! progress is reported until every frame is done.

use super::build_manager;
use acq_affinity::{
    AcqControl, Config, FrameFinishedCallback, FrameMap, ImageStatus, SavingMode,
};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct SimAcq {
    nb_frames: u64,
}

impl AcqControl for SimAcq {
    fn acq_nb_frames(&self) -> u64 {
        self.nb_frames
    }

    fn sink_task_active(&self) -> bool {
        false
    }

    fn saving_mode(&self) -> SavingMode {
        SavingMode::Manual
    }
}

/// Highest frame completed by the receivers.
#[derive(Default)]
struct LastFrame(AtomicI64);

impl FrameFinishedCallback for LastFrame {
    fn frame_finished(&self, frame: i64) {
        self.0.fetch_max(frame, Ordering::Relaxed);
    }
}

/// Runs a synthetic acquisition of `frames` frames split in `items` items.
pub fn command_simulate(
    frames: u64,
    items: usize,
    period_ms: u64,
    stall: bool,
    config: &Config,
) -> anyhow::Result<()> {
    if frames == 0 || items == 0 {
        anyhow::bail!("--frames and --items must be positive");
    }
    let period = Duration::from_millis(period_ms);

    let mgr = build_manager(config);
    mgr.apply_and_set(&config.selected_affinity())?;
    mgr.processing_finished_event()
        .register_status_callback(Arc::new(SimAcq { nb_frames: frames }))?;

    let last_frame = Arc::new(LastFrame(AtomicI64::new(-1)));
    let weak = Arc::downgrade(&last_frame);
    let callback: Weak<dyn FrameFinishedCallback> = weak;
    let mut frame_map = FrameMap::new();
    frame_map.set_nb_items(items);
    frame_map.set_callback(Some(callback));

    mgr.prepare_acq()?;
    mgr.start_acq();
    info!("acquisition of {} frames started ({})", frames, mgr.state());

    let start = Instant::now();
    let mut rng = rand::thread_rng();
    let mut order: Vec<usize> = (0..items).collect();
    for frame in 0..frames as i64 {
        thread::sleep(period);
        order.shuffle(&mut rng);
        for item in &order {
            frame_map.frame_item_finished(frame, *item)?;
        }
    }
    debug!("frame map: {}", frame_map);
    info!(
        "receivers finished frame {} after {:.3} s",
        last_frame.0.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );

    mgr.recv_finished()?;
    info!("state: {}, current affinity: {}", mgr.state(), mgr.current());

    let processing = {
        let mgr = mgr.clone();
        let last = if stall { frames / 2 } else { frames };
        thread::spawn(move || {
            let event = mgr.processing_finished_event();
            for frame in 0..last as i64 {
                thread::sleep(period / 2);
                event.image_status_changed(&ImageStatus::all_at(frame));
            }
        })
    };

    let wait_start = Instant::now();
    mgr.wait_lima_finished()?;
    if processing.join().is_err() {
        warn!("processing thread panicked");
    }
    info!(
        "processing finished after {:.3} s, state: {}, current affinity: {}",
        wait_start.elapsed().as_secs_f64(),
        mgr.state(),
        mgr.current()
    );

    println!("✅ Simulated {} frames x {} items", frames, items);
    println!("   lima threads shared on recv CPUs: {:?}", mgr.lima_tids());
    println!("   final affinity: {}", mgr.current());
    Ok(())
}
