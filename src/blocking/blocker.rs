use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use super::side::{BlockSide, SideThresholds};
use super::stats::{BlockCounters, BlockerStatistics};
use super::{lock_or_recover, SharedLink};
use crate::serial::{parse_monitor_line, DistanceSample, MonitorLine, SerialLink};

#[derive(Clone, Debug)]
pub struct BlockerConfig {
    pub thresholds: SideThresholds,
    /// Length of the microcontroller's monitoring window.
    pub monitoring_duration: Duration,
    /// Extra time the host keeps reading after the window should have closed.
    pub monitor_margin: Duration,
    /// Hold after a confirmed crossing while the leg motion completes.
    pub post_detection_hold: Duration,
    /// Minimum time between two accepted triggers.
    pub cooldown: Duration,
    /// Upper bound on how long a wait goes without checking for cancellation.
    pub poll_interval: Duration,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            thresholds: SideThresholds::default(),
            monitoring_duration: Duration::from_secs(4),
            monitor_margin: Duration::from_secs(1),
            post_detection_hold: Duration::from_millis(2500),
            cooldown: Duration::from_secs(6),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl BlockerConfig {
    /// Longest a single session can keep the link.
    pub fn max_session(&self) -> Duration {
        self.monitoring_duration + self.monitor_margin + self.post_detection_hold
    }
}

/// Converts per-frame side classifications into hardware-confirmed blocks.
///
/// At most one blocking session exists at a time: the session runs on a
/// worker held in a single slot, and a new worker is only accepted when the
/// slot is empty and the cooldown since the last accepted trigger has passed.
/// The frame loop never waits on the serial exchange.
pub struct BallBlocker {
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    worker: Option<JoinHandle<()>>,
    last_trigger: Option<Instant>,
    closed: bool,
}

struct Shared {
    config: BlockerConfig,
    link: SharedLink,
    session: Mutex<()>,
    is_monitoring: AtomicBool,
    blocking_active: AtomicBool,
    cancel: AtomicBool,
    counters: Mutex<BlockCounters>,
    last_side: Mutex<BlockSide>,
}

/// Ephemeral record of one monitoring window.
struct BlockingSession {
    side: BlockSide,
    deadline: Instant,
    detected: bool,
    samples: Vec<DistanceSample>,
}

/// Raises an atomic flag for the guard's lifetime, clearing it on every exit path.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BallBlocker {
    pub fn new(link: SharedLink, config: BlockerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                link,
                session: Mutex::new(()),
                is_monitoring: AtomicBool::new(false),
                blocking_active: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                counters: Mutex::new(BlockCounters::default()),
                last_side: Mutex::new(BlockSide::None),
            }),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &BlockerConfig {
        &self.shared.config
    }

    pub fn determine_side(&self, x: f64, frame_width: u32) -> BlockSide {
        self.shared.config.thresholds.determine_side(x, frame_width)
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.is_monitoring.load(Ordering::SeqCst)
    }

    pub fn blocking_active(&self) -> bool {
        self.shared.blocking_active.load(Ordering::SeqCst)
    }

    /// Per-frame entry point. Returns true when a blocking session was started.
    ///
    /// No-op while a session is in flight, for center/none positions, and
    /// inside the cooldown window.
    pub fn process_ball_detection(
        &self,
        x: f64,
        y: f64,
        frame_width: u32,
        frame_height: u32,
        confidence: f32,
    ) -> bool {
        if self.is_monitoring() || self.blocking_active() {
            log::debug!("already monitoring or blocking, skipping");
            return false;
        }

        let side = self.determine_side(x, frame_width);
        if !side.is_actionable() {
            log::trace!("ball at x={:.0} is {}, no action", x, side);
            return false;
        }

        let mut slot = lock_or_recover(&self.slot, "blocker slot");
        if slot.closed {
            return false;
        }
        if slot.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            log::debug!("blocking session in flight, skipping");
            return false;
        }
        if let Some(finished) = slot.worker.take() {
            self.shared.reap(finished);
        }
        if let Some(last) = slot.last_trigger {
            if last.elapsed() < self.shared.config.cooldown {
                log::debug!("blocking cooldown active, skipping {} detection", side);
                return false;
            }
        }

        slot.last_trigger = Some(Instant::now());
        lock_or_recover(&self.shared.counters, "blocker counters").record_detection();
        log::info!(
            "ball detected on {} side at ({:.0}, {:.0}) in {}x{}, conf: {:.2}",
            side,
            x,
            y,
            frame_width,
            frame_height,
            confidence
        );

        self.shared.cancel.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("keeper-block".to_string())
            .spawn(move || {
                let blocked = shared.trigger_blocking(side);
                shared.record_outcome(blocked);
            });
        match spawned {
            Ok(handle) => {
                slot.worker = Some(handle);
                true
            }
            Err(e) => {
                log::error!("failed to spawn blocking worker: {}", e);
                self.shared.record_outcome(false);
                false
            }
        }
    }

    /// Run one monitoring session on the calling thread.
    ///
    /// Returns whether the microcontroller confirmed a crossing. Statistics are
    /// not touched; `process_ball_detection` accounts for the sessions it starts.
    pub fn trigger_blocking(&self, side: BlockSide) -> bool {
        if lock_or_recover(&self.slot, "blocker slot").closed {
            return false;
        }
        self.shared.cancel.store(false, Ordering::SeqCst);
        self.shared.trigger_blocking(side)
    }

    pub fn get_statistics(&self) -> BlockerStatistics {
        let counters = *lock_or_recover(&self.shared.counters, "blocker counters");
        let last_side = *lock_or_recover(&self.shared.last_side, "blocker last side");
        BlockerStatistics::new(
            counters,
            self.is_monitoring(),
            self.blocking_active(),
            last_side,
        )
    }

    /// Zero the counters. The cooldown clock is left alone.
    pub fn reset_statistics(&self) {
        lock_or_recover(&self.shared.counters, "blocker counters").reset();
        log::info!("blocking statistics reset");
    }

    /// Ask the in-flight session, if any, to stop at its next wake-up.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        log::debug!("blocking session cancellation requested");
    }

    /// Wait for the current worker to finish. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut slot = lock_or_recover(&self.slot, "blocker slot");
                let finished = slot.worker.as_ref().map_or(true, |w| w.is_finished());
                if finished {
                    if let Some(handle) = slot.worker.take() {
                        self.shared.reap(handle);
                    }
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Refuse new sessions, cancel the current one, and wait for it.
    pub fn shutdown(&self) {
        lock_or_recover(&self.slot, "blocker slot").closed = true;
        self.cancel();
        let grace = self.shared.config.poll_interval * 4 + Duration::from_secs(1);
        if !self.wait_idle(grace) {
            log::warn!("blocking worker did not stop within {:?}", grace);
        }
    }
}

impl Drop for BallBlocker {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Shared {
    fn trigger_blocking(&self, side: BlockSide) -> bool {
        let Some(letter) = side.letter() else {
            log::error!("invalid blocking side: {}", side);
            return false;
        };

        let _session = match self.session.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => {
                log::warn!("blocking session already active, refusing {}", side);
                return false;
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let _monitoring = FlagGuard::raise(&self.is_monitoring);
        *lock_or_recover(&self.last_side, "blocker last side") = side;

        // Held until the hold below completes so no other command interleaves.
        let mut link = lock_or_recover(&self.link, "serial link");
        log::info!("sending high-speed monitoring command: H{}", letter);
        match self.monitor(&mut link, side) {
            Ok(true) => {
                let _active = FlagGuard::raise(&self.blocking_active);
                self.hold();
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::error!("failed to trigger blocking: {:#}", e);
                false
            }
        }
    }

    fn monitor(&self, link: &mut SerialLink, side: BlockSide) -> Result<bool> {
        let window = self.config.monitoring_duration + self.config.monitor_margin;
        link.flush_input();
        link.start_monitoring(side)?;

        let mut session = BlockingSession {
            side,
            deadline: Instant::now() + window,
            detected: false,
            samples: Vec::new(),
        };

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                log::info!("monitoring {} cancelled", side);
                break;
            }
            let now = Instant::now();
            if now >= session.deadline {
                log::info!("monitoring {} timed out after {:?}", side, window);
                break;
            }
            let wake = session.deadline.min(now + self.config.poll_interval);
            let Some(line) = link.next_line(wake)? else {
                continue;
            };
            match parse_monitor_line(&line) {
                MonitorLine::BallDetected => {
                    session.detected = true;
                    log::info!("ball crossing detected by controller: {}", line);
                    break;
                }
                MonitorLine::Sample(sample) => {
                    log::debug!("distance: {:.2} cm", sample.distance_cm);
                    session.samples.push(sample);
                }
                MonitorLine::Completed => {
                    log::info!("monitoring completed without ball detection");
                    break;
                }
                MonitorLine::Ignored(other) => {
                    log::trace!("ignoring controller line {:?}", other);
                }
            }
        }

        session.log_summary();
        Ok(session.detected)
    }

    fn hold(&self) {
        let until = Instant::now() + self.config.post_detection_hold;
        loop {
            let now = Instant::now();
            if now >= until || self.cancel.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep((until - now).min(self.config.poll_interval));
        }
    }

    fn record_outcome(&self, blocked: bool) {
        let mut counters = lock_or_recover(&self.counters, "blocker counters");
        counters.record_outcome(blocked);
        if blocked {
            log::info!(
                "blocking successful: {}/{}",
                counters.successful_blocks,
                counters.total_detections
            );
        } else {
            log::warn!("blocking failed or no ball crossing detected");
        }
    }

    /// Join a finished worker. A panicked session still counts, as a failure.
    fn reap(&self, worker: JoinHandle<()>) {
        if worker.join().is_err() {
            log::error!("blocking worker panicked");
            self.record_outcome(false);
        }
    }
}

impl BlockingSession {
    fn log_summary(&self) {
        if self.samples.is_empty() {
            return;
        }
        let count = self.samples.len();
        let (sum, min, max) = self.samples.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), s| (sum + s.distance_cm, min.min(s.distance_cm), max.max(s.distance_cm)),
        );
        log::info!(
            "monitoring {} stats: {} readings, avg: {:.2} cm, range: {:.2}-{:.2} cm, crossed: {}",
            self.side,
            count,
            sum / count as f64,
            min,
            max,
            self.detected
        );
    }
}
