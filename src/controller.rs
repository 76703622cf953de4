use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use serialport::SerialPort;

use crate::audio::{self, SessionCache, SESSION_REFRESH_INTERVAL};
use crate::bindings::ChannelBindings;
use crate::config::SerialConfig;
use crate::input;
use crate::serial::{Frame, SerialReader};

/// How long the apply worker blocks per dequeue. Bounds how late it notices
/// the shutdown flag and a pending forced refresh.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// One observed wire value headed for the OS. Consumed exactly once; if no
/// session resolves it is dropped, the next change converges on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeChange {
    pub channel: usize,
    pub percent: i32,
}

/// Result of one poll. `volumes` always carries the last value seen on the
/// wire per knob (-1 until the first one arrives); `changed` flags the knobs
/// that moved during this poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialTick {
    pub volumes: Vec<i32>,
    pub changed: Vec<bool>,
    pub scroll: bool,
    pub active: bool,
}

impl SerialTick {
    fn inactive(volumes: Vec<i32>) -> Self {
        Self {
            changed: vec![false; volumes.len()],
            volumes,
            scroll: false,
            active: false,
        }
    }
}

/// Owns the serial link, the knob table and the apply worker. The UI polls
/// `read_serial` and everything slow happens on the worker thread.
pub struct VolumeController<R = BufReader<Box<dyn SerialPort>>> {
    reader: Mutex<Option<SerialReader<R>>>,
    volumes: Mutex<Vec<i32>>,
    bindings: Arc<Mutex<ChannelBindings>>,
    queue: Sender<VolumeChange>,
    running: Arc<AtomicBool>,
    force_refresh: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VolumeController {
    pub fn new(serial: &SerialConfig, apps: Vec<String>) -> Result<Self> {
        let reader = SerialReader::open(serial)?;
        info!("serial port {} open at {} baud", serial.port, serial.baud);
        Ok(Self::with_reader(reader, apps))
    }
}

impl<R: BufRead> VolumeController<R> {
    pub fn with_reader(reader: SerialReader<R>, apps: Vec<String>) -> Self {
        let (controller, rx) = Self::build(reader, apps);
        let worker = spawn_apply_worker(
            rx,
            Arc::clone(&controller.bindings),
            Arc::clone(&controller.running),
            Arc::clone(&controller.force_refresh),
        );
        *controller.worker.lock().unwrap() = Some(worker);
        controller
    }

    fn build(reader: SerialReader<R>, apps: Vec<String>) -> (Self, Receiver<VolumeChange>) {
        let bindings = ChannelBindings::new(apps);
        let channels = bindings.len();
        let (tx, rx) = unbounded();
        let controller = Self {
            reader: Mutex::new(Some(reader)),
            volumes: Mutex::new(vec![-1; channels]),
            bindings: Arc::new(Mutex::new(bindings)),
            queue: tx,
            running: Arc::new(AtomicBool::new(true)),
            force_refresh: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        };
        (controller, rx)
    }

    /// Drains the serial buffer and folds every frame into the knob state.
    /// Never blocks past the port timeout and never fails on wire noise; once
    /// the controller is closed it reports inactive and touches nothing.
    pub fn read_serial(&self) -> SerialTick {
        let mut volumes = self.volumes.lock().unwrap();
        if !self.running.load(Ordering::Relaxed) {
            return SerialTick::inactive(volumes.clone());
        }
        let mut guard = self.reader.lock().unwrap();
        let Some(reader) = guard.as_mut() else {
            return SerialTick::inactive(volumes.clone());
        };
        let frames = reader.drain();
        drop(guard);

        let mut changed = vec![false; volumes.len()];
        let mut scroll = false;
        for frame in frames {
            match frame {
                Frame::Batch(values) if values.len() == volumes.len() => {
                    for (channel, value) in values.into_iter().enumerate() {
                        self.observe(&mut volumes, &mut changed, channel, value);
                    }
                }
                Frame::Batch(values) => {
                    debug!("batch of {} values for {} knobs dropped", values.len(), volumes.len());
                }
                Frame::Single(channel, value) if channel < volumes.len() => {
                    self.observe(&mut volumes, &mut changed, channel, value);
                }
                Frame::Single(channel, _) => {
                    debug!("update for unknown knob {channel} dropped");
                }
                Frame::Scroll => {
                    input::press_scroll_lock();
                    scroll = true;
                }
            }
        }
        SerialTick {
            volumes: volumes.clone(),
            changed,
            scroll,
            active: true,
        }
    }

    /// Records a wire value as soon as it is seen. The displayed state tracks
    /// the hardware even when the OS-side apply later finds no session.
    fn observe(&self, volumes: &mut [i32], changed: &mut [bool], channel: usize, value: i32) {
        if volumes[channel] == value {
            return;
        }
        volumes[channel] = value;
        changed[channel] = true;
        let _ = self.queue.send(VolumeChange {
            channel,
            percent: value,
        });
    }

    /// Rebinds a knob and tells the worker to rebuild its session cache at
    /// the next wakeup instead of waiting out the refresh interval.
    pub fn set_app(&self, channel: usize, app: &str) {
        self.bindings.lock().unwrap().bind(channel, app);
        self.force_refresh.store(true, Ordering::Relaxed);
        info!("knob {channel} bound to {app:?}");
    }

    pub fn app_names(&self) -> Vec<String> {
        self.bindings.lock().unwrap().names()
    }

    pub fn get_all_audio_sessions(&self) -> Vec<String> {
        audio::active_app_names()
    }

    /// Cooperative shutdown: flags the worker, releases the port and joins.
    /// Safe to call again; later `read_serial` calls report inactive.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        *self.reader.lock().unwrap() = None;
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("controller closed");
    }
}

fn spawn_apply_worker(
    rx: Receiver<VolumeChange>,
    bindings: Arc<Mutex<ChannelBindings>>,
    running: Arc<AtomicBool>,
    force_refresh: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        audio::init_com();
        let mut cache = SessionCache::new(SESSION_REFRESH_INTERVAL);
        let snapshot = bindings.lock().unwrap().clone();
        cache.refresh(&snapshot, true);

        while running.load(Ordering::Relaxed) {
            if force_refresh.swap(false, Ordering::Relaxed) {
                let snapshot = bindings.lock().unwrap().clone();
                cache.refresh(&snapshot, true);
            }
            let change = match rx.recv_timeout(WORKER_POLL) {
                Ok(change) => change,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let snapshot = bindings.lock().unwrap().clone();
            cache.refresh(&snapshot, false);
            match cache.lookup(change.channel) {
                Some(session) => {
                    if let Err(e) = session.set(change.percent as f32 / 100.0) {
                        warn!("volume apply failed for knob {}: {e}", change.channel);
                    }
                }
                None => debug!(
                    "no active session for knob {}, dropping {}%",
                    change.channel, change.percent
                ),
            }
        }
        debug!("apply worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::testutil::ScriptedPort;

    fn controller(
        items: impl IntoIterator<Item = Option<&'static str>>,
    ) -> (VolumeController<BufReader<ScriptedPort>>, Receiver<VolumeChange>) {
        let reader = SerialReader::new(BufReader::new(ScriptedPort::new(items)));
        VolumeController::build(
            reader,
            vec!["spotify".into(), "discord".into(), "brave".into()],
        )
    }

    fn change(channel: usize, percent: i32) -> VolumeChange {
        VolumeChange { channel, percent }
    }

    #[test]
    fn batched_line_updates_all_knobs_and_queues_changes() {
        let (c, rx) = controller([Some("50,60,70\n")]);
        let tick = c.read_serial();
        assert!(tick.active);
        assert_eq!(tick.volumes, vec![50, 60, 70]);
        assert_eq!(tick.changed, vec![true, true, true]);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![change(0, 50), change(1, 60), change(2, 70)]
        );
    }

    #[test]
    fn unchanged_values_queue_nothing() {
        let (c, rx) = controller([Some("50,60,70\n"), None, Some("50,61,70\n")]);
        c.read_serial();
        rx.try_iter().count();
        let tick = c.read_serial();
        assert_eq!(tick.volumes, vec![50, 61, 70]);
        assert_eq!(tick.changed, vec![false, true, false]);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![change(1, 61)]);
    }

    #[test]
    fn legacy_line_touches_one_knob() {
        let (c, rx) = controller([Some("50,60,70\n"), None, Some("1:80\n")]);
        c.read_serial();
        rx.try_iter().count();
        let tick = c.read_serial();
        assert_eq!(tick.volumes, vec![50, 80, 70]);
        assert_eq!(tick.changed, vec![false, true, false]);
        assert!(!tick.scroll);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![change(1, 80)]);
    }

    #[test]
    fn scroll_pulse_sets_the_flag_without_queueing() {
        let (c, rx) = controller([Some("SCROLL\n")]);
        let tick = c.read_serial();
        assert!(tick.scroll);
        assert_eq!(tick.changed, vec![false, false, false]);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn noise_in_a_drain_leaves_valid_data_intact() {
        let (c, rx) = controller([Some("junk\n"), Some("50,60,70\n"), Some("9:x\n"), Some("SCROLL\n")]);
        let tick = c.read_serial();
        assert_eq!(tick.volumes, vec![50, 60, 70]);
        assert!(tick.scroll);
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn wrong_arity_batch_is_dropped() {
        let (c, rx) = controller([Some("50,60\n")]);
        let tick = c.read_serial();
        assert_eq!(tick.volumes, vec![-1, -1, -1]);
        assert_eq!(tick.changed, vec![false, false, false]);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn out_of_range_knob_is_dropped() {
        let (c, rx) = controller([Some("7:50\n")]);
        let tick = c.read_serial();
        assert_eq!(tick.volumes, vec![-1, -1, -1]);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn same_knob_changes_stay_in_submission_order() {
        let (c, rx) = controller([Some("0:10\n"), Some("0:20\n"), Some("0:30\n")]);
        c.read_serial();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![change(0, 10), change(0, 20), change(0, 30)]
        );
    }

    #[test]
    fn close_makes_later_reads_inactive() {
        let (c, _rx) = controller([Some("50,60,70\n")]);
        c.read_serial();
        c.close();
        let tick = c.read_serial();
        assert!(!tick.active);
        assert_eq!(tick.volumes, vec![50, 60, 70]);
        assert_eq!(tick.changed, vec![false, false, false]);
        c.close();
        assert!(!c.read_serial().active);
    }

    #[test]
    fn rebind_updates_names_and_requests_a_refresh() {
        let (c, _rx) = controller([]);
        c.set_app(2, "chrome");
        assert_eq!(c.app_names(), vec!["spotify", "discord", "chrome"]);
        assert!(c.force_refresh.load(Ordering::Relaxed));
    }

    #[test]
    fn worker_exits_on_close() {
        let reader = SerialReader::new(BufReader::new(ScriptedPort::new([])));
        let c = VolumeController::with_reader(reader, vec!["zz-nothing".into()]);
        c.close();
        assert!(c.worker.lock().unwrap().is_none());
    }
}
