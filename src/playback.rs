//! Single-flight playback of decoded clips.
//!
//! `PlaybackController` owns the phase machine and progress reporting;
//! the actual device sits behind `AudioOutput` so tests can drive a
//! virtual clock. `RodioOutput` is the real device.

use crate::codec::DecodedClip;
use crate::errors::PlaybackError;
use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    Idle,
    Loading,
    Playing,
    Paused,
    Completed,
}

impl PlayerPhase {
    fn is_busy(self) -> bool {
        matches!(
            self,
            PlayerPhase::Loading | PlayerPhase::Playing | PlayerPhase::Paused
        )
    }
}

impl fmt::Display for PlayerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayerPhase::Idle => "idle",
            PlayerPhase::Loading => "loading",
            PlayerPhase::Playing => "playing",
            PlayerPhase::Paused => "paused",
            PlayerPhase::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// How a `play` call ended. Exactly one is reported per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackProgress {
    pub phase: PlayerPhase,
    pub percent: f32,
}

impl Default for PlaybackProgress {
    fn default() -> Self {
        Self {
            phase: PlayerPhase::Idle,
            percent: 0.0,
        }
    }
}

/// The exclusive audio device.
///
/// `position` must come from the device's own clock: it freezes while
/// suspended.
pub trait AudioOutput: Send + Sync {
    fn start(&self, clip: &DecodedClip) -> Result<()>;
    fn suspend(&self);
    fn resume(&self);
    fn stop(&self);
    fn position(&self) -> Duration;
    fn is_drained(&self) -> bool;
}

#[derive(Debug)]
struct PlayerState {
    phase: PlayerPhase,
    generation: u64,
}

pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
    progress_interval: Duration,
    state: Mutex<PlayerState>,
    stop_signal: Notify,
    progress: watch::Sender<PlaybackProgress>,
}

impl PlaybackController {
    pub fn new(output: Arc<dyn AudioOutput>, progress_interval: Duration) -> Self {
        let (progress, _) = watch::channel(PlaybackProgress::default());
        Self {
            output,
            progress_interval: progress_interval.max(Duration::from_millis(1)),
            state: Mutex::new(PlayerState {
                phase: PlayerPhase::Idle,
                generation: 0,
            }),
            stop_signal: Notify::new(),
            progress,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> PlayerPhase {
        self.lock().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackProgress> {
        self.progress.subscribe()
    }

    fn publish(&self, phase: PlayerPhase, percent: f32) {
        self.progress.send_replace(PlaybackProgress { phase, percent });
    }

    /// Play `clip` to its end or until `stop` is called.
    pub async fn play(&self, clip: &DecodedClip) -> Result<PlaybackOutcome, PlaybackError> {
        let generation = {
            let mut state = self.lock();
            if state.phase.is_busy() {
                return Err(PlaybackError::InvalidState {
                    operation: "play",
                    phase: state.phase,
                });
            }
            state.phase = PlayerPhase::Loading;
            state.generation += 1;
            state.generation
        };
        self.publish(PlayerPhase::Loading, 0.0);

        if let Err(err) = self.output.start(clip) {
            let mut state = self.lock();
            if state.generation == generation {
                state.phase = PlayerPhase::Idle;
            }
            drop(state);
            self.publish(PlayerPhase::Idle, 0.0);
            return Err(PlaybackError::Device(err));
        }

        {
            let mut state = self.lock();
            if state.generation != generation {
                return Ok(PlaybackOutcome::Stopped);
            }
            state.phase = PlayerPhase::Playing;
        }
        self.publish(PlayerPhase::Playing, 0.0);
        debug!(
            frames = clip.frames(),
            duration_ms = clip.duration().as_millis() as u64,
            "Clip playback started"
        );

        let total = clip.duration();
        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut reported = 0.0f32;

        loop {
            let stopped = self.stop_signal.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();

            let phase = {
                let state = self.lock();
                if state.generation != generation {
                    return Ok(PlaybackOutcome::Stopped);
                }
                state.phase
            };

            if phase == PlayerPhase::Playing {
                if self.output.is_drained() {
                    {
                        let mut state = self.lock();
                        if state.generation != generation {
                            return Ok(PlaybackOutcome::Stopped);
                        }
                        state.phase = PlayerPhase::Completed;
                    }
                    self.publish(PlayerPhase::Completed, 100.0);
                    debug!("Clip playback completed");
                    return Ok(PlaybackOutcome::Completed);
                }
                let percent = progress_percent(self.output.position(), total);
                if percent > reported {
                    reported = percent;
                    self.publish(PlayerPhase::Playing, reported);
                }
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut stopped => {}
            }
        }
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        let percent = {
            let mut state = self.lock();
            if state.phase != PlayerPhase::Playing {
                return Err(PlaybackError::InvalidState {
                    operation: "pause",
                    phase: state.phase,
                });
            }
            state.phase = PlayerPhase::Paused;
            self.output.suspend();
            self.progress.borrow().percent
        };
        self.publish(PlayerPhase::Paused, percent);
        debug!("Playback paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), PlaybackError> {
        let percent = {
            let mut state = self.lock();
            if state.phase != PlayerPhase::Paused {
                return Err(PlaybackError::InvalidState {
                    operation: "resume",
                    phase: state.phase,
                });
            }
            state.phase = PlayerPhase::Playing;
            self.output.resume();
            self.progress.borrow().percent
        };
        self.publish(PlayerPhase::Playing, percent);
        debug!("Playback resumed");
        Ok(())
    }

    /// Halt output and return to `Idle`. Safe from any phase.
    pub fn stop(&self) {
        let was = {
            let mut state = self.lock();
            let was = state.phase;
            state.generation += 1;
            state.phase = PlayerPhase::Idle;
            was
        };
        self.output.stop();
        self.publish(PlayerPhase::Idle, 0.0);
        self.stop_signal.notify_waiters();
        if was.is_busy() {
            debug!(from = %was, "Playback stopped");
        }
    }
}

fn progress_percent(position: Duration, total: Duration) -> f32 {
    if total.is_zero() {
        return 100.0;
    }
    let ratio = position.as_secs_f64() / total.as_secs_f64();
    (ratio * 100.0).clamp(0.0, 100.0) as f32
}

/// Elapsed time that only advances while the device is running.
#[derive(Debug, Default)]
struct DeviceClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl DeviceClock {
    fn restart(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    fn freeze(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn thaw(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }
}

enum DeviceCommand {
    Start(Vec<f32>, u16, u32),
    Suspend,
    Resume,
    Stop,
    Shutdown,
}

/// Default output device driven through `rodio`.
///
/// `OutputStream` is not `Send`, so a dedicated thread owns the stream and
/// sink and receives commands over a channel.
pub struct RodioOutput {
    commands: Mutex<mpsc::Sender<DeviceCommand>>,
    clock: Arc<Mutex<DeviceClock>>,
    drained: Arc<AtomicBool>,
}

impl RodioOutput {
    pub fn open(volume: f32) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<DeviceCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let clock = Arc::new(Mutex::new(DeviceClock::default()));
        let drained = Arc::new(AtomicBool::new(true));

        let thread_clock = Arc::clone(&clock);
        let thread_drained = Arc::clone(&drained);
        thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || device_loop(rx, ready_tx, thread_clock, thread_drained, volume))
            .context("Spawning audio output thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("audio output thread exited during startup"))??;
        info!(volume, "Audio output ready");
        Ok(Self {
            commands: Mutex::new(tx),
            clock,
            drained,
        })
    }

    fn send(&self, command: DeviceCommand) {
        let sender = self
            .commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sender.send(command).is_err() {
            warn!("Audio output thread is gone; dropping command");
        }
    }

    fn with_clock<T>(&self, f: impl FnOnce(&mut DeviceClock) -> T) -> T {
        let mut clock = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut clock)
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, clip: &DecodedClip) -> Result<()> {
        self.drained.store(false, Ordering::Release);
        self.with_clock(DeviceClock::restart);
        self.send(DeviceCommand::Start(
            clip.interleaved(),
            clip.channel_count(),
            clip.sample_rate(),
        ));
        Ok(())
    }

    fn suspend(&self) {
        self.with_clock(DeviceClock::freeze);
        self.send(DeviceCommand::Suspend);
    }

    fn resume(&self) {
        self.with_clock(DeviceClock::thaw);
        self.send(DeviceCommand::Resume);
    }

    fn stop(&self) {
        self.with_clock(DeviceClock::freeze);
        self.drained.store(true, Ordering::Release);
        self.send(DeviceCommand::Stop);
    }

    fn position(&self) -> Duration {
        self.with_clock(|clock| clock.elapsed())
    }

    fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.send(DeviceCommand::Shutdown);
    }
}

fn device_loop(
    rx: mpsc::Receiver<DeviceCommand>,
    ready: mpsc::Sender<Result<()>>,
    clock: Arc<Mutex<DeviceClock>>,
    drained: Arc<AtomicBool>,
    volume: f32,
) {
    let opened = rodio::OutputStream::try_default()
        .context("Opening audio output")
        .and_then(|(stream, handle)| {
            let sink = rodio::Sink::try_new(&handle).context("Creating sink")?;
            Ok((stream, handle, sink))
        });
    let (_stream, handle, mut sink) = match opened {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    sink.set_volume(volume);
    let mut active = false;

    loop {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Ok(DeviceCommand::Start(samples, channels, rate)) => {
                sink.stop();
                sink = match rodio::Sink::try_new(&handle) {
                    Ok(fresh) => fresh,
                    Err(err) => {
                        warn!("Failed to recreate sink: {err}");
                        drained.store(true, Ordering::Release);
                        active = false;
                        continue;
                    }
                };
                sink.set_volume(volume);
                sink.append(rodio::buffer::SamplesBuffer::new(channels, rate, samples));
                sink.play();
                active = true;
            }
            Ok(DeviceCommand::Suspend) => sink.pause(),
            Ok(DeviceCommand::Resume) => sink.play(),
            Ok(DeviceCommand::Stop) => {
                sink.stop();
                active = false;
            }
            Ok(DeviceCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                debug!("Audio output thread exiting");
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        // Only the clip started by the last `Start` can drain.
        if active && sink.empty() {
            active = false;
            if let Ok(mut clock) = clock.lock() {
                clock.freeze();
            }
            drained.store(true, Ordering::Release);
        }
    }
}
