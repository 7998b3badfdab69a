//! Narration sequencer.
//!
//! A `Narrator` resolves each queued (tense, verb) pair to audio, from the
//! clip store when possible and through the synthesis client otherwise,
//! then hands the decoded clip to the playback controller. At most one run
//! is active; starting another halts the previous one first.
//!
//! The state published through `subscribe` is what a UI mirrors: the
//! item being narrated, whether it is still loading, the play/pause flag
//! and a 0–100 progress value.

use crate::cache::{ClipKey, ClipStore};
use crate::cancellation::{CancellationToken, Cancelled};
use crate::codec::{DecodedClip, decode_clip};
use crate::dataset::{PlaybackQueue, QueueItem, TenseData, VerbConjugationSet};
use crate::errors::NarrationError;
use crate::playback::{PlaybackController, PlaybackOutcome, PlayerPhase};
use crate::synthesis::{SynthesisClient, build_script};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarratorSettings {
    /// Silence between two items of a sequence.
    pub item_gap: Duration,
    /// Silence before a repeated single item plays again.
    pub repeat_gap: Duration,
    /// Silence before a repeated sequence restarts.
    pub sequence_repeat_gap: Duration,
}

impl Default for NarratorSettings {
    fn default() -> Self {
        Self {
            item_gap: Duration::from_millis(700),
            repeat_gap: Duration::from_millis(1000),
            sequence_repeat_gap: Duration::from_millis(1300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub tense_id: String,
    pub verb: String,
}

impl From<&QueueItem> for NowPlaying {
    fn from(item: &QueueItem) -> Self {
        Self {
            tense_id: item.tense_id.clone(),
            verb: item.verb.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Single,
    Sequence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationState {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NarrationView {
    pub now_playing: Option<NowPlaying>,
    pub loading: bool,
    pub state: NarrationState,
    pub progress_pct: f32,
    pub mode: Option<SessionMode>,
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub played: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Completion handle for one narration run.
#[derive(Debug)]
pub struct NarrationHandle {
    id: u64,
    done: watch::Receiver<Option<RunSummary>>,
}

impl NarrationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait until the run ends, naturally or by cancellation.
    pub async fn finished(mut self) -> RunSummary {
        match self.done.wait_for(Option::is_some).await {
            Ok(summary) => (*summary).unwrap_or_default(),
            // The run task went away without reporting; it was aborted.
            Err(_) => RunSummary {
                cancelled: true,
                ..RunSummary::default()
            },
        }
    }
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Narrator {
    store: Arc<dyn ClipStore>,
    synthesis: SynthesisClient,
    player: Arc<PlaybackController>,
    settings: NarratorSettings,
    repeat: AtomicBool,
    disposed: AtomicBool,
    next_run: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
    view: watch::Sender<NarrationView>,
}

impl Narrator {
    pub fn init(
        store: Arc<dyn ClipStore>,
        synthesis: SynthesisClient,
        player: Arc<PlaybackController>,
        settings: NarratorSettings,
        repeat: bool,
    ) -> Arc<Self> {
        let (view, _) = watch::channel(NarrationView {
            repeat,
            ..NarrationView::default()
        });
        info!(
            item_gap_ms = settings.item_gap.as_millis() as u64,
            repeat_gap_ms = settings.repeat_gap.as_millis() as u64,
            repeat,
            "Narrator initialized"
        );
        Arc::new(Self {
            store,
            synthesis,
            player,
            settings,
            repeat: AtomicBool::new(repeat),
            disposed: AtomicBool::new(false),
            next_run: AtomicU64::new(0),
            active: Mutex::new(None),
            view,
        })
    }

    /// Stop whatever is playing and refuse further requests.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop().await;
        info!("Narrator disposed");
    }

    fn ensure_live(&self) -> Result<(), NarrationError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(NarrationError::Disposed);
        }
        Ok(())
    }

    pub async fn play_one(
        self: &Arc<Self>,
        tense_id: &str,
        verb: &VerbConjugationSet,
    ) -> Result<NarrationHandle, NarrationError> {
        let item = QueueItem::new(tense_id, verb.clone());
        self.start(SessionMode::Single, vec![item]).await
    }

    pub async fn play_sequence(
        self: &Arc<Self>,
        queue: PlaybackQueue,
    ) -> Result<NarrationHandle, NarrationError> {
        self.start(SessionMode::Sequence, queue).await
    }

    async fn start(
        self: &Arc<Self>,
        mode: SessionMode,
        queue: PlaybackQueue,
    ) -> Result<NarrationHandle, NarrationError> {
        self.ensure_live()?;
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!(run = previous.id, "Halting previous narration");
            self.halt(previous).await;
        }
        self.ensure_live()?;

        let id = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let task = {
            let narrator = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let summary = narrator.run(id, mode, &queue, &cancel).await;
                narrator.reset_view();
                done_tx.send_replace(Some(summary));
            })
        };
        *active = Some(ActiveRun { id, cancel, task });
        Ok(NarrationHandle { id, done: done_rx })
    }

    async fn halt(&self, run: ActiveRun) {
        run.cancel.cancel();
        self.player.stop();
        if let Err(err) = run.task.await {
            warn!(run = run.id, "Narration task ended abnormally: {err}");
        }
    }

    /// Cancel the active run, silence output and clear the published state.
    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        match previous {
            Some(run) => {
                info!(run = run.id, "Stopping narration");
                self.halt(run).await;
            }
            None => self.player.stop(),
        }
        self.reset_view();
    }

    pub fn pause(&self) -> bool {
        if self.player.phase() != PlayerPhase::Playing {
            return false;
        }
        match self.player.pause() {
            Ok(()) => {
                self.update_view(|view| view.state = NarrationState::Paused);
                true
            }
            Err(err) => {
                debug!("Pause ignored: {err}");
                false
            }
        }
    }

    pub fn resume(&self) -> bool {
        if self.player.phase() != PlayerPhase::Paused {
            return false;
        }
        match self.player.resume() {
            Ok(()) => {
                self.update_view(|view| view.state = NarrationState::Playing);
                true
            }
            Err(err) => {
                debug!("Resume ignored: {err}");
                false
            }
        }
    }

    pub fn repeat(&self) -> bool {
        self.repeat.load(Ordering::SeqCst)
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.repeat.store(repeat, Ordering::SeqCst);
        self.update_view(|view| view.repeat = repeat);
        debug!(repeat, "Repeat updated");
    }

    pub fn toggle_repeat(&self) -> bool {
        let repeat = !self.repeat.fetch_xor(true, Ordering::SeqCst);
        self.update_view(|view| view.repeat = repeat);
        debug!(repeat, "Repeat toggled");
        repeat
    }

    pub fn subscribe(&self) -> watch::Receiver<NarrationView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> NarrationView {
        self.view.borrow().clone()
    }

    pub async fn cached_keys(&self) -> BTreeSet<ClipKey> {
        self.store.list_keys().await
    }

    pub async fn is_cached(&self, tense_id: &str, verb_name: &str) -> bool {
        self.cached_keys()
            .await
            .contains(&ClipKey::new(tense_id, verb_name))
    }

    /// True when every verb of `tense` has a stored clip.
    pub async fn is_tense_cached(&self, tense: &TenseData) -> bool {
        if tense.verbs.is_empty() {
            return false;
        }
        let keys = self.cached_keys().await;
        tense
            .verbs
            .iter()
            .all(|verb| keys.contains(&ClipKey::new(&tense.id, &verb.name)))
    }

    fn update_view(&self, apply: impl FnOnce(&mut NarrationView)) {
        self.view.send_modify(apply);
    }

    fn reset_view(&self) {
        let repeat = self.repeat();
        self.view.send_replace(NarrationView {
            repeat,
            ..NarrationView::default()
        });
    }

    async fn run(
        &self,
        id: u64,
        mode: SessionMode,
        queue: &[QueueItem],
        cancel: &CancellationToken,
    ) -> RunSummary {
        info!(run = id, ?mode, items = queue.len(), "Narration started");
        self.update_view(|view| view.mode = Some(mode));

        let mut summary = RunSummary::default();
        let outcome = match (mode, queue.first()) {
            (SessionMode::Single, Some(item)) => self.run_single(item, cancel, &mut summary).await,
            (SessionMode::Sequence, _) => self.run_sequence(queue, cancel, &mut summary).await,
            (SessionMode::Single, None) => Ok(()),
        };
        if let Err(cancelled) = outcome {
            debug!(run = id, stage = cancelled.stage, "Narration cancelled");
            summary.cancelled = true;
        }
        info!(
            run = id,
            played = summary.played,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Narration finished"
        );
        summary
    }

    async fn run_single(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), Cancelled> {
        loop {
            if !self.narrate(item, cancel, summary).await? {
                return Ok(());
            }
            if !self.repeat() {
                return Ok(());
            }
            self.update_view(|view| view.progress_pct = 0.0);
            cancel.sleep(self.settings.repeat_gap, "repeat pause").await?;
        }
    }

    async fn run_sequence(
        &self,
        queue: &[QueueItem],
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), Cancelled> {
        loop {
            let mut played_this_pass = 0usize;
            for (idx, item) in queue.iter().enumerate() {
                cancel.check_cancelled("next item")?;
                if !self.narrate(item, cancel, summary).await? {
                    continue;
                }
                played_this_pass += 1;
                if idx + 1 < queue.len() {
                    self.update_view(|view| view.progress_pct = 0.0);
                    cancel.sleep(self.settings.item_gap, "item pause").await?;
                }
            }
            if !self.repeat() {
                return Ok(());
            }
            if played_this_pass == 0 {
                warn!("No item in the queue could be played; not repeating");
                return Ok(());
            }
            cancel.check_cancelled("sequence restart")?;
            cancel
                .sleep(self.settings.sequence_repeat_gap, "sequence repeat pause")
                .await?;
        }
    }

    /// Narrate one item. `Ok(false)` means the item was skipped.
    async fn narrate(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<bool, Cancelled> {
        match self.narrate_item(item, cancel).await {
            Ok(PlaybackOutcome::Completed) => {
                summary.played += 1;
                Ok(true)
            }
            Ok(PlaybackOutcome::Stopped) => Err(Cancelled { stage: "playback" }),
            Err(NarrationError::Cancelled(cancelled)) => Err(cancelled),
            Err(err) if err.is_cancelled() => Err(Cancelled { stage: "synthesis" }),
            Err(err) => {
                summary.skipped += 1;
                warn!(
                    tense = %item.tense_id,
                    verb = %item.verb.name,
                    "Skipping item: {err}"
                );
                Ok(false)
            }
        }
    }

    async fn narrate_item(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, NarrationError> {
        cancel.check_cancelled("resolve")?;
        self.update_view(|view| {
            view.now_playing = Some(NowPlaying::from(item));
            view.loading = true;
            view.state = NarrationState::Idle;
            view.progress_pct = 0.0;
        });

        let clip = self.resolve_clip(item, cancel).await;
        self.update_view(|view| view.loading = false);
        let clip = clip?;

        cancel.check_cancelled("playback start")?;
        self.play_clip(&clip).await
    }

    async fn resolve_clip(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
    ) -> Result<DecodedClip, NarrationError> {
        let key = item.key();
        if let Some(bytes) = self.store.get(&key).await {
            debug!(key = %key, bytes = bytes.len(), "Clip cache hit");
            return Ok(decode_clip(&bytes)?);
        }

        cancel.check_cancelled("synthesis")?;
        debug!(key = %key, "Clip cache miss; synthesizing");
        let script = build_script(&item.verb);
        let bytes = self.synthesis.synthesize(&script, cancel).await?;
        // A result that lands after a stop is dropped unplayed and unstored.
        cancel.check_cancelled("persist")?;

        let clip = decode_clip(&bytes)?;
        if let Err(err) = self.store.put(&key, &bytes).await {
            warn!(key = %key, "Failed to persist clip: {err:#}");
        }
        Ok(clip)
    }

    async fn play_clip(&self, clip: &DecodedClip) -> Result<PlaybackOutcome, NarrationError> {
        let mut progress = self.player.subscribe();
        let play = self.player.play(clip);
        tokio::pin!(play);
        loop {
            tokio::select! {
                outcome = &mut play => return Ok(outcome?),
                changed = progress.changed() => {
                    if changed.is_err() {
                        return Ok((&mut play).await?);
                    }
                    let update = *progress.borrow_and_update();
                    self.update_view(|view| {
                        view.progress_pct = update.percent;
                        view.state = match update.phase {
                            PlayerPhase::Paused => NarrationState::Paused,
                            PlayerPhase::Playing | PlayerPhase::Completed => NarrationState::Playing,
                            PlayerPhase::Idle | PlayerPhase::Loading => view.state,
                        };
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryClipStore;
    use crate::dataset::tests::verb;
    use crate::playback::DEFAULT_PROGRESS_INTERVAL;
    use crate::synthesis::RetryPolicy;
    use crate::testing::{CountingStore, FakeBackend, FakeMode, FakeOutput, pcm_for};

    struct Rig {
        narrator: Arc<Narrator>,
        backend: Arc<FakeBackend>,
        output: Arc<FakeOutput>,
        store: Arc<CountingStore>,
    }

    fn rig(backend: FakeBackend, repeat: bool) -> Rig {
        rig_with_store(backend, Arc::new(CountingStore::new()), repeat)
    }

    fn rig_with_store(backend: FakeBackend, store: Arc<CountingStore>, repeat: bool) -> Rig {
        let backend = Arc::new(backend);
        let output = Arc::new(FakeOutput::new());
        let player = Arc::new(PlaybackController::new(
            output.clone(),
            DEFAULT_PROGRESS_INTERVAL,
        ));
        let narrator = Narrator::init(
            store.clone(),
            SynthesisClient::new(backend.clone(), RetryPolicy::default()),
            player,
            NarratorSettings::default(),
            repeat,
        );
        Rig {
            narrator,
            backend,
            output,
            store,
        }
    }

    fn hablar() -> VerbConjugationSet {
        verb("Hablar", false, &["hablo", "hablas", "habla"])
    }

    fn ser() -> VerbConjugationSet {
        verb("Ser", true, &["soy", "eres", "es"])
    }

    fn comer() -> VerbConjugationSet {
        verb("Comer", false, &["como", "comes", "come"])
    }

    fn queue(verbs: &[VerbConjugationSet]) -> PlaybackQueue {
        verbs
            .iter()
            .map(|verb| QueueItem::new("T1", verb.clone()))
            .collect()
    }

    fn expected_clip(verb: &VerbConjugationSet) -> DecodedClip {
        decode_clip(&pcm_for(&build_script(verb))).expect("fake pcm decodes")
    }

    /// Records each distinct verb published as now playing, then the closing `None`.
    fn watch_now_playing(narrator: &Narrator) -> JoinHandle<Vec<Option<String>>> {
        let mut view = narrator.subscribe();
        tokio::spawn(async move {
            let mut seen: Vec<Option<String>> = Vec::new();
            while view.changed().await.is_ok() {
                let current = view
                    .borrow_and_update()
                    .now_playing
                    .as_ref()
                    .map(|now| now.verb.clone());
                if seen.is_empty() && current.is_none() {
                    continue;
                }
                if seen.last() != Some(&current) {
                    seen.push(current.clone());
                }
                if current.is_none() && seen.len() > 1 {
                    break;
                }
            }
            seen
        })
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_synthesizes_once_then_reads_from_cache() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), false);
        let watcher = watch_now_playing(&rig.narrator);

        let handle = rig
            .narrator
            .play_sequence(queue(&[hablar(), ser()]))
            .await
            .expect("narrator is live");
        let summary = handle.finished().await;
        assert_eq!(
            summary,
            RunSummary {
                played: 2,
                skipped: 0,
                cancelled: false
            }
        );
        assert_eq!(
            rig.backend.calls(),
            vec![build_script(&hablar()), build_script(&ser())]
        );
        assert_eq!(rig.store.puts(), 2);
        assert_eq!(rig.output.played(), vec![expected_clip(&hablar()), expected_clip(&ser())]);
        assert_eq!(
            watcher.await.expect("watcher"),
            vec![Some("Hablar".to_string()), Some("Ser".to_string()), None]
        );
        assert_eq!(rig.narrator.view().now_playing, None);

        let again = rig
            .narrator
            .play_sequence(queue(&[hablar(), ser()]))
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert_eq!(again.played, 2);
        assert_eq!(rig.backend.calls().len(), 2);
        assert_eq!(rig.store.puts(), 2);
        assert_eq!(rig.output.played().len(), 4);
        assert_eq!(rig.output.played()[2], expected_clip(&hablar()));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_clip_skips_synthesis() {
        let store = Arc::new(CountingStore::new());
        store
            .put(&ClipKey::new("T1", "Ser"), &pcm_for("cached"))
            .await
            .expect("seed cache");
        let rig = rig_with_store(FakeBackend::new(FakeMode::Speak), store, false);

        let summary = rig
            .narrator
            .play_one("T1", &ser())
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert_eq!(summary.played, 1);
        assert!(rig.backend.calls().is_empty());
        assert_eq!(
            rig.output.played(),
            vec![decode_clip(&pcm_for("cached")).expect("decodes")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_resolving_second_item_never_reaches_third() {
        let backend = FakeBackend::new(FakeMode::Speak).with_latency(Duration::from_secs(1));
        let rig = rig(backend, false);

        let handle = rig
            .narrator
            .play_sequence(queue(&[hablar(), ser(), comer()]))
            .await
            .expect("narrator is live");
        // hablar: synthesis 0..1s, playback 1..1.25s, gap until ~2s; ser resolves from ~2s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(
            rig.narrator.view().now_playing.map(|now| now.verb),
            Some("Ser".to_string())
        );
        assert!(rig.narrator.view().loading);

        rig.narrator.stop().await;
        assert!(handle.is_finished());
        assert!(handle.finished().await.cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            rig.backend.calls(),
            vec![build_script(&hablar()), build_script(&ser())]
        );
        assert_eq!(rig.output.played(), vec![expected_clip(&hablar())]);
        assert_eq!(rig.store.puts(), 1);
        assert_eq!(rig.narrator.view(), NarrationView::default());
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_replays_until_stopped_in_the_gap() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), true);
        let handle = rig
            .narrator
            .play_one("T1", &hablar())
            .await
            .expect("narrator is live");

        // Two plays of 0.25s with a 1s gap between them; 1.6s lands in the second gap.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(rig.output.played().len(), 2);
        rig.narrator.stop().await;

        let summary = handle.finished().await;
        assert_eq!(summary.played, 2);
        assert!(summary.cancelled);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rig.output.played().len(), 2);
        assert_eq!(rig.backend.calls().len(), 1);
        let view = rig.narrator.view();
        assert_eq!(view.now_playing, None);
        assert_eq!(view.state, NarrationState::Idle);
        assert!(view.repeat);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_loading_prevents_playback() {
        let backend = FakeBackend::new(FakeMode::Speak).with_latency(Duration::from_secs(3));
        let rig = rig(backend, true);
        let handle = rig
            .narrator
            .play_one("T1", &hablar())
            .await
            .expect("narrator is live");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rig.narrator.view().loading);

        rig.narrator.stop().await;
        assert!(handle.finished().await.cancelled);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rig.output.played().is_empty());
        assert_eq!(rig.store.puts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_is_skipped_and_sequence_continues() {
        let rig = rig(FakeBackend::new(FakeMode::FailFor("Ser.".into())), false);
        let summary = rig
            .narrator
            .play_sequence(queue(&[hablar(), ser(), comer()]))
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert_eq!(
            summary,
            RunSummary {
                played: 2,
                skipped: 1,
                cancelled: false
            }
        );
        assert_eq!(
            rig.output.played(),
            vec![expected_clip(&hablar()), expected_clip(&comer())]
        );
        assert!(!rig.narrator.is_cached("T1", "Ser").await);
        assert!(rig.narrator.is_cached("T1", "Comer").await);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_single_item_returns_to_idle() {
        let rig = rig(FakeBackend::new(FakeMode::NoAudio), true);
        let summary = rig
            .narrator
            .play_one("T1", &ser())
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert_eq!(summary.skipped, 1);
        assert!(!summary.cancelled);
        assert_eq!(rig.backend.calls().len(), 1);
        assert_eq!(rig.narrator.view().now_playing, None);
        assert_eq!(rig.narrator.player.phase(), PlayerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_halts_the_active_run() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), true);
        let first = rig
            .narrator
            .play_sequence(queue(&[hablar(), ser()]))
            .await
            .expect("narrator is live");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = rig
            .narrator
            .play_one("T1", &comer())
            .await
            .expect("narrator is live");
        assert!(first.is_finished());
        assert!(first.finished().await.cancelled);
        assert_ne!(second.id(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            rig.narrator.view().now_playing.map(|now| now.verb),
            Some("Comer".to_string())
        );
        assert_eq!(rig.narrator.view().mode, Some(SessionMode::Single));
        rig.narrator.stop().await;
        assert_eq!(
            rig.output.played(),
            vec![expected_clip(&hablar()), expected_clip(&comer())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_hold_position() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), false);
        let handle = rig
            .narrator
            .play_one("T1", &hablar())
            .await
            .expect("narrator is live");
        assert!(!rig.narrator.resume());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rig.narrator.pause());
        assert_eq!(rig.narrator.view().state, NarrationState::Paused);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());
        assert!(rig.narrator.view().progress_pct < 100.0);

        assert!(rig.narrator.resume());
        let summary = handle.finished().await;
        assert_eq!(summary.played, 1);
        assert!(!summary.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_status_reflects_writes_from_this_session() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), false);
        let tense = TenseData {
            id: "T1".into(),
            title: "T1".into(),
            usage: String::new(),
            verbs: vec![hablar(), ser()],
        };
        assert!(!rig.narrator.is_tense_cached(&tense).await);

        rig.narrator
            .play_one("T1", &hablar())
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert!(rig.narrator.is_cached("T1", "Hablar").await);
        assert!(!rig.narrator.is_tense_cached(&tense).await);

        rig.narrator
            .play_one("T1", &ser())
            .await
            .expect("narrator is live")
            .finished()
            .await;
        assert!(rig.narrator.is_tense_cached(&tense).await);
        assert_eq!(rig.narrator.cached_keys().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_repeat_is_published() {
        let rig = rig(FakeBackend::new(FakeMode::Speak), false);
        assert!(rig.narrator.toggle_repeat());
        assert!(rig.narrator.view().repeat);
        rig.narrator.set_repeat(false);
        assert!(!rig.narrator.repeat());
        assert!(!rig.narrator.view().repeat);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_narrator_rejects_requests() {
        let store: Arc<dyn ClipStore> = Arc::new(MemoryClipStore::new());
        let output = Arc::new(FakeOutput::new());
        let narrator = Narrator::init(
            store,
            SynthesisClient::new(
                Arc::new(FakeBackend::new(FakeMode::Speak)),
                RetryPolicy::default(),
            ),
            Arc::new(PlaybackController::new(output, DEFAULT_PROGRESS_INTERVAL)),
            NarratorSettings::default(),
            false,
        );
        narrator.dispose().await;
        narrator.dispose().await;
        let err = narrator
            .play_one("T1", &hablar())
            .await
            .expect_err("disposed");
        assert!(matches!(err, NarrationError::Disposed));
    }
}
