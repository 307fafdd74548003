use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::ads::{AdBreakCoordinator, AdStep};
use crate::catalog::Catalog;
use crate::resolve::resolve_current;
use crate::schedule::Channel;
use crate::store::{ContentStore, MediaResolution, SubscriberContext};

/// Tunables for the polling/correction loop. Defaults mirror the reference
/// behavior: poll every 7 s, correct beyond 3 s of drift, at most one
/// correction per 5 s, give up after 3 consecutive poll failures.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub drift_threshold: SignedDuration,
    pub correction_cooldown: SignedDuration,
    pub max_consecutive_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(7),
            drift_threshold: SignedDuration::from_secs(3),
            correction_cooldown: SignedDuration::from_secs(5),
            max_consecutive_failures: 3,
        }
    }
}

/// Seam to the external player: the protocol only loads, seeks, starts, and
/// reads back a position. Decoding and rendering live behind it.
pub trait PlayerControl {
    fn load(&mut self, media_locator: &str);
    fn seek(&mut self, position: SignedDuration);
    fn play(&mut self);
    fn position(&self) -> SignedDuration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Initializing,
    Synced,
    /// Terminal until the client re-attaches.
    Unavailable,
}

/// Per-attachment state. Created on attach, discarded on detach.
#[derive(Debug)]
pub struct SyncState {
    phase: SyncPhase,
    last_program_id: Option<String>,
    last_sync: Option<Timestamp>,
    server_offset: SignedDuration,
    last_correction: Option<Timestamp>,
    consecutive_failures: u32,
    coordinator: AdBreakCoordinator,
    /// Media of the current main program, needed to restore it after a break.
    main_media: Option<MediaResolution>,
    /// Ad currently on the player, with its duration hint.
    current_ad: Option<MediaResolution>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Initializing,
            last_program_id: None,
            last_sync: None,
            server_offset: SignedDuration::ZERO,
            last_correction: None,
            consecutive_failures: 0,
            coordinator: AdBreakCoordinator::new(),
            main_media: None,
            current_ad: None,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    fn record_failure(&mut self, cfg: &SyncConfig) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= cfg.max_consecutive_failures {
            tracing::error!(
                failures = self.consecutive_failures,
                "giving up after consecutive poll failures"
            );
            self.phase = SyncPhase::Unavailable;
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot published to observers after every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub program_id: Option<String>,
    pub offset: Option<SignedDuration>,
    pub featured: bool,
    pub ad_active: bool,
}

impl SyncSnapshot {
    fn initializing() -> Self {
        Self {
            phase: SyncPhase::Initializing,
            program_id: None,
            offset: None,
            featured: false,
            ad_active: false,
        }
    }

    fn from_state(state: &SyncState, offset: Option<SignedDuration>, featured: bool) -> Self {
        Self {
            phase: state.phase,
            program_id: state.last_program_id.clone(),
            offset,
            featured,
            ad_active: state.coordinator.is_in_break(),
        }
    }
}

/// One serialized poll-and-correct cycle. Pure given its inputs: the clock is
/// the `now` argument and every side effect goes through `player`.
pub fn poll_tick(
    state: &mut SyncState,
    channel: Option<&Channel>,
    store: &dyn ContentStore,
    viewer: &dyn SubscriberContext,
    player: &mut dyn PlayerControl,
    cfg: &SyncConfig,
    now: Timestamp,
) -> SyncSnapshot {
    if state.phase == SyncPhase::Unavailable {
        return SyncSnapshot::from_state(state, None, false);
    }

    let Some(resolved) = channel.and_then(|c| resolve_current(c, now)) else {
        // Nothing airing (empty channel, gap, or unknown channel): surface it
        // and retry on the next tick.
        state.phase = SyncPhase::Initializing;
        state.last_program_id = None;
        state.coordinator.abandon();
        state.current_ad = None;
        return SyncSnapshot::initializing();
    };

    let premium = viewer.is_premium_viewer();
    let featured = resolved.entry.featured;

    // Program transition takes priority over everything on this tick.
    if state.last_program_id.as_deref() != Some(resolved.entry.content_id.as_str()) {
        let media = match store.resolve(&resolved.entry.content_id) {
            Ok(media) => media,
            Err(err) => {
                tracing::warn!(content_id = %resolved.entry.content_id, %err, "poll failed");
                state.record_failure(cfg);
                return SyncSnapshot::from_state(state, None, false);
            }
        };
        tracing::info!(
            content_id = %resolved.entry.content_id,
            offset_secs = resolved.offset.as_secs_f64(),
            "program transition"
        );
        state.coordinator.abandon();
        state.current_ad = None;
        player.load(&media.media_locator);
        player.seek(resolved.offset);
        player.play();
        state.main_media = Some(media);
        state.last_program_id = Some(resolved.entry.content_id.clone());
        state.last_sync = Some(now);
        state.server_offset = resolved.offset;
        state.phase = SyncPhase::Synced;
        state.consecutive_failures = 0;
        // Arm the coordinator on the fresh instance; markers behind the join
        // offset must not fire.
        if !premium {
            state.coordinator.observe(&resolved);
        }
        return SyncSnapshot::from_state(state, Some(resolved.offset), featured);
    }

    state.consecutive_failures = 0;

    if !premium {
        if state.coordinator.is_in_break() {
            let finished = state
                .current_ad
                .as_ref()
                .is_none_or(|ad| player.position() >= ad.duration_hint);
            if finished {
                match state.coordinator.next_playable_ad(store) {
                    AdStep::Play { ad_id, media } => {
                        tracing::debug!(ad_id = %ad_id, "playing next ad in break");
                        player.load(&media.media_locator);
                        player.seek(SignedDuration::ZERO);
                        player.play();
                        state.current_ad = Some(media);
                    }
                    AdStep::Resume { offset } => {
                        tracing::debug!(
                            offset_secs = offset.as_secs_f64(),
                            "ad break finished, resuming main content"
                        );
                        state.current_ad = None;
                        if let Some(main) = &state.main_media {
                            player.load(&main.media_locator);
                        }
                        player.seek(offset);
                        player.play();
                    }
                }
            }
            // The local position is intentionally decoupled from the main
            // timeline during a break: no drift correction.
            return SyncSnapshot::from_state(state, Some(resolved.offset), featured);
        }

        if state.coordinator.observe(&resolved).is_some() {
            match state.coordinator.next_playable_ad(store) {
                AdStep::Play { ad_id, media } => {
                    tracing::info!(ad_id = %ad_id, "entering ad break");
                    player.load(&media.media_locator);
                    player.seek(SignedDuration::ZERO);
                    player.play();
                    state.current_ad = Some(media);
                    return SyncSnapshot::from_state(state, Some(resolved.offset), featured);
                }
                AdStep::Resume { .. } => {
                    // Every ad in the break was unresolvable; main content
                    // never left the player.
                }
            }
        }
    }

    // Drift correction, only when no transition happened this tick.
    if let Some(last_sync) = state.last_sync {
        let expected = state.server_offset + now.duration_since(last_sync);
        let local = player.position();
        let drift = (local - expected).abs();
        let cooled_down = state
            .last_correction
            .is_none_or(|last| now.duration_since(last) > cfg.correction_cooldown);
        if drift > cfg.drift_threshold && cooled_down {
            tracing::info!(
                drift_secs = drift.as_secs_f64(),
                "drift beyond threshold, correcting"
            );
            player.seek(resolved.offset);
            state.last_correction = Some(now);
        }
    }

    state.last_sync = Some(now);
    state.server_offset = resolved.offset;
    SyncSnapshot::from_state(state, Some(resolved.offset), featured)
}

/// A running protocol instance for one attached channel. Dropping the handle
/// does not stop the task; call [`Session::detach`].
pub struct Session {
    snapshot_rx: watch::Receiver<SyncSnapshot>,
    detached: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Session {
    /// Observable state stream for UI binding.
    pub fn snapshots(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Cooperative detach: cancels the pending timer and marks the attachment
    /// dead so an in-flight tick's result is discarded rather than applied.
    pub fn detach(self) {
        self.detached.store(true, Ordering::Relaxed);
        self.shutdown.notify_one();
    }

    pub fn task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Starts a protocol instance for `channel_id`. Each session runs one
/// serialized tick loop on its own task; sessions share nothing but the
/// read-only catalog.
pub fn attach(
    catalog: Arc<Catalog>,
    channel_id: impl Into<String>,
    store: Arc<dyn ContentStore + Send + Sync>,
    viewer: Arc<dyn SubscriberContext + Send + Sync>,
    mut player: Box<dyn PlayerControl + Send>,
    cfg: SyncConfig,
) -> Session {
    let channel_id = channel_id.into();
    let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::initializing());
    let detached = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(Notify::new());

    let task_detached = detached.clone();
    let task_shutdown = shutdown.clone();
    let task = tokio::spawn(async move {
        tracing::info!(channel = %channel_id, "session attached");
        let mut state = SyncState::new();
        loop {
            if task_detached.load(Ordering::Relaxed) {
                break;
            }
            // Each tick reads the current publication; a republished channel
            // is picked up atomically as a whole.
            let channel = catalog.get(&channel_id);
            let snapshot = poll_tick(
                &mut state,
                channel.as_deref(),
                store.as_ref(),
                viewer.as_ref(),
                player.as_mut(),
                &cfg,
                Timestamp::now(),
            );
            if task_detached.load(Ordering::Relaxed) {
                break;
            }
            let _ = snapshot_tx.send(snapshot);
            if state.phase() == SyncPhase::Unavailable {
                break;
            }
            tokio::select! {
                _ = task_shutdown.notified() => break,
                _ = tokio::time::sleep(cfg.poll_interval) => {}
            }
        }
        tracing::info!(channel = %channel_id, "session detached");
    });

    Session {
        snapshot_rx,
        detached,
        shutdown,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{AdBreak, ScheduleEntry};
    use crate::store::{InMemoryStore, StaticViewer};

    fn secs(s: i64) -> SignedDuration {
        SignedDuration::from_secs(s)
    }

    fn at(s: i64) -> Timestamp {
        Timestamp::UNIX_EPOCH + secs(s)
    }

    #[derive(Debug, Default)]
    struct TestPlayer {
        loaded: Vec<String>,
        seeks: Vec<SignedDuration>,
        position: SignedDuration,
        playing: bool,
    }

    impl PlayerControl for TestPlayer {
        fn load(&mut self, media_locator: &str) {
            self.loaded.push(media_locator.to_string());
        }

        fn seek(&mut self, position: SignedDuration) {
            self.seeks.push(position);
            self.position = position;
        }

        fn play(&mut self) {
            self.playing = true;
        }

        fn position(&self) -> SignedDuration {
            self.position
        }
    }

    fn entry(id: &str, start: i64, end: i64, ad_breaks: Vec<AdBreak>) -> ScheduleEntry {
        ScheduleEntry {
            content_id: id.to_string(),
            start: secs(start),
            end: secs(end),
            ad_breaks,
            featured: false,
        }
    }

    fn channel() -> Channel {
        Channel::new(
            "c1",
            Timestamp::UNIX_EPOCH,
            vec![
                entry(
                    "a",
                    0,
                    600,
                    vec![AdBreak {
                        position: secs(120),
                        ads: vec!["ad1".to_string()],
                    }],
                ),
                entry("b", 600, 900, vec![]),
            ],
        )
        .unwrap()
    }

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.insert("a", "media://a", secs(600));
        store.insert("b", "media://b", secs(300));
        store.insert("ad1", "media://ad1", secs(30));
        store
    }

    fn tick(
        state: &mut SyncState,
        ch: &Channel,
        store: &InMemoryStore,
        premium: bool,
        player: &mut TestPlayer,
        cfg: &SyncConfig,
        s: i64,
    ) -> SyncSnapshot {
        poll_tick(
            state,
            Some(ch),
            store,
            &StaticViewer(premium),
            player,
            cfg,
            at(s),
        )
    }

    #[test]
    fn test_initial_tick_loads_seeks_plays() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        let snap = tick(&mut state, &ch, &store, true, &mut player, &cfg, 90);
        assert_eq!(snap.phase, SyncPhase::Synced);
        assert_eq!(snap.program_id.as_deref(), Some("a"));
        assert_eq!(snap.offset, Some(secs(90)));
        assert_eq!(player.loaded, vec!["media://a"]);
        assert_eq!(player.seeks, vec![secs(90)]);
        assert!(player.playing);
    }

    #[test]
    fn test_nothing_airing_stays_initializing() {
        let empty = Channel::new("c1", Timestamp::UNIX_EPOCH, vec![]).unwrap();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        let snap = tick(&mut state, &empty, &store, true, &mut player, &cfg, 0);
        assert_eq!(snap.phase, SyncPhase::Initializing);
        assert!(player.loaded.is_empty());

        // Retried on the next tick, still nothing.
        let snap = tick(&mut state, &empty, &store, true, &mut player, &cfg, 7);
        assert_eq!(snap.phase, SyncPhase::Initializing);
    }

    #[test]
    fn test_transition_detection_loads_new_program() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, true, &mut player, &cfg, 590);
        let snap = tick(&mut state, &ch, &store, true, &mut player, &cfg, 610);
        assert_eq!(snap.program_id.as_deref(), Some("b"));
        assert_eq!(player.loaded, vec!["media://a", "media://b"]);
        assert_eq!(player.seeks.last(), Some(&secs(10)));
    }

    #[test]
    fn test_drift_correction_fires_beyond_threshold() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, true, &mut player, &cfg, 100);
        // Local playback stalled 5 s behind where it should be.
        player.position = secs(102);
        let snap = tick(&mut state, &ch, &store, true, &mut player, &cfg, 107);
        assert_eq!(snap.offset, Some(secs(107)));
        assert_eq!(player.seeks.last(), Some(&secs(107)));
    }

    #[test]
    fn test_drift_below_threshold_not_corrected() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, true, &mut player, &cfg, 100);
        player.position = secs(105); // 2 s behind expected 107
        tick(&mut state, &ch, &store, true, &mut player, &cfg, 107);
        assert_eq!(player.seeks, vec![secs(100)]);
    }

    #[test]
    fn test_correction_respects_cooldown() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, true, &mut player, &cfg, 100);
        player.position = secs(90);
        tick(&mut state, &ch, &store, true, &mut player, &cfg, 103);
        assert_eq!(player.seeks.len(), 2, "first correction applied");

        // Drift again immediately: inside the 5 s cooldown, no second seek.
        player.position = secs(90);
        tick(&mut state, &ch, &store, true, &mut player, &cfg, 106);
        assert_eq!(player.seeks.len(), 2);

        // Past the cooldown it corrects again.
        player.position = secs(90);
        tick(&mut state, &ch, &store, true, &mut player, &cfg, 110);
        assert_eq!(player.seeks.len(), 3);
    }

    #[test]
    fn test_ad_break_cycle_resumes_at_saved_offset() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, false, &mut player, &cfg, 100);
        let snap = tick(&mut state, &ch, &store, false, &mut player, &cfg, 125);
        assert!(snap.ad_active);
        assert_eq!(player.loaded.last().unwrap(), "media://ad1");
        assert_eq!(player.seeks.last(), Some(&secs(0)));

        // Mid-ad: nothing changes, no drift correction.
        player.position = secs(10);
        let seeks_before = player.seeks.len();
        let snap = tick(&mut state, &ch, &store, false, &mut player, &cfg, 132);
        assert!(snap.ad_active);
        assert_eq!(player.seeks.len(), seeks_before);

        // Ad ran its 30 s: resume main content at exactly the saved offset.
        player.position = secs(31);
        let snap = tick(&mut state, &ch, &store, false, &mut player, &cfg, 160);
        assert!(!snap.ad_active);
        assert_eq!(player.loaded.last().unwrap(), "media://a");
        assert_eq!(player.seeks.last(), Some(&secs(125)));
    }

    #[test]
    fn test_premium_viewer_bypasses_ads() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, true, &mut player, &cfg, 100);
        player.position = secs(125);
        let snap = tick(&mut state, &ch, &store, true, &mut player, &cfg, 125);
        assert!(!snap.ad_active);
        assert_eq!(player.loaded, vec!["media://a"]);
    }

    #[test]
    fn test_transition_abandons_ad_sequence() {
        let ch = channel();
        let store = store();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        tick(&mut state, &ch, &store, false, &mut player, &cfg, 100);
        let snap = tick(&mut state, &ch, &store, false, &mut player, &cfg, 125);
        assert!(snap.ad_active);

        // b is airing by the next poll: the break is dropped, b plays.
        let snap = tick(&mut state, &ch, &store, false, &mut player, &cfg, 610);
        assert!(!snap.ad_active);
        assert_eq!(snap.program_id.as_deref(), Some("b"));
        assert_eq!(player.loaded.last().unwrap(), "media://b");
    }

    #[test]
    fn test_consecutive_failures_become_unavailable() {
        let ch = channel();
        let empty_store = InMemoryStore::new();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        for (i, s) in [0, 7, 14].into_iter().enumerate() {
            let snap = tick(&mut state, &ch, &empty_store, true, &mut player, &cfg, s);
            if i < 2 {
                assert_eq!(snap.phase, SyncPhase::Initializing, "retrying at tick {i}");
            } else {
                assert_eq!(snap.phase, SyncPhase::Unavailable);
            }
        }
        assert!(player.loaded.is_empty());

        // Terminal: further ticks do not revive it.
        let snap = tick(&mut state, &ch, &store(), true, &mut player, &cfg, 21);
        assert_eq!(snap.phase, SyncPhase::Unavailable);
    }

    #[test]
    fn test_failure_counter_resets_on_success() {
        let ch = channel();
        let mut player = TestPlayer::default();
        let mut state = SyncState::new();
        let cfg = SyncConfig::default();

        let empty_store = InMemoryStore::new();
        tick(&mut state, &ch, &empty_store, true, &mut player, &cfg, 0);
        tick(&mut state, &ch, &empty_store, true, &mut player, &cfg, 7);

        // Store recovers before the third failure.
        let good = store();
        let snap = tick(&mut state, &ch, &good, true, &mut player, &cfg, 14);
        assert_eq!(snap.phase, SyncPhase::Synced);

        // Two fresh failures still do not hit the limit of three.
        tick(&mut state, &ch, &empty_store, true, &mut player, &cfg, 610);
        let snap = tick(&mut state, &ch, &empty_store, true, &mut player, &cfg, 617);
        assert_ne!(snap.phase, SyncPhase::Unavailable);
    }

    #[tokio::test]
    async fn test_session_attach_syncs_and_detaches() {
        let catalog = Arc::new(Catalog::new());
        catalog.publish(channel());
        let store = Arc::new(store());
        let cfg = SyncConfig {
            poll_interval: Duration::from_millis(5),
            ..SyncConfig::default()
        };

        let session = attach(
            catalog,
            "c1",
            store,
            Arc::new(StaticViewer(true)),
            Box::new(TestPlayer::default()),
            cfg,
        );
        let mut rx = session.snapshots();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().phase == SyncPhase::Synced {
                    break;
                }
            }
        })
        .await
        .expect("session should sync");

        let task = {
            let Session {
                snapshot_rx: _,
                detached,
                shutdown,
                task,
            } = session;
            detached.store(true, Ordering::Relaxed);
            shutdown.notify_one();
            task
        };
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("task should stop after detach")
            .unwrap();
    }
}
