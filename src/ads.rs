use std::collections::HashSet;

use jiff::SignedDuration;

use crate::resolve::ResolvedProgram;
use crate::schedule::AdBreak;
use crate::store::{ContentStore, MediaResolution};

/// Where a client is relative to the main content timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum AdState {
    Playing,
    PlayingAd {
        /// Main-content offset captured at the trigger moment. Resuming seeks
        /// here exactly; elapsed ad-watch time is never added.
        saved_offset: SignedDuration,
        /// Index of the next ad to consider in the active break's list.
        ad_index: usize,
    },
}

/// Reported when a marker fires and an ad sequence begins.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakStart {
    pub position: SignedDuration,
    pub saved_offset: SignedDuration,
    pub ad_count: usize,
}

/// Next action inside an active break.
#[derive(Debug, Clone, PartialEq)]
pub enum AdStep {
    Play { ad_id: String, media: MediaResolution },
    Resume { offset: SignedDuration },
}

/// Decides ad-insertion transitions from resolver output and a program's
/// declared markers. Deterministic given its observation sequence; holds no
/// clock and does no I/O beyond content-store lookups for ad media.
///
/// Fired markers are keyed by `(instance_start, position)`: a marker fires
/// once per program instance but again on the next loop pass. A global
/// "already played" flag would silence ads forever after the first loop.
#[derive(Debug, Default)]
pub struct AdBreakCoordinator {
    state: AdState,
    /// `(instance_start nanos, marker position nanos)` pairs already fired.
    fired: HashSet<(i128, i128)>,
    /// Instance currently being observed, by its absolute start.
    instance: Option<i128>,
    /// Offset seen on the previous observation of this instance; crossing is
    /// detected against it, so joining mid-program does not fire markers
    /// already behind the join point.
    last_offset: Option<SignedDuration>,
    /// Ads of the active break, in declared order.
    queue: Vec<String>,
}

impl Default for AdState {
    fn default() -> Self {
        AdState::Playing
    }
}

impl AdBreakCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AdState {
        &self.state
    }

    pub fn is_in_break(&self) -> bool {
        matches!(self.state, AdState::PlayingAd { .. })
    }

    /// Feeds one resolver answer through the state machine. Returns the break
    /// start when a marker fires on this observation.
    pub fn observe(&mut self, resolved: &ResolvedProgram<'_>) -> Option<BreakStart> {
        let instance_key = resolved.instance_start.as_nanosecond();
        if self.instance != Some(instance_key) {
            // New program instance: any in-flight sequence is abandoned and
            // markers from other instances are forgotten.
            if self.is_in_break() {
                tracing::debug!("program transition abandoned active ad sequence");
            }
            self.state = AdState::Playing;
            self.queue.clear();
            self.last_offset = None;
            self.instance = Some(instance_key);
            self.fired.retain(|(instance, _)| *instance == instance_key);
        }

        if self.is_in_break() {
            return None;
        }

        let previous = self.last_offset;
        self.last_offset = Some(resolved.offset);

        // Earliest unfired marker crossed since the last observation.
        let mut firing: Option<&AdBreak> = None;
        for ad_break in &resolved.entry.ad_breaks {
            let key = (instance_key, ad_break.position.as_nanos());
            if self.fired.contains(&key) {
                continue;
            }
            let crossed = match previous {
                Some(last) => last < ad_break.position && ad_break.position <= resolved.offset,
                // First observation of this instance arms the machine only.
                None => false,
            };
            if crossed && firing.is_none_or(|b| ad_break.position < b.position) {
                firing = Some(ad_break);
            }
        }

        let ad_break = firing?;
        self.fired.insert((instance_key, ad_break.position.as_nanos()));
        self.queue = ad_break.ads.clone();
        let saved_offset = resolved.offset;
        self.state = AdState::PlayingAd {
            saved_offset,
            ad_index: 0,
        };
        Some(BreakStart {
            position: ad_break.position,
            saved_offset,
            ad_count: self.queue.len(),
        })
    }

    /// Advances through the active break: the next resolvable ad, or the
    /// resume point once the list is exhausted. Unresolvable ads are skipped
    /// so a missing ad can never strand playback in the break.
    pub fn next_playable_ad(&mut self, store: &dyn ContentStore) -> AdStep {
        let AdState::PlayingAd {
            saved_offset,
            mut ad_index,
        } = self.state.clone()
        else {
            return AdStep::Resume {
                offset: SignedDuration::ZERO,
            };
        };

        while let Some(ad_id) = self.queue.get(ad_index).cloned() {
            ad_index += 1;
            match store.resolve(&ad_id) {
                Ok(media) => {
                    self.state = AdState::PlayingAd {
                        saved_offset,
                        ad_index,
                    };
                    return AdStep::Play { ad_id, media };
                }
                Err(err) => {
                    tracing::warn!(ad_id = %ad_id, %err, "skipping unresolvable ad");
                }
            }
        }

        self.state = AdState::Playing;
        self.queue.clear();
        AdStep::Resume {
            offset: saved_offset,
        }
    }

    /// Drops any active sequence, e.g. when the protocol detects a program
    /// transition before the coordinator observes the new instance.
    pub fn abandon(&mut self) {
        self.state = AdState::Playing;
        self.queue.clear();
    }
}
