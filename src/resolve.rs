use jiff::{SignedDuration, Timestamp};

use crate::duration::{clamp_non_negative, floored_mod};
use crate::schedule::{Channel, ScheduleEntry};

/// Hard cap on blocks emitted by [`resolve_window`]. A guide window is a few
/// hours; anything larger is cut off rather than allowed to spin.
const MAX_WINDOW_BLOCKS: usize = 1024;

/// The authoritative answer to "what is airing right now". Computed fresh on
/// every call; the answer is a function of `now` and is never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProgram<'a> {
    pub entry: &'a ScheduleEntry,
    /// Absolute time this instance of the entry began, for this loop pass.
    pub instance_start: Timestamp,
    /// Offset into the program, always in `[0, entry duration)`.
    pub offset: SignedDuration,
}

/// One loop instance of an entry clipped to a guide window.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramBlock<'a> {
    pub entry: &'a ScheduleEntry,
    pub instance_start: Timestamp,
    pub instance_end: Timestamp,
    /// Offset of the visible part from the window start.
    pub visible_left: SignedDuration,
    pub visible_width: SignedDuration,
}

/// Position of `now` inside the loop, relative to the first entry's declared
/// start offset.
fn position_in_loop(channel: &Channel, now: Timestamp) -> Option<SignedDuration> {
    let period = channel.loop_duration();
    if channel.entries().is_empty() || period.is_zero() {
        return None;
    }
    let elapsed = now.duration_since(channel.start());
    let (_, position) = floored_mod(elapsed, period);
    Some(position)
}

pub fn resolve_current(channel: &Channel, now: Timestamp) -> Option<ResolvedProgram<'_>> {
    let position = position_in_loop(channel, now)?;
    let base = channel.entries()[0].start;

    for entry in channel.entries() {
        let rel_start = entry.start - base;
        let rel_end = entry.end - base;
        if position >= rel_start && position < rel_end {
            let offset = clamp_non_negative(position - rel_start);
            return Some(ResolvedProgram {
                entry,
                instance_start: now - offset,
                offset,
            });
        }
    }

    // Position falls between declared entries: dead air, a valid off-air state.
    None
}

/// The entry that airs after the current position, wrapping to the first
/// entry when the current match is the last (the loop is circular). During a
/// gap this is the next upcoming entry.
pub fn resolve_next(channel: &Channel, now: Timestamp) -> Option<&ScheduleEntry> {
    let position = position_in_loop(channel, now)?;
    let entries = channel.entries();
    let base = entries[0].start;

    for (i, entry) in entries.iter().enumerate() {
        let rel_start = entry.start - base;
        let rel_end = entry.end - base;
        if position >= rel_start && position < rel_end {
            return Some(&entries[(i + 1) % entries.len()]);
        }
        if position < rel_start {
            // In the gap before this entry.
            return Some(entry);
        }
    }

    // In the trailing gap: the next pass starts at the first entry.
    entries.first()
}

/// Blocks for every loop instance overlapping `[window_start, window_end)`,
/// clipped to the window. The cursor advances by whole instances (or to the
/// next entry boundary across a gap), so each instance is emitted at most
/// once and iteration always terminates.
pub fn resolve_window<'a>(
    channel: &'a Channel,
    window_start: Timestamp,
    window_end: Timestamp,
) -> Vec<ProgramBlock<'a>> {
    let mut blocks = Vec::new();
    if window_start >= window_end || channel.entries().is_empty() {
        return blocks;
    }
    let period = channel.loop_duration();
    if period.is_zero() {
        return blocks;
    }

    let mut cursor = window_start;
    while cursor < window_end && blocks.len() < MAX_WINDOW_BLOCKS {
        match resolve_current(channel, cursor) {
            Some(resolved) => {
                let instance_end = resolved.instance_start + resolved.entry.duration();
                let visible_start = if resolved.instance_start > window_start {
                    resolved.instance_start
                } else {
                    window_start
                };
                let visible_end = if instance_end < window_end {
                    instance_end
                } else {
                    window_end
                };
                blocks.push(ProgramBlock {
                    entry: resolved.entry,
                    instance_start: resolved.instance_start,
                    instance_end,
                    visible_left: visible_start.duration_since(window_start),
                    visible_width: visible_end.duration_since(visible_start),
                });
                cursor = instance_end;
            }
            None => {
                // Inside a gap: jump to the next entry boundary, moving by at
                // least one step so a degenerate answer can never stall here.
                let step = gap_remaining(channel, cursor)
                    .max(SignedDuration::from_nanos(1));
                cursor = cursor + step;
            }
        }
    }
    blocks
}

/// Time from `now` (known to be inside a gap) to the next entry's start.
fn gap_remaining(channel: &Channel, now: Timestamp) -> SignedDuration {
    let Some(position) = position_in_loop(channel, now) else {
        return SignedDuration::ZERO;
    };
    let base = channel.entries()[0].start;
    for entry in channel.entries() {
        let rel_start = entry.start - base;
        if position < rel_start {
            return rel_start - position;
        }
    }
    // Trailing gap: wraps to the start of the next loop pass.
    channel.loop_duration() - position
}
