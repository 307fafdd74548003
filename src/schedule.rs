use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serde helper: schedule offsets travel as fractional seconds in catalog
/// documents, with sub-second precision preserved.
pub mod secs {
    use jiff::SignedDuration;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &SignedDuration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SignedDuration, D::Error> {
        let secs = f64::deserialize(d)?;
        SignedDuration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("entry '{content_id}' has end {end} <= start {start}")]
    InvertedEntry {
        content_id: String,
        start: SignedDuration,
        end: SignedDuration,
    },
    #[error("entry '{content_id}' has a negative offset")]
    NegativeOffset { content_id: String },
    #[error("entries '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },
    #[error("entry '{content_id}' has an ad break at {position}, outside [0, {duration})")]
    MarkerOutOfRange {
        content_id: String,
        position: SignedDuration,
        duration: SignedDuration,
    },
    #[error("entry '{content_id}' declares two ad breaks at {position}")]
    DuplicateMarker {
        content_id: String,
        position: SignedDuration,
    },
}

/// A point inside a program at which an ad sequence runs. `position` is an
/// offset into the program, not into the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBreak {
    #[serde(with = "secs")]
    pub position: SignedDuration,
    pub ads: Vec<String>,
}

/// One program's placement in the loop, offsets relative to the loop start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub content_id: String,
    #[serde(with = "secs")]
    pub start: SignedDuration,
    #[serde(with = "secs")]
    pub end: SignedDuration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ad_breaks: Vec<AdBreak>,
    #[serde(default)]
    pub featured: bool,
}

impl ScheduleEntry {
    pub fn duration(&self) -> SignedDuration {
        self.end - self.start
    }
}

/// Raw channel document as it appears in the catalog. Validated into a
/// [`Channel`] before anything resolves against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDoc {
    pub id: String,
    pub start: Timestamp,
    pub entries: Vec<ScheduleEntry>,
}

/// A published channel: identifier, wall-clock anchor of the first entry's
/// declared start, and the validated entry sequence sorted by start offset.
///
/// The sequence is immutable once constructed; the catalog republishes whole
/// channels instead of mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: String,
    start: Timestamp,
    entries: Vec<ScheduleEntry>,
    loop_duration: SignedDuration,
}

impl Channel {
    /// Validates and publishes a schedule. Entries are sorted by start offset;
    /// overlaps, inverted or negative offsets, and malformed ad breaks are
    /// structural violations and rejected here so the resolver never has to
    /// re-check them. An empty sequence is valid (a channel with nothing
    /// airing).
    pub fn new(
        id: impl Into<String>,
        start: Timestamp,
        mut entries: Vec<ScheduleEntry>,
    ) -> Result<Self, ScheduleError> {
        entries.sort_by_key(|e| e.start);

        for entry in &entries {
            if entry.start < SignedDuration::ZERO || entry.end < SignedDuration::ZERO {
                return Err(ScheduleError::NegativeOffset {
                    content_id: entry.content_id.clone(),
                });
            }
            if entry.end <= entry.start {
                return Err(ScheduleError::InvertedEntry {
                    content_id: entry.content_id.clone(),
                    start: entry.start,
                    end: entry.end,
                });
            }
            let duration = entry.duration();
            let mut seen = Vec::with_capacity(entry.ad_breaks.len());
            for ad_break in &entry.ad_breaks {
                if ad_break.position < SignedDuration::ZERO || ad_break.position >= duration {
                    return Err(ScheduleError::MarkerOutOfRange {
                        content_id: entry.content_id.clone(),
                        position: ad_break.position,
                        duration,
                    });
                }
                if seen.contains(&ad_break.position) {
                    return Err(ScheduleError::DuplicateMarker {
                        content_id: entry.content_id.clone(),
                        position: ad_break.position,
                    });
                }
                seen.push(ad_break.position);
            }
        }

        for pair in entries.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ScheduleError::Overlap {
                    first: pair[0].content_id.clone(),
                    second: pair[1].content_id.clone(),
                });
            }
        }

        let loop_duration = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => last.end - first.start,
            _ => SignedDuration::ZERO,
        };

        Ok(Self {
            id: id.into(),
            start,
            entries,
            loop_duration,
        })
    }

    pub fn from_doc(doc: ChannelDoc) -> Result<Self, ScheduleError> {
        Self::new(doc.id, doc.start, doc.entries)
    }

    pub fn to_doc(&self) -> ChannelDoc {
        ChannelDoc {
            id: self.id.clone(),
            start: self.start,
            entries: self.entries.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wall-clock anchor: the instant the first entry's declared start offset
    /// occurred in loop iteration zero. May be historical or in the future.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// The period after which the schedule repeats: the span of the declared
    /// offsets. Equals the sum of entry durations for contiguous schedules.
    /// Zero for an empty channel, which has no resolvable "now".
    pub fn loop_duration(&self) -> SignedDuration {
        self.loop_duration
    }
}
