//! Speaker channel naming: the canonical measurement order, and the mapping
//! from a logical channel to the stimulus that is actually played for it.

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};

/// The order in which channels are swept within an iteration. Anything not
/// listed here is measured afterwards, alphabetically.
pub const CANONICAL_ORDER: &[&str] = &[
    "C", "FL", "FR", "SLA", "SRA", "SBL", "SBR", "FWL", "FWR", "TFL", "TFR", "TML", "TMR", "TRL",
    "TRR", "FDL", "FDR", "SDL", "SDR", "BDL", "BDR", "CH", "TS", "SW1", "SW2", "SW3", "SW4",
];

/// The channels offered when no settings file exists.
pub const DEFAULT_CHANNELS: &[&str] = &[
    "C", "FL", "FR", "SLA", "SRA", "TFL", "TFR", "TRL", "TRR", "SW1", "SW2",
];

/// Subwoofers that may need moving onto the SW1 output.
const SHARED_SUBWOOFERS: &[&str] = &["SW2", "SW3", "SW4"];

/// Every subwoofer stimulus is the same file.
pub const SUBWOOFER_STIMULUS: &str = "SWx";

/// Left and right mains, used for microphone centering.
pub const LEFT: &str = "FL";
/// Right main.
pub const RIGHT: &str = "FR";

/// Position of `channel` in [`CANONICAL_ORDER`], if it is listed.
pub fn canonical_index(channel: &str) -> Option<usize> {
    CANONICAL_ORDER.iter().position(|c| *c == channel)
}

/// Orders two channels the way they are swept.
pub fn compare_channels(a: &str, b: &str) -> Ordering {
    match (canonical_index(a), canonical_index(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Whether `channel` names a subwoofer.
pub fn is_subwoofer(channel: &str) -> bool {
    channel.starts_with("SW")
}

/// The stimulus file stem for an audio id. All subwoofers play `SWx`.
pub fn stimulus_stem(audio: &str) -> &str {
    if is_subwoofer(audio) {
        SUBWOOFER_STIMULUS
    } else {
        audio
    }
}

/// Normalises user input such as `" fl "` into `"FL"`.
pub fn normalize(channel: &str) -> String {
    channel.trim().to_ascii_uppercase()
}

/// One selected channel: the audio id played for it and a free-form status
/// string that is persisted along with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Stimulus id to play for this channel.
    pub audio: String,
    /// User-visible status, kept verbatim.
    pub status: String,
}

impl ChannelEntry {
    /// An identity entry: the channel plays its own stimulus.
    pub fn identity(channel: &str) -> Self {
        Self {
            audio: channel.to_owned(),
            status: "Selected".to_owned(),
        }
    }
}

/// Selected channels and the stimulus each of them plays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMapping {
    entries: BTreeMap<String, ChannelEntry>,
}

impl ChannelMapping {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity mapping over the given channels.
    pub fn identity<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = channels
            .into_iter()
            .map(|c| normalize(c.as_ref()))
            .filter(|c| !c.is_empty())
            .map(|c| {
                let entry = ChannelEntry::identity(&c);
                (c, entry)
            })
            .collect();
        Self { entries }
    }

    /// Wrap an already loaded map, e.g. from the settings file.
    pub fn from_entries(entries: BTreeMap<String, ChannelEntry>) -> Self {
        Self { entries }
    }

    /// The raw entries.
    pub fn entries(&self) -> &BTreeMap<String, ChannelEntry> {
        &self.entries
    }

    /// Add `channel` with an identity entry, keeping an existing entry.
    pub fn select(&mut self, channel: &str) {
        let channel = normalize(channel);
        self.entries
            .entry(channel.clone())
            .or_insert_with(|| ChannelEntry::identity(&channel));
    }

    /// Remove `channel` from the selection.
    pub fn deselect(&mut self, channel: &str) {
        self.entries.remove(&normalize(channel));
    }

    /// Whether `channel` is selected.
    pub fn is_selected(&self, channel: &str) -> bool {
        self.entries.contains_key(&normalize(channel))
    }

    /// Play `audio` when measuring `channel`. Selects the channel if needed.
    pub fn remap(&mut self, channel: &str, audio: &str) {
        let channel = normalize(channel);
        let audio = normalize(audio);
        self.entries
            .entry(channel.clone())
            .and_modify(|e| e.audio = audio.clone())
            .or_insert_with(|| ChannelEntry {
                audio,
                status: "Selected".to_owned(),
            });
    }

    /// The audio id for `channel`, falling back to the channel itself.
    pub fn audio_for<'a>(&'a self, channel: &'a str) -> &'a str {
        self.entries
            .get(channel)
            .map(|e| e.audio.as_str())
            .unwrap_or(channel)
    }

    /// Selected channels in canonical sweep order.
    pub fn ordered_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.entries.keys().cloned().collect();
        channels.sort_by(|a, b| compare_channels(a, b));
        channels
    }

    /// True when every selected subwoofer plays its own stimulus.
    pub fn subwoofers_identity_mapped(&self) -> bool {
        self.entries
            .iter()
            .filter(|(channel, _)| is_subwoofer(channel))
            .all(|(channel, entry)| entry.audio == *channel)
    }

    /// Whether measuring `channel` needs the user to move its cable onto the
    /// SW1 output first. That is the case for SW2 to SW4 as soon as any
    /// subwoofer is routed through another channel's stimulus.
    pub fn needs_cable_swap(&self, channel: &str) -> bool {
        SHARED_SUBWOOFERS.contains(&channel) && !self.subwoofers_identity_mapped()
    }

    /// Number of selected channels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no channel is selected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
