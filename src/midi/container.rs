// External multi-track MIDI container
// In-memory representation exchanged with the file codec collaborator.
// Parsing or writing actual .mid bytes is not this crate's job; the engine
// only consumes and produces this normalized form.

use crate::midi::event::MidiEvent;
use serde::{Deserialize, Serialize};

/// Pitch bend centre value used for placeholder tracks.
const PITCH_BEND_CENTRE: i16 = 8192;

/// Default tempo meta for placeholder tracks (120 BPM).
const DEFAULT_TEMPO_MICROSECONDS: u32 = 500_000;

/// One event inside a container track, stamped in the container's own
/// tick resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub tick: f64,
    pub message: ContainerMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerMessage {
    /// A regular channel message.
    Channel(MidiEvent),
    /// System-exclusive payload; stripped when loading into a sequence.
    SysEx(Vec<u8>),
    /// Time signature meta event.
    TimeSignature { nominator: u8, denominator: u8 },
    /// Tempo meta event (microseconds per quarter note).
    Tempo { microseconds_per_quarter: u32 },
    /// End-of-track meta event.
    EndOfTrack,
    /// Any other meta event, identified by its type byte.
    Meta { kind: u8 },
}

impl ContainerMessage {
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            ContainerMessage::TimeSignature { .. }
                | ContainerMessage::Tempo { .. }
                | ContainerMessage::EndOfTrack
                | ContainerMessage::Meta { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerTrack {
    pub events: Vec<ContainerEvent>,
}

impl ContainerTrack {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, tick: f64, message: ContainerMessage) {
        self.events.push(ContainerEvent { tick, message });
    }

    /// Sort events by tick, keeping insertion order for equal timestamps.
    pub fn sort(&mut self) {
        self.events
            .sort_by(|a, b| a.tick.partial_cmp(&b.tick).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// A placeholder track used to pad a container up to a target index:
    /// centred pitch wheel, a tempo meta and an end marker.
    pub fn placeholder(end_tick: f64) -> Self {
        let mut track = Self::new();
        track.push(
            0.0,
            ContainerMessage::Channel(MidiEvent::PitchBend {
                value: PITCH_BEND_CENTRE,
            }),
        );
        track.push(
            0.0,
            ContainerMessage::Tempo {
                microseconds_per_quarter: DEFAULT_TEMPO_MICROSECONDS,
            },
        );
        track.push(end_tick, ContainerMessage::EndOfTrack);
        track
    }
}

/// A multi-track MIDI container as handed over by the external codec or
/// the resource pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiContainer {
    pub ticks_per_quarter: u16,
    pub tracks: Vec<ContainerTrack>,
}

impl MidiContainer {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            tracks: Vec::new(),
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Timestamp of the last event across all tracks, in container ticks.
    pub fn last_timestamp(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.events.iter())
            .map(|e| e.tick)
            .fold(0.0, f64::max)
    }

    /// The last embedded time signature, if any track carries one.
    pub fn find_time_signature(&self) -> Option<(u8, u8)> {
        let mut found = None;

        for track in &self.tracks {
            for event in &track.events {
                if let ContainerMessage::TimeSignature {
                    nominator,
                    denominator,
                } = event.message
                {
                    found = Some((nominator, denominator));
                }
            }
        }

        found
    }
}

impl Default for MidiContainer {
    fn default() -> Self {
        Self::new(crate::sequencer::time::TICKS_PER_QUARTER as u16)
    }
}
