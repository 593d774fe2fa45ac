// Event track - tick-ordered MIDI messages with matched note pairs
// Tracks are immutable while readers are active; edits build a fresh track
// and swap it in wholesale under the sequence's write guard.

use crate::midi::event::MidiEvent;

/// One stored event: a message, its tick timestamp and, for note-ons, the
/// index of the matching note-off within the same track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackEvent {
    pub message: MidiEvent,
    pub tick: f64,
    note_off: Option<usize>,
}

impl TrackEvent {
    pub fn new(message: MidiEvent, tick: f64) -> Self {
        Self {
            message,
            tick,
            note_off: None,
        }
    }

    /// Index of the matching note-off, if this is a matched note-on.
    pub fn note_off_index(&self) -> Option<usize> {
        self.note_off
    }
}

/// An ordered-by-timestamp list of MIDI events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    events: Vec<TrackEvent>,
}

impl Track {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Build a sorted, pair-matched track from raw (message, tick) pairs.
    pub fn from_events(events: impl IntoIterator<Item = (MidiEvent, f64)>) -> Self {
        let mut track = Self::new();

        for (message, tick) in events {
            track.add_event(message, tick);
        }

        track.sort();
        track.update_matched_pairs();
        track
    }

    /// Append an event without re-sorting. Call `sort` and
    /// `update_matched_pairs` once the track is complete.
    pub fn add_event(&mut self, message: MidiEvent, tick: f64) {
        self.events.push(TrackEvent::new(message, tick));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Option<&TrackEvent> {
        self.events.get(index)
    }

    /// Stable sort by tick; equal timestamps keep insertion order.
    pub fn sort(&mut self) {
        self.events
            .sort_by(|a, b| a.tick.partial_cmp(&b.tick).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Re-link every note-on to the next unmatched note-off with the same
    /// note number. Stale links are cleared first.
    pub fn update_matched_pairs(&mut self) {
        for event in &mut self.events {
            event.note_off = None;
        }

        let mut claimed = vec![false; self.events.len()];

        for on_index in 0..self.events.len() {
            let note = match self.events[on_index].message {
                MidiEvent::NoteOn { note, .. } => note,
                _ => continue,
            };

            for off_index in on_index + 1..self.events.len() {
                if claimed[off_index] {
                    continue;
                }

                if self.events[off_index].message == (MidiEvent::NoteOff { note }) {
                    claimed[off_index] = true;
                    self.events[on_index].note_off = Some(off_index);
                    break;
                }
            }
        }
    }

    /// Index of the first event at or after the given tick.
    pub fn next_index_at_time(&self, tick: f64) -> usize {
        self.events.partition_point(|e| e.tick < tick)
    }

    /// Timestamp of the last event, or 0 for an empty track.
    pub fn end_time(&self) -> f64 {
        self.events.last().map(|e| e.tick).unwrap_or(0.0)
    }

    /// The matching note-off event for a note-on at `index`.
    pub fn note_off_for(&self, index: usize) -> Option<&TrackEvent> {
        let off_index = self.events.get(index)?.note_off?;
        self.events.get(off_index)
    }
}
