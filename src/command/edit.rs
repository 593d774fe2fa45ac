// EditAction - reversible sequence mutations
// A tagged action captures old and new content for one sequence, identified
// by id. Performing or undoing against a different current sequence is a
// benign no-op, not an error: the edit simply no longer applies.

use crate::midi::event::EngineEvent;
use crate::sequencer::sequence::{ErrorPolicy, MidiSequence};
use crate::sequencer::signature::TimeSignature;
use crate::sequencer::time::{self, TICKS_PER_QUARTER};
use crate::sequencer::track::Track;
use std::sync::Arc;

/// Build a fresh track from flat sample-stamped events and publish it as
/// the sequence's current track.
///
/// Timestamps convert back to the tick domain and clip to the destination's
/// current length. A note-on's pending transpose is propagated into its
/// paired note-off first, because the pair is matched by final note number
/// once the events are written.
pub fn write_event_list(
    destination: &MidiSequence,
    events: &[EngineEvent],
    bpm: f64,
    sample_rate: f64,
) {
    let samples_per_quarter = time::samples_per_quarter(bpm, sample_rate);
    let max_length = destination.length_ticks();

    let mut events: Vec<EngineEvent> = events.to_vec();

    for index in 0..events.len() {
        if events[index].is_note_on() && events[index].transpose != 0 {
            let id = events[index].event_id;
            let amount = events[index].transpose;

            for candidate in events.iter_mut() {
                if candidate.is_note_off() && candidate.event_id == id {
                    candidate.transpose = amount;
                    break;
                }
            }
        }
    }

    let mut track = Track::new();

    for event in &events {
        let mut tick = event.timestamp as f64 / samples_per_quarter * TICKS_PER_QUARTER;

        if max_length != 0.0 {
            tick = tick.min(max_length);
        }

        track.add_event(event.event.transposed(event.transpose), tick);
    }

    track.sort();
    track.update_matched_pairs();
    destination.swap_current_track(track);
}

/// One undoable edit of a sequence.
#[derive(Debug)]
pub enum EditAction {
    /// Replace the current track's content with a new flat event list,
    /// restoring the captured time signature on both directions.
    ReplaceEvents {
        sequence: Arc<MidiSequence>,
        sequence_id: String,
        old_events: Vec<EngineEvent>,
        new_events: Vec<EngineEvent>,
        signature: TimeSignature,
        bpm: f64,
        sample_rate: f64,
    },
    /// Change the time signature (and with it the sequence length).
    SetTimeSignature {
        sequence: Arc<MidiSequence>,
        sequence_id: String,
        old: TimeSignature,
        new: TimeSignature,
    },
}

impl EditAction {
    /// Capture a content replacement for the given sequence. The old
    /// content is flattened with the lenient policy so a capture never
    /// fails.
    pub fn replace_events(
        sequence: &Arc<MidiSequence>,
        new_events: Vec<EngineEvent>,
        sample_rate: f64,
        bpm: f64,
    ) -> Self {
        let old_events = sequence
            .event_list(sample_rate, bpm, ErrorPolicy::Lenient)
            .unwrap_or_default();

        EditAction::ReplaceEvents {
            sequence_id: sequence.id().to_string(),
            sequence: Arc::clone(sequence),
            old_events,
            new_events,
            signature: sequence.signature(),
            bpm,
            sample_rate,
        }
    }

    pub fn set_time_signature(sequence: &Arc<MidiSequence>, new: TimeSignature) -> Self {
        EditAction::SetTimeSignature {
            sequence_id: sequence.id().to_string(),
            sequence: Arc::clone(sequence),
            old: sequence.signature(),
            new,
        }
    }

    pub fn description(&self) -> String {
        match self {
            EditAction::ReplaceEvents { new_events, .. } => {
                format!("Replace sequence content ({} events)", new_events.len())
            }
            EditAction::SetTimeSignature { new, .. } => {
                format!("Set time signature to {}", new)
            }
        }
    }

    /// The id this action was captured for.
    pub fn sequence_id(&self) -> &str {
        match self {
            EditAction::ReplaceEvents { sequence_id, .. }
            | EditAction::SetTimeSignature { sequence_id, .. } => sequence_id,
        }
    }

    fn applies_to(&self, current_id: Option<&str>) -> bool {
        current_id == Some(self.sequence_id())
    }

    /// Apply the edit. Returns `false` when the captured sequence is no
    /// longer the current one (switched or removed since capture).
    pub fn perform(&self, current_id: Option<&str>) -> bool {
        if !self.applies_to(current_id) {
            return false;
        }

        match self {
            EditAction::ReplaceEvents {
                sequence,
                new_events,
                signature,
                bpm,
                sample_rate,
                ..
            } => {
                write_event_list(sequence, new_events, *bpm, *sample_rate);
                sequence.set_length_from_signature(*signature);
            }
            EditAction::SetTimeSignature { sequence, new, .. } => {
                sequence.set_length_from_signature(*new);
            }
        }

        true
    }

    /// Revert the edit, with the same currency check as `perform`.
    pub fn undo(&self, current_id: Option<&str>) -> bool {
        if !self.applies_to(current_id) {
            return false;
        }

        match self {
            EditAction::ReplaceEvents {
                sequence,
                old_events,
                signature,
                bpm,
                sample_rate,
                ..
            } => {
                write_event_list(sequence, old_events, *bpm, *sample_rate);
                sequence.set_length_from_signature(*signature);
            }
            EditAction::SetTimeSignature { sequence, old, .. } => {
                sequence.set_length_from_signature(*old);
            }
        }

        true
    }
}
