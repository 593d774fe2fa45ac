// MIDI event types
// MidiEvent is the channel-message payload stored in sequence tracks;
// EngineEvent is the flat sample-stamped form used by the audio engine.

use serde::{Deserialize, Serialize};

/// Controller number for "all notes off" (CC 123).
const CC_ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MidiEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    PitchBend { value: i16 },
}

impl MidiEvent {
    /// Parse a raw MIDI message. The channel nibble is ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let status = bytes[0];
        let message_type = status & 0xF0;

        match message_type {
            0x90 => {
                // Note On (velocity 0 = Note Off)
                if bytes.len() >= 3 {
                    let note = bytes[1];
                    let velocity = bytes[2];
                    if velocity == 0 {
                        Some(MidiEvent::NoteOff { note })
                    } else {
                        Some(MidiEvent::NoteOn { note, velocity })
                    }
                } else {
                    None
                }
            }
            0x80 => {
                if bytes.len() >= 3 {
                    Some(MidiEvent::NoteOff { note: bytes[1] })
                } else {
                    None
                }
            }
            0xB0 => {
                if bytes.len() >= 3 {
                    Some(MidiEvent::ControlChange {
                        controller: bytes[1],
                        value: bytes[2],
                    })
                } else {
                    None
                }
            }
            0xE0 => {
                if bytes.len() >= 3 {
                    let lsb = bytes[1] as i16;
                    let msb = bytes[2] as i16;
                    Some(MidiEvent::PitchBend {
                        value: (msb << 7) | lsb,
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiEvent::NoteOff { .. })
    }

    /// Note number for note events, `None` for anything else.
    pub fn note_number(&self) -> Option<u8> {
        match self {
            MidiEvent::NoteOn { note, .. } | MidiEvent::NoteOff { note } => Some(*note),
            _ => None,
        }
    }

    pub fn is_all_notes_off(&self) -> bool {
        matches!(
            self,
            MidiEvent::ControlChange {
                controller: CC_ALL_NOTES_OFF,
                ..
            }
        )
    }

    /// Copy with the note number shifted by `amount`, clamped to 0..=127.
    /// Non-note events are returned unchanged.
    pub fn transposed(&self, amount: i8) -> Self {
        let shift = |note: u8| (note as i16 + amount as i16).clamp(0, 127) as u8;

        match *self {
            MidiEvent::NoteOn { note, velocity } => MidiEvent::NoteOn {
                note: shift(note),
                velocity,
            },
            MidiEvent::NoteOff { note } => MidiEvent::NoteOff { note: shift(note) },
            other => other,
        }
    }
}

/// A MIDI event with a sample-domain timestamp, a pairing identifier
/// linking a note-on to its note-off, and a pending transpose amount
/// resolved when the pair is finalized.
///
/// `artificial` marks events generated by the engine itself, so live-input
/// capture can tell them apart from player input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub event: MidiEvent,
    pub timestamp: u64,
    pub event_id: u16,
    pub transpose: i8,
    pub artificial: bool,
}

impl EngineEvent {
    pub fn new(event: MidiEvent, timestamp: u64) -> Self {
        Self {
            event,
            timestamp,
            event_id: 0,
            transpose: 0,
            artificial: false,
        }
    }

    pub fn with_event_id(mut self, event_id: u16) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn artificial(mut self) -> Self {
        self.artificial = true;
        self
    }

    pub fn is_note_on(&self) -> bool {
        self.event.is_note_on()
    }

    pub fn is_note_off(&self) -> bool {
        self.event.is_note_off()
    }

    pub fn note_number(&self) -> Option<u8> {
        self.event.note_number()
    }
}
