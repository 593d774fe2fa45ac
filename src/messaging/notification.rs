// Notification types - playback engine to background context

use crate::midi::event::EngineEvent;
use crate::sequencer::player::PlayState;

/// Messages produced by the playback engine and drained by the
/// controller's poll loop.
#[derive(Debug)]
pub enum PlayerNotification {
    /// The transport state changed at the given block timestamp.
    PlaybackChanged {
        timestamp: usize,
        state: PlayState,
    },
    /// Recording was requested while the record buffer is idle; the
    /// background context must prepare a buffer and send it back.
    RequestRecordPreparation { copy_existing: bool },
    /// A recording ended; the buffer ownership moves to the background
    /// context for finalization (and an optional flush into the sequence).
    RecordingFinished {
        events: Vec<EngineEvent>,
        flush: bool,
    },
}
