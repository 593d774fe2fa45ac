// Command types - background context to playback engine

use crate::midi::event::EngineEvent;
use crate::sequencer::sequence::MidiSequence;
use std::sync::Arc;

/// Control messages consumed by the playback engine at block start.
/// Payload-carrying variants move their data across the thread boundary,
/// so no shared mutation is needed on the realtime side.
#[derive(Debug)]
pub enum PlayerCommand {
    Play { timestamp: usize },
    Stop { timestamp: usize },
    Record { timestamp: usize },
    SetPosition(f64),
    SetLoopEnabled(bool),
    SetBpm(f64),
    AddSequence(Arc<MidiSequence>),
    SetCurrentSequence(Option<usize>),
    SetCurrentTrack(usize),
    ClearSequences,
    /// The prepared record buffer, handed over before capture starts.
    RecordBufferPrepared(Vec<EngineEvent>),
}
