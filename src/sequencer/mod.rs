// Sequencer core - sequence store, guard, playback/record engine

pub mod controller;
pub mod guard;
pub mod player;
pub mod sequence;
pub mod signature;
pub mod time;
pub mod track;

pub use controller::{
    ContainerPool, NotificationMode, PlaybackListener, PlayerController, SequenceListener,
};
pub use guard::{ReadGuard, SwapLock, WriteGuard};
pub use player::{MidiPlayer, PlayState, RecordState, SharedRecordState, finalize_recorded_events};
pub use sequence::{DueEvent, ErrorPolicy, MidiSequence, SequenceError};
pub use signature::{NormalisedRange, TimeSignature};
pub use track::{Track, TrackEvent};
