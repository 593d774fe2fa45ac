// MyMidi Player - library exports

pub mod command;
pub mod messaging;
pub mod midi;
pub mod project;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use command::{EditAction, UndoHistory, write_event_list};
pub use messaging::{PlayerCommand, PlayerNotification};
pub use midi::{ContainerMessage, ContainerTrack, EngineEvent, MidiContainer, MidiEvent};
pub use project::{PlayerStateTree, SequenceStateTree};
pub use sequencer::{
    ContainerPool, ErrorPolicy, MidiPlayer, MidiSequence, NotificationMode, PlayState,
    PlayerController, RecordState, TimeSignature, Track,
};
