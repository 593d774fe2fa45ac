// Persistence boundary shared with the host's session format

pub mod state;

pub use state::{
    PlayerStateTree, SequenceStateTree, StateError, decode_container, encode_container,
};
