// State trees for persistence
// The host's session format stores one record per sequence: id, optional
// pool file name, time signature subtree and the serialized multi-track
// container as a base64-encoded deflate archive.

use crate::midi::container::MidiContainer;
use crate::sequencer::signature::TimeSignature;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use thiserror::Error;

const ARCHIVE_ENTRY_NAME: &str = "sequence.ron";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Ron(#[from] ron::Error),

    #[error("deserialization error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted form of one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStateTree {
    pub id: String,
    pub file_name: Option<String>,
    pub time_signature: TimeSignature,
    pub data: String,
}

/// Persisted form of the whole player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStateTree {
    pub current_sequence: Option<usize>,
    pub current_track: usize,
    pub loop_enabled: bool,
    pub sequences: Vec<SequenceStateTree>,
}

impl PlayerStateTree {
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Serialize a container into the persisted `data` blob:
/// base64(deflate-archive(ron)).
pub fn encode_container(container: &MidiContainer) -> Result<String, StateError> {
    let text = ron::to_string(container)?;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
    writer.start_file(ARCHIVE_ENTRY_NAME, options)?;
    writer.write_all(text.as_bytes())?;
    let cursor = writer.finish()?;

    Ok(BASE64.encode(cursor.into_inner()))
}

/// Inverse of `encode_container`.
pub fn decode_container(data: &str) -> Result<MidiContainer, StateError> {
    let bytes = BASE64.decode(data)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_index(0)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;

    Ok(ron::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::container::{ContainerMessage, ContainerTrack};
    use crate::midi::event::MidiEvent;

    fn sample_container() -> MidiContainer {
        let mut container = MidiContainer::new(960);
        let mut track = ContainerTrack::new();
        track.push(
            0.0,
            ContainerMessage::Channel(MidiEvent::NoteOn {
                note: 60,
                velocity: 100,
            }),
        );
        track.push(
            480.0,
            ContainerMessage::Channel(MidiEvent::NoteOff { note: 60 }),
        );
        container.tracks.push(track);
        container
    }

    #[test]
    fn test_container_blob_round_trip() {
        let container = sample_container();

        let encoded = encode_container(&container).unwrap();
        let decoded = decode_container(&encoded).unwrap();

        assert_eq!(decoded, container);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_container("not base64 at all!!!").is_err());

        // Valid base64, not an archive
        let bogus = BASE64.encode(b"hello world");
        assert!(decode_container(&bogus).is_err());
    }

    #[test]
    fn test_state_tree_json_round_trip() {
        let tree = PlayerStateTree {
            current_sequence: Some(0),
            current_track: 1,
            loop_enabled: true,
            sequences: vec![SequenceStateTree {
                id: "seq-1".into(),
                file_name: Some("Loops/groove.mid".into()),
                time_signature: TimeSignature::default(),
                data: encode_container(&sample_container()).unwrap(),
            }],
        };

        let json = tree.to_json().unwrap();
        let restored = PlayerStateTree::from_json(&json).unwrap();
        assert_eq!(restored, tree);
    }
}
