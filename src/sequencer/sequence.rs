// MidiSequence - the shared sequence store
// Owns the guarded track list plus time signature, the playback cursor and
// every tick-domain lookup the playback engine needs. Shared between the
// realtime and background contexts via Arc; all track mutation swaps whole
// tracks under the write guard, never element-by-element edits.

use crate::midi::container::{ContainerMessage, ContainerTrack, MidiContainer};
use crate::midi::event::{EngineEvent, MidiEvent};
use crate::sequencer::guard::SwapLock;
use crate::sequencer::signature::TimeSignature;
use crate::sequencer::time::{self, TICKS_PER_QUARTER};
use crate::sequencer::track::Track;
use std::ops::Range;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use thiserror::Error;

/// Data-inconsistency failures raised by the event-list conversion when the
/// strict policy is selected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequenceError {
    #[error("overlapping notes for note number {note} at tick {tick}")]
    OverlappingNotes { note: u8, tick: f64 },

    #[error("note-off without a matching note-on for note number {note} at tick {tick}")]
    MissingNoteOn { note: u8, tick: f64 },
}

/// How the event-list conversion treats inconsistent note data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Report the first inconsistency as an error.
    Strict,
    /// Drop the offending event and continue; audio must not halt.
    #[default]
    Lenient,
}

/// Snapshot of an event returned by the cursor advance. Owned data, so no
/// reference escapes the read guard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueEvent {
    pub index: usize,
    pub message: MidiEvent,
    pub tick: f64,
}

#[derive(Debug, Default)]
struct SequenceInner {
    tracks: Vec<Track>,
    signature: TimeSignature,
    artificial_length_quarters: Option<f64>,
}

/// A multi-track MIDI sequence with a playback cursor.
///
/// The playback cursor (`last_played`, `current_track`) is owned by the
/// realtime context: exactly one consumer advances it per audio block.
/// The background context only swaps track content under the write guard.
pub struct MidiSequence {
    id: String,
    inner: SwapLock<SequenceInner>,
    current_track: AtomicUsize,
    last_played: AtomicI64,
}

impl MidiSequence {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            inner: SwapLock::new(SequenceInner::default()),
            current_track: AtomicUsize::new(0),
            last_played: AtomicI64::new(-1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    fn length_locked(inner: &SequenceInner) -> f64 {
        if let Some(quarters) = inner.artificial_length_quarters {
            return quarters * TICKS_PER_QUARTER;
        }

        if inner.signature.num_bars != 0.0 {
            return inner.signature.num_quarters() * TICKS_PER_QUARTER;
        }

        inner
            .tracks
            .iter()
            .map(Track::end_time)
            .fold(0.0, f64::max)
    }

    /// Sequence length in ticks: artificial override, else signature-derived,
    /// else the longest track's end time.
    pub fn length_ticks(&self) -> f64 {
        let inner = self.inner.read();
        Self::length_locked(&inner)
    }

    pub fn length_quarters(&self) -> f64 {
        self.length_ticks() / TICKS_PER_QUARTER
    }

    pub fn length_seconds(&self, bpm: f64) -> f64 {
        self.length_quarters() * 60.0 / bpm
    }

    /// Set an explicit length override in quarter notes.
    pub fn set_length_quarters(&self, quarters: f64) {
        if let Some(mut inner) = self.inner.write() {
            inner.artificial_length_quarters = Some(quarters);
            inner.signature.calculate_num_bars(quarters);
        }
    }

    /// Install a time signature and derive the length from it.
    pub fn set_length_from_signature(&self, signature: TimeSignature) {
        if let Some(mut inner) = self.inner.write() {
            let quarters = signature.num_quarters();
            inner.signature = signature;
            inner.artificial_length_quarters = Some(quarters);
        }
    }

    pub fn signature(&self) -> TimeSignature {
        self.inner.read().signature
    }

    pub fn set_loop_start(&self, start: f64) {
        if let Some(mut inner) = self.inner.write() {
            inner.signature.set_loop_start(start);
        }
    }

    pub fn set_loop_end(&self, end: f64) {
        if let Some(mut inner) = self.inner.write() {
            inner.signature.set_loop_end(end);
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.inner.read().tracks.len()
    }

    /// Number of events in the current track.
    pub fn num_events(&self) -> usize {
        let inner = self.inner.read();
        inner
            .tracks
            .get(self.current_track.load(Ordering::Acquire))
            .map(Track::len)
            .unwrap_or(0)
    }

    pub fn current_track_index(&self) -> usize {
        self.current_track.load(Ordering::Acquire)
    }

    /// Switch the active track, remapping the playback cursor to the
    /// equivalent timestamp in the new track.
    pub fn set_current_track_index(&self, index: usize) {
        let inner = self.inner.read();
        let current = self.current_track.load(Ordering::Acquire);

        if index >= inner.tracks.len() || index == current {
            return;
        }

        let last = self.last_played.load(Ordering::Acquire);

        let last_timestamp = if last >= 0 {
            inner
                .tracks
                .get(current)
                .and_then(|track| track.event(last as usize))
                .map(|e| e.tick)
                .unwrap_or(0.0)
        } else {
            0.0
        };

        self.current_track.store(index, Ordering::Release);

        if last >= 0 {
            let remapped = inner.tracks[index].next_index_at_time(last_timestamp);
            self.last_played.store(remapped as i64, Ordering::Release);
        }
    }

    /// Forget the cursor; the next lookup starts from the beginning.
    pub fn reset_playback(&self) {
        self.last_played.store(-1, Ordering::Release);
    }

    /// Move the cursor to the given normalised position.
    pub fn set_playback_position(&self, normalised: f64) {
        let inner = self.inner.read();

        if let Some(track) = inner.tracks.get(self.current_track.load(Ordering::Acquire)) {
            let tick = Self::length_locked(&inner) * normalised;
            let index = track.next_index_at_time(tick) as i64 - 1;
            self.last_played.store(index, Ordering::Release);
        }
    }

    /// Advance the cursor and return the next event whose timestamp falls in
    /// the given tick range.
    ///
    /// When the range straddles the loop end, the lookup is split into a
    /// pre-wrap and a post-wrap sub-range. Events strictly inside the loop
    /// tail that the wrap skipped over are suppressed rather than delivered
    /// out of order, and the post-wrap landing point skips leading note-offs.
    pub fn get_next_event(&self, range: Range<f64>) -> Option<DueEvent> {
        let inner = self.inner.read();
        let track = inner.tracks.get(self.current_track.load(Ordering::Acquire))?;

        let mut next_index = (self.last_played.load(Ordering::Acquire) + 1) as usize;

        if next_index >= track.len() {
            self.last_played.store(-1, Ordering::Release);
            next_index = 0;
        }

        let length = Self::length_locked(&inner);
        let loop_range = inner.signature.normalised_loop_range;
        let loop_end_ticks = length * loop_range.end();

        let wraps = range.contains(&loop_end_ticks);

        if wraps {
            let loop_start_ticks = length * loop_range.start();
            let end_after_wrap = range.end - loop_end_ticks + loop_start_ticks;

            let before_wrap = range.start..loop_end_ticks;
            let after_wrap = loop_start_ticks..end_after_wrap;

            if let Some(event) = track.event(next_index) {
                if before_wrap.contains(&event.tick) || after_wrap.contains(&event.tick) {
                    self.last_played.store(next_index as i64, Ordering::Release);
                    return Some(DueEvent {
                        index: next_index,
                        message: event.message,
                        tick: event.tick,
                    });
                }

                // Events left in the loop tail must not be redelivered
                // after the wrap.
                if event.tick < loop_end_ticks {
                    return None;
                }
            }

            let mut index_after_wrap = track.next_index_at_time(loop_start_ticks);

            while let Some(event) = track.event(index_after_wrap) {
                if event.message.is_note_off() {
                    index_after_wrap += 1;
                } else {
                    break;
                }
            }

            if let Some(event) = track.event(index_after_wrap) {
                if after_wrap.contains(&event.tick) {
                    self.last_played
                        .store(index_after_wrap as i64, Ordering::Release);
                    return Some(DueEvent {
                        index: index_after_wrap,
                        message: event.message,
                        tick: event.tick,
                    });
                }
            }
        } else if let Some(event) = track.event(next_index) {
            if range.contains(&event.tick) {
                self.last_played.store(next_index as i64, Ordering::Release);
                return Some(DueEvent {
                    index: next_index,
                    message: event.message,
                    tick: event.tick,
                });
            }
        }

        None
    }

    /// The matching note-off for a note-on at `index` in the current track.
    pub fn matching_note_off_for(&self, index: usize) -> Option<(MidiEvent, f64)> {
        let inner = self.inner.read();
        let track = inner.tracks.get(self.current_track.load(Ordering::Acquire))?;
        track.note_off_for(index).map(|e| (e.message, e.tick))
    }

    /// Normalize and install an external container: derive the time
    /// signature from embedded meta events (default 4/4), strip sysex and
    /// meta messages, rescale timestamps to the fixed tick resolution, drop
    /// empty tracks, then swap the whole track list under the write guard.
    pub fn load_from_container(&self, container: &MidiContainer) {
        let (nominator, denominator) = container.find_time_signature().unwrap_or((4, 4));

        let source_ppq = container.ticks_per_quarter.max(1) as f64;
        let scale = TICKS_PER_QUARTER / source_ppq;

        let mut new_tracks = Vec::with_capacity(container.tracks.len());

        for container_track in &container.tracks {
            let mut track = Track::new();

            for event in &container_track.events {
                if let ContainerMessage::Channel(message) = event.message {
                    track.add_event(message, event.tick * scale);
                }
            }

            if !track.is_empty() {
                track.sort();
                track.update_matched_pairs();
                new_tracks.push(track);
            }
        }

        let content_quarters = container.last_timestamp() / source_ppq;

        let old_tracks;
        if let Some(mut inner) = self.inner.write() {
            inner.signature.nominator = nominator as f64;
            inner.signature.denominator = denominator as f64;
            inner.signature.calculate_num_bars(content_quarters);
            inner.artificial_length_quarters = None;
            old_tracks = std::mem::replace(&mut inner.tracks, new_tracks);
        } else {
            return;
        }

        self.current_track.store(0, Ordering::Release);
        self.last_played.store(-1, Ordering::Release);

        // Old tracks are released only after the guard is gone.
        drop(old_tracks);
    }

    /// Replace exactly the current track under the write guard. The old
    /// track is dropped only after the guard has been released, so no
    /// reader can observe a half-destroyed track.
    pub fn swap_current_track(&self, new_track: Track) {
        let old_track;

        if let Some(mut inner) = self.inner.write() {
            if inner.tracks.is_empty() {
                inner.tracks.push(new_track);
                old_track = None;
            } else {
                let index = self
                    .current_track
                    .load(Ordering::Acquire)
                    .min(inner.tracks.len() - 1);
                old_track = Some(std::mem::replace(&mut inner.tracks[index], new_track));
            }
        } else {
            return;
        }

        drop(old_track);
    }

    /// Append an empty track and select it.
    pub fn create_empty_track(&self) {
        if let Some(mut inner) = self.inner.write() {
            inner.tracks.push(Track::new());
            let index = inner.tracks.len() - 1;
            drop(inner);

            self.current_track.store(index, Ordering::Release);
            self.last_played.store(-1, Ordering::Release);
        }
    }

    /// Flatten the current track into sample-stamped engine events.
    ///
    /// Timestamps convert through the tempo-derived rate and clip at the
    /// sequence's nominal end: note-ons at or past the end are dropped,
    /// note-offs are kept only when their matching note-on lies before the
    /// end. Each note-on receives a fresh pairing id (one slot per note
    /// number), propagated to its note-off.
    pub fn event_list(
        &self,
        sample_rate: f64,
        bpm: f64,
        policy: ErrorPolicy,
    ) -> Result<Vec<EngineEvent>, SequenceError> {
        let inner = self.inner.read();
        let length = Self::length_locked(&inner);

        let track = match inner.tracks.get(self.current_track.load(Ordering::Acquire)) {
            Some(track) => track,
            None => return Ok(Vec::new()),
        };

        let samples_per_quarter = time::samples_per_quarter(bpm, sample_rate);

        let mut note_ids: [i32; 128] = [-1; 128];
        let mut current_id: u16 = 1;
        let mut list = Vec::with_capacity(track.len());

        for (index, event) in track.events().iter().enumerate() {
            if event.tick >= length {
                if event.message.is_note_on() {
                    continue;
                }

                // Keep a trailing note-off only when its note-on lies
                // inside the sequence, to avoid orphaned sustain.
                let keep = track
                    .events()
                    .iter()
                    .find(|candidate| candidate.note_off_index() == Some(index))
                    .map(|note_on| note_on.tick < length)
                    .unwrap_or(false);

                if !keep {
                    continue;
                }
            }

            let tick_used = event.tick.min(length - 1.0).max(0.0);
            let timestamp = (samples_per_quarter * tick_used / TICKS_PER_QUARTER) as u64;
            let mut engine_event = EngineEvent::new(event.message, timestamp);

            match event.message {
                MidiEvent::NoteOn { note, .. } => {
                    if note_ids[note as usize] != -1 {
                        match policy {
                            ErrorPolicy::Strict => {
                                return Err(SequenceError::OverlappingNotes {
                                    note,
                                    tick: event.tick,
                                });
                            }
                            ErrorPolicy::Lenient => {
                                log::debug!(
                                    "dropping overlapping note-on {} at tick {}",
                                    note,
                                    event.tick
                                );
                                continue;
                            }
                        }
                    }

                    engine_event.event_id = current_id;
                    note_ids[note as usize] = current_id as i32;
                    current_id = current_id.wrapping_add(1).max(1);
                }
                MidiEvent::NoteOff { note } => {
                    let id = note_ids[note as usize];

                    if id == -1 {
                        match policy {
                            ErrorPolicy::Strict => {
                                return Err(SequenceError::MissingNoteOn {
                                    note,
                                    tick: event.tick,
                                });
                            }
                            ErrorPolicy::Lenient => {
                                log::debug!(
                                    "dropping unmatched note-off {} at tick {}",
                                    note,
                                    event.tick
                                );
                                continue;
                            }
                        }
                    }

                    engine_event.event_id = id as u16;
                    note_ids[note as usize] = -1;
                }
                _ => {}
            }

            list.push(engine_event);
        }

        Ok(list)
    }

    /// Export all tracks back into a container at the fixed tick resolution.
    pub fn to_container(&self) -> MidiContainer {
        let inner = self.inner.read();
        let mut container = MidiContainer::new(TICKS_PER_QUARTER as u16);

        for track in &inner.tracks {
            let mut container_track = ContainerTrack::new();

            for event in track.events() {
                container_track.push(event.tick, ContainerMessage::Channel(event.message));
            }

            container.tracks.push(container_track);
        }

        container
    }

    /// Normalised (x, y, w, h) rectangles for every matched note pair in
    /// the current track, for an external display collaborator.
    pub fn note_rectangles(&self) -> Vec<[f32; 4]> {
        let inner = self.inner.read();
        let length = Self::length_locked(&inner);

        if length == 0.0 {
            return Vec::new();
        }

        let mut rectangles = Vec::new();

        if let Some(track) = inner.tracks.get(self.current_track.load(Ordering::Acquire)) {
            for (index, event) in track.events().iter().enumerate() {
                if let MidiEvent::NoteOn { note, .. } = event.message {
                    if let Some(note_off) = track.note_off_for(index) {
                        let x = (event.tick / length) as f32;
                        let w = (note_off.tick / length) as f32 - x;
                        let y = (127 - note) as f32 / 128.0;

                        rectangles.push([x, y, w, 1.0 / 128.0]);
                    }
                }
            }
        }

        rectangles
    }
}

impl Default for MidiSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MidiSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiSequence")
            .field("id", &self.id)
            .field("tracks", &self.num_tracks())
            .field("current_track", &self.current_track_index())
            .finish()
    }
}
