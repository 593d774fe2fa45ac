// Playback/record engine - the per-audio-block driver
// Owned by the realtime context: consumes control commands at block start,
// pulls due events from the current sequence, emits sample-accurate output
// events and captures live input while recording. Everything that allocates
// or scans (record preparation/finalization) happens on the background side
// and arrives here as moved buffers.

use crate::messaging::channels::{CommandConsumer, NotificationProducer};
use crate::messaging::command::PlayerCommand;
use crate::messaging::notification::PlayerNotification;
use crate::midi::event::{EngineEvent, MidiEvent};
use crate::sequencer::sequence::MidiSequence;
use crate::sequencer::time::{self, TICKS_PER_QUARTER};
use ringbuf::traits::{Consumer, Producer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Upper bound of distinct sequence events pulled per block, guarding
/// against malformed data producing unbounded event floods.
const MAX_EVENTS_PER_BLOCK: usize = 16;

/// Pre-reserved capacity for note-offs queued across block boundaries.
const QUEUED_EVENTS_CAPACITY: usize = 256;

/// Capacity reserved for the record buffer during preparation, so live
/// capture stays allocation-free on the realtime side.
pub(crate) const RECORD_BUFFER_CAPACITY: usize = 2048;

/// First pairing id handed to captured live events. The high range keeps
/// them disjoint from converter-assigned ids (counted up from 1) that the
/// prepared buffer may already contain.
const FIRST_LIVE_EVENT_ID: u16 = 0x8000;

/// Transport state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl PlayState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayState::Playing | PlayState::Recording)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, PlayState::Recording)
    }
}

/// Record sub-state, published atomically between the contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordState {
    Idle = 0,
    PreparationPending = 1,
    Prepared = 2,
    FlushPending = 3,
}

/// Atomic cell holding the record sub-state, shared between the engine
/// and the background controller.
#[derive(Debug, Default)]
pub struct SharedRecordState(AtomicU8);

impl SharedRecordState {
    pub fn get(&self) -> RecordState {
        match self.0.load(Ordering::Acquire) {
            1 => RecordState::PreparationPending,
            2 => RecordState::Prepared,
            3 => RecordState::FlushPending,
            _ => RecordState::Idle,
        }
    }

    pub fn set(&self, state: RecordState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// The playback/record engine.
///
/// The normalised playback position lives in [0, loop end] while playing;
/// a negative value marks it invalid (stopped). Exceeding 1.0 without
/// looping stops the transport on the next block.
pub struct MidiPlayer {
    sequences: Vec<Arc<MidiSequence>>,
    current_sequence_index: Option<usize>,
    current_track_index: usize,

    play_state: PlayState,
    loop_enabled: bool,
    current_position: f64,
    record_start: f64,
    record_elapsed: f64,
    use_next_note_as_record_start: bool,
    flush_recorded_events: bool,

    sample_rate: f64,
    bpm: f64,
    ticks_per_sample: f64,
    last_block_size: usize,
    timestamp_for_next_command: usize,

    record_state: Arc<SharedRecordState>,
    record_buffer: Vec<EngineEvent>,
    queued_events: Vec<EngineEvent>,
    live_note_ids: [u16; 128],
    next_event_id: u16,
    next_live_event_id: u16,

    commands: CommandConsumer,
    notifications: NotificationProducer,
}

impl MidiPlayer {
    pub fn new(
        commands: CommandConsumer,
        notifications: NotificationProducer,
        record_state: Arc<SharedRecordState>,
    ) -> Self {
        let sample_rate = 44100.0;
        let bpm = 120.0;

        Self {
            sequences: Vec::new(),
            current_sequence_index: None,
            current_track_index: 0,
            play_state: PlayState::Stopped,
            loop_enabled: true,
            current_position: -1.0,
            record_start: 0.0,
            record_elapsed: 0.0,
            use_next_note_as_record_start: false,
            flush_recorded_events: true,
            sample_rate,
            bpm,
            ticks_per_sample: time::ticks_per_sample(bpm, sample_rate),
            last_block_size: 0,
            timestamp_for_next_command: 0,
            record_state,
            record_buffer: Vec::new(),
            queued_events: Vec::with_capacity(QUEUED_EVENTS_CAPACITY),
            live_note_ids: [0; 128],
            next_event_id: 1,
            next_live_event_id: FIRST_LIVE_EVENT_ID,
            commands,
            notifications,
        }
    }

    /// Pull the sample rate from the audio host before playback starts.
    pub fn prepare_to_play(&mut self, sample_rate: f64, samples_per_block: usize) {
        self.sample_rate = sample_rate;
        self.last_block_size = samples_per_block;
        self.tempo_changed(self.bpm);
    }

    /// Pushed tempo change from the host's tempo source.
    pub fn tempo_changed(&mut self, bpm: f64) {
        self.bpm = bpm;
        self.ticks_per_sample = time::ticks_per_sample(bpm, self.sample_rate);
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn is_recording(&self) -> bool {
        self.play_state.is_recording()
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    /// Whether a finished recording is flushed into the sequence as an edit.
    pub fn set_flush_recorded_events(&mut self, flush: bool) {
        self.flush_recorded_events = flush;
    }

    pub fn current_sequence(&self) -> Option<&Arc<MidiSequence>> {
        self.current_sequence_index
            .and_then(|index| self.sequences.get(index))
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn current_sequence_index(&self) -> Option<usize> {
        self.current_sequence_index
    }

    /// Normalised playback position in [0, 1).
    pub fn playback_position(&self) -> f64 {
        if !self.current_position.is_finite() || self.current_position < 0.0 {
            return 0.0;
        }

        self.current_position % 1.0
    }

    pub fn set_playback_position(&mut self, normalised: f64) {
        self.current_position = normalised.clamp(0.0, 1.0);
        self.update_position_in_current_sequence();
    }

    pub fn loop_start(&self) -> f64 {
        self.current_sequence()
            .map(|s| s.signature().normalised_loop_range.start())
            .unwrap_or(0.0)
    }

    pub fn loop_end(&self) -> f64 {
        self.current_sequence()
            .map(|s| s.signature().normalised_loop_range.end())
            .unwrap_or(1.0)
    }

    /// Drain pending control commands. Call once at block start, before
    /// `advance`.
    pub fn process_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                PlayerCommand::Play { timestamp } => {
                    self.play(timestamp);
                }
                PlayerCommand::Stop { timestamp } => {
                    self.stop(timestamp);
                }
                PlayerCommand::Record { timestamp } => {
                    self.record(timestamp);
                }
                PlayerCommand::SetPosition(position) => self.set_playback_position(position),
                PlayerCommand::SetLoopEnabled(enabled) => self.loop_enabled = enabled,
                PlayerCommand::SetBpm(bpm) => self.tempo_changed(bpm),
                PlayerCommand::AddSequence(sequence) => self.add_sequence(sequence),
                PlayerCommand::SetCurrentSequence(index) => {
                    self.set_current_sequence_index(index);
                }
                PlayerCommand::SetCurrentTrack(index) => self.set_current_track_index(index),
                PlayerCommand::ClearSequences => self.clear_sequences(),
                PlayerCommand::RecordBufferPrepared(events) => {
                    self.record_buffer = events;
                    self.record_state.set(RecordState::Prepared);
                }
            }
        }
    }

    /// Append a sequence and select it.
    pub fn add_sequence(&mut self, sequence: Arc<MidiSequence>) {
        self.sequences.push(sequence);
        self.current_sequence_index = Some(self.sequences.len() - 1);
    }

    pub fn clear_sequences(&mut self) {
        self.sequences.clear();
        self.current_sequence_index = None;
        self.record_buffer = Vec::new();
        self.record_state.set(RecordState::Idle);
    }

    /// Select a sequence, carrying the loop-relative playback position over
    /// to the new sequence's loop range.
    pub fn set_current_sequence_index(&mut self, index: Option<usize>) {
        let last_loop_range = self
            .current_sequence()
            .map(|s| s.signature().normalised_loop_range);

        let position_in_loop = last_loop_range
            .filter(|range| range.length() > 0.0)
            .map(|range| (self.playback_position() - range.start()) / range.length());

        self.current_sequence_index =
            index.filter(|&candidate| candidate < self.sequences.len());

        self.record_buffer = Vec::new();
        self.record_state.set(RecordState::Idle);

        if let Some(position_in_loop) = position_in_loop {
            if position_in_loop != 0.0 {
                if let Some(sequence) = self.current_sequence() {
                    let new_range = sequence.signature().normalised_loop_range;
                    self.current_position =
                        new_range.start() + position_in_loop * new_range.length();
                    self.update_position_in_current_sequence();
                }
            }
        }
    }

    /// Select the active track, resetting any pending record buffer.
    pub fn set_current_track_index(&mut self, index: usize) {
        self.current_track_index = index;

        if let Some(sequence) = self.current_sequence() {
            sequence.set_current_track_index(index);
        }

        self.record_buffer = Vec::new();
        self.record_state.set(RecordState::Idle);
    }

    /// Start playback at the given block-relative timestamp. Finishes an
    /// active recording first, keeping the position so record-to-play is
    /// seamless; otherwise the playback cursor resets.
    pub fn play(&mut self, timestamp: usize) -> bool {
        let Some(sequence) = self.current_sequence().cloned() else {
            return false;
        };

        if self.is_recording() {
            self.finish_recording();
        } else {
            self.current_position = 0.0;
            sequence.reset_playback();
        }

        self.play_state = PlayState::Playing;
        self.timestamp_for_next_command = timestamp;
        self.send_playback_changed(timestamp);
        true
    }

    /// Stop playback, invalidating the position.
    pub fn stop(&mut self, timestamp: usize) -> bool {
        let Some(sequence) = self.current_sequence().cloned() else {
            return false;
        };

        if self.is_recording() {
            self.finish_recording();
        }

        sequence.reset_playback();
        self.play_state = PlayState::Stopped;
        self.timestamp_for_next_command = timestamp;
        self.current_position = -1.0;
        self.send_playback_changed(timestamp);
        true
    }

    /// Enter recording. Coming from Stopped resets the cursor; coming from
    /// Playing keeps the current position. The first incoming note marks
    /// the start of the recorded region, and buffer preparation is
    /// requested from the background context when none is pending.
    pub fn record(&mut self, timestamp: usize) -> bool {
        if self.play_state == PlayState::Stopped {
            self.current_position = 0.0;

            if let Some(sequence) = self.current_sequence() {
                sequence.reset_playback();
            }
        }

        self.play_state = PlayState::Recording;
        self.timestamp_for_next_command = timestamp;
        self.current_position = self.current_position.max(0.0) % 1.0;
        self.record_elapsed = 0.0;
        self.use_next_note_as_record_start = true;

        if self.record_state.get() == RecordState::Idle {
            self.record_state.set(RecordState::PreparationPending);
            self.push_notification(PlayerNotification::RequestRecordPreparation {
                copy_existing: true,
            });
        }

        self.send_playback_changed(timestamp);
        true
    }

    /// Hand the record buffer over to the background context for
    /// finalization.
    pub fn finish_recording(&mut self) {
        let events = std::mem::take(&mut self.record_buffer);
        self.record_state.set(RecordState::FlushPending);
        self.push_notification(PlayerNotification::RecordingFinished {
            events,
            flush: self.flush_recorded_events,
        });
    }

    /// Capture one live input event.
    ///
    /// An all-notes-off acts as an immediate stop request. While the record
    /// buffer is prepared, non-artificial events are stamped relative to
    /// the playback position (compensating the block that already advanced)
    /// and appended to the buffer.
    pub fn on_live_event(&mut self, event: EngineEvent) {
        if event.event.is_all_notes_off() {
            self.stop(event.timestamp as usize);
        }

        if !self.is_recording()
            || event.artificial
            || self.record_state.get() != RecordState::Prepared
        {
            return;
        }

        let Some(length_quarters) = self.current_sequence().map(|s| s.length_quarters()) else {
            return;
        };

        if self.use_next_note_as_record_start {
            self.record_start = self.current_position;
            self.record_elapsed = 0.0;
            self.use_next_note_as_record_start = false;
        }

        let ticks = length_quarters * self.playback_position() * TICKS_PER_QUARTER;
        let position_samples = time::ticks_to_samples(ticks, self.bpm, self.sample_rate) as i64;

        // The block position has already advanced past this event, so pull
        // it back by one block and add the offset within the buffer.
        let timestamp =
            (position_samples - self.last_block_size as i64).max(0) + event.timestamp as i64;

        let mut copy = event;
        copy.timestamp = timestamp as u64;

        if copy.event_id == 0 {
            match copy.event {
                MidiEvent::NoteOn { note, .. } => {
                    copy.event_id = self.next_live_event_id;
                    self.live_note_ids[note as usize] = self.next_live_event_id;
                    self.next_live_event_id =
                        self.next_live_event_id.wrapping_add(1).max(FIRST_LIVE_EVENT_ID);
                }
                MidiEvent::NoteOff { note } => {
                    copy.event_id = self.live_note_ids[note as usize];
                }
                _ => {}
            }
        }

        // Stays allocation-free up to the capacity reserved during
        // preparation; anything beyond is dropped.
        if self.record_buffer.len() < self.record_buffer.capacity() {
            self.record_buffer.push(copy);
        }
    }

    /// Drive one audio block: deliver queued note-offs, resolve the loop
    /// position, pull due events and advance the normalised position.
    /// Output events carry block-relative sample timestamps.
    pub fn advance(&mut self, num_samples: usize, out: &mut Vec<EngineEvent>) {
        self.deliver_queued_events(num_samples, out);

        if self.current_position.is_nan() {
            self.current_position = -1.0;
        }

        let Some(sequence) = self.current_sequence().cloned() else {
            return;
        };

        if self.current_position < 0.0 {
            return;
        }

        if self.current_position > 1.0 && !self.loop_enabled {
            self.stop(0);
            self.last_block_size = num_samples;
            return;
        }

        if self.is_recording() && self.record_elapsed > 1.0 {
            // A full loop was recorded; fall back to playing.
            self.finish_recording();
            self.play_state = PlayState::Playing;
            self.send_playback_changed(0);
        }

        sequence.set_current_track_index(self.current_track_index);

        let loop_start = self.loop_start();
        let loop_end = self.loop_end();

        if self.current_position < loop_start {
            self.current_position = loop_start;
            self.update_position_in_current_sequence();
        } else if self.current_position > loop_end {
            let loop_length = loop_end - loop_start;

            self.current_position = if loop_length > 0.0 {
                loop_start + (self.current_position - loop_start) % loop_length
            } else {
                loop_start
            };
            self.update_position_in_current_sequence();
        }

        let samples_this_block = num_samples.saturating_sub(self.timestamp_for_next_command);
        let ticks_this_block = samples_this_block as f64 * self.ticks_per_sample;

        let length_ticks = sequence.length_ticks();

        if length_ticks == 0.0 {
            self.last_block_size = num_samples;
            return;
        }

        let position_ticks = self.playback_position() * length_ticks;
        let delta = ticks_this_block / length_ticks;

        let range = if self.loop_enabled {
            position_ticks..position_ticks + ticks_this_block
        } else {
            position_ticks..length_ticks.min(position_ticks + ticks_this_block)
        };

        let loop_length_ticks =
            sequence.signature().normalised_loop_range.length() * length_ticks;

        let mut pulled: [usize; MAX_EVENTS_PER_BLOCK] = [usize::MAX; MAX_EVENTS_PER_BLOCK];
        let mut pulled_count = 0;

        while let Some(due) = sequence.get_next_event(range.clone()) {
            // A repeated index means the cursor wrapped onto an event this
            // block already delivered; the fixed cap bounds event floods.
            if pulled[..pulled_count].contains(&due.index)
                || pulled_count >= MAX_EVENTS_PER_BLOCK
            {
                break;
            }

            pulled[pulled_count] = due.index;
            pulled_count += 1;

            if !due.message.is_note_on() {
                continue;
            }

            let mut ticks_in_block = due.tick - position_ticks;

            if ticks_in_block < 0.0 {
                ticks_in_block += loop_length_ticks;
            }

            let timestamp = time::ticks_to_samples(ticks_in_block, self.bpm, self.sample_rate)
                as i64
                + self.timestamp_for_next_command as i64;

            debug_assert!(timestamp >= 0 && (timestamp as usize) < num_samples);
            let timestamp = timestamp.clamp(0, num_samples as i64 - 1) as u64;

            let event_id = self.next_event_id;
            self.next_event_id = self.next_event_id.wrapping_add(1).max(1);

            out.push(
                EngineEvent::new(due.message, timestamp)
                    .with_event_id(event_id)
                    .artificial(),
            );

            if let Some((off_message, off_tick)) = sequence.matching_note_off_for(due.index) {
                let mut off_ticks_in_block = off_tick - position_ticks;

                if off_ticks_in_block < 0.0 {
                    off_ticks_in_block += loop_length_ticks;
                }

                let off_timestamp =
                    time::ticks_to_samples(off_ticks_in_block, self.bpm, self.sample_rate)
                        as i64
                        + self.timestamp_for_next_command as i64;
                let off_timestamp = off_timestamp.max(0) as u64;

                let off_event = EngineEvent::new(off_message, off_timestamp)
                    .with_event_id(event_id)
                    .artificial();

                if (off_timestamp as usize) < num_samples {
                    out.push(off_event);
                } else {
                    // Delivered by a later block, relative to its start.
                    let mut queued = off_event;
                    queued.timestamp = off_timestamp - num_samples as u64;
                    self.queued_events.push(queued);
                }
            }
        }

        self.timestamp_for_next_command = 0;
        self.current_position += delta;

        if self.is_recording() {
            self.record_elapsed += delta;
        }

        self.last_block_size = num_samples;
    }

    fn deliver_queued_events(&mut self, num_samples: usize, out: &mut Vec<EngineEvent>) {
        let mut index = 0;

        while index < self.queued_events.len() {
            if (self.queued_events[index].timestamp as usize) < num_samples {
                out.push(self.queued_events.swap_remove(index));
            } else {
                self.queued_events[index].timestamp -= num_samples as u64;
                index += 1;
            }
        }
    }

    fn update_position_in_current_sequence(&self) {
        if let Some(sequence) = self.current_sequence() {
            sequence.set_playback_position(self.playback_position());
        }
    }

    fn send_playback_changed(&mut self, timestamp: usize) {
        let state = self.play_state;
        self.push_notification(PlayerNotification::PlaybackChanged { timestamp, state });
    }

    fn push_notification(&mut self, notification: PlayerNotification) {
        // A full ring drops the message; the realtime context never blocks.
        let _ = self.notifications.try_push(notification);
    }
}

/// Close a recorded take: synthesize a note-off at the sequence end for
/// every open note-on, resolve pending transpose amounts into permanent
/// note numbers, and discard orphan note-offs.
///
/// Orphans are removed in one stable pass over a secondary id set, so
/// adjacent orphans cannot shadow each other.
pub fn finalize_recorded_events(events: &mut Vec<EngineEvent>, last_timestamp: u64) {
    let mut synthesized = Vec::new();

    for index in 0..events.len() {
        if !events[index].is_note_on() {
            continue;
        }

        let note_on = events[index];
        let mut matched = None;

        for (candidate_index, candidate) in events.iter().enumerate() {
            if candidate.is_note_off() && candidate.event_id == note_on.event_id {
                matched = Some(candidate_index);
                break;
            }
        }

        if let Some(off_index) = matched {
            if events[off_index].timestamp < note_on.timestamp {
                events[off_index].timestamp = last_timestamp;
            }

            if note_on.transpose != 0 {
                events[index].event = note_on.event.transposed(note_on.transpose);
                events[index].transpose = 0;
                events[off_index].event =
                    events[off_index].event.transposed(note_on.transpose);
                events[off_index].transpose = 0;
            }
        } else {
            let note = note_on.note_number().unwrap_or(0);
            let off_note = (note as i16 + note_on.transpose as i16).clamp(0, 127) as u8;

            if note_on.transpose != 0 {
                events[index].event = note_on.event.transposed(note_on.transpose);
                events[index].transpose = 0;
            }

            synthesized.push(EngineEvent {
                event: MidiEvent::NoteOff { note: off_note },
                timestamp: last_timestamp,
                event_id: note_on.event_id,
                transpose: 0,
                artificial: false,
            });
        }
    }

    events.append(&mut synthesized);

    let note_on_ids: Vec<u16> = events
        .iter()
        .filter(|event| event.is_note_on())
        .map(|event| event.event_id)
        .collect();

    events.retain(|event| !event.is_note_off() || note_on_ids.contains(&event.event_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::{
        NotificationConsumer, create_command_channel, create_notification_channel,
    };
    use crate::sequencer::signature::TimeSignature;
    use crate::sequencer::track::Track;

    fn note_on(note: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            note,
            velocity: 100,
        }
    }

    fn note_off(note: u8) -> MidiEvent {
        MidiEvent::NoteOff { note }
    }

    fn test_player() -> (MidiPlayer, NotificationConsumer) {
        let (_command_tx, command_rx) = create_command_channel(64);
        let (notification_tx, notification_rx) = create_notification_channel(64);

        let mut player = MidiPlayer::new(
            command_rx,
            notification_tx,
            Arc::new(SharedRecordState::default()),
        );
        player.prepare_to_play(44100.0, 512);
        (player, notification_rx)
    }

    fn one_bar_sequence() -> Arc<MidiSequence> {
        let sequence = MidiSequence::new();
        sequence.create_empty_track();
        sequence.swap_current_track(Track::from_events([
            (note_on(60), 0.0),
            (note_off(60), 480.0),
        ]));

        let mut signature = TimeSignature::default();
        signature.num_bars = 1.0;
        sequence.set_length_from_signature(signature);
        Arc::new(sequence)
    }

    #[test]
    fn test_transitions_without_sequence_are_noops() {
        let (mut player, _rx) = test_player();

        assert!(!player.play(0));
        assert!(!player.stop(0));
        assert_eq!(player.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_play_stop_transitions() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());

        assert!(player.play(0));
        assert_eq!(player.play_state(), PlayState::Playing);
        assert_eq!(player.playback_position(), 0.0);

        assert!(player.stop(0));
        assert_eq!(player.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_record_from_play_keeps_position() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());

        player.play(0);

        let mut out = Vec::new();
        for _ in 0..20 {
            player.advance(512, &mut out);
        }

        let position_before = player.playback_position();
        assert!(position_before > 0.0);

        player.record(0);
        assert_eq!(player.play_state(), PlayState::Recording);
        assert!((player.playback_position() - position_before).abs() < 1e-9);
    }

    #[test]
    fn test_record_from_stop_resets_position() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());

        player.record(0);
        assert_eq!(player.play_state(), PlayState::Recording);
        assert_eq!(player.playback_position(), 0.0);
    }

    #[test]
    fn test_record_requests_preparation_once() {
        let (mut player, mut rx) = test_player();
        player.add_sequence(one_bar_sequence());
        let record_state = Arc::clone(&player.record_state);

        player.record(0);
        assert_eq!(record_state.get(), RecordState::PreparationPending);

        let mut preparation_requests = 0;
        while let Some(notification) = rx.try_pop() {
            if matches!(
                notification,
                PlayerNotification::RequestRecordPreparation { .. }
            ) {
                preparation_requests += 1;
            }
        }
        assert_eq!(preparation_requests, 1);

        // A second record() while pending must not request again
        player.record(0);
        while let Some(notification) = rx.try_pop() {
            assert!(!matches!(
                notification,
                PlayerNotification::RequestRecordPreparation { .. }
            ));
        }
    }

    #[test]
    fn test_advance_emits_note_pair_in_block() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.play(0);

        // 480 ticks at 120 BPM / 44.1kHz = 11025 samples; use a block
        // large enough to cover both events.
        let mut out = Vec::new();
        player.advance(16384, &mut out);

        assert_eq!(out.len(), 2);
        assert!(out[0].is_note_on());
        assert_eq!(out[0].timestamp, 0);
        assert!(out[0].artificial);

        assert!(out[1].is_note_off());
        assert_eq!(out[1].timestamp, 11025);
        assert_eq!(out[0].event_id, out[1].event_id);
    }

    #[test]
    fn test_note_off_queued_across_blocks() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.play(0);

        let mut out = Vec::new();
        player.advance(512, &mut out);

        // Only the note-on fits into the first block
        assert_eq!(out.len(), 1);
        assert!(out[0].is_note_on());

        // The off at sample 11025 arrives in block 11025 / 512 = 21
        let mut block = 1;
        let mut off = None;

        while off.is_none() && block < 40 {
            out.clear();
            player.advance(512, &mut out);
            if let Some(event) = out.first() {
                off = Some((block, event.timestamp, *event));
            }
            block += 1;
        }

        let (block, timestamp, event) = off.unwrap();
        assert!(event.is_note_off());
        assert_eq!(block, 21);
        assert_eq!(timestamp, 11025 % 512);
    }

    #[test]
    fn test_stop_at_end_when_not_looping() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.set_loop_enabled(false);
        player.play(0);

        // One bar at 120 BPM = 2s = 88200 samples
        let mut out = Vec::new();
        for _ in 0..200 {
            player.advance(512, &mut out);
        }

        assert_eq!(player.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_looping_continues_past_end() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.play(0);

        let mut note_ons = 0;
        let mut out = Vec::new();

        // Two full bars worth of blocks
        for _ in 0..((88200 * 2) / 512 + 2) {
            out.clear();
            player.advance(512, &mut out);
            note_ons += out.iter().filter(|e| e.is_note_on()).count();
        }

        assert_eq!(player.play_state(), PlayState::Playing);
        assert!(note_ons >= 2, "expected wrapped redelivery, got {}", note_ons);
    }

    #[test]
    fn test_live_capture_requires_prepared_state() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.record(0);

        // Not yet prepared: the event must not be captured
        player.on_live_event(EngineEvent::new(note_on(64), 10));
        assert!(player.record_buffer.is_empty());

        player.record_buffer = Vec::with_capacity(128);
        player.record_state.set(RecordState::Prepared);

        player.on_live_event(EngineEvent::new(note_on(64), 10));
        assert_eq!(player.record_buffer.len(), 1);
        assert!(player.record_buffer[0].event_id != 0);

        // Artificial events are the engine's own output, never captured
        player.on_live_event(EngineEvent::new(note_on(65), 20).artificial());
        assert_eq!(player.record_buffer.len(), 1);
    }

    #[test]
    fn test_live_capture_pairs_ids() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.record(0);
        player.record_buffer = Vec::with_capacity(128);
        player.record_state.set(RecordState::Prepared);

        player.on_live_event(EngineEvent::new(note_on(64), 0));
        player.on_live_event(EngineEvent::new(note_off(64), 100));

        assert_eq!(player.record_buffer.len(), 2);
        assert_eq!(
            player.record_buffer[0].event_id,
            player.record_buffer[1].event_id
        );
    }

    #[test]
    fn test_all_notes_off_stops_transport() {
        let (mut player, _rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.play(0);

        player.on_live_event(EngineEvent::new(
            MidiEvent::ControlChange {
                controller: 123,
                value: 0,
            },
            0,
        ));

        assert_eq!(player.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_finish_recording_moves_buffer() {
        let (mut player, mut rx) = test_player();
        player.add_sequence(one_bar_sequence());
        player.record(0);
        player.record_buffer = Vec::with_capacity(128);
        player.record_state.set(RecordState::Prepared);

        player.on_live_event(EngineEvent::new(note_on(64), 0));
        player.finish_recording();

        assert!(player.record_buffer.is_empty());
        assert_eq!(player.record_state.get(), RecordState::FlushPending);

        let mut moved = None;
        while let Some(notification) = rx.try_pop() {
            if let PlayerNotification::RecordingFinished { events, .. } = notification {
                moved = Some(events);
            }
        }
        assert_eq!(moved.unwrap().len(), 1);
    }

    #[test]
    fn test_finalize_synthesizes_missing_note_off() {
        let mut events = vec![
            EngineEvent::new(note_on(64), 1000).with_event_id(5),
        ];

        finalize_recorded_events(&mut events, 88199);

        assert_eq!(events.len(), 2);
        assert!(events[1].is_note_off());
        assert_eq!(events[1].timestamp, 88199);
        assert_eq!(events[1].event_id, 5);
    }

    #[test]
    fn test_finalize_drops_adjacent_orphans() {
        let mut events = vec![
            EngineEvent::new(note_off(60), 100).with_event_id(1),
            EngineEvent::new(note_off(62), 200).with_event_id(2),
            EngineEvent::new(note_on(64), 300).with_event_id(3),
            EngineEvent::new(note_off(64), 400).with_event_id(3),
        ];

        finalize_recorded_events(&mut events, 88199);

        // Both orphans go, the real pair stays
        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert!(events[1].is_note_off());
    }

    #[test]
    fn test_finalize_wrapped_off_moves_to_end() {
        // The off landed before the on because the take wrapped the loop
        let mut events = vec![
            EngineEvent::new(note_off(64), 50).with_event_id(9),
            EngineEvent::new(note_on(64), 5000).with_event_id(9),
        ];

        finalize_recorded_events(&mut events, 88199);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 88199);
    }

    #[test]
    fn test_finalize_resolves_transpose() {
        let mut note_on_event = EngineEvent::new(note_on(60), 0).with_event_id(1);
        note_on_event.transpose = 12;

        let mut events = vec![
            note_on_event,
            EngineEvent::new(note_off(60), 400).with_event_id(1),
        ];

        finalize_recorded_events(&mut events, 88199);

        assert_eq!(events[0].note_number(), Some(72));
        assert_eq!(events[1].note_number(), Some(72));
        assert_eq!(events[0].transpose, 0);
    }

    #[test]
    fn test_sequence_switch_remaps_loop_position() {
        let (mut player, _rx) = test_player();

        let first = one_bar_sequence();
        player.add_sequence(Arc::clone(&first));

        let second = one_bar_sequence();
        second.set_loop_start(0.5);
        player.add_sequence(second);

        // Back to the first sequence, move mid-loop, then switch
        player.set_current_sequence_index(Some(0));
        player.play(0);
        player.set_playback_position(0.5);

        player.set_current_sequence_index(Some(1));

        // Halfway through [0.5, 1.0] is 0.75
        assert!((player.playback_position() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_commands_drive_the_engine() {
        let (mut command_tx, command_rx) = create_command_channel(64);
        let (notification_tx, _notification_rx) = create_notification_channel(64);

        let mut player = MidiPlayer::new(
            command_rx,
            notification_tx,
            Arc::new(SharedRecordState::default()),
        );
        player.prepare_to_play(44100.0, 512);

        command_tx
            .try_push(PlayerCommand::AddSequence(one_bar_sequence()))
            .ok()
            .unwrap();
        command_tx
            .try_push(PlayerCommand::Play { timestamp: 0 })
            .ok()
            .unwrap();

        player.process_commands();

        assert_eq!(player.num_sequences(), 1);
        assert_eq!(player.play_state(), PlayState::Playing);
    }
}
