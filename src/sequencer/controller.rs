// PlayerController - the background-side service around the engine
// Owns the sequence list of record, listener registry, undo history,
// persistence entry points and the deferred-work pipeline. Everything
// unsafe for the audio callback (allocation, pairing scans, archive
// codecs) runs here or on the worker thread.

use crate::command::edit::{EditAction, write_event_list};
use crate::command::history::UndoHistory;
use crate::messaging::channels::{CommandProducer, NotificationConsumer};
use crate::messaging::command::PlayerCommand;
use crate::messaging::notification::PlayerNotification;
use crate::messaging::worker::BackgroundWorker;
use crate::midi::container::{ContainerMessage, ContainerTrack, MidiContainer};
use crate::midi::event::EngineEvent;
use crate::project::state::{
    PlayerStateTree, SequenceStateTree, decode_container, encode_container,
};
use crate::sequencer::player::{
    PlayState, RECORD_BUFFER_CAPACITY, RecordState, SharedRecordState,
    finalize_recorded_events,
};
use crate::sequencer::sequence::{ErrorPolicy, MidiSequence};
use crate::sequencer::signature::TimeSignature;
use crate::sequencer::time;
use crossbeam_channel::{Receiver, Sender, unbounded};
use ringbuf::traits::{Consumer, Producer};
use std::sync::Arc;

/// How listener callbacks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMode {
    /// Invoke listeners before the call returns.
    Sync,
    /// Queue the callback until the next `poll`.
    Deferred,
}

/// Resource-pool collaborator: resolves a reference token to a loaded
/// multi-track container. Loading and caching live outside this crate.
pub trait ContainerPool {
    fn load(&self, reference: &str) -> Option<MidiContainer>;
}

/// Sequence lifecycle callbacks.
pub trait SequenceListener {
    fn sequence_loaded(&mut self, sequence: &Arc<MidiSequence>);
    fn sequences_cleared(&mut self);
}

/// Transport callbacks.
pub trait PlaybackListener {
    fn playback_changed(&mut self, timestamp: usize, state: PlayState);
}

enum DeferredListenerEvent {
    SequenceLoaded(Arc<MidiSequence>),
    SequencesCleared,
}

enum WorkerResult {
    BufferPrepared(Vec<EngineEvent>),
    RecordFinalized {
        events: Vec<EngineEvent>,
        flush: bool,
    },
}

pub struct PlayerController {
    commands: CommandProducer,
    notifications: NotificationConsumer,
    worker: BackgroundWorker,
    worker_results: Receiver<WorkerResult>,
    worker_results_sender: Sender<WorkerResult>,
    record_state: Arc<SharedRecordState>,

    sequences: Vec<Arc<MidiSequence>>,
    file_names: Vec<Option<String>>,
    current_sequence_index: Option<usize>,
    current_track_index: usize,
    loop_enabled: bool,

    sample_rate: f64,
    bpm: f64,

    history: UndoHistory,
    use_undo: bool,
    recorded_events: Vec<EngineEvent>,

    sequence_listeners: Vec<Box<dyn SequenceListener + Send>>,
    playback_listeners: Vec<Box<dyn PlaybackListener + Send>>,
    pending_listener_events: Vec<DeferredListenerEvent>,
}

impl PlayerController {
    /// Create the controller together with the engine half it drives.
    /// The returned `MidiPlayer` moves to the audio context.
    pub fn new() -> (Self, crate::sequencer::player::MidiPlayer) {
        let (command_producer, command_consumer) =
            crate::messaging::channels::create_command_channel(256);
        let (notification_producer, notification_consumer) =
            crate::messaging::channels::create_notification_channel(256);

        let record_state = Arc::new(SharedRecordState::default());
        let player = crate::sequencer::player::MidiPlayer::new(
            command_consumer,
            notification_producer,
            Arc::clone(&record_state),
        );

        let (worker_results_sender, worker_results) = unbounded();

        let controller = Self {
            commands: command_producer,
            notifications: notification_consumer,
            worker: BackgroundWorker::spawn(),
            worker_results,
            worker_results_sender,
            record_state,
            sequences: Vec::new(),
            file_names: Vec::new(),
            current_sequence_index: None,
            current_track_index: 0,
            loop_enabled: true,
            sample_rate: 44100.0,
            bpm: 120.0,
            history: UndoHistory::new(),
            use_undo: true,
            recorded_events: Vec::new(),
            sequence_listeners: Vec::new(),
            playback_listeners: Vec::new(),
            pending_listener_events: Vec::new(),
        };

        (controller, player)
    }

    pub fn prepare_to_play(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Pushed tempo change, forwarded to the engine.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
        self.send_command(PlayerCommand::SetBpm(bpm));
    }

    pub fn record_state(&self) -> RecordState {
        self.record_state.get()
    }

    pub fn play(&mut self, timestamp: usize) {
        self.send_command(PlayerCommand::Play { timestamp });
    }

    pub fn stop(&mut self, timestamp: usize) {
        self.send_command(PlayerCommand::Stop { timestamp });
    }

    pub fn record(&mut self, timestamp: usize) {
        self.send_command(PlayerCommand::Record { timestamp });
    }

    pub fn set_playback_position(&mut self, normalised: f64) {
        self.send_command(PlayerCommand::SetPosition(normalised));
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        self.send_command(PlayerCommand::SetLoopEnabled(enabled));
    }

    pub fn set_loop_start(&mut self, start: f64) {
        if let Some(sequence) = self.current_sequence() {
            sequence.set_loop_start(start);
        }
    }

    pub fn set_loop_end(&mut self, end: f64) {
        if let Some(sequence) = self.current_sequence() {
            sequence.set_loop_end(end);
        }
    }

    pub fn sequences(&self) -> &[Arc<MidiSequence>] {
        &self.sequences
    }

    pub fn current_sequence(&self) -> Option<&Arc<MidiSequence>> {
        self.current_sequence_index
            .and_then(|index| self.sequences.get(index))
    }

    pub fn current_sequence_id(&self) -> Option<&str> {
        self.current_sequence().map(|s| s.id())
    }

    /// Install a sequence and select it.
    pub fn add_sequence(&mut self, sequence: MidiSequence, mode: NotificationMode) {
        self.add_sequence_with_file_name(sequence, None, mode);
    }

    fn add_sequence_with_file_name(
        &mut self,
        sequence: MidiSequence,
        file_name: Option<String>,
        mode: NotificationMode,
    ) {
        let sequence = Arc::new(sequence);

        self.sequences.push(Arc::clone(&sequence));
        self.file_names.push(file_name);
        self.current_sequence_index = Some(self.sequences.len() - 1);

        self.send_command(PlayerCommand::AddSequence(Arc::clone(&sequence)));
        self.notify_sequence_loaded(sequence, mode);
    }

    /// Build a sequence from a container and install it.
    pub fn load_container(&mut self, container: &MidiContainer, mode: NotificationMode) {
        let sequence = MidiSequence::new();
        sequence.load_from_container(container);
        self.add_sequence(sequence, mode);
    }

    /// Resolve a pool reference and install the loaded container. A missing
    /// resource is tolerated and reported to the caller.
    pub fn load_from_pool(
        &mut self,
        pool: &dyn ContainerPool,
        reference: &str,
        mode: NotificationMode,
    ) -> bool {
        match pool.load(reference) {
            Some(container) => {
                let sequence = MidiSequence::new();
                sequence.load_from_container(&container);
                self.add_sequence_with_file_name(sequence, Some(reference.to_string()), mode);
                true
            }
            None => {
                log::warn!("could not resolve pool reference '{}'", reference);
                false
            }
        }
    }

    /// Reload the current sequence's original container from the pool and
    /// flush it as an undoable edit.
    pub fn reset_current_sequence(&mut self, pool: &dyn ContainerPool) -> bool {
        let Some(index) = self.current_sequence_index else {
            return false;
        };

        let Some(reference) = self.file_names.get(index).cloned().flatten() else {
            log::warn!("current sequence has no pool reference to reset from");
            return false;
        };

        let Some(container) = pool.load(&reference) else {
            log::warn!("could not reload pool reference '{}'", reference);
            return false;
        };

        let original = MidiSequence::new();
        original.load_from_container(&container);

        let events = original
            .event_list(self.sample_rate, self.bpm, ErrorPolicy::Lenient)
            .unwrap_or_default();

        self.flush_edit(events);
        true
    }

    pub fn set_current_sequence(&mut self, index: Option<usize>) {
        self.current_sequence_index = index.filter(|&candidate| candidate < self.sequences.len());
        self.recorded_events.clear();
        self.send_command(PlayerCommand::SetCurrentSequence(index));
    }

    pub fn set_current_track(&mut self, index: usize) {
        self.current_track_index = index;
        self.recorded_events.clear();
        self.send_command(PlayerCommand::SetCurrentTrack(index));
    }

    pub fn clear_sequences(&mut self, mode: NotificationMode) {
        if self.use_undo {
            self.history.clear();
        }

        self.sequences.clear();
        self.file_names.clear();
        self.current_sequence_index = None;
        self.recorded_events.clear();
        self.record_state.set(RecordState::Idle);
        self.send_command(PlayerCommand::ClearSequences);

        match mode {
            NotificationMode::Sync => self.notify_sequences_cleared(),
            NotificationMode::Deferred => self
                .pending_listener_events
                .push(DeferredListenerEvent::SequencesCleared),
        }
    }

    /// Flatten the current track for bulk editing.
    pub fn event_list(&self) -> Vec<EngineEvent> {
        self.current_sequence()
            .map(|sequence| {
                sequence
                    .event_list(self.sample_rate, self.bpm, ErrorPolicy::Lenient)
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Replace the current track's content, going through the undo history
    /// when it is enabled.
    pub fn flush_edit(&mut self, events: Vec<EngineEvent>) -> bool {
        let Some(sequence) = self.current_sequence().cloned() else {
            return false;
        };

        let action = EditAction::replace_events(&sequence, events, self.sample_rate, self.bpm);
        let current_id = self.current_sequence_id().map(str::to_string);

        let performed = if self.use_undo {
            self.history.execute(action, current_id.as_deref())
        } else {
            action.perform(current_id.as_deref())
        };

        if performed {
            self.notify_sequence_loaded(sequence, NotificationMode::Deferred);
        }

        performed
    }

    /// Clear the current track's content as an undoable edit.
    pub fn clear_current_sequence(&mut self) {
        self.recorded_events.clear();
        self.flush_edit(Vec::new());
    }

    /// Change the current sequence's length via its time signature.
    pub fn set_length(&mut self, signature: TimeSignature, use_undo: bool) -> bool {
        let Some(sequence) = self.current_sequence().cloned() else {
            return false;
        };

        let current_id = self.current_sequence_id().map(str::to_string);

        let performed = if use_undo && self.use_undo {
            let action = EditAction::set_time_signature(&sequence, signature);
            self.history.execute(action, current_id.as_deref())
        } else {
            sequence.set_length_from_signature(signature);
            true
        };

        if performed {
            self.notify_sequence_loaded(sequence, NotificationMode::Deferred);
        }

        performed
    }

    /// Disable the internal history when a host-owned undo stack takes over.
    pub fn set_use_undo(&mut self, use_undo: bool) {
        if self.use_undo != use_undo {
            self.history.clear();
            self.use_undo = use_undo;
        }
    }

    pub fn undo(&mut self) -> Option<String> {
        let current_id = self.current_sequence_id().map(str::to_string);
        let description = self.history.undo(current_id.as_deref())?;

        if let Some(sequence) = self.current_sequence().cloned() {
            self.notify_sequence_loaded(sequence, NotificationMode::Deferred);
        }

        Some(description)
    }

    pub fn redo(&mut self) -> Option<String> {
        let current_id = self.current_sequence_id().map(str::to_string);
        let description = self.history.redo(current_id.as_deref())?;

        if let Some(sequence) = self.current_sequence().cloned() {
            self.notify_sequence_loaded(sequence, NotificationMode::Deferred);
        }

        Some(description)
    }

    pub fn add_sequence_listener(&mut self, listener: Box<dyn SequenceListener + Send>) {
        self.sequence_listeners.push(listener);
    }

    pub fn add_playback_listener(&mut self, listener: Box<dyn PlaybackListener + Send>) {
        self.playback_listeners.push(listener);
    }

    /// Snapshot of the most recently finalized take as a standalone
    /// sequence.
    pub fn recorded_sequence(&self) -> MidiSequence {
        let sequence = MidiSequence::new();
        sequence.create_empty_track();
        write_event_list(&sequence, &self.recorded_events, self.bpm, self.sample_rate);
        sequence
    }

    /// Drain engine notifications, worker completions and deferred
    /// listener callbacks. Call regularly from the background context.
    pub fn poll(&mut self) {
        while let Some(notification) = self.notifications.try_pop() {
            match notification {
                PlayerNotification::PlaybackChanged { timestamp, state } => {
                    for listener in &mut self.playback_listeners {
                        listener.playback_changed(timestamp, state);
                    }
                }
                PlayerNotification::RequestRecordPreparation { copy_existing } => {
                    self.defer_record_preparation(copy_existing);
                }
                PlayerNotification::RecordingFinished { events, flush } => {
                    self.defer_record_finalization(events, flush);
                }
            }
        }

        while let Ok(result) = self.worker_results.try_recv() {
            match result {
                WorkerResult::BufferPrepared(events) => {
                    self.send_command(PlayerCommand::RecordBufferPrepared(events));
                }
                WorkerResult::RecordFinalized { events, flush } => {
                    self.recorded_events = events;

                    if flush {
                        let events = self.recorded_events.clone();
                        self.flush_edit(events);
                    }

                    self.record_state.set(RecordState::Prepared);
                }
            }
        }

        let pending = std::mem::take(&mut self.pending_listener_events);
        for event in pending {
            match event {
                DeferredListenerEvent::SequenceLoaded(sequence) => {
                    for listener in &mut self.sequence_listeners {
                        listener.sequence_loaded(&sequence);
                    }
                }
                DeferredListenerEvent::SequencesCleared => self.notify_sequences_cleared(),
            }
        }
    }

    /// Export the full player state for the host's session format.
    pub fn export_state(&self) -> PlayerStateTree {
        let sequences = self
            .sequences
            .iter()
            .zip(&self.file_names)
            .map(|(sequence, file_name)| SequenceStateTree {
                id: sequence.id().to_string(),
                file_name: file_name.clone(),
                time_signature: sequence.signature(),
                data: encode_container(&sequence.to_container()).unwrap_or_else(|error| {
                    log::warn!("failed to encode sequence '{}': {}", sequence.id(), error);
                    String::new()
                }),
            })
            .collect();

        PlayerStateTree {
            current_sequence: self.current_sequence_index,
            current_track: self.current_track_index,
            loop_enabled: self.loop_enabled,
            sequences,
        }
    }

    /// Restore a previously exported state. Malformed sequence data yields
    /// an empty sequence instead of failing; a missing file name is only
    /// logged.
    pub fn restore_state(&mut self, tree: &PlayerStateTree) {
        self.clear_sequences(NotificationMode::Deferred);

        for state in &tree.sequences {
            if state.file_name.is_none() {
                log::warn!("sequence '{}' restored without a file name", state.id);
            }

            let mut sequence = MidiSequence::new();
            sequence.set_id(&state.id);

            match decode_container(&state.data) {
                Ok(container) => sequence.load_from_container(&container),
                Err(error) => {
                    log::warn!(
                        "malformed data for sequence '{}', restoring empty: {}",
                        state.id,
                        error
                    );
                }
            }

            sequence.set_length_from_signature(state.time_signature);
            self.add_sequence_with_file_name(
                sequence,
                state.file_name.clone(),
                NotificationMode::Deferred,
            );
        }

        self.set_current_sequence(tree.current_sequence);
        self.set_current_track(tree.current_track);
        self.set_loop_enabled(tree.loop_enabled);
    }

    /// Export the current track into a container at `track_index`, keeping
    /// the other tracks of an existing container and padding any gap with
    /// placeholder tracks.
    pub fn save_to_container(
        &self,
        existing: Option<&MidiContainer>,
        track_index: usize,
    ) -> Option<MidiContainer> {
        let sequence = self.current_sequence()?;
        let source = sequence.to_container();
        let mut track = source.tracks.get(sequence.current_track_index())?.clone();

        let signature = sequence.signature();
        let length = sequence.length_ticks();

        track.push(
            0.0,
            ContainerMessage::TimeSignature {
                nominator: signature.nominator as u8,
                denominator: signature.denominator as u8,
            },
        );
        track.push(length, ContainerMessage::EndOfTrack);
        track.sort();

        let mut container = existing
            .cloned()
            .unwrap_or_else(|| MidiContainer::new(source.ticks_per_quarter));

        if track_index < container.tracks.len() {
            container.tracks[track_index] = track;
        } else {
            while container.tracks.len() < track_index {
                container.tracks.push(ContainerTrack::placeholder(length));
            }
            container.tracks.push(track);
        }

        Some(container)
    }

    fn defer_record_preparation(&mut self, copy_existing: bool) {
        let sequence = self.current_sequence().cloned();
        let sample_rate = self.sample_rate;
        let bpm = self.bpm;
        let results = self.worker_results_sender.clone();

        self.worker.defer(move || {
            let mut events = Vec::new();

            if copy_existing {
                if let Some(sequence) = &sequence {
                    events = sequence
                        .event_list(sample_rate, bpm, ErrorPolicy::Lenient)
                        .unwrap_or_default();
                }
            }

            events.reserve(RECORD_BUFFER_CAPACITY);
            let _ = results.send(WorkerResult::BufferPrepared(events));
        });
    }

    fn defer_record_finalization(&mut self, events: Vec<EngineEvent>, flush: bool) {
        let last_timestamp = self
            .current_sequence()
            .map(|sequence| {
                let length_samples =
                    time::ticks_to_samples(sequence.length_ticks(), self.bpm, self.sample_rate);
                (length_samples as i64 - 1).max(0) as u64
            })
            .unwrap_or(0);

        let results = self.worker_results_sender.clone();

        self.worker.defer(move || {
            let mut events = events;
            finalize_recorded_events(&mut events, last_timestamp);
            let _ = results.send(WorkerResult::RecordFinalized { events, flush });
        });
    }

    fn notify_sequence_loaded(&mut self, sequence: Arc<MidiSequence>, mode: NotificationMode) {
        match mode {
            NotificationMode::Sync => {
                for listener in &mut self.sequence_listeners {
                    listener.sequence_loaded(&sequence);
                }
            }
            NotificationMode::Deferred => self
                .pending_listener_events
                .push(DeferredListenerEvent::SequenceLoaded(sequence)),
        }
    }

    fn notify_sequences_cleared(&mut self) {
        for listener in &mut self.sequence_listeners {
            listener.sequences_cleared();
        }
    }

    fn send_command(&mut self, command: PlayerCommand) {
        if self.commands.try_push(command).is_err() {
            log::warn!("command ring full, dropping command");
        }
    }
}
