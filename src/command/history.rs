// UndoHistory - bounded undo/redo stacks for edit actions
// Executing a new edit clears the redo stack; the oldest entry is dropped
// once the history limit is reached. Hosts with their own undo stack can
// bypass this and own the actions directly.

use crate::command::edit::EditAction;
use std::collections::VecDeque;

/// Default maximum number of edits kept in history.
const DEFAULT_MAX_HISTORY: usize = 100;

pub struct UndoHistory {
    undo_stack: VecDeque<EditAction>,
    redo_stack: VecDeque<EditAction>,
    max_history: usize,
}

impl UndoHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HISTORY)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history),
            redo_stack: VecDeque::with_capacity(max_history),
            max_history,
        }
    }

    /// Perform an action and push it onto the undo stack. Returns `false`
    /// without recording anything when the action no longer applies.
    pub fn execute(&mut self, action: EditAction, current_id: Option<&str>) -> bool {
        if !action.perform(current_id) {
            return false;
        }

        self.undo_stack.push_back(action);
        self.redo_stack.clear();

        if self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }

        true
    }

    /// Undo the most recent edit. Returns its description, or `None` when
    /// the stack is empty. A stale action (sequence switched since) moves
    /// to the redo stack without touching anything.
    pub fn undo(&mut self, current_id: Option<&str>) -> Option<String> {
        let action = self.undo_stack.pop_back()?;
        let description = action.description();

        action.undo(current_id);
        self.redo_stack.push_back(action);

        Some(description)
    }

    /// Redo the most recently undone edit.
    pub fn redo(&mut self, current_id: Option<&str>) -> Option<String> {
        let action = self.redo_stack.pop_back()?;
        let description = action.description();

        action.perform(current_id);
        self.undo_stack.push_back(action);

        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(EditAction::description)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(EditAction::description)
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::{EngineEvent, MidiEvent};
    use crate::sequencer::sequence::MidiSequence;
    use std::sync::Arc;

    fn sequence_with_id() -> (Arc<MidiSequence>, String) {
        let sequence = MidiSequence::new();
        sequence.create_empty_track();
        sequence.set_length_quarters(4.0);
        let id = sequence.id().to_string();
        (Arc::new(sequence), id)
    }

    fn simple_edit(sequence: &Arc<MidiSequence>) -> EditAction {
        let events = vec![
            EngineEvent::new(
                MidiEvent::NoteOn {
                    note: 60,
                    velocity: 100,
                },
                0,
            )
            .with_event_id(1),
            EngineEvent::new(MidiEvent::NoteOff { note: 60 }, 11025).with_event_id(1),
        ];
        EditAction::replace_events(sequence, events, 44100.0, 120.0)
    }

    #[test]
    fn test_execute_undo_redo() {
        let (sequence, id) = sequence_with_id();
        let mut history = UndoHistory::new();

        assert!(history.execute(simple_edit(&sequence), Some(&id)));
        assert_eq!(sequence.num_events(), 2);
        assert!(history.can_undo());

        let description = history.undo(Some(&id)).unwrap();
        assert!(description.contains("Replace"));
        assert_eq!(sequence.num_events(), 0);
        assert!(history.can_redo());

        history.redo(Some(&id)).unwrap();
        assert_eq!(sequence.num_events(), 2);
    }

    #[test]
    fn test_redo_cleared_on_new_edit() {
        let (sequence, id) = sequence_with_id();
        let mut history = UndoHistory::new();

        history.execute(simple_edit(&sequence), Some(&id));
        history.undo(Some(&id));
        history.execute(simple_edit(&sequence), Some(&id));

        assert!(!history.can_redo());
    }

    #[test]
    fn test_history_limit() {
        let (sequence, id) = sequence_with_id();
        let mut history = UndoHistory::with_capacity(3);

        for _ in 0..5 {
            history.execute(simple_edit(&sequence), Some(&id));
        }

        assert_eq!(history.undo_count(), 3);
    }

    #[test]
    fn test_stale_edit_not_recorded() {
        let (sequence, _id) = sequence_with_id();
        let mut history = UndoHistory::new();

        assert!(!history.execute(simple_edit(&sequence), Some("other")));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_empty_stacks() {
        let mut history = UndoHistory::new();
        assert!(history.undo(None).is_none());
        assert!(history.redo(None).is_none());
    }
}
