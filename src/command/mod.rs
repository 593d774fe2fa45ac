// Reversible sequence edits and their undo history

pub mod edit;
pub mod history;

pub use edit::{EditAction, write_event_list};
pub use history::UndoHistory;
