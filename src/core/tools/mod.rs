//! Function tools the assistant can call mid-conversation.

mod definitions;
mod dispatcher;

pub use definitions::{BOOK_APPOINTMENT, FIND_AVAILABLE_SLOTS, scheduling_tools};
pub use dispatcher::{ToolDispatcher, ToolInvocation};
