mod events;
mod machine;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use events::SessionEvent;
pub use machine::SessionStateMachine;
