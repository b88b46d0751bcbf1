//! Question builder state machine
//!
//! Pure transitions over (state, draft, event) producing effects that the
//! runtime executes.

mod effect;
pub mod event;
pub mod prompt;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Outcome};
pub use event::FlowEvent;
pub use state::{Field, FlowContext, FlowState, QuestionDraft};
pub use transition::{transition, TransitionError};
