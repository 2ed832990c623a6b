// Job state machine
//
// A job moves submitted -> processing -> {success, error}. Terminal states never
// change again; every other move is rejected with `StateMachineError`.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use job_state_machine::JobStateMachine;
pub use states::JobState;
