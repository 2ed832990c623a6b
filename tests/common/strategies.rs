//! Proptest strategies for job lifecycles.

use proptest::prelude::*;
use task_queue::state_machine::{JobEvent, JobState};

pub fn job_state_strategy() -> impl Strategy<Value = JobState> {
    prop::sample::select(JobState::ALL.to_vec())
}

pub fn job_event_strategy() -> impl Strategy<Value = JobEvent> {
    prop_oneof![
        Just(JobEvent::Claim),
        Just(JobEvent::Succeed),
        "[a-z ]{0,24}".prop_map(JobEvent::Fail),
    ]
}

pub fn job_event_sequence_strategy() -> impl Strategy<Value = Vec<JobEvent>> {
    prop::collection::vec(job_event_strategy(), 0..12)
}
