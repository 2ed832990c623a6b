use super::errors::{StateMachineError, StateMachineResult};
use super::events::JobEvent;
use super::states::JobState;

/// Tracks one job's current state and applies events to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStateMachine {
    current: JobState,
}

impl JobStateMachine {
    pub fn new(current: JobState) -> Self {
        Self { current }
    }

    pub fn current_state(&self) -> JobState {
        self.current
    }

    /// Apply an event, moving to the target state or rejecting the transition
    pub fn transition(&mut self, event: &JobEvent) -> StateMachineResult<JobState> {
        let target = Self::determine_target_state(self.current, event)?;
        tracing::debug!(
            from = %self.current,
            to = %target,
            event = event.event_type(),
            "Job state transition"
        );
        self.current = target;
        Ok(target)
    }

    /// Determine the target state for an event without applying it
    pub fn determine_target_state(
        current_state: JobState,
        event: &JobEvent,
    ) -> StateMachineResult<JobState> {
        let target = match (current_state, event) {
            (JobState::Submitted, JobEvent::Claim) => JobState::Processing,
            (JobState::Processing, JobEvent::Succeed) => JobState::Success,
            (JobState::Processing, JobEvent::Fail(_)) => JobState::Error,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Whether `from -> to` is an edge of the lifecycle graph
    pub fn can_transition(from: JobState, to: JobState) -> bool {
        matches!(
            (from, to),
            (JobState::Submitted, JobState::Processing)
                | (JobState::Processing, JobState::Success)
                | (JobState::Processing, JobState::Error)
        )
    }
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new(JobState::Submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = JobStateMachine::default();
        assert_eq!(machine.transition(&JobEvent::Claim).unwrap(), JobState::Processing);
        assert_eq!(machine.transition(&JobEvent::Succeed).unwrap(), JobState::Success);
    }

    #[test]
    fn test_failure_path() {
        let mut machine = JobStateMachine::default();
        machine.transition(&JobEvent::Claim).unwrap();
        let state = machine
            .transition(&JobEvent::Fail("exit status 1".to_string()))
            .unwrap();
        assert_eq!(state, JobState::Error);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [JobState::Success, JobState::Error] {
            for event in [
                JobEvent::Claim,
                JobEvent::Succeed,
                JobEvent::Fail("again".to_string()),
            ] {
                let mut machine = JobStateMachine::new(terminal);
                assert!(machine.transition(&event).is_err());
                assert_eq!(machine.current_state(), terminal);
            }
        }
    }

    #[test]
    fn test_cannot_skip_processing() {
        let result = JobStateMachine::determine_target_state(JobState::Submitted, &JobEvent::Succeed);
        assert_eq!(
            result,
            Err(StateMachineError::InvalidTransition {
                from: "submitted".to_string(),
                event: "succeed".to_string(),
            })
        );
    }
}
