use crate::shutdown::ShutdownTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitLifecycleState {
    #[default]
    Running,
    QuittingRequested,
    CleanupInProgress,
    CleanupDone,
    ReadyToExit,
    Exiting,
}

/// Tracks how far the shell is through exiting. Cleanup can begin only once,
/// whichever trigger gets there first.
#[derive(Debug, Default)]
pub struct ExitStateMachine {
    state: ExitLifecycleState,
    trigger: Option<ShutdownTrigger>,
}

impl ExitStateMachine {
    pub fn state(&self) -> ExitLifecycleState {
        self.state
    }

    /// The trigger that started cleanup.
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.trigger
    }

    pub fn is_quitting(&self) -> bool {
        self.state != ExitLifecycleState::Running
    }

    pub fn mark_quitting(&mut self) {
        if self.state == ExitLifecycleState::Running {
            self.state = ExitLifecycleState::QuittingRequested;
        }
    }

    pub fn try_begin_cleanup(&mut self, trigger: ShutdownTrigger) -> bool {
        if matches!(
            self.state,
            ExitLifecycleState::Running | ExitLifecycleState::QuittingRequested
        ) {
            self.state = ExitLifecycleState::CleanupInProgress;
            self.trigger = Some(trigger);
            return true;
        }
        false
    }

    pub fn finish_cleanup(&mut self) {
        if self.state == ExitLifecycleState::CleanupInProgress {
            self.state = ExitLifecycleState::CleanupDone;
        }
    }

    pub fn is_cleanup_done(&self) -> bool {
        matches!(
            self.state,
            ExitLifecycleState::CleanupDone
                | ExitLifecycleState::ReadyToExit
                | ExitLifecycleState::Exiting
        )
    }

    pub fn allow_next_exit_request(&mut self) {
        self.state = ExitLifecycleState::ReadyToExit;
    }

    pub fn take_exit_request_allowance(&mut self) -> bool {
        if self.state == ExitLifecycleState::ReadyToExit {
            self.state = ExitLifecycleState::Exiting;
            return true;
        }
        false
    }
}
