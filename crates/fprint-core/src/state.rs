//! High-level device state (§3's `S`). The core drives every transition;
//! drivers only acknowledge completion via the callbacks in §4.6. Encoded
//! as a single enum rather than a numeric state id so invalid transitions
//! are caught by exhaustive `match`es instead of by convention.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Initial,
    Initializing,
    Initialized,
    Deinitializing,
    Deinitialized,
    Error,
    EnrollStarting,
    Enrolling,
    EnrollStopping,
    VerifyStarting,
    Verifying,
    VerifyDone,
    VerifyStopping,
    IdentifyStarting,
    Identifying,
    IdentifyDone,
    IdentifyStopping,
    CaptureStarting,
    Capturing,
    CaptureDone,
    CaptureStopping,
}

/// The four operations an open imaging or primitive device can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Enroll,
    Verify,
    Identify,
    Capture,
}

impl Operation {
    pub fn starting_state(self) -> DeviceState {
        match self {
            Operation::Enroll => DeviceState::EnrollStarting,
            Operation::Verify => DeviceState::VerifyStarting,
            Operation::Identify => DeviceState::IdentifyStarting,
            Operation::Capture => DeviceState::CaptureStarting,
        }
    }

    pub fn running_state(self) -> DeviceState {
        match self {
            Operation::Enroll => DeviceState::Enrolling,
            Operation::Verify => DeviceState::Verifying,
            Operation::Identify => DeviceState::Identifying,
            Operation::Capture => DeviceState::Capturing,
        }
    }

    pub fn stopping_state(self) -> DeviceState {
        match self {
            Operation::Enroll => DeviceState::EnrollStopping,
            Operation::Verify => DeviceState::VerifyStopping,
            Operation::Identify => DeviceState::IdentifyStopping,
            Operation::Capture => DeviceState::CaptureStopping,
        }
    }
}

impl DeviceState {
    /// True for any of the four `*Starting` states.
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            DeviceState::EnrollStarting
                | DeviceState::VerifyStarting
                | DeviceState::IdentifyStarting
                | DeviceState::CaptureStarting
        )
    }

    /// True for any of the four `*Stopping` states.
    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            DeviceState::EnrollStopping
                | DeviceState::VerifyStopping
                | DeviceState::IdentifyStopping
                | DeviceState::CaptureStopping
        )
    }

    /// True while the imaging sub-state axis (`IS`) is meaningful (§3:
    /// "defined only while S is one of {Enrolling, Verifying, Identifying,
    /// Capturing}").
    pub fn has_imaging_substate(self) -> bool {
        matches!(
            self,
            DeviceState::Enrolling
                | DeviceState::Verifying
                | DeviceState::Identifying
                | DeviceState::Capturing
        )
    }

    /// On driver acknowledgement, a `*Starting` state always transitions
    /// to its running `*ing` counterpart (§3 invariant). Returns `None` for
    /// states that aren't a `*Starting` state.
    pub fn starting_to_running(self) -> Option<DeviceState> {
        match self {
            DeviceState::EnrollStarting => Some(DeviceState::Enrolling),
            DeviceState::VerifyStarting => Some(DeviceState::Verifying),
            DeviceState::IdentifyStarting => Some(DeviceState::Identifying),
            DeviceState::CaptureStarting => Some(DeviceState::Capturing),
            _ => None,
        }
    }

    /// Every `*Stopping` state returns to `Initialized` (§3 invariant).
    pub fn stopping_to_initialized(self) -> Option<DeviceState> {
        if self.is_stopping() {
            Some(DeviceState::Initialized)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_starting_state_has_a_running_counterpart() {
        for op in [
            Operation::Enroll,
            Operation::Verify,
            Operation::Identify,
            Operation::Capture,
        ] {
            assert_eq!(
                op.starting_state().starting_to_running(),
                Some(op.running_state())
            );
        }
    }

    #[test]
    fn every_stopping_state_returns_to_initialized() {
        for op in [
            Operation::Enroll,
            Operation::Verify,
            Operation::Identify,
            Operation::Capture,
        ] {
            assert_eq!(
                op.stopping_state().stopping_to_initialized(),
                Some(DeviceState::Initialized)
            );
        }
    }

    #[test]
    fn non_starting_state_has_no_running_counterpart() {
        assert_eq!(DeviceState::Initialized.starting_to_running(), None);
    }
}
