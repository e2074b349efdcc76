//! Receiver and branch state machines
//!
//! The receiver has one global state and one sub-state per branch. Only the
//! control thread advances either; these types just encode which moves are
//! legal so transitions can be validated in one place.

/// Global receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// No pipeline exists.
    Idle,

    /// Pipeline is built and set to playing, waiting for a source pad.
    Starting,

    /// The source exposed a pad and was linked to the tee.
    Streaming,

    /// EOS was posted, draining before teardown.
    Stopping,

    /// A fatal pipeline error occurred, waiting for the restart delay.
    Fault,
}

impl ReceiverState {
    pub fn can_transition_to(&self, target: &ReceiverState) -> bool {
        use ReceiverState::*;

        match (self, target) {
            (Idle, Starting) => true,

            (Starting, Streaming) => true,
            // Start-up failure or stop before the first pad
            (Starting, Idle) => true,
            (Starting, Fault) => true,

            (Streaming, Stopping) => true,
            (Streaming, Fault) => true,

            (Stopping, Idle) => true,
            // Error while draining
            (Stopping, Fault) => true,

            (Fault, Starting) => true,
            // Caller stopped during the restart delay
            (Fault, Idle) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ReceiverState::Starting | ReceiverState::Streaming)
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReceiverState::Idle => "Idle",
            ReceiverState::Starting => "Starting",
            ReceiverState::Streaming => "Streaming",
            ReceiverState::Stopping => "Stopping",
            ReceiverState::Fault => "Fault",
        };
        f.write_str(name)
    }
}

/// Per-branch sub-state. A branch cycles `Absent → Attaching → Active →
/// Detaching → Absent`; no other order is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Absent,
    Attaching,
    Active,
    /// An EOS token is draining through the branch; it stays linked until
    /// the EOS surfaces on the bus.
    Detaching,
}

impl BranchState {
    pub fn can_transition_to(&self, target: &BranchState) -> bool {
        use BranchState::*;

        match (self, target) {
            (Absent, Attaching) => true,
            (Attaching, Active) => true,
            // Attach failure rolls straight back
            (Attaching, Absent) => true,
            (Active, Detaching) => true,
            // Pipeline teardown demolishes active branches directly
            (Active, Absent) => true,
            (Detaching, Absent) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, BranchState::Active | BranchState::Detaching)
    }
}

impl std::fmt::Display for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BranchState::Absent => "Absent",
            BranchState::Attaching => "Attaching",
            BranchState::Active => "Active",
            BranchState::Detaching => "Detaching",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_lifecycle() {
        use ReceiverState::*;

        assert!(Idle.can_transition_to(&Starting));
        assert!(Starting.can_transition_to(&Streaming));
        assert!(Streaming.can_transition_to(&Stopping));
        assert!(Stopping.can_transition_to(&Idle));

        // Restart loop
        assert!(Streaming.can_transition_to(&Fault));
        assert!(Fault.can_transition_to(&Starting));
        assert!(Fault.can_transition_to(&Idle));

        // Self-transitions are allowed (idempotent requests)
        assert!(Streaming.can_transition_to(&Streaming));
        assert!(Idle.can_transition_to(&Idle));
    }

    #[test]
    fn test_receiver_illegal_moves() {
        use ReceiverState::*;

        // Must pass through Starting
        assert!(!Idle.can_transition_to(&Streaming));
        assert!(!Idle.can_transition_to(&Stopping));
        // Draining cannot resume
        assert!(!Stopping.can_transition_to(&Streaming));
        assert!(!Stopping.can_transition_to(&Starting));
        // Fault never jumps straight to streaming
        assert!(!Fault.can_transition_to(&Streaming));
    }

    #[test]
    fn test_branch_linearity() {
        use BranchState::*;

        // The only full cycle
        assert!(Absent.can_transition_to(&Attaching));
        assert!(Attaching.can_transition_to(&Active));
        assert!(Active.can_transition_to(&Detaching));
        assert!(Detaching.can_transition_to(&Absent));

        // No shortcuts or reversals
        assert!(!Absent.can_transition_to(&Active));
        assert!(!Absent.can_transition_to(&Detaching));
        assert!(!Active.can_transition_to(&Attaching));
        assert!(!Detaching.can_transition_to(&Active));
        assert!(!Detaching.can_transition_to(&Attaching));
    }

    #[test]
    fn test_branch_teardown_paths() {
        use BranchState::*;

        // Attach failure and whole-pipeline teardown skip the drain
        assert!(Attaching.can_transition_to(&Absent));
        assert!(Active.can_transition_to(&Absent));
    }

    #[test]
    fn test_attached_query() {
        assert!(!BranchState::Absent.is_attached());
        assert!(!BranchState::Attaching.is_attached());
        assert!(BranchState::Active.is_attached());
        assert!(BranchState::Detaching.is_attached());
    }
}
