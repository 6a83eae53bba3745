use crate::models::{VmAction, VmState};

/// Enabled/disabled flags for the control row of a single VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls {
    pub start: bool,
    pub stop: bool,
    pub restart: bool,
    pub console: bool,
    pub snapshot: bool,
}

/// Business rules that are not fixed by the lifecycle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPolicy {
    /// Whether snapshot operations are offered while the VM is stopped or suspended.
    pub snapshot_when_stopped: bool,
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            snapshot_when_stopped: true,
        }
    }
}

impl Controls {
    pub const DISABLED: Controls = Controls {
        start: false,
        stop: false,
        restart: false,
        console: false,
        snapshot: false,
    };

    /// Derive the control row from a lifecycle state. Total: unrecognized
    /// states get the fully disabled row.
    pub fn for_state(state: &VmState, policy: ControlPolicy) -> Self {
        match state {
            VmState::Active | VmState::Running => Controls {
                start: false,
                stop: true,
                restart: true,
                console: true,
                snapshot: true,
            },
            VmState::Stopped | VmState::Suspended => Controls {
                start: true,
                stop: false,
                restart: false,
                console: false,
                snapshot: policy.snapshot_when_stopped,
            },
            VmState::Pending
            | VmState::Provisioning
            | VmState::Unknown
            | VmState::Other(_) => Controls::DISABLED,
        }
    }

    /// Overlay for a VM with an operation in flight: every mutating control
    /// is disabled, console keeps its state-derived value.
    pub fn locked(self) -> Self {
        Controls {
            console: self.console,
            ..Controls::DISABLED
        }
    }

    pub fn allows(&self, action: VmAction) -> bool {
        match action {
            VmAction::Start => self.start,
            VmAction::Stop => self.stop,
            VmAction::Restart => self.restart,
        }
    }

    /// Names of the enabled controls, in display order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        [
            ("start", self.start),
            ("stop", self.stop),
            ("restart", self.restart),
            ("console", self.console),
            ("snapshot", self.snapshot),
        ]
        .into_iter()
        .filter_map(|(name, enabled)| enabled.then_some(name))
        .collect()
    }
}
