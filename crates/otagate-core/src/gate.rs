//! Ordered precondition checks guarding irreversible actions.
//!
//! Burning eFuses and flashing a new firmware image share one shape: a
//! one-way transition that may only happen once every gate in a fixed order
//! has passed, where the first closed gate stops evaluation. [`GateTrail`]
//! records that evaluation so callers (and tests) can see exactly which gates
//! ran and which one blocked the action.

use heapless::Vec;
use log::debug;

/// Maximum number of gates a single transition can be guarded by
pub const MAX_GATES: usize = 8;

/// Identifies a precondition in front of a one-way transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateId {
    /// Button pressed or cloud trigger answered `'1'`
    UpdateRequested,
    /// Wall clock inside the maintenance window (or fallback policy)
    MaintenanceWindow,
    /// Battery at or above the configured minimum
    Battery,
    /// Firmware host resolvable and reachable over TCP
    Network,
    /// Stored provisioning CRC absent or invalid
    NotProvisioned,
    /// Desired bits never require clearing a burned bit
    NoConflict,
    /// At least one bit still needs burning
    PendingBits,
}

impl GateId {
    /// Short label for log lines
    pub const fn label(self) -> &'static str {
        match self {
            Self::UpdateRequested => "update-requested",
            Self::MaintenanceWindow => "maintenance-window",
            Self::Battery => "battery",
            Self::Network => "network",
            Self::NotProvisioned => "not-provisioned",
            Self::NoConflict => "no-conflict",
            Self::PendingBits => "pending-bits",
        }
    }
}

/// Result of evaluating one gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateResult {
    pub gate: GateId,
    pub passed: bool,
}

/// Ordered record of the gates evaluated for one attempted transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateTrail {
    results: Vec<GateResult, MAX_GATES>,
}

impl GateTrail {
    pub const fn new() -> Self {
        Self {
            results: Vec::new(),
        }
    }

    /// Record the verdict of `gate` and hand it back, so call sites read as
    /// `if !trail.record(GateId::Battery, ok) { return ...; }`.
    pub fn record(&mut self, gate: GateId, passed: bool) -> bool {
        debug!(
            "gate {}: {}",
            gate.label(),
            if passed { "open" } else { "closed" }
        );
        // A trail never holds more gates than a transition declares
        self.results.push(GateResult { gate, passed }).ok();
        passed
    }

    /// Gates in evaluation order
    pub fn evaluated(&self) -> &[GateResult] {
        &self.results
    }

    /// Whether `gate` was evaluated at all
    pub fn was_evaluated(&self, gate: GateId) -> bool {
        self.results.iter().any(|r| r.gate == gate)
    }

    /// The first gate that closed, if any
    pub fn blocked_by(&self) -> Option<GateId> {
        self.results.iter().find(|r| !r.passed).map(|r| r.gate)
    }

    /// True when at least one gate ran and none of them closed
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.blocked_by().is_none()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_trail_has_not_passed() {
        let trail = GateTrail::new();
        assert!(!trail.all_passed());
        assert_eq!(trail.blocked_by(), None);
    }

    #[test]
    fn test_blocked_by_reports_first_closed_gate() {
        let mut trail = GateTrail::new();
        assert!(trail.record(GateId::UpdateRequested, true));
        assert!(!trail.record(GateId::MaintenanceWindow, false));

        assert_eq!(trail.blocked_by(), Some(GateId::MaintenanceWindow));
        assert!(trail.was_evaluated(GateId::UpdateRequested));
        assert!(!trail.was_evaluated(GateId::Battery));
        assert!(!trail.all_passed());
    }

    #[test]
    fn test_all_passed() {
        let mut trail = GateTrail::new();
        trail.record(GateId::NotProvisioned, true);
        trail.record(GateId::NoConflict, true);
        trail.record(GateId::PendingBits, true);
        assert!(trail.all_passed());
        assert_eq!(trail.evaluated().len(), 3);

        trail.clear();
        assert!(trail.evaluated().is_empty());
    }
}
