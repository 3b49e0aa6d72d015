//! Audit trail for agent actions and reasoning steps.

use tracing::info;

/// Target every audit event is emitted on.
pub const AUDIT_TARGET: &str = "audit";

/// Confirmation returned by [`log_action`].
pub const ACTION_LOGGED: &str = "Action logged successfully.";

/// Record one action, e.g. `REASONING` or `TRADE_DECISION`.
pub fn log_action(action_type: &str, details: &str) -> &'static str {
    info!(target: AUDIT_TARGET, "[{}] {}", action_type.trim().to_uppercase(), details.trim());
    ACTION_LOGGED
}
