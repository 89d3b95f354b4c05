//! Pure switch transitions.
//!
//! Liveness is judged only at tick boundaries. A check-in merely clears the
//! pending code and restores the budget; the next tick is the sole place that
//! inspects the pending code to decide whether the elapsed interval was
//! answered. Both functions here must run inside the engine's single
//! critical section.

use crate::{CheckInDecision, CodeGenerator, EngineState, Phase, SwitchConfig, TickAction};

/// Evaluate one elapsed interval.
///
/// 1. Triggered is sticky: nothing happens.
/// 2. A code still pending means the last challenge went unanswered: spend one
///    unit of forgiveness. Below zero triggers; otherwise re-challenge.
/// 3. No code pending (first tick, or the operator checked in): challenge
///    without touching the budget.
pub fn evaluate_tick(
    cfg: &SwitchConfig,
    st: &mut EngineState,
    codes: &mut CodeGenerator,
) -> TickAction {
    if st.phase == Phase::Triggered {
        return TickAction::Idle;
    }

    let missed = st.pending_code.is_some();
    if missed {
        st.remaining_forgiveness -= 1;
        if st.remaining_forgiveness < 0 {
            st.phase = Phase::Triggered;
            st.pending_code = None;
            return TickAction::Trigger;
        }
    }

    let code = codes.generate_distinct(cfg.code_length, st.pending_code.as_deref());
    st.pending_code = Some(code.clone());
    TickAction::Challenge { code, missed }
}

/// Apply an inbound check-in.
///
/// Accepted only while armed and only on an exact match with the pending
/// code. Acceptance clears the code and restores the full configured budget.
pub fn check_in(cfg: &SwitchConfig, st: &mut EngineState, code: &str) -> CheckInDecision {
    if st.phase == Phase::Triggered {
        return CheckInDecision::AlreadyTriggered;
    }

    match st.pending_code.as_deref() {
        Some(pending) if pending == code => {
            st.pending_code = None;
            st.remaining_forgiveness = i64::from(cfg.forgiveness);
            CheckInDecision::Accepted
        }
        _ => CheckInDecision::Mismatch,
    }
}
