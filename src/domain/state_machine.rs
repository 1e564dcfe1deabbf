use crate::domain::types::{SessionEvent, SessionPhase, TransitionError};

pub fn transition(
    current: &SessionPhase,
    event: &SessionEvent,
) -> Result<SessionPhase, TransitionError> {
    match (current, event) {
        (SessionPhase::Uninitialized, SessionEvent::ProviderDetected) => {
            Ok(SessionPhase::Initialized)
        }
        (SessionPhase::Uninitialized, SessionEvent::ProviderAbsent) => Ok(SessionPhase::NoProvider),
        (SessionPhase::Uninitialized, SessionEvent::TornDown) => Ok(SessionPhase::Detached),
        (SessionPhase::Initialized, SessionEvent::TornDown) => Ok(SessionPhase::Detached),
        (SessionPhase::NoProvider, SessionEvent::TornDown) => Ok(SessionPhase::Detached),
        _ => Err(TransitionError {
            from: *current,
            event: format!("{event:?}"),
            reason: "invalid transition".to_string(),
        }),
    }
}
