use crate::CoreError;
use weldr_store::ComposeState;

pub fn validate_transition(from: ComposeState, to: ComposeState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ComposeState::Waiting, ComposeState::Running | ComposeState::Failed)
            | (
                ComposeState::Running,
                ComposeState::Finished | ComposeState::Failed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(ComposeState::Waiting, ComposeState::Running).is_ok());
        assert!(validate_transition(ComposeState::Waiting, ComposeState::Failed).is_ok());
        assert!(validate_transition(ComposeState::Running, ComposeState::Finished).is_ok());
        assert!(validate_transition(ComposeState::Running, ComposeState::Failed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(ComposeState::Waiting, ComposeState::Finished).is_err());
        assert!(validate_transition(ComposeState::Running, ComposeState::Waiting).is_err());
        assert!(validate_transition(ComposeState::Finished, ComposeState::Failed).is_err());
        assert!(validate_transition(ComposeState::Failed, ComposeState::Running).is_err());
        assert!(validate_transition(ComposeState::Finished, ComposeState::Finished).is_err());
    }
}
