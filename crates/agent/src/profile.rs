//! Scenario profiles (§4.G step 1).
//!
//! A profile names the prompt type sent to the Agent and which fields a
//! caller's context must carry for that prompt type to make sense. Only
//! one scenario exists today; the type stays open so new scenarios don't
//! require touching the gateway itself.

use crate::error::AgentError;

/// A conversational scenario the Agent gateway can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Scenario {
    /// A candidate consulting about a job opening, the only scenario in scope.
    CandidateConsultation,
}

impl Scenario {
    /// The `promptType` string sent to the Agent for this scenario.
    #[must_use]
    pub fn prompt_type(&self) -> &'static str {
        match self {
            Self::CandidateConsultation => "CANDIDATE_CONSULTATION",
        }
    }

    /// Context keys this scenario requires to be present and non-null.
    fn required_context_keys(&self) -> &'static [&'static str] {
        match self {
            Self::CandidateConsultation => &["candidate_name"],
        }
    }

    /// Parses a scenario name as received from an inbound record.
    pub fn parse(name: &str) -> Result<Self, AgentError> {
        match name {
            "CANDIDATE_CONSULTATION" => Ok(Self::CandidateConsultation),
            other => Err(AgentError::ConfigError(format!("unknown scenario: {other}"))),
        }
    }

    /// Validates that `context` carries everything this scenario needs
    /// (§4.G step 1: missing required fields is a config error, not a
    /// transient failure, so it is never retried).
    pub fn validate_context(&self, context: &serde_json::Value) -> Result<(), AgentError> {
        let Some(object) = context.as_object() else {
            return Err(AgentError::ConfigError("context must be a JSON object".to_owned()));
        };
        for key in self.required_context_keys() {
            match object.get(*key) {
                Some(serde_json::Value::Null) | None => {
                    return Err(AgentError::ConfigError(format!("context missing required field: {key}")));
                },
                Some(_) => {},
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Scenario;

    #[test]
    fn parses_known_scenario() {
        assert_eq!(Scenario::parse("CANDIDATE_CONSULTATION").unwrap(), Scenario::CandidateConsultation);
    }

    #[test]
    fn rejects_unknown_scenario() {
        assert!(Scenario::parse("SOMETHING_ELSE").is_err());
    }

    #[test]
    fn validates_required_context_fields() {
        let scenario = Scenario::CandidateConsultation;
        let good = serde_json::json!({"candidate_name": "李雷"});
        assert!(scenario.validate_context(&good).is_ok());

        let missing = serde_json::json!({});
        assert!(scenario.validate_context(&missing).is_err());

        let null_field = serde_json::json!({"candidate_name": null});
        assert!(scenario.validate_context(&null_field).is_err());
    }
}
