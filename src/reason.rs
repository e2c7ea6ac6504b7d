//! Evaluation results and the reasons behind them.
use serde::{Deserialize, Serialize};

/// Describes the main factor that influenced a flag evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag was off and therefore returned its configured off value.
    Off,
    /// The user key was specifically targeted for this flag.
    TargetMatch,
    /// The user matched one of the flag's rules.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Zero-based index of the rule that was matched.
        rule_index: usize,
        /// Id of the rule that was matched.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        rule_id: String,
        /// Set if the variation was selected as part of an experiment.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// The flag was considered off because a prerequisite flag was off or did not return the
    /// desired variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        /// The key of the prerequisite flag that failed.
        prerequisite_key: String,
    },
    /// The flag was on but the user did not match any targets or rules.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        /// Set if the variation was selected as part of an experiment.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// The flag could not be evaluated and the caller's default value was returned.
    Error {
        /// What prevented the evaluation.
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
    },
}

impl Reason {
    /// Returns `true` if the reason marks an ongoing experiment.
    pub fn is_in_experiment(&self) -> bool {
        match self {
            Reason::RuleMatch { in_experiment, .. } => *in_experiment,
            Reason::Fallthrough { in_experiment } => *in_experiment,
            _ => false,
        }
    }
}

impl From<ErrorKind> for Reason {
    fn from(error_kind: ErrorKind) -> Reason {
        Reason::Error { error_kind }
    }
}

/// Explains why a flag could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The flag was evaluated before the client received any flag data.
    ClientNotReady,
    /// No flag with the requested key is known.
    FlagNotFound,
    /// The flag data is internally inconsistent.
    MalformedFlag,
    /// The flag value has a different type than the one requested.
    WrongType,
    /// An unexpected error stopped evaluation.
    Exception,
}

/// The result of a flag evaluation along with the information about how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDetail<T> {
    /// Resulting value: either the flag's value or the caller's default.
    pub value: T,
    /// Index of the returned variation. `None` when the default value was returned.
    pub variation_index: Option<usize>,
    /// Why the value was returned. Only populated when reasons were requested.
    pub reason: Option<Reason>,
}

impl<T> EvaluationDetail<T> {
    /// Detail for a failed evaluation returning `default`.
    pub fn error(default: T, error_kind: ErrorKind) -> EvaluationDetail<T> {
        EvaluationDetail {
            value: default,
            variation_index: None,
            reason: Some(error_kind.into()),
        }
    }

    /// Map `value` using the `f` function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> EvaluationDetail<U> {
        EvaluationDetail {
            value: f(self.value),
            variation_index: self.variation_index,
            reason: self.reason,
        }
    }

    /// Returns the error kind if the evaluation failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.reason {
            Some(Reason::Error { error_kind }) => Some(error_kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, Reason};

    #[test]
    fn reason_wire_format() {
        let reason = Reason::RuleMatch {
            rule_index: 2,
            rule_id: "rule-id".to_owned(),
            in_experiment: true,
        };
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            serde_json::json!({
                "kind": "RULE_MATCH",
                "ruleIndex": 2,
                "ruleId": "rule-id",
                "inExperiment": true
            })
        );

        let error: Reason = ErrorKind::WrongType.into();
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"kind": "ERROR", "errorKind": "WRONG_TYPE"})
        );
    }

    #[test]
    fn fallthrough_omits_false_experiment() {
        let reason: Reason = serde_json::from_str(r#"{"kind": "FALLTHROUGH"}"#).unwrap();
        assert!(!reason.is_in_experiment());
        assert_eq!(
            serde_json::to_string(&reason).unwrap(),
            r#"{"kind":"FALLTHROUGH"}"#
        );
    }
}
