//! Analytics events produced by flag evaluations.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ErrorKind, EvaluationDetail, FeatureFlag, FlagValue, Reason, User};

/// Describes the outcome of a single flag evaluation. Needs to be delivered to the analytics
/// pipeline by an [`EventProcessor`](crate::EventProcessor).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", rename = "feature")]
pub struct EvaluationEvent {
    /// When the evaluation happened.
    pub creation_date: DateTime<Utc>,
    /// The user the flag was evaluated for.
    pub user: User,
    /// Key of the evaluated flag.
    pub key: String,
    /// Flag version. `None` for unknown flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Index of the returned variation. `None` if the default value was returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    /// Value returned to the caller.
    pub value: FlagValue,
    /// Default value supplied by the caller.
    pub default: FlagValue,
    /// Why the value was returned. Present when the factory includes reasons or the flag is part
    /// of an experiment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    /// Whether a full event should be recorded rather than only a summary.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub track_events: bool,
    /// Debug events are produced until this time (milliseconds since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<u64>,
}

/// Builds [`EvaluationEvent`]s.
///
/// There are two configurations: [`EventFactory::DEFAULT`] and
/// [`EventFactory::WITH_REASONS`]. The latter always includes evaluation reasons; the former
/// includes them only for flags that are part of an experiment. A factory is chosen once when the
/// client is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFactory {
    with_reasons: bool,
}

impl EventFactory {
    /// Factory that includes reasons only where the flag requires them.
    pub const DEFAULT: EventFactory = EventFactory {
        with_reasons: false,
    };

    /// Factory that always includes evaluation reasons.
    pub const WITH_REASONS: EventFactory = EventFactory { with_reasons: true };

    /// Select the configuration.
    pub const fn new(with_reasons: bool) -> EventFactory {
        if with_reasons {
            EventFactory::WITH_REASONS
        } else {
            EventFactory::DEFAULT
        }
    }

    /// Returns `true` if reasons are always included.
    pub fn with_reasons(&self) -> bool {
        self.with_reasons
    }

    /// Event for a flag that was evaluated normally.
    ///
    /// The reason is included if the factory includes reasons or the flag is tracked as part of an
    /// experiment (`track_reason`). In the latter case full events are recorded too.
    pub fn new_evaluation_event(
        &self,
        flag_key: &str,
        flag: &FeatureFlag,
        user: &User,
        result: &EvaluationDetail<FlagValue>,
        default_value: FlagValue,
    ) -> EvaluationEvent {
        let reason = if self.with_reasons || flag.track_reason {
            result.reason.clone()
        } else {
            None
        };

        EvaluationEvent {
            creation_date: Utc::now(),
            user: user.clone(),
            key: flag_key.to_owned(),
            version: Some(flag.event_version()),
            variation: result.variation_index,
            value: result.value.clone(),
            default: default_value,
            reason,
            track_events: flag.track_events || flag.track_reason,
            debug_events_until_date: flag.debug_events_until_date,
        }
    }

    /// Event for a known flag whose value could not be used; the caller's default was returned.
    pub fn new_default_value_evaluation_event(
        &self,
        flag_key: &str,
        flag: &FeatureFlag,
        user: &User,
        default_value: FlagValue,
        error_kind: ErrorKind,
    ) -> EvaluationEvent {
        EvaluationEvent {
            creation_date: Utc::now(),
            user: user.clone(),
            key: flag_key.to_owned(),
            version: Some(flag.event_version()),
            variation: None,
            value: default_value.clone(),
            default: default_value,
            reason: self.error_reason(error_kind),
            track_events: flag.track_events,
            debug_events_until_date: flag.debug_events_until_date,
        }
    }

    /// Event for a flag key that is not known at all.
    pub fn new_unknown_flag_evaluation_event(
        &self,
        flag_key: &str,
        user: &User,
        default_value: FlagValue,
        error_kind: ErrorKind,
    ) -> EvaluationEvent {
        EvaluationEvent {
            creation_date: Utc::now(),
            user: user.clone(),
            key: flag_key.to_owned(),
            version: None,
            variation: None,
            value: default_value.clone(),
            default: default_value,
            reason: self.error_reason(error_kind),
            track_events: false,
            debug_events_until_date: None,
        }
    }

    fn error_reason(&self, error_kind: ErrorKind) -> Option<Reason> {
        self.with_reasons.then_some(Reason::Error { error_kind })
    }
}

impl Default for EventFactory {
    fn default() -> Self {
        EventFactory::DEFAULT
    }
}
