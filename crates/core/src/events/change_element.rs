//! Change-notification element types.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Observation identifier. Opaque; carries no ordering.
    ObservationId
);
string_id!(
    /// Program identifier. Opaque; carries no ordering.
    ProgramId
);
string_id!(UserId);

/// Kind of mutation that produced a change element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditType {
    Created,
    Updated,
    Deleted,
}

impl EditType {
    pub const ALL: [EditType; 3] = [EditType::Created, EditType::Updated, EditType::Deleted];
}

/// Lifecycle of the computed artifact attached to an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationState {
    Pending,
    Calculating,
    Retry,
    Ready,
}

impl CalculationState {
    pub const ALL: [CalculationState; 4] = [
        CalculationState::Pending,
        CalculationState::Calculating,
        CalculationState::Retry,
        CalculationState::Ready,
    ];
}

/// An observation's calculation state changed.
///
/// `None` in `old_state`/`new_state` means the artifact did not exist
/// before/after the mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationChange {
    pub observation_id: ObservationId,
    pub program_id: ProgramId,
    pub edit_type: EditType,
    #[serde(default)]
    pub old_state: Option<CalculationState>,
    #[serde(default)]
    pub new_state: Option<CalculationState>,
    /// Users whose action produced the change. Informational only.
    #[serde(default)]
    pub users: BTreeSet<UserId>,
}

impl ObservationChange {
    pub fn new(
        observation_id: impl Into<ObservationId>,
        program_id: impl Into<ProgramId>,
        edit_type: EditType,
        old_state: Option<CalculationState>,
        new_state: Option<CalculationState>,
    ) -> Self {
        Self {
            observation_id: observation_id.into(),
            program_id: program_id.into(),
            edit_type,
            old_state,
            new_state,
            users: BTreeSet::new(),
        }
    }

    pub fn with_users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.users = users.into_iter().collect();
        self
    }
}

/// An observation's calibration time changed; its calibration target must be
/// recomputed. No guard applies to these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationTimeChange {
    pub program_id: ProgramId,
    pub observation_id: ObservationId,
}

impl CalibrationTimeChange {
    pub fn new(program_id: impl Into<ProgramId>, observation_id: impl Into<ObservationId>) -> Self {
        Self {
            program_id: program_id.into(),
            observation_id: observation_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_change_wire_format() {
        let json = r#"{
            "observationId": "o-1",
            "programId": "p-1",
            "editType": "UPDATED",
            "oldState": "CALCULATING",
            "newState": "READY",
            "users": ["u-2", "u-1"]
        }"#;

        let change: ObservationChange = serde_json::from_str(json).unwrap();
        assert_eq!(change.observation_id, ObservationId::from("o-1"));
        assert_eq!(change.program_id, ProgramId::from("p-1"));
        assert_eq!(change.edit_type, EditType::Updated);
        assert_eq!(change.old_state, Some(CalculationState::Calculating));
        assert_eq!(change.new_state, Some(CalculationState::Ready));
        assert_eq!(
            change.users.iter().map(UserId::as_str).collect::<Vec<_>>(),
            vec!["u-1", "u-2"]
        );
    }

    #[test]
    fn test_observation_change_missing_states_are_none() {
        let json = r#"{"observationId":"o-1","programId":"p-1","editType":"DELETED"}"#;
        let change: ObservationChange = serde_json::from_str(json).unwrap();
        assert_eq!(change.old_state, None);
        assert_eq!(change.new_state, None);
        assert!(change.users.is_empty());
    }

    #[test]
    fn test_calibration_time_change_wire_format() {
        let change: CalibrationTimeChange =
            serde_json::from_str(r#"{"programId":"p-9","observationId":"o-3"}"#).unwrap();
        assert_eq!(change, CalibrationTimeChange::new("p-9", "o-3"));
    }
}
