//! Database models for recalculation requests.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Database model for observations
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::observations)]
pub struct ObservationDB {
    pub id: String,
    pub program_id: String,
    pub calibration_role: Option<String>,
}

/// A program-wide calibration recalculation request, one row per program and day.
#[derive(
    Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = crate::schema::calibration_recalculations)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecalculationDB {
    pub program_id: String,
    pub as_of: String,
    pub requested_by: String,
    pub requested_at: String,
    pub request_count: i32,
}

/// A calibration-target recalculation request, one row per observation.
#[derive(
    Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = crate::schema::calibration_target_recalculations)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationTargetRecalculationDB {
    pub program_id: String,
    pub observation_id: String,
    pub requested_by: String,
    pub requested_at: String,
    pub request_count: i32,
}
