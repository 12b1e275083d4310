use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use log::debug;

use calwatch_core::calibrations::RecalculationService;
use calwatch_core::errors::{Error, Result};
use calwatch_core::events::{ObservationId, ProgramId};
use calwatch_core::session::{acting_identity, Session};
use calwatch_core::utils::Clock;

use super::model::{CalibrationRecalculationDB, CalibrationTargetRecalculationDB, ObservationDB};
use crate::errors::IntoCore;
use crate::schema::{calibration_recalculations, calibration_target_recalculations, observations};
use crate::session::SqliteSession;

/// Records recalculation requests in SQLite.
///
/// Every request is stamped with the acting service identity. Repeated
/// requests for the same key collapse onto one row and bump `request_count`.
pub struct SqliteRecalculationLedger {
    clock: Arc<dyn Clock>,
}

impl SqliteRecalculationLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        SqliteRecalculationLedger { clock }
    }

    /// Inserts or replaces an observation row.
    pub fn upsert_observation(
        &self,
        session: &mut dyn Session,
        observation: &ObservationDB,
    ) -> Result<()> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::insert_into(observations::table)
            .values(observation)
            .on_conflict(observations::id)
            .do_update()
            .set(observation)
            .execute(conn)
            .into_core()?;
        Ok(())
    }

    pub fn load_calibration_requests(
        &self,
        session: &mut dyn Session,
    ) -> Result<Vec<CalibrationRecalculationDB>> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        calibration_recalculations::table
            .order((
                calibration_recalculations::program_id.asc(),
                calibration_recalculations::as_of.asc(),
            ))
            .select(CalibrationRecalculationDB::as_select())
            .load(conn)
            .into_core()
    }

    pub fn load_target_requests(
        &self,
        session: &mut dyn Session,
    ) -> Result<Vec<CalibrationTargetRecalculationDB>> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        calibration_target_recalculations::table
            .order((
                calibration_target_recalculations::program_id.asc(),
                calibration_target_recalculations::observation_id.asc(),
            ))
            .select(CalibrationTargetRecalculationDB::as_select())
            .load(conn)
            .into_core()
    }

    fn requester(&self) -> Result<String> {
        acting_identity()
            .map(|identity| identity.as_str().to_string())
            .ok_or_else(|| {
                Error::Unauthorized(
                    "recalculation requested outside a privileged context".to_string(),
                )
            })
    }

    fn now(&self) -> String {
        format_instant(self.clock.now())
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl RecalculationService for SqliteRecalculationLedger {
    async fn is_calibration(
        &self,
        session: &mut dyn Session,
        observation_id: &ObservationId,
    ) -> Result<bool> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        let role = observations::table
            .find(observation_id.as_str())
            .select(observations::calibration_role)
            .first::<Option<String>>(conn)
            .optional()
            .into_core()?;

        match role {
            Some(role) => Ok(role.is_some()),
            None => {
                debug!(
                    "Observation {} is not registered; treating it as science",
                    observation_id
                );
                Ok(false)
            }
        }
    }

    async fn recalculate_calibrations(
        &self,
        session: &mut dyn Session,
        program_id: &ProgramId,
        as_of: DateTime<Utc>,
    ) -> Result<()> {
        let row = CalibrationRecalculationDB {
            program_id: program_id.to_string(),
            as_of: format_instant(as_of),
            requested_by: self.requester()?,
            requested_at: self.now(),
            request_count: 1,
        };

        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::insert_into(calibration_recalculations::table)
            .values(&row)
            .on_conflict((
                calibration_recalculations::program_id,
                calibration_recalculations::as_of,
            ))
            .do_update()
            .set((
                calibration_recalculations::requested_by
                    .eq(excluded(calibration_recalculations::requested_by)),
                calibration_recalculations::requested_at
                    .eq(excluded(calibration_recalculations::requested_at)),
                calibration_recalculations::request_count
                    .eq(calibration_recalculations::request_count + 1),
            ))
            .execute(conn)
            .into_core()?;

        debug!(
            "Calibration recalculation requested for program {} as of {}",
            row.program_id, row.as_of
        );
        Ok(())
    }

    async fn recalculate_calibration_target(
        &self,
        session: &mut dyn Session,
        program_id: &ProgramId,
        observation_id: &ObservationId,
    ) -> Result<()> {
        let row = CalibrationTargetRecalculationDB {
            program_id: program_id.to_string(),
            observation_id: observation_id.to_string(),
            requested_by: self.requester()?,
            requested_at: self.now(),
            request_count: 1,
        };

        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::insert_into(calibration_target_recalculations::table)
            .values(&row)
            .on_conflict((
                calibration_target_recalculations::program_id,
                calibration_target_recalculations::observation_id,
            ))
            .do_update()
            .set((
                calibration_target_recalculations::requested_by
                    .eq(excluded(calibration_target_recalculations::requested_by)),
                calibration_target_recalculations::requested_at
                    .eq(excluded(calibration_target_recalculations::requested_at)),
                calibration_target_recalculations::request_count
                    .eq(calibration_target_recalculations::request_count + 1),
            ))
            .execute(conn)
            .into_core()?;

        debug!(
            "Calibration target recalculation requested for observation {} in program {}",
            row.observation_id, row.program_id
        );
        Ok(())
    }
}
