use crate::analytics::{self, *};
use crate::identity::Caller;

use super::{Engine, EngineError};

impl Engine {
    /// Copy every vehicle state (one read lock at a time) and the user
    /// catalog. Reports run on the copy without holding any lock.
    pub async fn snapshot(&self) -> FleetSnapshot {
        let mut vehicles = Vec::with_capacity(self.store().vehicle_count());
        for shared in self.store().all_vehicles() {
            vehicles.push(shared.read().await.clone());
        }
        FleetSnapshot {
            vehicles,
            users: self.store().users(),
        }
    }

    fn default_range(&self) -> DateRange {
        DateRange::trailing_days(self.now().date_naive(), TRAILING_DAYS)
    }

    pub async fn dashboard(&self, caller: &Caller) -> Result<DashboardSummary, EngineError> {
        caller.ensure_admin()?;
        Ok(analytics::dashboard(&self.snapshot().await, self.now()))
    }

    /// Utilization over `range`, or the trailing 30 days.
    pub async fn vehicle_utilization(
        &self,
        caller: &Caller,
        range: Option<DateRange>,
    ) -> Result<Vec<UtilizationRow>, EngineError> {
        caller.ensure_admin()?;
        let range = range.unwrap_or_else(|| self.default_range());
        Ok(analytics::vehicle_utilization(&self.snapshot().await, &range))
    }

    pub async fn cost_analysis(
        &self,
        caller: &Caller,
        range: Option<DateRange>,
    ) -> Result<CostReport, EngineError> {
        caller.ensure_admin()?;
        let range = range.unwrap_or_else(|| self.default_range());
        Ok(analytics::cost_analysis(&self.snapshot().await, &range))
    }

    pub async fn reservation_statistics(
        &self,
        caller: &Caller,
        range: Option<DateRange>,
    ) -> Result<ReservationStatistics, EngineError> {
        caller.ensure_admin()?;
        let today = self.now().date_naive();
        Ok(analytics::reservation_statistics(
            &self.snapshot().await,
            range.as_ref(),
            today,
        ))
    }
}
