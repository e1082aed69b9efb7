//! Assignment expiry sweep.
//!
//! A single background task wakes once a day at a configured wall-clock
//! time, snapshots every assignment past its expiry, unlinks each one, and
//! notifies the affected house, driver, and the operations console. Expiries
//! that become due while a sweep is running wait for the next cycle.

use crate::fleet::FleetStore;
use crate::proximity::ProximityDetector;
use crate::pubsub::protocol::{DriverUnassigned, Event, IrregularityAlert, IrregularityKind};
use crate::pubsub::{Topic, TopicRouter};
use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ExpirySweeper {
    fleet: Arc<FleetStore>,
    router: Arc<TopicRouter>,
    proximity: Arc<ProximityDetector>,
    /// Wall-clock time of the daily run.
    run_at: NaiveTime,
    /// Reentrancy guard: a sweep never overlaps itself.
    running: AtomicBool,
}

impl ExpirySweeper {
    pub fn new(
        fleet: Arc<FleetStore>,
        router: Arc<TopicRouter>,
        proximity: Arc<ProximityDetector>,
        run_at: NaiveTime,
    ) -> Self {
        Self {
            fleet,
            router,
            proximity,
            run_at,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep over assignments expired at `now`.
    ///
    /// Returns the number of assignments cleared, or `None` when a sweep is
    /// already in progress (the trigger is skipped, never queued).
    pub fn try_sweep(&self, now: DateTime<Utc>) -> Option<usize> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Sweep already in progress, skipping trigger");
            return None;
        }

        let cleared = self.sweep(now);
        self.running.store(false, Ordering::SeqCst);
        Some(cleared)
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        // Snapshot at sweep start: rows becoming due mid-sweep are picked up
        // next cycle, not retroactively.
        let expired = self.fleet.expired_assignments(now);
        if expired.is_empty() {
            debug!("No expired assignments");
            return 0;
        }

        info!(count = expired.len(), "Found expired driver assignments");
        let mut cleared_count = 0;

        for house in expired {
            let Some(cleared) = self.fleet.clear_assignment(&house.id) else {
                // Raced with an explicit unassign; nothing left to do here.
                debug!(house_id = %house.id, "Assignment already cleared, skipping");
                continue;
            };
            cleared_count += 1;

            self.proximity.clear_pair(&cleared.driver_id, &house.id);

            let unassigned = DriverUnassigned {
                house_id: house.id.clone(),
                driver_id: cleared.driver_id.clone(),
            };
            self.router.publish(
                &Topic::house(&house.id),
                Event::DriverUnassigned(unassigned.clone()),
            );
            self.router.publish(
                &Topic::driver(&cleared.driver_id),
                Event::DriverUnassigned(unassigned),
            );
            self.router.publish(
                &Topic::Ops,
                Event::IrregularityAlert(IrregularityAlert {
                    kind: IrregularityKind::AssignmentExpired,
                    message: format!(
                        "assignment of driver {} to house {} expired and needs re-assignment",
                        cleared.driver_id, house.house_no
                    ),
                    driver_id: Some(cleared.driver_id),
                    house_id: Some(house.id),
                    timestamp: now,
                }),
            );
        }

        info!(cleared = cleared_count, "Expired assignments processed");
        cleared_count
    }

    /// Background loop: sleep until the next scheduled occurrence, sweep,
    /// repeat. Runs until the task is cancelled at shutdown.
    pub async fn run_loop(self: Arc<Self>) {
        info!(run_at = %self.run_at, "Starting assignment expiry sweeper");
        loop {
            let now = Local::now();
            let next = next_occurrence(now, self.run_at);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(0));
            debug!(next = %next, "Sweeper sleeping until next run");
            tokio::time::sleep(wait).await;

            self.try_sweep(Utc::now());
        }
    }

    #[cfg(test)]
    fn force_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }
}

/// The first instant strictly after `now` whose wall-clock time is `run_at`.
fn next_occurrence(now: DateTime<Local>, run_at: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive().and_time(run_at);
    let candidate = today
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or_else(|| now + Duration::hours(1));
    if candidate > now {
        candidate
    } else {
        (today + Duration::days(1))
            .and_local_timezone(Local)
            .earliest()
            .unwrap_or_else(|| now + Duration::hours(25))
    }
}
