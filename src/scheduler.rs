// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Sweep scheduling and job mutual exclusion.
//!
//! Sweeps run on a fixed interval, not in real time. Before scanning, a
//! worker must acquire the named job's lock; a crashed worker blocks
//! progress only until its lock expires, and every escrow operation a
//! sweep drives is idempotent, so a resumed sweep can safely re-process a
//! partially handled booking.

use crate::engine::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Named sweep jobs. Different names run independently and concurrently;
/// two workers never run the same name at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    AutoCheckIn,
    RoomFeeRelease,
    DepositRelease,
    DisputeEscalation,
    WithdrawalPoll,
}

impl JobName {
    pub const ALL: [JobName; 5] = [
        JobName::AutoCheckIn,
        JobName::RoomFeeRelease,
        JobName::DepositRelease,
        JobName::DisputeEscalation,
        JobName::WithdrawalPoll,
    ];
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobName::AutoCheckIn => "auto_check_in",
            JobName::RoomFeeRelease => "room_fee_release",
            JobName::DepositRelease => "deposit_release",
            JobName::DisputeEscalation => "dispute_escalation",
            JobName::WithdrawalPoll => "withdrawal_poll",
        };
        f.write_str(name)
    }
}

/// Mutual-exclusion record for one job name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLock {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// At most one unexpired lock per job name.
#[derive(Debug, Default)]
pub struct JobLockTable {
    locks: DashMap<JobName, JobLock>,
}

impl JobLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock. Returns `false` if another holder's
    /// unexpired lock is in place. An expired lock is replaced.
    pub fn acquire(
        &self,
        job: JobName,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.locks.entry(job) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return false;
                }
                // Expired: the previous worker crashed or stalled.
                entry.insert(JobLock {
                    holder: holder.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl,
                });
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(JobLock {
                    holder: holder.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl,
                });
                true
            }
        }
    }

    /// Releases the lock if this holder still owns it. A lock stolen
    /// after expiry is left alone.
    pub fn release(&self, job: JobName, holder: &str) {
        self.locks
            .remove_if(&job, |_, lock| lock.holder == holder);
    }

    /// The current lock for a job, expired or not.
    pub fn current(&self, job: JobName) -> Option<JobLock> {
        self.locks.get(&job).map(|lock| lock.clone())
    }
}

/// Counters for one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Bookings (or transfers) driven through their operation.
    pub processed: usize,
    /// Eligible items skipped: blocked by a dispute, awaiting ordering,
    /// or still pending at the provider.
    pub skipped: usize,
    /// Items whose provider call failed this cycle.
    pub failed: usize,
}

impl SweepReport {
    pub fn absorb(&mut self, other: SweepReport) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Result of asking a [`Sweeper`] to run a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another worker holds the job lock; this cycle is skipped.
    LockHeld,
    Completed(SweepReport),
}

/// One sweep worker. Multiple sweepers may share an engine; the job lock
/// table keeps them from processing the same job concurrently.
pub struct Sweeper {
    engine: Arc<Engine>,
    worker: String,
    lock_ttl: Duration,
}

impl Sweeper {
    pub fn new(engine: Arc<Engine>, worker: impl Into<String>, lock_ttl: Duration) -> Self {
        Self {
            engine,
            worker: worker.into(),
            lock_ttl,
        }
    }

    /// Runs one named job under its lock.
    pub fn run(&self, job: JobName) -> SweepOutcome {
        let now = self.engine.clock().now();
        if !self
            .engine
            .locks()
            .acquire(job, &self.worker, self.lock_ttl, now)
        {
            debug!(%job, worker = %self.worker, "job lock held, skipping cycle");
            return SweepOutcome::LockHeld;
        }

        let report = match job {
            JobName::AutoCheckIn => self.engine.sweep_auto_check_in(),
            JobName::RoomFeeRelease => self.engine.sweep_room_fee_releases(),
            JobName::DepositRelease => self.engine.sweep_deposit_releases(),
            JobName::DisputeEscalation => self.engine.sweep_dispute_escalations(),
            JobName::WithdrawalPoll => self.engine.sweep_withdrawals(),
        };

        self.engine.locks().release(job, &self.worker);
        if report.processed > 0 || report.failed > 0 {
            info!(%job, worker = %self.worker, ?report, "sweep cycle completed");
        }
        SweepOutcome::Completed(report)
    }

    /// Runs every job once, in dependency-friendly order.
    pub fn run_all(&self) -> SweepReport {
        let mut total = SweepReport::default();
        for job in JobName::ALL {
            if let SweepOutcome::Completed(report) = self.run(job) {
                total.absorb(report);
            }
        }
        total
    }
}
