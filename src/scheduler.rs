//! The persistent job scheduler.
//!
//! Jobs live in the `scheduled_jobs` table, so they survive restarts: a
//! daily job fires at a given local time in its own time zone until
//! removed, an immediate job fires once as soon as a worker sees it.
//! Scheduling under an existing job id replaces the previous definition;
//! removing a missing id is a no-op.
//!
//! Execution is deliberately restricted to a single worker thread. The
//! provider rate-limits requests, and serializing every refresh avoids two
//! in-flight rule replacements racing on provider-side rule-count limits.
//! The worker only advances a job's `next_run_at` after the run finishes,
//! so a crash mid-run re-fires the job on restart; refreshes are
//! idempotent, which makes the re-run safe. A job that missed its window
//! by more than its misfire grace is skipped (daily) or dropped
//! (immediate) with a warning.

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use core::fmt;
use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use log::{error, info, warn};
use rand::Rng;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::client::SmartThingsClient;
use crate::config::Config;
use crate::db::models::{job_kinds, JobRow, NewJobRow};
use crate::manager;
use crate::schema;

#[derive(Debug)]
pub enum ScheduleError {
    Database(String),
    /// A time zone name the tz database does not know
    TimeZone(String),
    /// A fire time that cannot be represented
    Time(String),
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::Database(e) => write!(f, "database error: {}", e),
            ScheduleError::TimeZone(zone) => write!(f, "invalid time zone: {:?}", zone),
            ScheduleError::Time(e) => write!(f, "invalid fire time: {}", e),
        }
    }
}

impl Error for ScheduleError {}

fn db_err(e: diesel::result::Error) -> ScheduleError {
    ScheduleError::Database(e.to_string())
}

/// Create or replace a daily job that runs at a local time in `time_zone`
/// forever, until removed.
pub fn schedule_daily_job(
    conn: &mut PgConnection,
    job_id: &str,
    plan_name: &str,
    location: &str,
    hour: u32,
    minute: u32,
    second: u32,
    time_zone: &str,
    jitter_sec: u32,
    misfire_grace_sec: u32,
) -> Result<(), ScheduleError> {
    let tz: Tz = time_zone
        .parse()
        .map_err(|_| ScheduleError::TimeZone(time_zone.to_string()))?;
    let next = next_daily_fire(Utc::now(), hour, minute, second, tz)?;
    let next = with_jitter(next, jitter_sec);

    let new_row = NewJobRow {
        job_id: job_id.to_string(),
        kind: job_kinds::DAILY.to_string(),
        plan_name: plan_name.to_string(),
        location: location.to_string(),
        fire_hour: Some(hour as i32),
        fire_minute: Some(minute as i32),
        fire_second: Some(second as i32),
        time_zone: Some(time_zone.to_string()),
        jitter_sec: jitter_sec as i32,
        misfire_grace_sec: misfire_grace_sec as i32,
        next_run_at: next,
    };

    use schema::scheduled_jobs::dsl as J;
    diesel::insert_into(J::scheduled_jobs)
        .values(&new_row)
        .on_conflict(J::job_id)
        .do_update()
        .set((
            J::kind.eq(new_row.kind.clone()),
            J::plan_name.eq(new_row.plan_name.clone()),
            J::location.eq(new_row.location.clone()),
            J::fire_hour.eq(new_row.fire_hour),
            J::fire_minute.eq(new_row.fire_minute),
            J::fire_second.eq(new_row.fire_second),
            J::time_zone.eq(new_row.time_zone.clone()),
            J::jitter_sec.eq(new_row.jitter_sec),
            J::misfire_grace_sec.eq(new_row.misfire_grace_sec),
            J::next_run_at.eq(new_row.next_run_at),
            J::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .map_err(db_err)?;
    info!("Scheduled daily job {} (next run {})", job_id, next);
    Ok(())
}

/// Create or replace a one-shot job that runs as soon as the worker sees it.
pub fn schedule_immediate_job(
    conn: &mut PgConnection,
    job_id: &str,
    plan_name: &str,
    location: &str,
    misfire_grace_sec: u32,
) -> Result<(), ScheduleError> {
    let new_row = NewJobRow {
        job_id: job_id.to_string(),
        kind: job_kinds::IMMEDIATE.to_string(),
        plan_name: plan_name.to_string(),
        location: location.to_string(),
        fire_hour: None,
        fire_minute: None,
        fire_second: None,
        time_zone: None,
        jitter_sec: 0,
        misfire_grace_sec: misfire_grace_sec as i32,
        next_run_at: Utc::now(),
    };

    use schema::scheduled_jobs::dsl as J;
    diesel::insert_into(J::scheduled_jobs)
        .values(&new_row)
        .on_conflict(J::job_id)
        .do_update()
        .set((J::next_run_at.eq(new_row.next_run_at), J::updated_at.eq(Utc::now())))
        .execute(conn)
        .map_err(db_err)?;
    info!("Scheduled immediate job {}", job_id);
    Ok(())
}

/// Remove a job; removing a job that does not exist is not an error.
pub fn unschedule_job(conn: &mut PgConnection, job_id: &str) -> Result<(), ScheduleError> {
    use schema::scheduled_jobs::dsl as J;
    let deleted = diesel::delete(J::scheduled_jobs.filter(J::job_id.eq(job_id)))
        .execute(conn)
        .map_err(db_err)?;
    if deleted > 0 {
        info!("Unscheduled job {}", job_id);
    }
    Ok(())
}

/// The first instant strictly after `after` when the local wall clock in
/// `tz` reads `hour:minute:second`.
///
/// A local time that does not exist (spring-forward gap) skips ahead to
/// the next day on which it does; an ambiguous local time (fall-back)
/// resolves to the earlier instant.
fn next_daily_fire(
    after: DateTime<Utc>,
    hour: u32,
    minute: u32,
    second: u32,
    tz: Tz,
) -> Result<DateTime<Utc>, ScheduleError> {
    let mut date = after.with_timezone(&tz).date_naive();
    for _ in 0..4 {
        let naive = date
            .and_hms_opt(hour, minute, second)
            .ok_or_else(|| ScheduleError::Time(format!("{:02}:{:02}:{:02}", hour, minute, second)))?;
        let resolved = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => None,
        };
        if let Some(local) = resolved {
            let utc = local.with_timezone(&Utc);
            if utc > after {
                return Ok(utc);
            }
        }
        date = date
            .succ_opt()
            .ok_or_else(|| ScheduleError::Time("date overflow".to_string()))?;
    }
    Err(ScheduleError::Time(format!(
        "no occurrence of {:02}:{:02}:{:02} in {} within four days",
        hour, minute, second, tz
    )))
}

fn with_jitter(fire: DateTime<Utc>, jitter_sec: u32) -> DateTime<Utc> {
    if jitter_sec == 0 {
        return fire;
    }
    let jitter = rand::rng().random_range(0..=jitter_sec as i64);
    fire + chrono::Duration::seconds(jitter)
}

/// True when a job missed its window by more than its misfire grace.
fn misfired(now: DateTime<Utc>, scheduled: DateTime<Utc>, grace_sec: i32) -> bool {
    now - scheduled > chrono::Duration::seconds(grace_sec as i64)
}

/// The scheduler handle. Owns the single worker thread; callers keep the
/// handle and shut it down explicitly.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// Start the worker thread. The worker opens its own store connection;
    /// callers keep using theirs concurrently.
    pub fn start(config: Config) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || run_worker(config, worker_shutdown));
        info!("Scheduler started");
        Scheduler {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the worker after it finishes the job it is currently running.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("Scheduler shut down");
    }

    /// Block until the worker exits.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(config: Config, shutdown: Arc<AtomicBool>) {
    let mut conn = match PgConnection::establish(&config.database_url) {
        Ok(conn) => conn,
        Err(e) => {
            error!("Scheduler worker could not connect to database: {}", e);
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = run_due_jobs(&mut conn, &config, &shutdown) {
            error!("Scheduler pass failed: {}", e);
        }
        sleep_responsive(config.scheduler_poll_interval, &shutdown);
    }
}

/// Sleep in short steps so shutdown stays responsive.
fn sleep_responsive(total: Duration, shutdown: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(Duration::from_millis(250));
        thread::sleep(step);
        remaining -= step;
    }
}

fn run_due_jobs(
    conn: &mut PgConnection,
    config: &Config,
    shutdown: &AtomicBool,
) -> Result<(), ScheduleError> {
    use schema::scheduled_jobs::dsl as J;
    let due: Vec<JobRow> = J::scheduled_jobs
        .filter(J::next_run_at.le(Utc::now()))
        .order(J::next_run_at.asc())
        .load(conn)
        .map_err(db_err)?;

    for job in due {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        execute_job(conn, config, &job);
        finalize_job(conn, &job)?;
    }
    Ok(())
}

fn execute_job(conn: &mut PgConnection, config: &Config, job: &JobRow) {
    let now = Utc::now();
    if misfired(now, job.next_run_at, job.misfire_grace_sec) {
        warn!(
            "Job {} missed its window (scheduled {}, now {}); skipping this run",
            job.job_id, job.next_run_at, now
        );
        return;
    }
    info!("Executing job {}", job.job_id);
    manager::refresh_plan(
        conn,
        |pat_token| SmartThingsClient::new(config, pat_token),
        &job.plan_name,
        &job.location,
    );
}

/// Advance a daily job to its next occurrence; drop a one-shot job.
fn finalize_job(conn: &mut PgConnection, job: &JobRow) -> Result<(), ScheduleError> {
    use schema::scheduled_jobs::dsl as J;
    if job.kind == job_kinds::DAILY {
        let next = next_fire_for_row(job);
        match next {
            Ok(next) => {
                diesel::update(J::scheduled_jobs.filter(J::job_id.eq(&job.job_id)))
                    .set((J::next_run_at.eq(next), J::updated_at.eq(Utc::now())))
                    .execute(conn)
                    .map_err(db_err)?;
            }
            Err(e) => {
                // A daily row this malformed cannot fire again; drop it
                // rather than spinning on it every poll.
                error!("Job {} cannot be rescheduled ({}); removing it", job.job_id, e);
                diesel::delete(J::scheduled_jobs.filter(J::job_id.eq(&job.job_id)))
                    .execute(conn)
                    .map_err(db_err)?;
            }
        }
    } else {
        diesel::delete(J::scheduled_jobs.filter(J::job_id.eq(&job.job_id)))
            .execute(conn)
            .map_err(db_err)?;
    }
    Ok(())
}

fn next_fire_for_row(job: &JobRow) -> Result<DateTime<Utc>, ScheduleError> {
    let (hour, minute, second) = match (job.fire_hour, job.fire_minute, job.fire_second) {
        (Some(h), Some(m), Some(s)) => (h as u32, m as u32, s as u32),
        _ => return Err(ScheduleError::Time("daily job without a fire time".to_string())),
    };
    let zone = job
        .time_zone
        .as_deref()
        .ok_or_else(|| ScheduleError::TimeZone("<missing>".to_string()))?;
    let tz: Tz = zone
        .parse()
        .map_err(|_| ScheduleError::TimeZone(zone.to_string()))?;
    let next = next_daily_fire(Utc::now(), hour, minute, second, tz)?;
    Ok(with_jitter(next, job.jitter_sec.max(0) as u32))
}
