//! Diesel model structs for the engine tables.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

/// Job kinds stored in `scheduled_jobs.kind`.
pub mod job_kinds {
    pub const DAILY: &str = "daily";
    pub const IMMEDIATE: &str = "immediate";
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::accounts)]
#[diesel(primary_key(account_name))]
pub struct AccountRow {
    pub account_name: String,
    pub pat_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::accounts)]
pub struct NewAccountRow {
    pub account_name: String,
    pub pat_token: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::plans)]
#[diesel(primary_key(plan_name))]
pub struct PlanRow {
    pub plan_name: String,
    pub enabled: bool,
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::plans)]
pub struct NewPlanRow {
    pub plan_name: String,
    pub enabled: bool,
    pub definition: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::scheduled_jobs)]
#[diesel(primary_key(job_id))]
pub struct JobRow {
    pub job_id: String,
    pub kind: String,
    pub plan_name: String,
    pub location: String,
    pub fire_hour: Option<i32>,
    pub fire_minute: Option<i32>,
    pub fire_second: Option<i32>,
    pub time_zone: Option<String>,
    pub jitter_sec: i32,
    pub misfire_grace_sec: i32,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::scheduled_jobs)]
pub struct NewJobRow {
    pub job_id: String,
    pub kind: String,
    pub plan_name: String,
    pub location: String,
    pub fire_hour: Option<i32>,
    pub fire_minute: Option<i32>,
    pub fire_second: Option<i32>,
    pub time_zone: Option<String>,
    pub jitter_sec: i32,
    pub misfire_grace_sec: i32,
    pub next_run_at: DateTime<Utc>,
}
