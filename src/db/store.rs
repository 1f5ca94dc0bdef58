//! Store operations for accounts and plans.
//!
//! Absence is data here, not an error: the reconciliation engine branches
//! on a missing account or plan, so the retrieval functions return
//! `Option` rather than failing. The `PlanStore` trait covers the reads
//! the engine performs; it is implemented for `PgConnection` and for
//! in-memory fakes in tests.

use chrono::Utc;
use core::fmt;
use diesel::prelude::*;
use diesel::PgConnection;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::db::models::{AccountRow, NewAccountRow, NewPlanRow, PlanRow};
use crate::models::plan::{Account, Plan};
use crate::schema;

/// There is at most one account system-wide, stored under this key.
pub const ONLY_ACCOUNT: &str = "default";

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    /// A stored plan definition that no longer deserializes
    Definition(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Definition(e) => write!(f, "bad plan definition: {}", e),
        }
    }
}

impl Error for StoreError {}

fn db_err(e: diesel::result::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// The plan/account reads the reconciliation engine performs.
pub trait PlanStore {
    fn retrieve_account(&mut self) -> Result<Option<Account>, StoreError>;
    fn retrieve_plan(&mut self, plan_name: &str) -> Result<Option<Plan>, StoreError>;
    fn retrieve_plan_enabled(&mut self, plan_name: &str) -> Result<Option<bool>, StoreError>;
}

impl PlanStore for PgConnection {
    fn retrieve_account(&mut self) -> Result<Option<Account>, StoreError> {
        use schema::accounts::dsl as A;
        let row: Option<AccountRow> = A::accounts
            .filter(A::account_name.eq(ONLY_ACCOUNT))
            .first(self)
            .optional()
            .map_err(db_err)?;
        Ok(row.map(|row| Account {
            pat_token: row.pat_token,
        }))
    }

    fn retrieve_plan(&mut self, plan_name: &str) -> Result<Option<Plan>, StoreError> {
        use schema::plans::dsl as P;
        let row: Option<PlanRow> = P::plans
            .filter(P::plan_name.eq(plan_name))
            .first(self)
            .optional()
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let plan = serde_json::from_value(row.definition)
                    .map_err(|e| StoreError::Definition(e.to_string()))?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    fn retrieve_plan_enabled(&mut self, plan_name: &str) -> Result<Option<bool>, StoreError> {
        use schema::plans::dsl as P;
        P::plans
            .filter(P::plan_name.eq(plan_name))
            .select(P::enabled)
            .first(self)
            .optional()
            .map_err(db_err)
    }
}

/// Create or replace the single account.
pub fn create_or_replace_account(conn: &mut PgConnection, account: &Account) -> Result<(), StoreError> {
    use schema::accounts::dsl as A;
    let new_row = NewAccountRow {
        account_name: ONLY_ACCOUNT.to_string(),
        pat_token: account.pat_token.clone(),
    };
    diesel::insert_into(A::accounts)
        .values(&new_row)
        .on_conflict(A::account_name)
        .do_update()
        .set((A::pat_token.eq(new_row.pat_token.clone()), A::updated_at.eq(Utc::now())))
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}

/// Delete the account; removing a missing account is a no-op.
pub fn delete_account(conn: &mut PgConnection) -> Result<(), StoreError> {
    use schema::accounts::dsl as A;
    diesel::delete(A::accounts.filter(A::account_name.eq(ONLY_ACCOUNT)))
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}

/// Names of all stored plans.
pub fn retrieve_all_plans(conn: &mut PgConnection) -> Result<Vec<String>, StoreError> {
    use schema::plans::dsl as P;
    P::plans
        .select(P::plan_name)
        .order(P::plan_name.asc())
        .load(conn)
        .map_err(db_err)
}

/// Create a plan; new plans start disabled.
pub fn create_plan(conn: &mut PgConnection, plan: &Plan) -> Result<(), StoreError> {
    use schema::plans::dsl as P;
    let new_row = NewPlanRow {
        plan_name: plan.name.clone(),
        enabled: false,
        definition: serde_json::to_value(plan)
            .map_err(|e| StoreError::Definition(e.to_string()))?,
    };
    diesel::insert_into(P::plans)
        .values(&new_row)
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}

/// Replace an existing plan's definition, keeping its enabled flag.
pub fn update_plan(conn: &mut PgConnection, plan: &Plan) -> Result<(), StoreError> {
    use schema::plans::dsl as P;
    let definition =
        serde_json::to_value(plan).map_err(|e| StoreError::Definition(e.to_string()))?;
    diesel::update(P::plans.filter(P::plan_name.eq(&plan.name)))
        .set((P::definition.eq(definition), P::updated_at.eq(Utc::now())))
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}

pub fn delete_plan(conn: &mut PgConnection, plan_name: &str) -> Result<(), StoreError> {
    use schema::plans::dsl as P;
    diesel::delete(P::plans.filter(P::plan_name.eq(plan_name)))
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}

pub fn update_plan_enabled(
    conn: &mut PgConnection,
    plan_name: &str,
    enabled: bool,
) -> Result<(), StoreError> {
    use schema::plans::dsl as P;
    diesel::update(P::plans.filter(P::plan_name.eq(plan_name)))
        .set((P::enabled.eq(enabled), P::updated_at.eq(Utc::now())))
        .execute(conn)
        .map_err(db_err)?;
    Ok(())
}
