use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::Thing;

use crate::database::client::Db;
use crate::entities::user_auth::local_user_entity;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, AppResult, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, get_entity_list, with_not_found_err, IdentIdName};

/// Markup charged to advertisers on top of the user reward, as `numerator / denominator`.
pub const ADVERTISER_MARKUP: (i64, i64) = (6, 5);

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Approved,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
    Social,
    Survey,
    AppInstall,
    Review,
    Video,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: Thing,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub r#type: TaskType,
    pub rate_to_user: i64,
    pub advertiser_cost: i64,
    pub limit_count: i64,
    pub status: TaskStatus,
    pub payment_done: bool,
    pub owner: Thing,
    pub owner_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_updated: Option<DateTime<Utc>>,
}

impl Task {
    pub fn total_budget(&self) -> i64 {
        self.advertiser_cost * self.limit_count
    }

    /// Budget left after paying `completed` assignments their reward.
    pub fn remaining_budget(&self, completed: i64) -> i64 {
        self.total_budget() - self.rate_to_user * completed
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Approved | TaskStatus::Paused)
    }
}

pub fn compute_advertiser_cost(rate_to_user: i64) -> AppResult<i64> {
    let (num, den) = ADVERTISER_MARKUP;
    if rate_to_user <= 0 || rate_to_user % den != 0 {
        return Err(AppError::ValidationError {
            description: format!("rate_to_user must be a positive multiple of {den}"),
        });
    }
    Ok(rate_to_user / den * num)
}

#[derive(Debug, Serialize)]
pub struct TaskCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub r#type: TaskType,
    pub rate_to_user: i64,
    pub advertiser_cost: i64,
    pub limit_count: i64,
    pub status: TaskStatus,
    pub payment_done: bool,
    pub owner: Thing,
    pub owner_email: String,
}

pub struct TaskDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "task";
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> TaskDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let statuses = TaskStatus::iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let types = TaskType::iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(",");
        let (num, den) = ADVERTISER_MARKUP;
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS title ON TABLE {TABLE_NAME} TYPE string ASSERT string::len(string::trim($value)) >= 3;
    DEFINE FIELD IF NOT EXISTS description ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS type ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{types}];
    DEFINE FIELD IF NOT EXISTS rate_to_user ON TABLE {TABLE_NAME} TYPE int ASSERT $value > 0;
    DEFINE FIELD IF NOT EXISTS advertiser_cost ON TABLE {TABLE_NAME} TYPE int ASSERT $value = rate_to_user / {den} * {num};
    DEFINE FIELD IF NOT EXISTS limit_count ON TABLE {TABLE_NAME} TYPE int ASSERT $value >= 1;
    DEFINE FIELD IF NOT EXISTS status ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{statuses}];
    DEFINE INDEX IF NOT EXISTS status_idx ON TABLE {TABLE_NAME} COLUMNS status;
    DEFINE FIELD IF NOT EXISTS payment_done ON TABLE {TABLE_NAME} TYPE bool DEFAULT false;
    DEFINE FIELD IF NOT EXISTS owner ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE INDEX IF NOT EXISTS owner_idx ON TABLE {TABLE_NAME} COLUMNS owner;
    DEFINE FIELD IF NOT EXISTS owner_email ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS approved_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS approved_by ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS approval_note ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS paused_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS completed_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS completed_by ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS completion_reason ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS force_completed ON TABLE {TABLE_NAME} TYPE option<bool>;
    DEFINE FIELD IF NOT EXISTS refunded_amount ON TABLE {TABLE_NAME} TYPE option<int>;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now() VALUE $before OR time::now();
    DEFINE FIELD IF NOT EXISTS r_updated ON TABLE {TABLE_NAME} TYPE option<datetime> DEFAULT time::now() VALUE time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    pub async fn get(&self, task_id: &Thing) -> CtxResult<Task> {
        let opt = get_entity::<Task>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(task_id.clone()),
        )
        .await
        .map_err(CtxError::from(self.ctx))?;
        with_not_found_err(opt, self.ctx, &task_id.to_raw())
    }

    pub async fn get_by_owner(&self, owner: &Thing) -> CtxResult<Vec<Task>> {
        get_entity_list::<Task>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::ColumnIdent {
                column: "owner".to_string(),
                val: owner.to_raw(),
                rec: true,
            },
            None,
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertiser_cost_adds_twenty_percent() {
        assert_eq!(compute_advertiser_cost(100).unwrap(), 120);
        assert_eq!(compute_advertiser_cost(50).unwrap(), 60);
        assert_eq!(compute_advertiser_cost(5).unwrap(), 6);
    }

    #[test]
    fn advertiser_cost_rejects_inexact_rates() {
        assert!(compute_advertiser_cost(0).is_err());
        assert!(compute_advertiser_cost(-5).is_err());
        assert!(compute_advertiser_cost(7).is_err());
    }

    #[test]
    fn budget_is_cost_times_limit() {
        let task = Task {
            id: Thing::from((TABLE_NAME, "t")),
            title: "Follow us".to_string(),
            description: None,
            r#type: TaskType::Social,
            rate_to_user: 100,
            advertiser_cost: 120,
            limit_count: 10,
            status: TaskStatus::Pending,
            payment_done: false,
            owner: Thing::from((USER_TABLE, "o")),
            owner_email: "o@x.com".to_string(),
            approved_at: None,
            approved_by: None,
            approval_note: None,
            paused_at: None,
            completed_at: None,
            completed_by: None,
            completion_reason: None,
            force_completed: None,
            refunded_amount: None,
            created_at: Utc::now(),
            r_updated: None,
        };
        assert_eq!(task.total_budget(), 1200);
        assert_eq!(task.remaining_budget(3), 900);
        assert!(!task.is_running());
    }
}
