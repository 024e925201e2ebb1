use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::Thing;

use super::task_entity;
use crate::database::client::Db;
use crate::entities::user_auth::local_user_entity;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, get_entity_list, with_not_found_err, IdentIdName};

/// `active` after claim, `pending` while a submission awaits review.
#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Active,
    Completed,
    Rejected,
}

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentReceivedStatus {
    Pending,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: Thing,
    pub task: Thing,
    pub user: Thing,
    pub user_email: String,
    pub status: AssignmentStatus,
    pub payment_received_status: PaymentReceivedStatus,
    pub payment: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct TaskAssignmentDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "task_assignment";
const TASK_TABLE: &str = task_entity::TABLE_NAME;
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> TaskAssignmentDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let statuses = AssignmentStatus::iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let payment_statuses = PaymentReceivedStatus::iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS task ON TABLE {TABLE_NAME} TYPE record<{TASK_TABLE}>;
    DEFINE FIELD IF NOT EXISTS user ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE INDEX IF NOT EXISTS task_user_idx ON TABLE {TABLE_NAME} COLUMNS task, user UNIQUE;
    DEFINE INDEX IF NOT EXISTS user_idx ON TABLE {TABLE_NAME} COLUMNS user;
    DEFINE FIELD IF NOT EXISTS user_email ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS status ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{statuses}];
    DEFINE FIELD IF NOT EXISTS payment_received_status ON TABLE {TABLE_NAME} TYPE string DEFAULT 'pending' ASSERT $value INSIDE [{payment_statuses}];
    DEFINE FIELD IF NOT EXISTS payment ON TABLE {TABLE_NAME} TYPE int ASSERT $value > 0;
    DEFINE FIELD IF NOT EXISTS paid_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now() VALUE $before OR time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    pub async fn get(&self, assignment_id: &Thing) -> CtxResult<TaskAssignment> {
        let opt = get_entity::<TaskAssignment>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(assignment_id.clone()),
        )
        .await
        .map_err(CtxError::from(self.ctx))?;
        with_not_found_err(opt, self.ctx, &assignment_id.to_raw())
    }

    pub async fn get_by_task_user(
        &self,
        task: &Thing,
        user: &Thing,
    ) -> CtxResult<Option<TaskAssignment>> {
        get_entity::<TaskAssignment>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::ColumnIdentAnd(vec![
                IdentIdName::ColumnIdent {
                    column: "task".to_string(),
                    val: task.to_raw(),
                    rec: true,
                },
                IdentIdName::ColumnIdent {
                    column: "user".to_string(),
                    val: user.to_raw(),
                    rec: true,
                },
            ]),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }

    /// Assignments of `task` in one of `statuses`.
    pub async fn count_with_status(
        &self,
        task: &Thing,
        statuses: &[AssignmentStatus],
    ) -> CtxResult<i64> {
        let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut res = self
            .db
            .query(format!(
                "SELECT count() AS count FROM {TABLE_NAME} WHERE task = $task AND status INSIDE $statuses GROUP ALL;"
            ))
            .bind(("task", task.clone()))
            .bind(("statuses", statuses))
            .await
            .map_err(CtxError::from(self.ctx))?;
        let count: Option<i64> = res
            .take((0, "count"))
            .map_err(CtxError::from(self.ctx))?;
        Ok(count.unwrap_or(0))
    }

    pub async fn get_by_task(&self, task: &Thing) -> CtxResult<Vec<TaskAssignment>> {
        get_entity_list::<TaskAssignment>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::ColumnIdent {
                column: "task".to_string(),
                val: task.to_raw(),
                rec: true,
            },
            None,
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}
