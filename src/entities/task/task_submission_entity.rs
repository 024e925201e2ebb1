use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::Thing;

use super::{task_assignment_entity, task_entity};
use crate::database::client::Db;
use crate::entities::user_auth::local_user_entity;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{
    get_entity, get_entity_list, with_not_found_err, IdentIdName, Pagination,
};

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub id: Thing,
    pub task: Thing,
    pub user: Thing,
    pub user_email: String,
    pub assignment: Thing,
    pub status: SubmissionStatus,
    pub proof_data: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_feedback: Option<String>,
}

pub struct TaskSubmissionDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "task_submission";
const TASK_TABLE: &str = task_entity::TABLE_NAME;
const ASSIGNMENT_TABLE: &str = task_assignment_entity::TABLE_NAME;
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> TaskSubmissionDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let statuses = SubmissionStatus::iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS task ON TABLE {TABLE_NAME} TYPE record<{TASK_TABLE}>;
    DEFINE INDEX IF NOT EXISTS task_idx ON TABLE {TABLE_NAME} COLUMNS task;
    DEFINE FIELD IF NOT EXISTS user ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE FIELD IF NOT EXISTS user_email ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS assignment ON TABLE {TABLE_NAME} TYPE record<{ASSIGNMENT_TABLE}>;
    DEFINE FIELD IF NOT EXISTS status ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{statuses}];
    DEFINE FIELD IF NOT EXISTS proof_data ON TABLE {TABLE_NAME} TYPE string ASSERT string::len(string::trim($value)) > 0;
    DEFINE FIELD IF NOT EXISTS submitted_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now() VALUE $before OR time::now();
    DEFINE FIELD IF NOT EXISTS reviewed_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS reviewed_by ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS review_feedback ON TABLE {TABLE_NAME} TYPE option<string>;
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    pub async fn get(&self, submission_id: &Thing) -> CtxResult<TaskSubmission> {
        let opt = self.find(submission_id).await?;
        with_not_found_err(opt, self.ctx, &submission_id.to_raw())
    }

    pub async fn find(&self, submission_id: &Thing) -> CtxResult<Option<TaskSubmission>> {
        get_entity::<TaskSubmission>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(submission_id.clone()),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }

    pub async fn get_by_task(
        &self,
        task: &Thing,
        status: Option<SubmissionStatus>,
        pagination: Option<Pagination>,
    ) -> CtxResult<Vec<TaskSubmission>> {
        let task_ident = IdentIdName::ColumnIdent {
            column: "task".to_string(),
            val: task.to_raw(),
            rec: true,
        };
        let ident = match status {
            None => task_ident,
            Some(status) => IdentIdName::ColumnIdentAnd(vec![
                task_ident,
                IdentIdName::ColumnIdent {
                    column: "status".to_string(),
                    val: status.to_string(),
                    rec: false,
                },
            ]),
        };
        get_entity_list::<TaskSubmission>(self.db, TABLE_NAME.to_string(), &ident, pagination)
            .await
            .map_err(CtxError::from(self.ctx))
    }
}
