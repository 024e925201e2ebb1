use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::task_entity::Task;
use crate::database::client::Db;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, IdentIdName};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedTask {
    pub id: Thing,
    pub task: Task,
    pub deleted_by: String,
    pub delete_reason: String,
    pub removed_assignments: i64,
    pub removed_submissions: i64,
    pub archived_at: DateTime<Utc>,
}

pub struct ArchivedTaskDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "archived_task";

impl<'a> ArchivedTaskDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS task ON TABLE {TABLE_NAME} FLEXIBLE TYPE object;
    DEFINE FIELD IF NOT EXISTS deleted_by ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS delete_reason ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS removed_assignments ON TABLE {TABLE_NAME} TYPE int;
    DEFINE FIELD IF NOT EXISTS removed_submissions ON TABLE {TABLE_NAME} TYPE int;
    DEFINE FIELD IF NOT EXISTS archived_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    /// Archive records share the key of the deleted task.
    pub fn get_archive_id(task_id: &Thing) -> Thing {
        Thing::from((TABLE_NAME.to_string(), task_id.id.clone()))
    }

    pub async fn get(&self, task_id: &Thing) -> CtxResult<Option<ArchivedTask>> {
        get_entity::<ArchivedTask>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(Self::get_archive_id(task_id)),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}
