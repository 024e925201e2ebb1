use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use surrealdb::sql::{Thing, Value};

use crate::database::client::Db;
use crate::entities::user_auth::local_user_entity::{self, LocalUser};
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{
    get_entity_list, opt_value, IdentIdName, Pagination, QryBindingsVal,
};

#[derive(Display, EnumString, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdminActionType {
    TaskCreate,
    TaskApprove,
    TaskPause,
    TaskResume,
    TaskComplete,
    TaskDelete,
    SubmissionApprove,
    SubmissionReject,
    SubmissionBulkReview,
    AccountReactivation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Thing,
    pub admin: Thing,
    pub admin_email: String,
    pub action: AdminActionType,
    pub target: Thing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct AdminActionDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "admin_action";
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> AdminActionDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS admin ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE FIELD IF NOT EXISTS admin_email ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS action ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS target ON TABLE {TABLE_NAME} TYPE record;
    DEFINE INDEX IF NOT EXISTS target_idx ON TABLE {TABLE_NAME} COLUMNS target;
    DEFINE FIELD IF NOT EXISTS reason ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS details ON TABLE {TABLE_NAME} TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    /// Log row written inside the transaction of the action it records.
    pub fn get_log_qry(
        prefix: &str,
        admin: &LocalUser,
        action: AdminActionType,
        target: &Thing,
        reason: Option<String>,
        details: Option<String>,
    ) -> QryBindingsVal<Value> {
        let p = prefix;
        let qry = format!(
            "CREATE {TABLE_NAME} CONTENT {{
                admin: ${p}_admin,
                admin_email: ${p}_admin_email,
                action: ${p}_action,
                target: ${p}_target,
                reason: ${p}_reason,
                details: ${p}_details,
                created_at: $event_at,
            }};"
        );
        let mut bindings: HashMap<String, Value> = HashMap::new();
        bindings.insert(format!("{p}_admin"), Value::from(admin.id.clone()));
        bindings.insert(format!("{p}_admin_email"), Value::from(admin.email.clone()));
        bindings.insert(format!("{p}_action"), Value::from(action.to_string()));
        bindings.insert(format!("{p}_target"), Value::from(target.clone()));
        bindings.insert(format!("{p}_reason"), opt_value(reason));
        bindings.insert(format!("{p}_details"), opt_value(details));
        QryBindingsVal::new(qry, bindings)
    }

    pub async fn get_by_target(&self, target: &Thing) -> CtxResult<Vec<AdminAction>> {
        get_entity_list::<AdminAction>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::ColumnIdent {
                column: "target".to_string(),
                val: target.to_raw(),
                rec: true,
            },
            Some(Pagination {
                order_by: Some("created_at".to_string()),
                order_dir: None,
                count: 100,
                start: 0,
            }),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}
