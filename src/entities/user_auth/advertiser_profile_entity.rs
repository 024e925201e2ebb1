use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::local_user_entity;
use crate::database::client::Db;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, IdentIdName};

/// Cached task counters of an advertiser, kept in step with task transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdvertiserProfile {
    pub id: Thing,
    pub user: Thing,
    pub total_tasks: i64,
    pub active_tasks: i64,
    pub completed_tasks: i64,
}

pub struct AdvertiserProfileDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "advertiser_profile";
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

pub struct CounterChange {
    pub total_tasks: i64,
    pub active_tasks: i64,
    pub completed_tasks: i64,
}

impl CounterChange {
    pub fn is_empty(&self) -> bool {
        self.total_tasks == 0 && self.active_tasks == 0 && self.completed_tasks == 0
    }
}

impl<'a> AdvertiserProfileDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS user ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE FIELD IF NOT EXISTS total_tasks ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    DEFINE FIELD IF NOT EXISTS active_tasks ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    DEFINE FIELD IF NOT EXISTS completed_tasks ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    /// Statement applying `change` to the profile of the user held in `owner_var`.
    pub fn get_counter_update_qry(owner_var: &str, change: &CounterChange) -> String {
        if change.is_empty() {
            return String::new();
        }
        format!(
            "UPSERT type::thing('{TABLE_NAME}', record::id({owner_var})) SET user = {owner_var}, \
             total_tasks += {}, active_tasks += {}, completed_tasks += {};",
            change.total_tasks, change.active_tasks, change.completed_tasks
        )
    }

    pub fn get_profile_id(user: &Thing) -> Thing {
        Thing::from((TABLE_NAME.to_string(), user.id.clone()))
    }

    pub async fn get(&self, user: &Thing) -> CtxResult<Option<AdvertiserProfile>> {
        get_entity::<AdvertiserProfile>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(Self::get_profile_id(user)),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_update_skips_empty_change() {
        let change = CounterChange {
            total_tasks: 0,
            active_tasks: 0,
            completed_tasks: 0,
        };
        assert!(AdvertiserProfileDbService::get_counter_update_qry("$task.owner", &change).is_empty());
    }

    #[test]
    fn counter_update_targets_owner_profile() {
        let change = CounterChange {
            total_tasks: 0,
            active_tasks: -1,
            completed_tasks: 1,
        };
        let qry = AdvertiserProfileDbService::get_counter_update_qry("$task.owner", &change);
        assert!(qry.contains("record::id($task.owner)"));
        assert!(qry.contains("active_tasks += -1"));
    }
}
