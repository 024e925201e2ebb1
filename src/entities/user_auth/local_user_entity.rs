use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::Thing;
use validator::Validate;

use crate::database::client::Db;
use crate::database::surrdb_utils::get_table_thing;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, AppResult, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, with_not_found_err, IdentIdName};

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    User,
    Advertiser,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: Thing,
    pub email: String,
    pub username: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<Thing>,
    pub is_active: bool,
    pub total_earn: i64,
    pub tasks_completed: i64,
    pub created_at: DateTime<Utc>,
}

impl LocalUser {
    /// Actor recorded on ledger entries and admin actions.
    pub fn actor(&self) -> String {
        match self.role {
            UserRole::Admin => format!("admin:{}", self.email),
            _ => format!("user:{}", self.email),
        }
    }

    pub fn require_role(&self, roles: &[UserRole]) -> AppResult<()> {
        if roles.contains(&self.role) {
            return Ok(());
        }
        Err(AppError::AuthorizationFail {
            required: roles
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LocalUserCreate {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, message = "Min 3 characters for username"))]
    pub username: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<Thing>,
    pub is_active: bool,
}

pub struct LocalUserDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "local_user";

impl<'a> LocalUserDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let roles = UserRole::iter()
            .map(|r| format!("'{r}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS email ON TABLE {TABLE_NAME} TYPE string VALUE string::lowercase($value) ASSERT string::is::email($value);
    DEFINE FIELD IF NOT EXISTS username ON TABLE {TABLE_NAME} TYPE string VALUE string::lowercase($value);
    DEFINE FIELD IF NOT EXISTS role ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{roles}];
    DEFINE FIELD IF NOT EXISTS referred_by ON TABLE {TABLE_NAME} TYPE option<record<{TABLE_NAME}>>;
    DEFINE FIELD IF NOT EXISTS is_active ON TABLE {TABLE_NAME} TYPE bool DEFAULT true;
    DEFINE FIELD IF NOT EXISTS total_earn ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    DEFINE FIELD IF NOT EXISTS tasks_completed ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now() READONLY;
    DEFINE INDEX IF NOT EXISTS local_user_email_idx ON TABLE {TABLE_NAME} COLUMNS email UNIQUE;
    DEFINE INDEX IF NOT EXISTS local_user_username_idx ON TABLE {TABLE_NAME} COLUMNS username UNIQUE;
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    pub async fn get_ctx_user(&self) -> CtxResult<LocalUser> {
        let user_id = self.ctx.user_id()?;
        let user_thing =
            get_table_thing(TABLE_NAME, &user_id).map_err(CtxError::from(self.ctx))?;
        self.get(&user_thing).await
    }

    /// Loads the caller and checks it holds one of `roles`.
    pub async fn get_ctx_user_with_role(&self, roles: &[UserRole]) -> CtxResult<LocalUser> {
        let user = self.get_ctx_user().await?;
        user.require_role(roles).map_err(CtxError::from(self.ctx))?;
        Ok(user)
    }

    pub async fn get(&self, user_id: &Thing) -> CtxResult<LocalUser> {
        let ident = IdentIdName::Id(user_id.clone());
        let opt = get_entity::<LocalUser>(self.db, TABLE_NAME.to_string(), &ident)
            .await
            .map_err(CtxError::from(self.ctx))?;
        with_not_found_err(opt, self.ctx, &user_id.to_raw())
    }

    pub async fn get_by_email(&self, email: &str) -> CtxResult<LocalUser> {
        let ident = IdentIdName::ColumnIdent {
            column: "email".to_string(),
            val: email.to_lowercase(),
            rec: false,
        };
        let opt = get_entity::<LocalUser>(self.db, TABLE_NAME.to_string(), &ident)
            .await
            .map_err(CtxError::from(self.ctx))?;
        with_not_found_err(opt, self.ctx, email)
    }

    pub async fn create(&self, ct_input: LocalUserCreate) -> CtxResult<LocalUser> {
        ct_input.validate()?;
        let mut res = self
            .db
            .query(format!("CREATE ONLY {TABLE_NAME} CONTENT $data;"))
            .bind(("data", ct_input))
            .await
            .map_err(CtxError::from(self.ctx))?;
        let user: Option<LocalUser> = res.take(0).map_err(CtxError::from(self.ctx))?;
        user.ok_or_else(|| {
            self.ctx.to_ctx_error(AppError::Generic {
                description: "user not created".to_string(),
            })
        })
    }
}
