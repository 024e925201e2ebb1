use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Thing, Value};

use super::balance_transaction_entity;
use crate::database::client::Db;
use crate::database::surrdb_utils::THROW_INSUFFICIENT_FUNDS;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, AppResult, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, IdentIdName, QryBindingsVal};

pub static PLATFORM_WALLET: Lazy<Thing> = Lazy::new(|| Thing::from((TABLE_NAME, "platform")));

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Thing,
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_head: Option<Thing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_updated: Option<DateTime<Utc>>,
}

pub struct WalletDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "wallet";
const TRANSACTION_TABLE: &str = balance_transaction_entity::TABLE_NAME;
pub const TRANSACTION_HEAD_F: &str = "transaction_head";

pub fn is_wallet_id(wallet_id: &Thing) -> AppResult<()> {
    if wallet_id.tb != TABLE_NAME {
        return Err(AppError::Generic {
            description: "wrong tb in wallet_id".to_string(),
        });
    }
    Ok(())
}

impl<'a> WalletDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS balance ON TABLE {TABLE_NAME} TYPE int DEFAULT 0 ASSERT $value >= 0;
    DEFINE FIELD IF NOT EXISTS {TRANSACTION_HEAD_F} ON TABLE {TABLE_NAME} TYPE option<record<{TRANSACTION_TABLE}>>;
    DEFINE FIELD IF NOT EXISTS r_created ON TABLE {TABLE_NAME} TYPE option<datetime> DEFAULT time::now() VALUE $before OR time::now();
    DEFINE FIELD IF NOT EXISTS r_updated ON TABLE {TABLE_NAME} TYPE option<datetime> DEFAULT time::now() VALUE time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    /// Statements throwing `InsufficientFunds` when the wallet holds less
    /// than `amount`, without moving anything.
    pub fn get_sufficient_balance_qry(
        prefix: &str,
        wallet_id: &Thing,
        amount: i64,
    ) -> QryBindingsVal<Value> {
        let p = prefix;
        let qry = format!(
            "LET ${p}_available = ${p}_check_wallet.balance ?? 0;
IF ${p}_available < ${p}_required {{ THROW string::concat(\"{THROW_INSUFFICIENT_FUNDS}:required=\", <string>${p}_required, \";available=\", <string>${p}_available); }};"
        );
        let mut bindings: HashMap<String, Value> = HashMap::new();
        bindings.insert(format!("{p}_check_wallet"), Value::from(wallet_id.clone()));
        bindings.insert(format!("{p}_required"), Value::from(amount));
        QryBindingsVal::new(qry, bindings)
    }

    pub fn get_user_wallet_id(user_id: &Thing) -> Thing {
        Thing::from((TABLE_NAME.to_string(), user_id.id.clone()))
    }

    /// Balance of the wallet, 0 for a wallet that never moved.
    pub async fn get_balance(&self, wallet_id: &Thing) -> CtxResult<i64> {
        is_wallet_id(wallet_id).map_err(CtxError::from(self.ctx))?;
        let mut res = self
            .db
            .query("RETURN $wallet.balance ?? 0;")
            .bind(("wallet", wallet_id.clone()))
            .await
            .map_err(CtxError::from(self.ctx))?;
        let balance: Option<i64> = res.take(0).map_err(CtxError::from(self.ctx))?;
        Ok(balance.unwrap_or(0))
    }

    pub async fn get_user_balance(&self, user_id: &Thing) -> CtxResult<i64> {
        self.get_balance(&Self::get_user_wallet_id(user_id)).await
    }

    pub async fn get(&self, wallet_id: &Thing) -> CtxResult<Option<Wallet>> {
        get_entity::<Wallet>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(wallet_id.clone()),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }
}
