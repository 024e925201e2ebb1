use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::{Thing, Value};

use super::wallet_entity;
use crate::database::client::Db;
use crate::database::surrdb_utils::THROW_INSUFFICIENT_FUNDS;
use crate::entities::task::{task_entity, task_submission_entity};
use crate::entities::user_auth::local_user_entity;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, AppResult, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{opt_value, Pagination, QryBindingsVal, QryOrder};

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(
    Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionCategory {
    TaskPaymentAdvertiser,
    TaskPaymentRefund,
    UserTaskReward,
    Withdrawal,
    KycFeePlatform,
    KycFeeReferrer,
    AccountReactivation,
    WalletTopup,
}

impl TransactionCategory {
    /// Direction every entry of the category is written with.
    pub fn direction(&self) -> Direction {
        match self {
            TransactionCategory::TaskPaymentAdvertiser | TransactionCategory::Withdrawal => {
                Direction::Debit
            }
            _ => Direction::Credit,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: Thing,
    pub wallet: Thing,
    pub direction: Direction,
    pub amount: i64,
    pub category: TransactionCategory,
    pub balance_before: i64,
    pub balance_after: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_transaction: Option<Thing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task: Option<Thing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_submission: Option<Thing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_user: Option<Thing>,
    pub event_ident: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_referrer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl BalanceTransaction {
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Entry to append, before balances are known.
#[derive(Clone, Debug)]
pub struct LedgerEntrySpec {
    pub category: TransactionCategory,
    pub amount: i64,
    pub related_task: Option<Thing>,
    pub related_submission: Option<Thing>,
    pub related_user: Option<Thing>,
    pub has_referrer: Option<bool>,
    pub description: Option<String>,
    pub reference: Option<String>,
}

impl LedgerEntrySpec {
    pub fn new(category: TransactionCategory, amount: i64) -> Self {
        LedgerEntrySpec {
            category,
            amount,
            related_task: None,
            related_submission: None,
            related_user: None,
            has_referrer: None,
            description: None,
            reference: None,
        }
    }

    pub fn task(mut self, task: &Thing) -> Self {
        self.related_task = Some(task.clone());
        self
    }

    pub fn submission(mut self, submission: &Thing) -> Self {
        self.related_submission = Some(submission.clone());
        self
    }

    pub fn user(mut self, user: &Thing) -> Self {
        self.related_user = Some(user.clone());
        self
    }

    pub fn has_referrer(mut self, has_referrer: bool) -> Self {
        self.has_referrer = Some(has_referrer);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.amount <= 0 {
            return Err(AppError::ValidationError {
                description: format!("{} amount must be positive", self.category),
            });
        }
        Ok(())
    }
}

/// All entries one business event writes to a single wallet.
#[derive(Clone, Debug)]
pub struct WalletDelta {
    pub wallet: Thing,
    pub entries: Vec<LedgerEntrySpec>,
}

impl WalletDelta {
    pub fn new(wallet: Thing, entries: Vec<LedgerEntrySpec>) -> Self {
        WalletDelta { wallet, entries }
    }

    pub fn single(wallet: Thing, entry: LedgerEntrySpec) -> Self {
        WalletDelta {
            wallet,
            entries: vec![entry],
        }
    }

    pub fn net_amount(&self) -> i64 {
        self.entries
            .iter()
            .map(|e| match e.category.direction() {
                Direction::Credit => e.amount,
                Direction::Debit => -e.amount,
            })
            .sum()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub wallet: Option<Thing>,
    pub direction: Option<Direction>,
    pub category: Option<TransactionCategory>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl TransactionFilter {
    fn get_where_str(&self, bindings: &mut HashMap<String, Value>) -> String {
        let mut conditions: Vec<&str> = vec![];
        if let Some(wallet) = &self.wallet {
            bindings.insert("f_wallet".to_string(), Value::from(wallet.clone()));
            conditions.push("wallet = $f_wallet");
        }
        if let Some(direction) = &self.direction {
            bindings.insert("f_direction".to_string(), Value::from(direction.to_string()));
            conditions.push("direction = $f_direction");
        }
        if let Some(category) = &self.category {
            bindings.insert("f_category".to_string(), Value::from(category.to_string()));
            conditions.push("category = $f_category");
        }
        if let Some(from) = &self.from {
            bindings.insert("f_from".to_string(), Value::from(from.to_rfc3339()));
            conditions.push("created_at >= <datetime>$f_from");
        }
        if let Some(to) = &self.to {
            bindings.insert("f_to".to_string(), Value::from(to.to_rfc3339()));
            conditions.push("created_at <= <datetime>$f_to");
        }
        if let Some(search) = self.search.as_ref().filter(|s| !s.trim().is_empty()) {
            bindings.insert(
                "f_search".to_string(),
                Value::from(search.trim().to_lowercase()),
            );
            conditions.push(
                "(string::contains(string::lowercase(description ?? ''), $f_search) \
                 OR string::contains(string::lowercase(actor), $f_search) \
                 OR string::contains(string::lowercase(reference ?? ''), $f_search))",
            );
        }
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }
}

pub struct BalanceTransactionDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "balance_transaction";
const WALLET_TABLE: &str = wallet_entity::TABLE_NAME;
const TASK_TABLE: &str = task_entity::TABLE_NAME;
const SUBMISSION_TABLE: &str = task_submission_entity::TABLE_NAME;
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> BalanceTransactionDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let categories = TransactionCategory::iter()
            .map(|c| format!("'{c}'"))
            .collect::<Vec<_>>()
            .join(",");
        let directions = Direction::iter()
            .map(|d| format!("'{d}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS wallet ON TABLE {TABLE_NAME} TYPE record<{WALLET_TABLE}> READONLY;
    DEFINE FIELD IF NOT EXISTS direction ON TABLE {TABLE_NAME} TYPE string READONLY ASSERT $value INSIDE [{directions}];
    DEFINE FIELD IF NOT EXISTS amount ON TABLE {TABLE_NAME} TYPE int READONLY ASSERT $value > 0;
    DEFINE FIELD IF NOT EXISTS category ON TABLE {TABLE_NAME} TYPE string READONLY ASSERT $value INSIDE [{categories}];
    DEFINE FIELD IF NOT EXISTS balance_before ON TABLE {TABLE_NAME} TYPE int READONLY;
    DEFINE FIELD IF NOT EXISTS balance_after ON TABLE {TABLE_NAME} TYPE int READONLY ASSERT $value >= 0
        AND ((direction = 'credit' AND $value = balance_before + amount)
        OR (direction = 'debit' AND $value = balance_before - amount));
    DEFINE FIELD IF NOT EXISTS prev_transaction ON TABLE {TABLE_NAME} TYPE option<record<{TABLE_NAME}>> READONLY;
    DEFINE FIELD IF NOT EXISTS related_task ON TABLE {TABLE_NAME} TYPE option<record<{TASK_TABLE}>> READONLY;
    DEFINE FIELD IF NOT EXISTS related_submission ON TABLE {TABLE_NAME} TYPE option<record<{SUBMISSION_TABLE}>> READONLY;
    DEFINE FIELD IF NOT EXISTS related_user ON TABLE {TABLE_NAME} TYPE option<record<{USER_TABLE}>> READONLY;
    DEFINE FIELD IF NOT EXISTS event_ident ON TABLE {TABLE_NAME} TYPE string READONLY;
    DEFINE FIELD IF NOT EXISTS has_referrer ON TABLE {TABLE_NAME} TYPE option<bool> READONLY;
    DEFINE FIELD IF NOT EXISTS description ON TABLE {TABLE_NAME} TYPE option<string> READONLY;
    DEFINE FIELD IF NOT EXISTS reference ON TABLE {TABLE_NAME} TYPE option<string> READONLY;
    DEFINE FIELD IF NOT EXISTS actor ON TABLE {TABLE_NAME} TYPE string READONLY;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE {TABLE_NAME} TYPE datetime DEFAULT time::now() READONLY;
    DEFINE INDEX IF NOT EXISTS wallet_idx ON TABLE {TABLE_NAME} COLUMNS wallet;
    DEFINE INDEX IF NOT EXISTS category_idx ON TABLE {TABLE_NAME} COLUMNS category;
    DEFINE INDEX IF NOT EXISTS related_task_idx ON TABLE {TABLE_NAME} COLUMNS related_task;
    DEFINE INDEX IF NOT EXISTS event_ident_idx ON TABLE {TABLE_NAME} COLUMNS event_ident;
    DEFINE INDEX IF NOT EXISTS created_at_idx ON TABLE {TABLE_NAME} COLUMNS created_at;
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    /// Statements applying `delta` inside an enclosing transaction.
    ///
    /// Variables are namespaced with `prefix` so several wallets can be moved
    /// in one unit. After the fragment `$<prefix>_balance` holds the new
    /// balance and `$<prefix>_entries` the created entries. A debit that
    /// would leave the wallet negative throws `InsufficientFunds`.
    pub fn get_wallet_delta_qry(
        prefix: &str,
        delta: &WalletDelta,
        actor: &str,
    ) -> AppResult<QryBindingsVal<Value>> {
        if delta.entries.is_empty() {
            return Err(AppError::Generic {
                description: "wallet delta without entries".to_string(),
            });
        }
        wallet_entity::is_wallet_id(&delta.wallet)?;
        delta.entries.iter().try_for_each(|e| e.validate())?;

        let p = prefix;
        let mut bindings: HashMap<String, Value> = HashMap::new();
        bindings.insert(format!("{p}_wallet"), Value::from(delta.wallet.clone()));
        bindings.insert(format!("{p}_actor"), Value::from(actor.to_string()));

        let mut stmts = vec![
            format!("LET ${p}_w = UPSERT ONLY ${p}_wallet SET r_updated = time::now();"),
            format!("LET ${p}_b0 = ${p}_w.balance ?? 0;"),
        ];

        for (i, entry) in delta.entries.iter().enumerate() {
            let next = i + 1;
            let prev_tx = if i == 0 {
                format!("${p}_w.transaction_head")
            } else {
                format!("${p}_tx{}.id", i - 1)
            };
            match entry.category.direction() {
                Direction::Debit => {
                    stmts.push(format!(
                        "IF ${p}_b{i} < ${p}_amt{i} {{ THROW string::concat(\"{THROW_INSUFFICIENT_FUNDS}:required=\", <string>${p}_amt{i}, \";available=\", <string>${p}_b{i}); }};"
                    ));
                    stmts.push(format!("LET ${p}_b{next} = ${p}_b{i} - ${p}_amt{i};"));
                }
                Direction::Credit => {
                    stmts.push(format!("LET ${p}_b{next} = ${p}_b{i} + ${p}_amt{i};"));
                }
            }
            stmts.push(format!(
                "LET ${p}_tx{i} = CREATE ONLY {TABLE_NAME} CONTENT {{
                wallet: ${p}_wallet,
                direction: ${p}_dir{i},
                amount: ${p}_amt{i},
                category: ${p}_cat{i},
                balance_before: ${p}_b{i},
                balance_after: ${p}_b{next},
                prev_transaction: {prev_tx},
                related_task: ${p}_task{i},
                related_submission: ${p}_sub{i},
                related_user: ${p}_user{i},
                event_ident: $event_ident,
                has_referrer: ${p}_ref{i},
                description: ${p}_desc{i},
                reference: ${p}_reference{i},
                actor: ${p}_actor,
                created_at: $event_at,
            }};"
            ));

            bindings.insert(format!("{p}_amt{i}"), Value::from(entry.amount));
            bindings.insert(
                format!("{p}_dir{i}"),
                Value::from(entry.category.direction().to_string()),
            );
            bindings.insert(format!("{p}_cat{i}"), Value::from(entry.category.to_string()));
            bindings.insert(format!("{p}_task{i}"), opt_value(entry.related_task.clone()));
            bindings.insert(
                format!("{p}_sub{i}"),
                opt_value(entry.related_submission.clone()),
            );
            bindings.insert(format!("{p}_user{i}"), opt_value(entry.related_user.clone()));
            bindings.insert(format!("{p}_ref{i}"), opt_value(entry.has_referrer));
            bindings.insert(format!("{p}_desc{i}"), opt_value(entry.description.clone()));
            bindings.insert(
                format!("{p}_reference{i}"),
                opt_value(entry.reference.clone()),
            );
        }

        let last = delta.entries.len();
        let entries = (0..last)
            .map(|i| format!("${p}_tx{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        stmts.push(format!(
            "UPDATE ONLY ${p}_wallet SET balance = ${p}_b{last}, transaction_head = ${p}_tx{}.id;",
            last - 1
        ));
        stmts.push(format!("LET ${p}_balance = ${p}_b{last};"));
        stmts.push(format!("LET ${p}_entries = [{entries}];"));

        Ok(QryBindingsVal::new(stmts.join("\n"), bindings))
    }

    pub async fn query(
        &self,
        filter: &TransactionFilter,
        pagination: Option<Pagination>,
    ) -> CtxResult<Vec<BalanceTransaction>> {
        let mut bindings: HashMap<String, Value> = HashMap::new();
        let where_q = filter.get_where_str(&mut bindings);
        let page_q = match pagination {
            None => " ORDER BY created_at DESC".to_string(),
            Some(pag) => {
                let count = if pag.count == 0 { 20 } else { pag.count };
                bindings.insert("_limit_val".to_string(), Value::from(count as i64));
                bindings.insert("_start_val".to_string(), Value::from(pag.start as i64));
                let dir = pag.order_dir.unwrap_or(QryOrder::DESC);
                format!(" ORDER BY created_at {dir} LIMIT $_limit_val START $_start_val")
            }
        };
        let qry = format!("SELECT * FROM {TABLE_NAME}{where_q}{page_q};");
        let mut res = QryBindingsVal::new(qry, bindings)
            .into_query(self.db)
            .await
            .map_err(CtxError::from(self.ctx))?;
        let list = res
            .take::<Vec<BalanceTransaction>>(0)
            .map_err(CtxError::from(self.ctx))?;
        Ok(list)
    }

    pub async fn get_by_event(&self, event_ident: &str) -> CtxResult<Vec<BalanceTransaction>> {
        let mut res = self
            .db
            .query(format!(
                "SELECT * FROM {TABLE_NAME} WHERE event_ident = $event_ident ORDER BY created_at ASC;"
            ))
            .bind(("event_ident", event_ident.to_string()))
            .await
            .map_err(CtxError::from(self.ctx))?;
        Ok(res.take::<Vec<BalanceTransaction>>(0)?)
    }
}
