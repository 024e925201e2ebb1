use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::info;
use validator::Validate;

use crate::{
    database::{
        client::Db,
        surrdb_utils::{run_transaction, throw_stmt, with_tx_retries, TransactionQry, THROW_INVALID_STATE, THROW_NOT_FOUND},
    },
    entities::{
        admin_action_entity::{AdminActionDbService, AdminActionType},
        user_auth::local_user_entity::{LocalUser, LocalUserDbService, UserRole},
        wallet::{
            balance_transaction_entity::{
                BalanceTransaction, BalanceTransactionDbService, Direction, LedgerEntrySpec,
                TransactionCategory, TransactionFilter, WalletDelta,
            },
            wallet_entity::{WalletDbService, PLATFORM_WALLET},
        },
    },
    middleware::{
        ctx::Ctx,
        error::{AppError, AppResult, CtxError, CtxResult},
        utils::{extractor_utils::PageParams, string_utils::non_empty},
    },
    services::revenue_service::{
        compute_net_balance, compute_revenue, NetBalance, Revenue, RevenuePeriod,
    },
};

pub const TOPUP_MAX: i64 = 100_000;
pub const WITHDRAW_MIN: i64 = 100;
pub const ACCOUNT_REACTIVATION_FEE: i64 = 49;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct TopupInput {
    #[validate(range(min = 1, max = 100000, message = "amount must be between 1 and 100000"))]
    pub amount: i64,
    #[validate(length(max = 500, message = "Max 500 characters for description"))]
    pub description: Option<String>,
    #[validate(length(max = 200, message = "Max 200 characters for reference"))]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct WithdrawInput {
    #[validate(range(min = 100, message = "Minimum withdrawal is 100"))]
    pub amount: i64,
}

/// Ledger listing query shared by the wallet view and the payout report.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct TransactionQuery {
    pub r#type: Option<Direction>,
    pub category: Option<TransactionCategory>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    pub revenue_period: Option<RevenuePeriod>,
    pub start: Option<u32>,
    pub count: Option<u16>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WalletMovement {
    pub balance: i64,
    pub entry: BalanceTransaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WalletStatistics {
    pub total_credits: i64,
    pub total_debits: i64,
    pub total_topups: i64,
    pub total_task_spend: i64,
    pub total_refunds: i64,
    pub transaction_count: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WalletView {
    pub wallet_id: Thing,
    pub balance: i64,
    pub transactions: Vec<BalanceTransaction>,
    pub total: usize,
    pub statistics: WalletStatistics,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PayoutReport {
    pub transactions: Vec<BalanceTransaction>,
    pub total: usize,
    pub net_balance: NetBalance,
    pub revenue: Revenue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_period: Option<RevenuePeriod>,
}

/// Accepts RFC 3339 or a plain `YYYY-MM-DD` day, which stands for the
/// start of that day or, with `end_of_day`, its last second.
pub fn parse_date_param(name: &str, value: &str, end_of_day: bool) -> AppResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| AppError::ValidationError {
        description: format!("{name} must be a date (YYYY-MM-DD) or RFC 3339 datetime"),
    })?;
    let time = if end_of_day {
        day.and_hms_opt(23, 59, 59)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    time.map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| AppError::ValidationError {
            description: format!("{name} is out of range"),
        })
}

impl TransactionQuery {
    pub fn to_filter(&self, wallet: Option<Thing>, now: DateTime<Utc>) -> AppResult<TransactionFilter> {
        let explicit_from = self
            .from
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_date_param("from", v, false))
            .transpose()?;
        let to = self
            .to
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_date_param("to", v, true))
            .transpose()?;
        let from = explicit_from.or_else(|| self.revenue_period.and_then(|p| p.start(now)));
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::ValidationError {
                    description: "from must not be after to".to_string(),
                });
            }
        }
        Ok(TransactionFilter {
            wallet,
            direction: self.r#type,
            category: self.category,
            from,
            to,
            search: non_empty(self.search.clone()),
        })
    }

    fn page(&self) -> PageParams {
        PageParams {
            start: self.start,
            count: self.count,
        }
    }
}

pub fn compute_wallet_statistics(entries: &[BalanceTransaction]) -> WalletStatistics {
    let net = compute_net_balance(entries);
    let sum_of = |category: TransactionCategory| -> i64 {
        entries
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.amount)
            .sum()
    };
    WalletStatistics {
        total_credits: net.total_credits,
        total_debits: net.total_debits,
        total_topups: sum_of(TransactionCategory::WalletTopup),
        total_task_spend: sum_of(TransactionCategory::TaskPaymentAdvertiser),
        total_refunds: sum_of(TransactionCategory::TaskPaymentRefund),
        transaction_count: entries.len(),
    }
}

/// Page of a snapshot ordered newest first.
fn page_of(entries: &[BalanceTransaction], page: &PageParams) -> Vec<BalanceTransaction> {
    let pagination = page.to_pagination();
    entries
        .iter()
        .skip(pagination.start as usize)
        .take(pagination.count as usize)
        .cloned()
        .collect()
}

pub struct WalletService<'a> {
    db: &'a Db,
    ctx: &'a Ctx,
    tx_retries: u8,
    users_repository: LocalUserDbService<'a>,
    wallets_repository: WalletDbService<'a>,
    transactions_repository: BalanceTransactionDbService<'a>,
}

impl<'a> WalletService<'a> {
    pub fn new(db: &'a Db, ctx: &'a Ctx, tx_retries: u8) -> Self {
        Self {
            db,
            ctx,
            tx_retries,
            users_repository: LocalUserDbService { db, ctx },
            wallets_repository: WalletDbService { db, ctx },
            transactions_repository: BalanceTransactionDbService { db, ctx },
        }
    }

    pub async fn get_wallet(&self, query: &TransactionQuery) -> CtxResult<WalletView> {
        let user = self.users_repository.get_ctx_user().await?;
        let wallet_id = WalletDbService::get_user_wallet_id(&user.id);
        let filter = query
            .to_filter(Some(wallet_id.clone()), Utc::now())
            .map_err(CtxError::from(self.ctx))?;
        let snapshot = self.transactions_repository.query(&filter, None).await?;
        let balance = self.wallets_repository.get_balance(&wallet_id).await?;
        Ok(WalletView {
            wallet_id,
            balance,
            transactions: page_of(&snapshot, &query.page()),
            total: snapshot.len(),
            statistics: compute_wallet_statistics(&snapshot),
        })
    }

    /// Platform ledger report over one snapshot of matching entries.
    pub async fn get_payout_report(&self, query: &TransactionQuery) -> CtxResult<PayoutReport> {
        self.users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        let filter = query
            .to_filter(None, Utc::now())
            .map_err(CtxError::from(self.ctx))?;
        let snapshot = self.transactions_repository.query(&filter, None).await?;
        // revenue follows the period only, never the listing filters
        let period_filter = TransactionFilter {
            from: filter.from,
            to: filter.to,
            ..Default::default()
        };
        let period_snapshot = self
            .transactions_repository
            .query(&period_filter, None)
            .await?;
        Ok(PayoutReport {
            transactions: page_of(&snapshot, &query.page()),
            total: snapshot.len(),
            net_balance: compute_net_balance(&period_snapshot),
            revenue: compute_revenue(&period_snapshot),
            revenue_period: query.revenue_period,
        })
    }

    pub async fn topup(&self, input: TopupInput) -> CtxResult<WalletMovement> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        if input.amount <= 0 || input.amount > TOPUP_MAX {
            return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                description: format!("amount must be between 1 and {TOPUP_MAX}"),
            }));
        }
        let user = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Advertiser, UserRole::Admin])
            .await?;
        let entry = LedgerEntrySpec::new(TransactionCategory::WalletTopup, input.amount)
            .user(&user.id)
            .description(non_empty(input.description).unwrap_or_else(|| "Wallet top-up".to_string()))
            .reference(non_empty(input.reference));
        let movement = with_tx_retries(self.tx_retries, "wallet_topup", || {
            self.move_once(&user, entry.clone())
        })
        .await
        .map_err(CtxError::from(self.ctx))?;
        info!(user = %user.email, amount = input.amount, balance = movement.balance, "wallet topped up");
        Ok(movement)
    }

    pub async fn withdraw(&self, input: WithdrawInput) -> CtxResult<WalletMovement> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let user = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::User])
            .await?;
        let entry = LedgerEntrySpec::new(TransactionCategory::Withdrawal, input.amount)
            .user(&user.id)
            .description("Withdrawal");
        let movement = with_tx_retries(self.tx_retries, "wallet_withdraw", || async {
            let available = self.wallets_repository.get_user_balance(&user.id).await?;
            if available < input.amount {
                return Err(AppError::InsufficientFunds {
                    required: input.amount,
                    available,
                });
            }
            self.move_once(&user, entry.clone()).await
        })
        .await
        .map_err(CtxError::from(self.ctx))?;
        info!(user = %user.email, amount = input.amount, balance = movement.balance, "wallet withdrawal");
        Ok(movement)
    }

    async fn move_once(&self, user: &LocalUser, entry: LedgerEntrySpec) -> AppResult<WalletMovement> {
        let delta = WalletDelta::single(WalletDbService::get_user_wallet_id(&user.id), entry);
        let mut tx = TransactionQry::new();
        tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
            "w",
            &delta,
            &user.actor(),
        )?)
        .push("LET $movement = { balance: $w_balance, entry: $w_tx0 };")
        .push("$movement;");
        run_transaction::<WalletMovement>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "wallet movement not written".to_string(),
            })
    }

    /// Records the reactivation fee a deactivated user paid and reactivates the account.
    pub async fn reactivate_account(&self, user_id: &Thing) -> CtxResult<WalletMovement> {
        let admin = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        with_tx_retries(self.tx_retries, "account_reactivation", || {
            self.reactivate_once(user_id, &admin)
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn reactivate_once(&self, user_id: &Thing, admin: &LocalUser) -> AppResult<WalletMovement> {
        let user = self.users_repository.get(user_id).await?;
        if user.is_active {
            return Err(AppError::InvalidState {
                description: "Account is already active".to_string(),
            });
        }
        let delta = WalletDelta::single(
            PLATFORM_WALLET.clone(),
            LedgerEntrySpec::new(
                TransactionCategory::AccountReactivation,
                ACCOUNT_REACTIVATION_FEE,
            )
            .user(user_id)
            .description(format!("Account reactivation of {}", user.email)),
        );

        let mut tx = TransactionQry::new();
        tx.bind("user_id", user_id.clone())
            .push("LET $account = (SELECT * FROM $user_id)[0];")
            .push(format!(
                "IF $account = NONE {{ {} }};",
                throw_stmt(THROW_NOT_FOUND, &user_id.to_raw())
            ))
            .push(format!(
                "IF $account.is_active = true {{ {} }};",
                throw_stmt(THROW_INVALID_STATE, "Account is already active")
            ))
            .push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
                "plt",
                &delta,
                &admin.actor(),
            )?)
            .push("UPDATE $user_id SET is_active = true;")
            .push_qry(AdminActionDbService::get_log_qry(
                "log",
                admin,
                AdminActionType::AccountReactivation,
                user_id,
                None,
                Some(format!("fee={ACCOUNT_REACTIVATION_FEE}")),
            ))
            .push("LET $movement = { balance: $plt_balance, entry: $plt_tx0 };")
            .push("$movement;");

        let movement = run_transaction::<WalletMovement>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "reactivation not written".to_string(),
            })?;
        info!(user = %user.email, admin = %admin.email, "account reactivated");
        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_days_cover_whole_day() {
        let from = parse_date_param("from", "2026-01-31", false).unwrap();
        let to = parse_date_param("to", "2026-01-31", true).unwrap();
        assert_eq!(from.to_rfc3339(), "2026-01-31T00:00:00+00:00");
        assert_eq!(to.to_rfc3339(), "2026-01-31T23:59:59+00:00");
        assert!(parse_date_param("from", "31/01/2026", false).is_err());
    }

    #[test]
    fn explicit_from_wins_over_period() {
        let now = Utc::now();
        let query = TransactionQuery {
            from: Some("2020-01-01".to_string()),
            revenue_period: Some(RevenuePeriod::Today),
            ..Default::default()
        };
        let filter = query.to_filter(None, now).unwrap();
        assert_eq!(filter.from.unwrap().to_rfc3339(), "2020-01-01T00:00:00+00:00");

        let query = TransactionQuery {
            revenue_period: Some(RevenuePeriod::Week),
            ..Default::default()
        };
        assert_eq!(
            query.to_filter(None, now).unwrap().from,
            Some(now - chrono::Duration::days(7))
        );
    }

    #[test]
    fn reversed_range_is_rejected() {
        let query = TransactionQuery {
            from: Some("2026-02-01".to_string()),
            to: Some("2026-01-01".to_string()),
            ..Default::default()
        };
        assert!(query.to_filter(None, Utc::now()).is_err());
    }
}
