pub mod task_helpers;
pub mod test_with_server;

use std::sync::Arc;

use axum_test::{TestResponse, TestServer};
use fake::{faker::internet::en::SafeEmail, faker::internet::en::Username, Fake};
use serde_json::json;
use surrealdb::sql::{Id, Thing};
use taskearn_server::database::surrdb_utils::{run_transaction, TransactionQry};
use taskearn_server::entities::user_auth::local_user_entity::{
    LocalUser, LocalUserCreate, LocalUserDbService, UserRole,
};
use taskearn_server::entities::wallet::balance_transaction_entity::{
    BalanceTransaction, BalanceTransactionDbService, LedgerEntrySpec, TransactionCategory,
    TransactionFilter, WalletDelta,
};
use taskearn_server::entities::wallet::wallet_entity::WalletDbService;
use taskearn_server::middleware::ctx::Ctx;
use taskearn_server::middleware::mw_ctx::CtxState;

/// Bare key of a record id, as used in request paths.
#[allow(dead_code)]
pub fn record_key(thing: &Thing) -> String {
    match &thing.id {
        Id::String(key) => key.clone(),
        other => other.to_raw(),
    }
}

pub struct TestUser {
    pub user: LocalUser,
    pub token: String,
}

impl TestUser {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[allow(dead_code)]
pub async fn create_test_user(
    ctx_state: &Arc<CtxState>,
    role: UserRole,
    referred_by: Option<Thing>,
    is_active: bool,
) -> TestUser {
    let ctx = Ctx::system("test_users");
    let users = LocalUserDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    };
    let username: String = Username().fake();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let user = users
        .create(LocalUserCreate {
            email: format!("{}_{}", &suffix[..8], SafeEmail().fake::<String>()),
            username: format!("{}_{}", username, &suffix[..8]),
            role,
            referred_by,
            is_active,
        })
        .await
        .unwrap();
    let token = ctx_state.jwt.create_by_login(&user.id.to_raw()).unwrap();
    TestUser { user, token }
}

#[allow(dead_code)]
pub async fn create_user(ctx_state: &Arc<CtxState>, role: UserRole) -> TestUser {
    create_test_user(ctx_state, role, None, true).await
}

/// Credits the user's wallet outside of any business flow.
#[allow(dead_code)]
pub async fn credit_wallet(ctx_state: &Arc<CtxState>, user_id: &Thing, amount: i64) -> i64 {
    let delta = WalletDelta::single(
        WalletDbService::get_user_wallet_id(user_id),
        LedgerEntrySpec::new(TransactionCategory::UserTaskReward, amount)
            .user(user_id)
            .description("test credit"),
    );
    let mut tx = TransactionQry::new();
    tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry("t", &delta, "system").unwrap())
        .push("$t_balance;");
    run_transaction::<i64>(&ctx_state.db.client, tx)
        .await
        .unwrap()
        .unwrap()
}

#[allow(dead_code)]
pub async fn topup(server: &TestServer, user: &TestUser, amount: i64) -> TestResponse {
    server
        .post("/api/wallet/topup")
        .add_header("Authorization", user.bearer())
        .json(&json!({ "amount": amount }))
        .await
}

#[allow(dead_code)]
pub async fn wallet_balance(ctx_state: &Arc<CtxState>, wallet_id: &Thing) -> i64 {
    let ctx = Ctx::system("test_balance");
    WalletDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get_balance(wallet_id)
    .await
    .unwrap()
}

#[allow(dead_code)]
pub async fn user_balance(ctx_state: &Arc<CtxState>, user_id: &Thing) -> i64 {
    wallet_balance(ctx_state, &WalletDbService::get_user_wallet_id(user_id)).await
}

#[allow(dead_code)]
pub async fn ledger_entries(
    ctx_state: &Arc<CtxState>,
    filter: TransactionFilter,
) -> Vec<BalanceTransaction> {
    let ctx = Ctx::system("test_ledger");
    BalanceTransactionDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .query(&filter, None)
    .await
    .unwrap()
}

#[allow(dead_code)]
pub async fn wallet_entries(ctx_state: &Arc<CtxState>, wallet_id: &Thing) -> Vec<BalanceTransaction> {
    ledger_entries(
        ctx_state,
        TransactionFilter {
            wallet: Some(wallet_id.clone()),
            ..Default::default()
        },
    )
    .await
}

/// Asserts the stored balance equals the sum of the wallet's ledger entries.
#[allow(dead_code)]
pub async fn assert_wallet_conserved(ctx_state: &Arc<CtxState>, wallet_id: &Thing) {
    let entries = wallet_entries(ctx_state, wallet_id).await;
    let sum: i64 = entries.iter().map(|e| e.signed_amount()).sum();
    assert_eq!(wallet_balance(ctx_state, wallet_id).await, sum);
    assert!(entries.iter().all(|e| e.balance_after >= 0));
}
