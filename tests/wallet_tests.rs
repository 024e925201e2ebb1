mod helpers;

use futures::future::join_all;
use serde_json::json;
use taskearn_server::entities::user_auth::local_user_entity::{LocalUserDbService, UserRole};
use taskearn_server::entities::wallet::balance_transaction_entity::{
    Direction, TransactionCategory,
};
use taskearn_server::entities::wallet::wallet_entity::{WalletDbService, PLATFORM_WALLET};
use taskearn_server::middleware::ctx::Ctx;
use taskearn_server::middleware::error::ErrorResponseBody;
use taskearn_server::services::wallet_service::{PayoutReport, WalletMovement, WalletView};

use crate::helpers::task_helpers::{approve_task, claim_and_submit, create_task, review_submission};
use crate::helpers::{
    assert_wallet_conserved, create_test_user, create_user, credit_wallet, record_key, topup,
    user_balance, wallet_balance,
};

test_with_server!(topup_credits_advertiser, |server, ctx_state, config| {
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let res = server
        .post("/api/wallet/topup")
        .add_header("Authorization", advertiser.bearer())
        .json(&json!({ "amount": 500, "description": "Card payment", "reference": "ref-42" }))
        .await;
    res.assert_status_ok();
    let movement = res.json::<WalletMovement>();
    assert_eq!(movement.balance, 500);
    assert_eq!(movement.entry.category, TransactionCategory::WalletTopup);
    assert_eq!(movement.entry.direction, Direction::Credit);
    assert_eq!(movement.entry.reference.as_deref(), Some("ref-42"));
    assert_eq!(movement.entry.balance_before, 0);
    assert_eq!(movement.entry.balance_after, 500);

    let res = topup(&server, &advertiser, 300).await;
    res.assert_status_ok();
    let second = res.json::<WalletMovement>();
    assert_eq!(second.balance, 800);
    assert_eq!(second.entry.prev_transaction.as_ref(), Some(&movement.entry.id));

    topup(&server, &advertiser, 0).await.assert_status_bad_request();
    topup(&server, &advertiser, 100_001)
        .await
        .assert_status_bad_request();

    let worker = create_user(&ctx_state, UserRole::User).await;
    topup(&server, &worker, 100).await.assert_status_forbidden();
});

test_with_server!(withdraw_checks_minimum_and_balance, |server, ctx_state, config| {
    let worker = create_user(&ctx_state, UserRole::User).await;
    credit_wallet(&ctx_state, &worker.user.id, 150).await;

    let res = server
        .post("/api/wallet/withdraw")
        .add_header("Authorization", worker.bearer())
        .json(&json!({ "amount": 99 }))
        .await;
    res.assert_status_bad_request();

    let res = server
        .post("/api/wallet/withdraw")
        .add_header("Authorization", worker.bearer())
        .json(&json!({ "amount": 200 }))
        .await;
    res.assert_status_bad_request();
    let body = res.json::<ErrorResponseBody>();
    assert_eq!(body.code, "INSUFFICIENT_FUNDS");
    assert_eq!(body.required, Some(200));
    assert_eq!(body.available, Some(150));

    let res = server
        .post("/api/wallet/withdraw")
        .add_header("Authorization", worker.bearer())
        .json(&json!({ "amount": 120 }))
        .await;
    res.assert_status_ok();
    let movement = res.json::<WalletMovement>();
    assert_eq!(movement.balance, 30);
    assert_eq!(movement.entry.category, TransactionCategory::Withdrawal);
    assert_eq!(movement.entry.direction, Direction::Debit);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&worker.user.id),
    )
    .await;
});

test_with_server!(concurrent_withdrawals_never_overdraw, |server, ctx_state, config| {
    let worker = create_user(&ctx_state, UserRole::User).await;
    credit_wallet(&ctx_state, &worker.user.id, 300).await;

    let requests = (0..5).map(|_| {
        server
            .post("/api/wallet/withdraw")
            .add_header("Authorization", worker.bearer())
            .json(&json!({ "amount": 100 }))
    });
    let responses = join_all(requests.map(|r| async move { r.await })).await;
    let succeeded = responses
        .iter()
        .filter(|r| r.status_code().is_success())
        .count();
    assert_eq!(succeeded, 3);
    assert_eq!(user_balance(&ctx_state, &worker.user.id).await, 0);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&worker.user.id),
    )
    .await;
});

test_with_server!(concurrent_topups_all_land, |server, ctx_state, config| {
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let responses = join_all((0..6).map(|_| topup(&server, &advertiser, 100))).await;
    assert!(responses.iter().all(|r| r.status_code().is_success()));
    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 600);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&advertiser.user.id),
    )
    .await;
});

test_with_server!(wallet_view_filters_and_counts, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1500).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;
    approve_task(&server, &admin, &task).await.assert_status_ok();

    let res = server
        .get("/api/wallet")
        .add_header("Authorization", advertiser.bearer())
        .await;
    res.assert_status_ok();
    let view = res.json::<WalletView>();
    assert_eq!(view.balance, 300);
    assert_eq!(view.total, 2);
    assert_eq!(view.transactions.len(), 2);
    assert_eq!(view.statistics.total_credits, 1500);
    assert_eq!(view.statistics.total_debits, 1200);
    assert_eq!(view.statistics.total_topups, 1500);
    assert_eq!(view.statistics.total_task_spend, 1200);
    assert_eq!(view.statistics.transaction_count, 2);

    let res = server
        .get("/api/wallet")
        .add_query_param("type", "debit")
        .add_header("Authorization", advertiser.bearer())
        .await;
    res.assert_status_ok();
    let view = res.json::<WalletView>();
    assert_eq!(view.total, 1);
    assert_eq!(view.transactions[0].category, TransactionCategory::TaskPaymentAdvertiser);

    let res = server
        .get("/api/wallet")
        .add_query_param("start", "1")
        .add_query_param("count", "1")
        .add_header("Authorization", advertiser.bearer())
        .await;
    let view = res.json::<WalletView>();
    assert_eq!(view.total, 2);
    assert_eq!(view.transactions.len(), 1);

    let res = server
        .get("/api/wallet")
        .add_query_param("from", "2020-01-01")
        .add_query_param("to", "2020-01-31")
        .add_header("Authorization", advertiser.bearer())
        .await;
    let view = res.json::<WalletView>();
    assert_eq!(view.total, 0);
    assert_eq!(view.balance, 300);

    server
        .get("/api/wallet")
        .add_query_param("from", "yesterday")
        .add_header("Authorization", advertiser.bearer())
        .await
        .assert_status_bad_request();
});

test_with_server!(payout_report_sums_platform_revenue, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let worker = create_user(&ctx_state, UserRole::User).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;
    approve_task(&server, &admin, &task).await.assert_status_ok();
    let (_, submission) = claim_and_submit(&server, &worker, &task).await;
    review_submission(&server, &admin, &submission, "approve")
        .await
        .assert_status_ok();
    server
        .post("/api/kyc")
        .add_header("Authorization", worker.bearer())
        .json(&json!({ "payment_status": "paid" }))
        .await
        .assert_status_ok();

    let res = server
        .get("/api/admin/payouts")
        .add_query_param("revenue_period", "today")
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    let report = res.json::<PayoutReport>();
    assert_eq!(report.total, 4);
    assert_eq!(report.revenue.kyc_revenue, 99);
    assert_eq!(report.revenue.task_platform_fees, 200);
    assert_eq!(report.revenue.reactivation_revenue, 0);
    assert_eq!(report.revenue.total_revenue, 299);
    assert_eq!(report.net_balance.total_credits, 1200 + 100 + 99);
    assert_eq!(report.net_balance.total_debits, 1200);

    let again = server
        .get("/api/admin/payouts")
        .add_query_param("revenue_period", "today")
        .add_header("Authorization", admin.bearer())
        .await
        .json::<PayoutReport>();
    assert_eq!(again.revenue, report.revenue);
    assert_eq!(again.net_balance, report.net_balance);

    let res = server
        .get("/api/admin/payouts")
        .add_query_param("category", "kyc_fee_platform")
        .add_header("Authorization", admin.bearer())
        .await;
    let report = res.json::<PayoutReport>();
    assert_eq!(report.total, 1);
    assert_eq!(report.transactions[0].category, TransactionCategory::KycFeePlatform);
    assert_eq!(report.revenue, again.revenue);

    let credits_only = server
        .get("/api/admin/payouts")
        .add_query_param("revenue_period", "today")
        .add_query_param("type", "credit")
        .add_query_param("search", "nothing matches this")
        .add_header("Authorization", admin.bearer())
        .await
        .json::<PayoutReport>();
    assert_eq!(credits_only.total, 0);
    assert_eq!(credits_only.revenue.task_platform_fees, 200);
    assert_eq!(credits_only.revenue.total_revenue, 299);
    assert_eq!(credits_only.net_balance, again.net_balance);

    server
        .get("/api/admin/payouts")
        .add_header("Authorization", advertiser.bearer())
        .await
        .assert_status_forbidden();
});

test_with_server!(reactivation_charges_fee_once, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let inactive = create_test_user(&ctx_state, UserRole::User, None, false).await;

    let res = server
        .post(&format!(
            "/api/admin/users/{}/reactivate",
            record_key(&inactive.user.id)
        ))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    let movement = res.json::<WalletMovement>();
    assert_eq!(movement.entry.category, TransactionCategory::AccountReactivation);
    assert_eq!(movement.entry.amount, 49);
    assert_eq!(movement.entry.related_user.as_ref(), Some(&inactive.user.id));
    assert_eq!(wallet_balance(&ctx_state, &PLATFORM_WALLET).await, 49);

    let ctx = Ctx::system("test");
    let user = LocalUserDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get(&inactive.user.id)
    .await
    .unwrap();
    assert!(user.is_active);

    let res = server
        .post(&format!(
            "/api/admin/users/{}/reactivate",
            record_key(&inactive.user.id)
        ))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_bad_request();
    assert_eq!(wallet_balance(&ctx_state, &PLATFORM_WALLET).await, 49);
    assert_wallet_conserved(&ctx_state, &PLATFORM_WALLET).await;

    server
        .post("/api/admin/users/missing/reactivate")
        .add_header("Authorization", admin.bearer())
        .await
        .assert_status_not_found();
});

test_with_server!(health_check_reports_version, |server, ctx_state, config| {
    let res = server.get("/hc").await;
    res.assert_status_ok();
    assert!(res.text().starts_with('v'));
});
