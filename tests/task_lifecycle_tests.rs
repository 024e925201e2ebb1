mod helpers;

use futures::future::join_all;
use serde_json::json;
use taskearn_server::entities::admin_action_entity::{AdminActionDbService, AdminActionType};
use taskearn_server::entities::task::archived_task_entity::ArchivedTaskDbService;
use taskearn_server::entities::task::task_entity::{Task, TaskDbService, TaskStatus};
use taskearn_server::entities::task::task_submission_entity::TaskSubmission;
use taskearn_server::entities::user_auth::advertiser_profile_entity::AdvertiserProfileDbService;
use taskearn_server::entities::user_auth::local_user_entity::UserRole;
use taskearn_server::entities::wallet::balance_transaction_entity::{
    Direction, TransactionCategory, TransactionFilter,
};
use taskearn_server::entities::wallet::wallet_entity::WalletDbService;
use taskearn_server::middleware::ctx::Ctx;
use taskearn_server::middleware::error::ErrorResponseBody;
use taskearn_server::services::task_service::{TaskApproval, TaskCompletion, TaskDeletion};

use crate::helpers::task_helpers::{
    approve_task, claim_and_submit, claim_task, create_task, review_submission, submit_proof,
};
use crate::helpers::{
    assert_wallet_conserved, create_user, ledger_entries, record_key, topup, user_balance,
    wallet_entries,
};

test_with_server!(approve_locks_exact_budget, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();

    let task = create_task(&server, &advertiser, 100, 10).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.advertiser_cost, 120);
    assert_eq!(task.total_budget(), 1200);
    assert!(!task.payment_done);

    let res = approve_task(&server, &admin, &task).await;
    res.assert_status_ok();
    let approval = res.json::<TaskApproval>();
    assert_eq!(approval.task.status, TaskStatus::Approved);
    assert!(approval.task.payment_done);
    assert_eq!(approval.budget_locked, 1200);
    assert!(approval.charged);

    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 0);
    let debits = ledger_entries(
        &ctx_state,
        TransactionFilter {
            category: Some(TransactionCategory::TaskPaymentAdvertiser),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, 1200);
    assert_eq!(debits[0].direction, Direction::Debit);
    assert_eq!(debits[0].related_task.as_ref(), Some(&task.id));
    assert_eq!(debits[0].balance_before, 1200);
    assert_eq!(debits[0].balance_after, 0);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&advertiser.user.id),
    )
    .await;

    let ctx = Ctx::system("test");
    let profile = AdvertiserProfileDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get(&advertiser.user.id)
    .await
    .unwrap()
    .unwrap();
    assert_eq!(profile.total_tasks, 1);
    assert_eq!(profile.active_tasks, 1);

    let logs = AdminActionDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get_by_target(&task.id)
    .await
    .unwrap();
    assert!(logs.iter().any(|l| l.action == AdminActionType::TaskApprove));

    let again = approve_task(&server, &admin, &task).await;
    again.assert_status_bad_request();
    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 0);
});

test_with_server!(approve_with_low_balance_changes_nothing, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1000).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;

    let res = approve_task(&server, &admin, &task).await;
    res.assert_status_bad_request();
    let body = res.json::<ErrorResponseBody>();
    assert_eq!(body.code, "INSUFFICIENT_FUNDS");
    assert_eq!(body.required, Some(1200));
    assert_eq!(body.available, Some(1000));
    assert_eq!(body.shortfall, Some(200));

    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 1000);
    let entries = wallet_entries(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&advertiser.user.id),
    )
    .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, TransactionCategory::WalletTopup);

    let ctx = Ctx::system("test");
    let stored = TaskDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get(&task.id)
    .await
    .unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert!(!stored.payment_done);
});

test_with_server!(only_admins_approve, |server, ctx_state, config| {
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;

    let res = approve_task(&server, &advertiser, &task).await;
    res.assert_status_forbidden();

    let user = create_user(&ctx_state, UserRole::User).await;
    let res = server
        .post("/api/tasks")
        .add_header("Authorization", user.bearer())
        .json(&json!({ "title": "Task", "type": "social", "rate_to_user": 100, "limit_count": 1 }))
        .await;
    res.assert_status_forbidden();

    let res = server
        .post("/api/tasks")
        .json(&json!({ "title": "Task", "type": "social", "rate_to_user": 100, "limit_count": 1 }))
        .await;
    res.assert_status_unauthorized();
});

test_with_server!(invalid_task_input_is_rejected, |server, ctx_state, config| {
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    for body in [
        json!({ "title": "ab", "type": "social", "rate_to_user": 100, "limit_count": 1 }),
        json!({ "title": "Task", "type": "social", "rate_to_user": 0, "limit_count": 1 }),
        json!({ "title": "Task", "type": "social", "rate_to_user": 7, "limit_count": 1 }),
        json!({ "title": "Task", "type": "social", "rate_to_user": 100, "limit_count": 0 }),
    ] {
        let res = server
            .post("/api/tasks")
            .add_header("Authorization", advertiser.bearer())
            .json(&body)
            .await;
        res.assert_status_bad_request();
        assert_eq!(res.json::<ErrorResponseBody>().code, "VALIDATION_ERROR");
    }
});

test_with_server!(admin_created_task_is_approved_from_admin_wallet, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    topup(&server, &admin, 600).await.assert_status_ok();

    let task = create_task(&server, &admin, 50, 10).await;
    assert_eq!(task.status, TaskStatus::Approved);
    assert!(task.payment_done);
    assert_eq!(user_balance(&ctx_state, &admin.user.id).await, 0);
});

test_with_server!(pause_blocks_claims_until_resumed, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let worker = create_user(&ctx_state, UserRole::User).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;
    approve_task(&server, &admin, &task).await.assert_status_ok();

    let res = server
        .post(&format!("/api/admin/tasks/{}/pause", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    assert_eq!(res.json::<Task>().status, TaskStatus::Paused);

    let res = server
        .post(&format!("/api/admin/tasks/{}/pause", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_bad_request();

    claim_task(&server, &worker, &task)
        .await
        .assert_status_bad_request();

    let res = server
        .post(&format!("/api/admin/tasks/{}/resume", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    assert_eq!(res.json::<Task>().status, TaskStatus::Approved);

    claim_task(&server, &worker, &task).await.assert_status_ok();
    claim_task(&server, &worker, &task)
        .await
        .assert_status_bad_request();
});

test_with_server!(complete_refunds_unused_budget, |server, ctx_state, config| {
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

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "reason": "campaign over", "refund_remaining": true }))
        .await;
    res.assert_status_ok();
    let completion = res.json::<TaskCompletion>();
    assert_eq!(completion.task.status, TaskStatus::Completed);
    assert_eq!(completion.refunded, 1100);
    assert_eq!(completion.task.refunded_amount, Some(1100));
    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 1100);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&advertiser.user.id),
    )
    .await;

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "refund_remaining": true }))
        .await;
    res.assert_status_bad_request();
    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 1100);
});

test_with_server!(pending_task_needs_force_to_complete, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let task = create_task(&server, &advertiser, 100, 10).await;

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({}))
        .await;
    res.assert_status_bad_request();

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "force_complete": true, "refund_remaining": true }))
        .await;
    res.assert_status_ok();
    let completion = res.json::<TaskCompletion>();
    assert_eq!(completion.refunded, 0);
    assert_eq!(completion.task.force_completed, Some(true));
});

test_with_server!(delete_archives_task, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    let worker = create_user(&ctx_state, UserRole::User).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;
    approve_task(&server, &admin, &task).await.assert_status_ok();
    claim_task(&server, &worker, &task).await.assert_status_ok();

    let res = server
        .delete(&format!("/api/admin/tasks/{}", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "reason": "spam", "confirm_delete": true }))
        .await;
    res.assert_status_bad_request();

    let submit = submit_proof(&server, &worker, &task).await;
    submit.assert_status_ok();
    let submission = submit.json::<TaskSubmission>();
    review_submission(&server, &admin, &submission, "reject")
        .await
        .assert_status_ok();

    let res = server
        .delete(&format!("/api/admin/tasks/{}", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "reason": "spam" }))
        .await;
    res.assert_status_bad_request();

    let res = server
        .delete(&format!("/api/admin/tasks/{}", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "reason": "spam", "confirm_delete": true }))
        .await;
    res.assert_status_ok();
    let deletion = res.json::<TaskDeletion>();
    assert!(deletion.deleted);
    assert_eq!(deletion.archive.delete_reason, "spam");
    assert_eq!(deletion.archive.removed_assignments, 1);
    assert_eq!(deletion.archive.removed_submissions, 1);
    assert_eq!(deletion.archive.task.id, task.id);

    let ctx = Ctx::system("test");
    let archived = ArchivedTaskDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get(&task.id)
    .await
    .unwrap();
    assert!(archived.is_some());
    let missing = TaskDbService {
        db: &ctx_state.db.client,
        ctx: &ctx,
    }
    .get(&task.id)
    .await;
    assert!(missing.is_err());

    claim_task(&server, &worker, &task).await.assert_status_not_found();
});

test_with_server!(concurrent_claims_respect_limit, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 240).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 2).await;
    approve_task(&server, &admin, &task).await.assert_status_ok();

    let mut workers = vec![];
    for _ in 0..5 {
        workers.push(create_user(&ctx_state, UserRole::User).await);
    }
    let responses = join_all(workers.iter().map(|w| claim_task(&server, w, &task))).await;
    let claimed = responses
        .iter()
        .filter(|r| r.status_code().is_success())
        .count();
    assert_eq!(claimed, 2);
    assert!(responses
        .iter()
        .filter(|r| !r.status_code().is_success())
        .all(|r| r.status_code().is_client_error()));
});

test_with_server!(concurrent_approvals_lock_budget_once, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let first = create_task(&server, &advertiser, 100, 10).await;
    let second = create_task(&server, &advertiser, 100, 10).await;

    let responses = join_all([
        approve_task(&server, &admin, &first),
        approve_task(&server, &admin, &second),
    ])
    .await;
    let approved = responses
        .iter()
        .filter(|r| r.status_code().is_success())
        .count();
    assert_eq!(approved, 1);
    let rejected = responses
        .iter()
        .find(|r| !r.status_code().is_success())
        .unwrap();
    assert_eq!(rejected.status_code(), 400);
    let body = rejected.json::<ErrorResponseBody>();
    assert_eq!(body.code, "INSUFFICIENT_FUNDS");
    assert_eq!(body.required, Some(1200));
    assert_eq!(body.available, Some(0));

    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 0);
    let debits = ledger_entries(
        &ctx_state,
        TransactionFilter {
            wallet: Some(WalletDbService::get_user_wallet_id(&advertiser.user.id)),
            direction: Some(Direction::Debit),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(debits.len(), 1);
    assert_wallet_conserved(
        &ctx_state,
        &WalletDbService::get_user_wallet_id(&advertiser.user.id),
    )
    .await;
});

test_with_server!(admin_actions_accept_empty_body, |server, ctx_state, config| {
    let admin = create_user(&ctx_state, UserRole::Admin).await;
    let advertiser = create_user(&ctx_state, UserRole::Advertiser).await;
    topup(&server, &advertiser, 1200).await.assert_status_ok();
    let task = create_task(&server, &advertiser, 100, 10).await;

    let res = server
        .post(&format!("/api/admin/tasks/{}/approve", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    let approval = res.json::<TaskApproval>();
    assert_eq!(approval.task.status, TaskStatus::Approved);
    assert_eq!(approval.task.approval_note, None);

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .await;
    res.assert_status_ok();
    let completion = res.json::<TaskCompletion>();
    assert_eq!(completion.task.status, TaskStatus::Completed);
    assert_eq!(user_balance(&ctx_state, &advertiser.user.id).await, 0);

    let res = server
        .post(&format!("/api/admin/tasks/{}/complete", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .text("force")
        .await;
    res.assert_status(axum::http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        res.json::<ErrorResponseBody>().code,
        "UNSUPPORTED_MEDIA_TYPE"
    );
});
