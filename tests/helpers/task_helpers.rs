use axum_test::{TestResponse, TestServer};
use serde_json::json;
use taskearn_server::entities::task::task_assignment_entity::TaskAssignment;
use taskearn_server::entities::task::task_entity::Task;
use taskearn_server::entities::task::task_submission_entity::TaskSubmission;

use super::{record_key, TestUser};

#[allow(dead_code)]
pub async fn create_task(server: &TestServer, owner: &TestUser, rate: i64, limit: i64) -> Task {
    let res = server
        .post("/api/tasks")
        .add_header("Authorization", owner.bearer())
        .json(&json!({
            "title": "Follow our page",
            "description": "Follow and screenshot",
            "type": "social",
            "rate_to_user": rate,
            "limit_count": limit,
        }))
        .await;
    res.assert_status_ok();
    res.json::<Task>()
}

#[allow(dead_code)]
pub async fn approve_task(server: &TestServer, admin: &TestUser, task: &Task) -> TestResponse {
    server
        .post(&format!("/api/admin/tasks/{}/approve", record_key(&task.id)))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "note": "looks fine" }))
        .await
}

#[allow(dead_code)]
pub async fn claim_task(server: &TestServer, user: &TestUser, task: &Task) -> TestResponse {
    server
        .post(&format!("/api/tasks/{}/claim", record_key(&task.id)))
        .add_header("Authorization", user.bearer())
        .await
}

#[allow(dead_code)]
pub async fn submit_proof(server: &TestServer, user: &TestUser, task: &Task) -> TestResponse {
    server
        .post(&format!("/api/tasks/{}/submissions", record_key(&task.id)))
        .add_header("Authorization", user.bearer())
        .json(&json!({ "proof_data": "https://img.example.com/proof.png" }))
        .await
}

/// Claims and submits, returning the pending submission.
#[allow(dead_code)]
pub async fn claim_and_submit(
    server: &TestServer,
    user: &TestUser,
    task: &Task,
) -> (TaskAssignment, TaskSubmission) {
    let claim = claim_task(server, user, task).await;
    claim.assert_status_ok();
    let submit = submit_proof(server, user, task).await;
    submit.assert_status_ok();
    (claim.json::<TaskAssignment>(), submit.json::<TaskSubmission>())
}

#[allow(dead_code)]
pub async fn review_submission(
    server: &TestServer,
    admin: &TestUser,
    submission: &TaskSubmission,
    action: &str,
) -> TestResponse {
    server
        .post(&format!(
            "/api/admin/submissions/{}/review",
            record_key(&submission.id)
        ))
        .add_header("Authorization", admin.bearer())
        .json(&json!({ "action": action, "feedback": "checked" }))
        .await
}
