use serde::{Deserialize, Serialize};
use surrealdb::sql::{Id, Thing};
use tracing::info;
use validator::Validate;

use crate::{
    database::{
        client::Db,
        surrdb_utils::{
            run_transaction, throw_stmt, with_tx_retries, TransactionQry, THROW_CONFLICT,
            THROW_INVALID_STATE, THROW_NOT_FOUND,
        },
    },
    entities::{
        admin_action_entity::{AdminActionDbService, AdminActionType},
        task::{
            archived_task_entity::{ArchivedTask, ArchivedTaskDbService},
            task_assignment_entity::{
                self, AssignmentStatus, TaskAssignment, TaskAssignmentDbService,
            },
            task_entity::{self, compute_advertiser_cost, Task, TaskCreate, TaskDbService, TaskStatus, TaskType},
            task_submission_entity::{self, SubmissionStatus, TaskSubmission, TaskSubmissionDbService},
        },
        user_auth::{
            advertiser_profile_entity::{AdvertiserProfileDbService, CounterChange},
            local_user_entity::{LocalUser, LocalUserDbService, UserRole},
        },
        wallet::{
            balance_transaction_entity::{
                BalanceTransactionDbService, LedgerEntrySpec, TransactionCategory, WalletDelta,
            },
            wallet_entity::WalletDbService,
        },
    },
    middleware::{
        ctx::Ctx,
        error::{AppError, AppResult, CtxError, CtxResult},
        utils::{
            db_utils::{opt_value, to_binding_value},
            string_utils::non_empty,
        },
    },
};

const TASK_TABLE: &str = task_entity::TABLE_NAME;
const ASSIGNMENT_TABLE: &str = task_assignment_entity::TABLE_NAME;
const SUBMISSION_TABLE: &str = task_submission_entity::TABLE_NAME;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct TaskInput {
    #[validate(length(min = 3, message = "Min 3 characters for title"))]
    pub title: String,
    pub description: Option<String>,
    pub r#type: TaskType,
    #[validate(range(min = 1, message = "rate_to_user must be positive"))]
    pub rate_to_user: i64,
    #[validate(range(min = 1, max = 100000, message = "limit_count must be between 1 and 100000"))]
    pub limit_count: i64,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct ApproveInput {
    #[validate(length(max = 500, message = "Max 500 characters for note"))]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct CompleteInput {
    #[serde(default)]
    pub force_complete: bool,
    #[validate(length(max = 500, message = "Max 500 characters for reason"))]
    pub reason: Option<String>,
    #[serde(default)]
    pub refund_remaining: bool,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct DeleteInput {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confirm_delete: bool,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SubmitInput {
    #[validate(length(min = 1, message = "proof_data is required"))]
    pub proof_data: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskApproval {
    pub task: Task,
    pub budget_locked: i64,
    /// False when the budget was charged before this approval.
    pub charged: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskCompletion {
    pub task: Task,
    pub refunded: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskDeletion {
    pub deleted: bool,
    pub archive: ArchivedTask,
}

fn load_task_qry(task_id: &Thing) -> String {
    format!(
        "LET $task = (SELECT * FROM $task_id)[0];\nIF $task = NONE {{ {} }};",
        throw_stmt(THROW_NOT_FOUND, &task_id.to_raw())
    )
}

fn status_unchanged_qry() -> String {
    format!(
        "IF $task.status != $expected_status {{ {} }};",
        throw_stmt(THROW_CONFLICT, "task status changed")
    )
}

fn check_approvable(task: &Task) -> AppResult<()> {
    match task.status {
        TaskStatus::Pending => Ok(()),
        TaskStatus::Approved => Err(AppError::InvalidState {
            description: "Task is already approved".to_string(),
        }),
        other => Err(AppError::InvalidState {
            description: format!("Task is {other} and can not be approved"),
        }),
    }
}

fn check_completable(task: &Task, force_complete: bool) -> AppResult<()> {
    match task.status {
        TaskStatus::Approved => Ok(()),
        TaskStatus::Completed => Err(AppError::InvalidState {
            description: "Task is already completed".to_string(),
        }),
        TaskStatus::Cancelled => Err(AppError::InvalidState {
            description: "Cancelled task can not be completed".to_string(),
        }),
        _ if force_complete => Ok(()),
        _ => Err(AppError::InvalidState {
            description: "Task is not approved".to_string(),
        }),
    }
}

fn running_counter(task: &Task) -> i64 {
    if task.is_running() {
        -1
    } else {
        0
    }
}

pub struct TaskService<'a> {
    db: &'a Db,
    ctx: &'a Ctx,
    tx_retries: u8,
    tasks_repository: TaskDbService<'a>,
    assignments_repository: TaskAssignmentDbService<'a>,
    submissions_repository: TaskSubmissionDbService<'a>,
    users_repository: LocalUserDbService<'a>,
    wallets_repository: WalletDbService<'a>,
}

impl<'a> TaskService<'a> {
    pub fn new(db: &'a Db, ctx: &'a Ctx, tx_retries: u8) -> Self {
        Self {
            db,
            ctx,
            tx_retries,
            tasks_repository: TaskDbService { db, ctx },
            assignments_repository: TaskAssignmentDbService { db, ctx },
            submissions_repository: TaskSubmissionDbService { db, ctx },
            users_repository: LocalUserDbService { db, ctx },
            wallets_repository: WalletDbService { db, ctx },
        }
    }

    /// Creates a pending task. Tasks created by an admin are approved right
    /// away from the admin's own wallet.
    pub async fn create(&self, input: TaskInput) -> CtxResult<Task> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let owner = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Advertiser, UserRole::Admin])
            .await?;

        let title = input.title.trim().to_string();
        if title.chars().count() < 3 {
            return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                description: "Min 3 characters for title".to_string(),
            }));
        }
        let advertiser_cost =
            compute_advertiser_cost(input.rate_to_user).map_err(CtxError::from(self.ctx))?;

        let task_id = Thing::from((TASK_TABLE.to_string(), Id::ulid()));
        let data = TaskCreate {
            title,
            description: non_empty(input.description),
            r#type: input.r#type,
            rate_to_user: input.rate_to_user,
            advertiser_cost,
            limit_count: input.limit_count,
            status: TaskStatus::Pending,
            payment_done: false,
            owner: owner.id.clone(),
            owner_email: owner.email.clone(),
        };

        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("owner", owner.id.clone())
            .bind(
                "data",
                to_binding_value(data).map_err(CtxError::from(self.ctx))?,
            )
            .push(AdvertiserProfileDbService::get_counter_update_qry(
                "$owner",
                &CounterChange {
                    total_tasks: 1,
                    active_tasks: 0,
                    completed_tasks: 0,
                },
            ));
        if owner.is_admin() {
            tx.push_qry(AdminActionDbService::get_log_qry(
                "log",
                &owner,
                AdminActionType::TaskCreate,
                &task_id,
                None,
                None,
            ));
        }
        tx.push("CREATE ONLY $task_id CONTENT $data;");

        let task: Task = run_transaction::<Task>(self.db, tx)
            .await
            .map_err(CtxError::from(self.ctx))?
            .ok_or_else(|| {
                self.ctx.to_ctx_error(AppError::Generic {
                    description: "task not created".to_string(),
                })
            })?;
        info!(task = %task.id, owner = %owner.email, budget = task.total_budget(), "task created");

        if owner.is_admin() {
            let approval = self
                .approve(
                    &task.id,
                    ApproveInput {
                        note: Some("Approved on creation".to_string()),
                    },
                )
                .await?;
            return Ok(approval.task);
        }
        Ok(task)
    }

    pub async fn approve(&self, task_id: &Thing, input: ApproveInput) -> CtxResult<TaskApproval> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let approver = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        let note = non_empty(input.note);
        with_tx_retries(self.tx_retries, "task_approve", || {
            self.approve_once(task_id, &approver, note.clone())
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn approve_once(
        &self,
        task_id: &Thing,
        approver: &LocalUser,
        note: Option<String>,
    ) -> AppResult<TaskApproval> {
        let task = self.tasks_repository.get(task_id).await?;
        check_approvable(&task)?;

        let budget = task.total_budget();
        let available = self.wallets_repository.get_user_balance(&task.owner).await?;
        if available < budget {
            return Err(AppError::InsufficientFunds {
                required: budget,
                available,
            });
        }

        let owner_wallet = WalletDbService::get_user_wallet_id(&task.owner);
        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("expected_status", task.status.to_string())
            .bind("payment_done", task.payment_done)
            .bind("approver", approver.actor())
            .bind("note", opt_value(note.clone()))
            .bind("owner", task.owner.clone())
            .push(load_task_qry(task_id))
            .push(format!(
                "IF $task.status = '{}' {{ {} }};",
                TaskStatus::Approved,
                throw_stmt(THROW_INVALID_STATE, "Task is already approved")
            ))
            .push(status_unchanged_qry())
            .push(format!(
                "IF $task.payment_done != $payment_done {{ {} }};",
                throw_stmt(THROW_CONFLICT, "task payment changed")
            ));

        if task.payment_done {
            tx.push_qry(WalletDbService::get_sufficient_balance_qry(
                "owner",
                &owner_wallet,
                budget,
            ));
        } else {
            let delta = WalletDelta::single(
                owner_wallet,
                LedgerEntrySpec::new(TransactionCategory::TaskPaymentAdvertiser, budget)
                    .task(task_id)
                    .user(&task.owner)
                    .description(format!("Budget for task {}", task.title)),
            );
            tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
                "owner",
                &delta,
                &approver.actor(),
            )?);
        }

        tx.push(AdvertiserProfileDbService::get_counter_update_qry(
            "$owner",
            &CounterChange {
                total_tasks: 0,
                active_tasks: 1,
                completed_tasks: 0,
            },
        ))
        .push_qry(AdminActionDbService::get_log_qry(
            "log",
            approver,
            AdminActionType::TaskApprove,
            task_id,
            note,
            Some(format!("budget={budget}")),
        ))
        .push(
            "UPDATE ONLY $task_id SET status = 'approved', payment_done = true, \
             approved_at = $event_at, approved_by = $approver, approval_note = $note;",
        );

        let updated = run_transaction::<Task>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::EntityFailIdNotFound {
                ident: task_id.to_raw(),
            })?;
        info!(
            task = %task_id,
            budget,
            charged = !task.payment_done,
            approver = %approver.email,
            "task approved"
        );
        Ok(TaskApproval {
            task: updated,
            budget_locked: budget,
            charged: !task.payment_done,
        })
    }

    pub async fn pause(&self, task_id: &Thing) -> CtxResult<Task> {
        self.set_running_status(task_id, TaskStatus::Approved, TaskStatus::Paused)
            .await
    }

    pub async fn resume(&self, task_id: &Thing) -> CtxResult<Task> {
        self.set_running_status(task_id, TaskStatus::Paused, TaskStatus::Approved)
            .await
    }

    async fn set_running_status(
        &self,
        task_id: &Thing,
        from: TaskStatus,
        to: TaskStatus,
    ) -> CtxResult<Task> {
        let admin = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        with_tx_retries(self.tx_retries, "task_set_running_status", || {
            self.set_running_status_once(task_id, &admin, from, to)
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn set_running_status_once(
        &self,
        task_id: &Thing,
        admin: &LocalUser,
        from: TaskStatus,
        to: TaskStatus,
    ) -> AppResult<Task> {
        let (invalid_msg, action, paused_at) = match to {
            TaskStatus::Paused => (
                "Only approved tasks can be paused",
                AdminActionType::TaskPause,
                "$event_at",
            ),
            _ => (
                "Only paused tasks can be resumed",
                AdminActionType::TaskResume,
                "NONE",
            ),
        };
        let task = self.tasks_repository.get(task_id).await?;
        if task.status != from {
            return Err(AppError::InvalidState {
                description: invalid_msg.to_string(),
            });
        }

        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("expected_status", from.to_string())
            .bind("next_status", to.to_string())
            .push(load_task_qry(task_id))
            .push(format!(
                "IF $task.status != $expected_status {{ {} }};",
                throw_stmt(THROW_INVALID_STATE, invalid_msg)
            ))
            .push_qry(AdminActionDbService::get_log_qry(
                "log", admin, action, task_id, None, None,
            ))
            .push(format!(
                "UPDATE ONLY $task_id SET status = $next_status, paused_at = {paused_at};"
            ));

        let updated = run_transaction::<Task>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::EntityFailIdNotFound {
                ident: task_id.to_raw(),
            })?;
        info!(task = %task_id, from = %from, to = %to, "task status changed");
        Ok(updated)
    }

    pub async fn complete(&self, task_id: &Thing, input: CompleteInput) -> CtxResult<TaskCompletion> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let completer = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        let input = CompleteInput {
            reason: non_empty(input.reason),
            ..input
        };
        with_tx_retries(self.tx_retries, "task_complete", || {
            self.complete_once(task_id, &completer, &input)
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn complete_once(
        &self,
        task_id: &Thing,
        completer: &LocalUser,
        input: &CompleteInput,
    ) -> AppResult<TaskCompletion> {
        let task = self.tasks_repository.get(task_id).await?;
        check_completable(&task, input.force_complete)?;

        let completed = self
            .assignments_repository
            .count_with_status(task_id, &[AssignmentStatus::Completed])
            .await?;
        let refund = if input.refund_remaining && task.payment_done {
            task.remaining_budget(completed).max(0)
        } else {
            0
        };

        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("expected_status", task.status.to_string())
            .bind("payment_done", task.payment_done)
            .bind("expected_completed", completed)
            .bind("owner", task.owner.clone())
            .bind("completer", completer.actor())
            .bind("reason", opt_value(input.reason.clone()))
            .bind("force", input.force_complete)
            .bind("refunded", opt_value((refund > 0).then_some(refund)))
            .push(load_task_qry(task_id))
            .push(status_unchanged_qry())
            .push(format!(
                "IF $task.payment_done != $payment_done {{ {} }};",
                throw_stmt(THROW_CONFLICT, "task payment changed")
            ))
            .push(format!(
                "LET $completed_now = array::len((SELECT id FROM {ASSIGNMENT_TABLE} WHERE task = $task_id AND status = '{}'));",
                AssignmentStatus::Completed
            ))
            .push(format!(
                "IF $completed_now != $expected_completed {{ {} }};",
                throw_stmt(THROW_CONFLICT, "completed assignments changed")
            ));

        if refund > 0 {
            let delta = WalletDelta::single(
                WalletDbService::get_user_wallet_id(&task.owner),
                LedgerEntrySpec::new(TransactionCategory::TaskPaymentRefund, refund)
                    .task(task_id)
                    .user(&task.owner)
                    .description(format!("Unused budget of task {}", task.title)),
            );
            tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
                "owner",
                &delta,
                &completer.actor(),
            )?);
        }

        tx.push(AdvertiserProfileDbService::get_counter_update_qry(
            "$owner",
            &CounterChange {
                total_tasks: 0,
                active_tasks: running_counter(&task),
                completed_tasks: 1,
            },
        ))
        .push_qry(AdminActionDbService::get_log_qry(
            "log",
            completer,
            AdminActionType::TaskComplete,
            task_id,
            input.reason.clone(),
            Some(format!(
                "refunded={refund};force_complete={}",
                input.force_complete
            )),
        ))
        .push(
            "UPDATE ONLY $task_id SET status = 'completed', completed_at = $event_at, \
             completed_by = $completer, completion_reason = $reason, force_completed = $force, \
             refunded_amount = $refunded;",
        );

        let updated = run_transaction::<Task>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::EntityFailIdNotFound {
                ident: task_id.to_raw(),
            })?;
        info!(task = %task_id, completed, refund, "task completed");
        Ok(TaskCompletion {
            task: updated,
            refunded: refund,
        })
    }

    /// Archives the task and removes its assignments and submissions.
    /// Charged budget stays with the platform.
    pub async fn delete(&self, task_id: &Thing, input: DeleteInput) -> CtxResult<TaskDeletion> {
        let admin = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        let reason = input.reason.trim().to_string();
        if reason.is_empty() {
            return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                description: "Delete reason is required".to_string(),
            }));
        }
        if !input.confirm_delete {
            return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                description: "confirm_delete must be true".to_string(),
            }));
        }
        with_tx_retries(self.tx_retries, "task_delete", || {
            self.delete_once(task_id, &admin, &reason)
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn delete_once(
        &self,
        task_id: &Thing,
        admin: &LocalUser,
        reason: &str,
    ) -> AppResult<TaskDeletion> {
        let task = self.tasks_repository.get(task_id).await?;
        let active = self
            .assignments_repository
            .count_with_status(task_id, &[AssignmentStatus::Active])
            .await?;
        if active > 0 {
            return Err(AppError::InvalidState {
                description: format!("Task has {active} active assignments"),
            });
        }
        let pending = self
            .submissions_repository
            .get_by_task(task_id, Some(SubmissionStatus::Pending), None)
            .await?
            .len();
        if pending > 0 {
            return Err(AppError::InvalidState {
                description: format!("Task has {pending} pending submissions"),
            });
        }

        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("archive_id", ArchivedTaskDbService::get_archive_id(task_id))
            .bind("expected_status", task.status.to_string())
            .bind("owner", task.owner.clone())
            .bind("deleted_by", admin.actor())
            .bind("reason", reason.to_string())
            .push(load_task_qry(task_id))
            .push(status_unchanged_qry())
            .push(format!(
                "IF array::len((SELECT id FROM {ASSIGNMENT_TABLE} WHERE task = $task_id AND status = '{}')) > 0 {{ {} }};",
                AssignmentStatus::Active,
                throw_stmt(THROW_INVALID_STATE, "Task has active assignments")
            ))
            .push(format!(
                "IF array::len((SELECT id FROM {SUBMISSION_TABLE} WHERE task = $task_id AND status = '{}')) > 0 {{ {} }};",
                SubmissionStatus::Pending,
                throw_stmt(THROW_INVALID_STATE, "Task has pending submissions")
            ))
            .push(format!(
                "LET $removed_submissions = array::len((DELETE {SUBMISSION_TABLE} WHERE task = $task_id RETURN BEFORE));"
            ))
            .push(format!(
                "LET $removed_assignments = array::len((DELETE {ASSIGNMENT_TABLE} WHERE task = $task_id RETURN BEFORE));"
            ))
            .push(AdvertiserProfileDbService::get_counter_update_qry(
                "$owner",
                &CounterChange {
                    total_tasks: 0,
                    active_tasks: running_counter(&task),
                    completed_tasks: 0,
                },
            ))
            .push_qry(AdminActionDbService::get_log_qry(
                "log",
                admin,
                AdminActionType::TaskDelete,
                task_id,
                Some(reason.to_string()),
                Some(format!("status={}", task.status)),
            ))
            .push("DELETE $task_id;")
            .push(
                "CREATE ONLY $archive_id CONTENT { task: $task, deleted_by: $deleted_by, \
                 delete_reason: $reason, removed_assignments: $removed_assignments, \
                 removed_submissions: $removed_submissions, archived_at: $event_at };",
            );

        let archive = run_transaction::<ArchivedTask>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "task archive not created".to_string(),
            })?;
        info!(
            task = %task_id,
            removed_assignments = archive.removed_assignments,
            removed_submissions = archive.removed_submissions,
            "task deleted"
        );
        Ok(TaskDeletion {
            deleted: true,
            archive,
        })
    }

    pub async fn claim(&self, task_id: &Thing) -> CtxResult<TaskAssignment> {
        let user = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::User])
            .await?;
        with_tx_retries(self.tx_retries, "task_claim", || self.claim_once(task_id, &user))
            .await
            .map_err(CtxError::from(self.ctx))
    }

    async fn claim_once(&self, task_id: &Thing, user: &LocalUser) -> AppResult<TaskAssignment> {
        let task = self.tasks_repository.get(task_id).await?;
        if task.status != TaskStatus::Approved {
            return Err(AppError::InvalidState {
                description: "Task is not open for claims".to_string(),
            });
        }
        if self
            .assignments_repository
            .get_by_task_user(task_id, &user.id)
            .await?
            .is_some()
        {
            return Err(AppError::InvalidState {
                description: "Task is already claimed".to_string(),
            });
        }
        let claimed = self
            .assignments_repository
            .count_with_status(
                task_id,
                &[
                    AssignmentStatus::Active,
                    AssignmentStatus::Pending,
                    AssignmentStatus::Completed,
                ],
            )
            .await?;
        if claimed >= task.limit_count {
            return Err(AppError::InvalidState {
                description: "Task has no free slots".to_string(),
            });
        }

        let assignment_id = Thing::from((ASSIGNMENT_TABLE.to_string(), Id::ulid()));
        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("assignment_id", assignment_id)
            .bind("user", user.id.clone())
            .bind("user_email", user.email.clone())
            .push(load_task_qry(task_id))
            .push(format!(
                "IF $task.status != '{}' {{ {} }};",
                TaskStatus::Approved,
                throw_stmt(THROW_INVALID_STATE, "Task is not open for claims")
            ))
            .push(format!(
                "IF array::len((SELECT id FROM {ASSIGNMENT_TABLE} WHERE task = $task_id AND user = $user)) > 0 {{ {} }};",
                throw_stmt(THROW_INVALID_STATE, "Task is already claimed")
            ))
            .push(format!(
                "IF array::len((SELECT id FROM {ASSIGNMENT_TABLE} WHERE task = $task_id AND status != '{}')) >= $task.limit_count {{ {} }};",
                AssignmentStatus::Rejected,
                throw_stmt(THROW_INVALID_STATE, "Task has no free slots")
            ))
            // serializes concurrent claims of the same task
            .push("UPDATE $task_id SET r_updated = $event_at;")
            .push(format!(
                "CREATE ONLY $assignment_id CONTENT {{ task: $task_id, user: $user, \
                 user_email: $user_email, status: '{}', payment_received_status: 'pending', \
                 payment: $task.rate_to_user, created_at: $event_at }};",
                AssignmentStatus::Active
            ));

        let assignment = run_transaction::<TaskAssignment>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "assignment not created".to_string(),
            })?;
        info!(task = %task_id, user = %user.email, "task claimed");
        Ok(assignment)
    }

    pub async fn submit(&self, task_id: &Thing, input: SubmitInput) -> CtxResult<TaskSubmission> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let proof_data = input.proof_data.trim().to_string();
        if proof_data.is_empty() {
            return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                description: "proof_data is required".to_string(),
            }));
        }
        let user = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::User])
            .await?;
        with_tx_retries(self.tx_retries, "task_submit", || {
            self.submit_once(task_id, &user, &proof_data)
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn submit_once(
        &self,
        task_id: &Thing,
        user: &LocalUser,
        proof_data: &str,
    ) -> AppResult<TaskSubmission> {
        let task = self.tasks_repository.get(task_id).await?;
        let assignment = self
            .assignments_repository
            .get_by_task_user(task_id, &user.id)
            .await?
            .ok_or_else(|| AppError::EntityFailIdNotFound {
                ident: format!("assignment of {} for {}", user.id.to_raw(), task_id.to_raw()),
            })?;
        if assignment.status != AssignmentStatus::Active {
            return Err(AppError::InvalidState {
                description: "Assignment is not active".to_string(),
            });
        }
        if task.status != TaskStatus::Approved {
            return Err(AppError::InvalidState {
                description: "Task is not accepting submissions".to_string(),
            });
        }

        let submission_id = Thing::from((SUBMISSION_TABLE.to_string(), Id::ulid()));
        let mut tx = TransactionQry::new();
        tx.bind("task_id", task_id.clone())
            .bind("assignment_id", assignment.id.clone())
            .bind("submission_id", submission_id)
            .bind("user", user.id.clone())
            .bind("user_email", user.email.clone())
            .bind("proof_data", proof_data.to_string())
            .push(load_task_qry(task_id))
            .push(format!(
                "IF $task.status != '{}' {{ {} }};",
                TaskStatus::Approved,
                throw_stmt(THROW_INVALID_STATE, "Task is not accepting submissions")
            ))
            .push("LET $assignment = (SELECT * FROM $assignment_id)[0];")
            .push(format!(
                "IF $assignment.status != '{}' {{ {} }};",
                AssignmentStatus::Active,
                throw_stmt(THROW_INVALID_STATE, "Assignment is not active")
            ))
            .push(format!(
                "UPDATE $assignment_id SET status = '{}';",
                AssignmentStatus::Pending
            ))
            .push(format!(
                "CREATE ONLY $submission_id CONTENT {{ task: $task_id, user: $user, \
                 user_email: $user_email, assignment: $assignment_id, status: '{}', \
                 proof_data: $proof_data, submitted_at: $event_at }};",
                SubmissionStatus::Pending
            ));

        let submission = run_transaction::<TaskSubmission>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "submission not created".to_string(),
            })?;
        info!(task = %task_id, user = %user.email, submission = %submission.id, "proof submitted");
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: Thing::from((TASK_TABLE, "t")),
            title: "Install app".to_string(),
            description: None,
            r#type: TaskType::AppInstall,
            rate_to_user: 50,
            advertiser_cost: 60,
            limit_count: 4,
            status,
            payment_done: false,
            owner: Thing::from(("local_user", "o")),
            owner_email: "o@x.com".to_string(),
            approved_at: None,
            approved_by: None,
            approval_note: None,
            paused_at: None,
            completed_at: None,
            completed_by: None,
            completion_reason: None,
            force_completed: None,
            refunded_amount: None,
            created_at: Utc::now(),
            r_updated: None,
        }
    }

    #[test]
    fn only_pending_tasks_are_approvable() {
        assert!(check_approvable(&task(TaskStatus::Pending)).is_ok());
        assert_eq!(
            check_approvable(&task(TaskStatus::Approved)),
            Err(AppError::InvalidState {
                description: "Task is already approved".to_string()
            })
        );
        assert!(check_approvable(&task(TaskStatus::Paused)).is_err());
        assert!(check_approvable(&task(TaskStatus::Cancelled)).is_err());
    }

    #[test]
    fn force_completes_pending_but_never_cancelled() {
        assert!(check_completable(&task(TaskStatus::Pending), false).is_err());
        assert!(check_completable(&task(TaskStatus::Pending), true).is_ok());
        assert!(check_completable(&task(TaskStatus::Paused), true).is_ok());
        assert!(check_completable(&task(TaskStatus::Cancelled), true).is_err());
        assert!(check_completable(&task(TaskStatus::Completed), true).is_err());
    }

    #[test]
    fn only_running_tasks_release_an_active_slot() {
        assert_eq!(running_counter(&task(TaskStatus::Approved)), -1);
        assert_eq!(running_counter(&task(TaskStatus::Paused)), -1);
        assert_eq!(running_counter(&task(TaskStatus::Pending)), 0);
    }
}
