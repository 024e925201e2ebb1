use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use surrealdb::sql::Thing;
use tracing::info;
use validator::Validate;

use crate::{
    database::{
        client::Db,
        surrdb_utils::{
            get_table_thing, run_transaction, throw_stmt, with_tx_retries, TransactionQry,
            THROW_ALREADY_REVIEWED, THROW_CONFLICT, THROW_INVALID_STATE, THROW_NOT_FOUND,
        },
    },
    entities::{
        admin_action_entity::{AdminActionDbService, AdminActionType},
        task::{
            task_assignment_entity::{
                AssignmentStatus, PaymentReceivedStatus, TaskAssignment, TaskAssignmentDbService,
            },
            task_entity::{Task, TaskDbService},
            task_submission_entity::{self, SubmissionStatus, TaskSubmission, TaskSubmissionDbService},
        },
        user_auth::local_user_entity::{LocalUser, LocalUserDbService, UserRole},
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
        utils::{db_utils::opt_value, string_utils::non_empty},
    },
};

const SUBMISSION_TABLE: &str = task_submission_entity::TABLE_NAME;

#[derive(Display, EnumString, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    fn submission_status(&self) -> SubmissionStatus {
        match self {
            ReviewAction::Approve => SubmissionStatus::Approved,
            ReviewAction::Reject => SubmissionStatus::Rejected,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReviewInput {
    pub action: ReviewAction,
    #[validate(length(max = 1000, message = "Max 1000 characters for feedback"))]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct BulkReviewInput {
    #[validate(length(min = 1, max = 200, message = "Between 1 and 200 submission ids"))]
    pub submission_ids: Vec<String>,
    pub action: ReviewAction,
    #[validate(length(max = 1000, message = "Max 1000 characters for feedback"))]
    pub feedback: Option<String>,
    #[validate(length(max = 1000, message = "Max 1000 characters for bulk_reason"))]
    pub bulk_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WalletUpdate {
    pub user: Thing,
    pub amount: i64,
    pub balance: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReviewResult {
    pub submission: TaskSubmission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_update: Option<WalletUpdate>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BulkReviewItem {
    pub submission_id: Thing,
    pub status: SubmissionStatus,
    pub credited: i64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct BulkReviewSummary {
    pub processed: usize,
    pub total_credited: i64,
    pub affected_users: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BulkReviewResult {
    pub results: Vec<BulkReviewItem>,
    pub summary: BulkReviewSummary,
    pub wallet_updates: Vec<WalletUpdate>,
}

/// One submission prepared for review.
struct ReviewItem {
    submission: TaskSubmission,
    assignment: TaskAssignment,
    /// Reward to credit, 0 when nothing is paid.
    credit: i64,
}

/// Reward paid for an approved submission, unless it was paid before.
fn reward_for(action: ReviewAction, assignment: &TaskAssignment, task: &Task) -> i64 {
    if action != ReviewAction::Approve
        || assignment.payment_received_status == PaymentReceivedStatus::Completed
    {
        return 0;
    }
    if assignment.payment > 0 {
        assignment.payment
    } else {
        task.rate_to_user
    }
}

/// Rewards grouped by user, keeping submission order inside each group.
fn group_credits(items: &[ReviewItem]) -> BTreeMap<String, (Thing, Vec<usize>)> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.credit > 0)
        .fold(BTreeMap::new(), |mut acc, (ind, item)| {
            acc.entry(item.submission.user.to_raw())
                .or_insert_with(|| (item.submission.user.clone(), vec![]))
                .1
                .push(ind);
            acc
        })
}

pub struct SubmissionService<'a> {
    db: &'a Db,
    ctx: &'a Ctx,
    tx_retries: u8,
    submissions_repository: TaskSubmissionDbService<'a>,
    assignments_repository: TaskAssignmentDbService<'a>,
    tasks_repository: TaskDbService<'a>,
    users_repository: LocalUserDbService<'a>,
}

impl<'a> SubmissionService<'a> {
    pub fn new(db: &'a Db, ctx: &'a Ctx, tx_retries: u8) -> Self {
        Self {
            db,
            ctx,
            tx_retries,
            submissions_repository: TaskSubmissionDbService { db, ctx },
            assignments_repository: TaskAssignmentDbService { db, ctx },
            tasks_repository: TaskDbService { db, ctx },
            users_repository: LocalUserDbService { db, ctx },
        }
    }

    pub async fn review(&self, submission_id: &Thing, input: ReviewInput) -> CtxResult<ReviewResult> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let reviewer = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;
        let feedback = non_empty(input.feedback);
        with_tx_retries(self.tx_retries, "submission_review", || {
            self.review_once(submission_id, &reviewer, input.action, feedback.clone())
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn review_once(
        &self,
        submission_id: &Thing,
        reviewer: &LocalUser,
        action: ReviewAction,
        feedback: Option<String>,
    ) -> AppResult<ReviewResult> {
        let submission = self.submissions_repository.get(submission_id).await?;
        if submission.status != SubmissionStatus::Pending {
            return Err(AppError::AlreadyReviewed {
                ident: submission_id.to_raw(),
            });
        }
        let assignment = self.assignments_repository.get(&submission.assignment).await?;
        let task = self.tasks_repository.get(&submission.task).await?;
        let credit = reward_for(action, &assignment, &task);
        let log_action = match action {
            ReviewAction::Approve => AdminActionType::SubmissionApprove,
            ReviewAction::Reject => AdminActionType::SubmissionReject,
        };
        let item = ReviewItem {
            submission,
            assignment,
            credit,
        };

        let mut tx = TransactionQry::new();
        tx.bind("reviewer", reviewer.actor())
            .bind("feedback", opt_value(feedback.clone()))
            .bind("next_status", action.submission_status().to_string());
        self.push_review_checks(&mut tx, 0, &item, THROW_ALREADY_REVIEWED);

        if credit > 0 {
            self.push_user_credit(&mut tx, "usr", &item.submission.user, &[&item], reviewer)?;
        }
        self.push_review_updates(&mut tx, 0, &item, action);
        tx.push_qry(AdminActionDbService::get_log_qry(
            "log",
            reviewer,
            log_action,
            submission_id,
            feedback,
            (credit > 0).then(|| format!("credited={credit}")),
        ));
        let balance_expr = if credit > 0 { "$usr_balance" } else { "NONE" };
        tx.push(format!(
            "LET $review_result = {{ submission: (SELECT * FROM $sub_id0)[0], balance: {balance_expr} }};"
        ))
        .push("$review_result;");

        let res = run_transaction::<ReviewTxResult>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::EntityFailIdNotFound {
                ident: submission_id.to_raw(),
            })?;

        info!(
            submission = %submission_id,
            action = %action,
            credited = credit,
            reviewer = %reviewer.email,
            "submission reviewed"
        );
        let wallet_update = res.balance.filter(|_| credit > 0).map(|balance| WalletUpdate {
            user: res.submission.user.clone(),
            amount: credit,
            balance,
        });
        Ok(ReviewResult {
            submission: res.submission,
            wallet_update,
        })
    }

    pub async fn bulk_review(&self, task_id: &Thing, input: BulkReviewInput) -> CtxResult<BulkReviewResult> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let reviewer = self
            .users_repository
            .get_ctx_user_with_role(&[UserRole::Admin])
            .await?;

        let mut seen = HashSet::new();
        let mut ids: Vec<Thing> = vec![];
        for raw in input.submission_ids.iter() {
            let id = get_table_thing(SUBMISSION_TABLE, raw.trim()).map_err(CtxError::from(self.ctx))?;
            if seen.insert(id.to_raw()) {
                ids.push(id);
            }
        }
        let feedback = non_empty(input.feedback).or(non_empty(input.bulk_reason));

        with_tx_retries(self.tx_retries, "submission_bulk_review", || {
            self.bulk_review_once(task_id, &ids, &reviewer, input.action, feedback.clone())
        })
        .await
        .map_err(CtxError::from(self.ctx))
    }

    async fn bulk_review_once(
        &self,
        task_id: &Thing,
        ids: &[Thing],
        reviewer: &LocalUser,
        action: ReviewAction,
        feedback: Option<String>,
    ) -> AppResult<BulkReviewResult> {
        let task = self.tasks_repository.get(task_id).await?;

        let mut items: Vec<ReviewItem> = Vec::with_capacity(ids.len());
        for id in ids {
            let submission = self
                .submissions_repository
                .find(id)
                .await?
                .filter(|s| &s.task == task_id)
                .ok_or_else(|| AppError::EntityFailIdNotFound { ident: id.to_raw() })?;
            let assignment = self.assignments_repository.get(&submission.assignment).await?;
            items.push(ReviewItem {
                credit: 0,
                submission,
                assignment,
            });
        }
        let reviewed = items
            .iter()
            .filter(|i| i.submission.status != SubmissionStatus::Pending)
            .map(|i| i.submission.id.to_raw())
            .collect::<Vec<_>>();
        if !reviewed.is_empty() {
            return Err(AppError::InvalidState {
                description: format!("Submissions already reviewed: {}", reviewed.join(", ")),
            });
        }
        items
            .iter_mut()
            .for_each(|item| item.credit = reward_for(action, &item.assignment, &task));

        let mut tx = TransactionQry::new();
        tx.bind("reviewer", reviewer.actor())
            .bind("feedback", opt_value(feedback.clone()))
            .bind("next_status", action.submission_status().to_string());
        for (ind, item) in items.iter().enumerate() {
            self.push_review_checks(&mut tx, ind, item, THROW_INVALID_STATE);
        }

        let groups = group_credits(&items);
        let mut balance_vars: Vec<String> = vec![];
        for (group_ind, (user, indexes)) in groups.values().enumerate() {
            let prefix = format!("usr{group_ind}");
            let group_items = indexes.iter().map(|i| &items[*i]).collect::<Vec<_>>();
            self.push_user_credit(&mut tx, &prefix, user, &group_items, reviewer)?;
            balance_vars.push(format!("{{ user: ${prefix}_user, balance: ${prefix}_balance }}"));
        }
        for (ind, item) in items.iter().enumerate() {
            self.push_review_updates(&mut tx, ind, item, action);
        }

        let total_credited: i64 = items.iter().map(|i| i.credit).sum();
        tx.push_qry(AdminActionDbService::get_log_qry(
            "log",
            reviewer,
            AdminActionType::SubmissionBulkReview,
            task_id,
            feedback,
            Some(format!(
                "action={action};processed={};credited={total_credited}",
                items.len()
            )),
        ));
        tx.push(format!(
            "LET $bulk_result = {{ updates: [{}] }};",
            balance_vars.join(", ")
        ))
        .push("$bulk_result;");

        let balances = run_transaction::<BulkTxResult>(self.db, tx)
            .await?
            .map(|res| res.updates)
            .unwrap_or_default();

        let wallet_updates = balances
            .into_iter()
            .map(|b| {
                let amount = items
                    .iter()
                    .filter(|i| i.submission.user == b.user)
                    .map(|i| i.credit)
                    .sum();
                WalletUpdate {
                    user: b.user,
                    amount,
                    balance: b.balance,
                }
            })
            .collect::<Vec<_>>();

        let status = action.submission_status();
        let results = items
            .iter()
            .map(|i| BulkReviewItem {
                submission_id: i.submission.id.clone(),
                status,
                credited: i.credit,
            })
            .collect::<Vec<_>>();
        let summary = BulkReviewSummary {
            processed: results.len(),
            total_credited,
            affected_users: groups.len(),
        };
        info!(
            task = %task_id,
            action = %action,
            processed = summary.processed,
            total_credited,
            affected_users = summary.affected_users,
            "submissions bulk reviewed"
        );
        Ok(BulkReviewResult {
            results,
            summary,
            wallet_updates,
        })
    }

    /// Re-reads the submission and its assignment inside the transaction.
    fn push_review_checks(&self, tx: &mut TransactionQry, ind: usize, item: &ReviewItem, reviewed_code: &str) {
        let sub_raw = item.submission.id.to_raw();
        tx.bind(&format!("sub_id{ind}"), item.submission.id.clone())
            .bind(&format!("asg_id{ind}"), item.assignment.id.clone())
            .bind(
                &format!("asg_paid{ind}"),
                item.assignment.payment_received_status.to_string(),
            )
            .push(format!("LET $sub{ind} = (SELECT * FROM $sub_id{ind})[0];"))
            .push(format!(
                "IF $sub{ind} = NONE {{ {} }};",
                throw_stmt(THROW_NOT_FOUND, &sub_raw)
            ))
            .push(format!(
                "IF $sub{ind}.status != '{}' {{ {} }};",
                SubmissionStatus::Pending,
                throw_stmt(reviewed_code, &sub_raw)
            ))
            .push(format!("LET $asg{ind} = (SELECT * FROM $asg_id{ind})[0];"))
            .push(format!(
                "IF $asg{ind}.payment_received_status != $asg_paid{ind} {{ {} }};",
                throw_stmt(THROW_CONFLICT, "assignment payment changed")
            ));
    }

    /// Credits every reward of one user with a single wallet write.
    fn push_user_credit(
        &self,
        tx: &mut TransactionQry,
        prefix: &str,
        user: &Thing,
        items: &[&ReviewItem],
        reviewer: &LocalUser,
    ) -> AppResult<()> {
        let entries = items
            .iter()
            .map(|item| {
                LedgerEntrySpec::new(TransactionCategory::UserTaskReward, item.credit)
                    .task(&item.submission.task)
                    .submission(&item.submission.id)
                    .user(user)
                    .description(format!("Reward for submission {}", item.submission.id.to_raw()))
            })
            .collect::<Vec<_>>();
        let earned: i64 = items.iter().map(|i| i.credit).sum();
        let delta = WalletDelta::new(WalletDbService::get_user_wallet_id(user), entries);
        tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
            prefix,
            &delta,
            &reviewer.actor(),
        )?)
        .bind(&format!("{prefix}_user"), user.clone())
        .push(format!(
            "UPDATE ${prefix}_user SET total_earn += {earned}, tasks_completed += {};",
            items.len()
        ));
        Ok(())
    }

    fn push_review_updates(&self, tx: &mut TransactionQry, ind: usize, item: &ReviewItem, action: ReviewAction) {
        let assignment_set = match action {
            ReviewAction::Approve if item.credit > 0 => format!(
                "status = '{}', payment_received_status = '{}', paid_at = $event_at",
                AssignmentStatus::Completed,
                PaymentReceivedStatus::Completed
            ),
            ReviewAction::Approve => format!("status = '{}'", AssignmentStatus::Completed),
            ReviewAction::Reject => format!("status = '{}'", AssignmentStatus::Rejected),
        };
        tx.push(format!("UPDATE $asg_id{ind} SET {assignment_set};"))
            .push(format!(
                "UPDATE $sub_id{ind} SET status = $next_status, reviewed_at = $event_at, \
                 reviewed_by = $reviewer, review_feedback = $feedback;"
            ));
    }
}

#[derive(Debug, Deserialize)]
struct ReviewTxResult {
    submission: TaskSubmission,
    balance: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BulkTxResult {
    updates: Vec<WalletUpdateBalance>,
}

#[derive(Debug, Deserialize)]
struct WalletUpdateBalance {
    user: Thing,
    balance: i64,
}
