use std::collections::HashMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use surrealdb::sql::{Thing, Value};
use surrealdb::Response;
use tracing::{debug, warn};

use crate::database::client::Db;
use crate::middleware::error::{is_conflict_message, AppError, AppResult};
use crate::middleware::utils::db_utils::QryBindingsVal;

pub const THROW_INSUFFICIENT_FUNDS: &str = "InsufficientFunds";
pub const THROW_INVALID_STATE: &str = "InvalidState";
pub const THROW_ALREADY_REVIEWED: &str = "AlreadyReviewed";
pub const THROW_NOT_FOUND: &str = "NotFound";
/// State read before the transaction changed, the unit may be re-run.
pub const THROW_CONFLICT: &str = "Conflict";

const NOT_EXECUTED: &str = "was not executed";

/// `THROW` statement in the `<CODE>:<detail>` format read back by
/// [`check_transaction_custom_error`]. `detail` must not contain double quotes.
pub fn throw_stmt(code: &str, detail: &str) -> String {
    format!("THROW \"{code}:{detail}\";")
}

pub fn get_str_thing(value: &str) -> AppResult<Thing> {
    if value.is_empty() || !value.contains(':') {
        return Err(AppError::ValidationError {
            description: format!("{value} is not a record id"),
        });
    }
    Thing::try_from(value).map_err(|_| AppError::ValidationError {
        description: format!("{value} is not a record id"),
    })
}

/// Accepts either `table:key` or a bare key of `table`.
pub fn get_table_thing(table: &str, value: &str) -> AppResult<Thing> {
    let thing = if value.contains(':') {
        get_str_thing(value)?
    } else if value.is_empty() {
        return Err(AppError::ValidationError {
            description: format!("empty {table} id"),
        });
    } else {
        Thing::from((table, value))
    };
    if thing.tb != table {
        return Err(AppError::ValidationError {
            description: format!("{value} is not a {table} id"),
        });
    }
    Ok(thing)
}

fn parse_amount_field(detail: &str, name: &str) -> Option<i64> {
    detail
        .split([';', ','])
        .find_map(|part| part.trim().strip_prefix(&format!("{name}=")))
        .and_then(|v| v.trim().parse::<i64>().ok())
}

fn detail_after<'m>(message: &'m str, code: &str) -> Option<&'m str> {
    let marker = format!("{code}:");
    message
        .find(&marker)
        .map(|ind| message[ind + marker.len()..].trim())
}

/// Maps a database error message to the error it stands for, using the
/// `<CODE>:<detail>` convention of thrown transaction errors.
pub fn map_db_error_message(message: &str) -> AppError {
    if let Some(detail) = detail_after(message, THROW_INSUFFICIENT_FUNDS) {
        return AppError::InsufficientFunds {
            required: parse_amount_field(detail, "required").unwrap_or_default(),
            available: parse_amount_field(detail, "available").unwrap_or_default(),
        };
    }
    if let Some(detail) = detail_after(message, THROW_ALREADY_REVIEWED) {
        return AppError::AlreadyReviewed {
            ident: detail.to_string(),
        };
    }
    if let Some(detail) = detail_after(message, THROW_INVALID_STATE) {
        return AppError::InvalidState {
            description: detail.to_string(),
        };
    }
    if let Some(detail) = detail_after(message, THROW_NOT_FOUND) {
        return AppError::EntityFailIdNotFound {
            ident: detail.to_string(),
        };
    }
    if is_conflict_message(message) {
        return AppError::Conflict {
            description: "Concurrent update, try again".to_string(),
        };
    }
    AppError::SurrealDb {
        source: message.to_string(),
    }
}

/// Reduces the per statement errors of a transaction to the first real one.
/// Statements that were only cancelled because of it are ignored.
pub fn check_transaction_custom_error(query_response: &mut Response) -> AppResult<()> {
    let mut errors = query_response
        .take_errors()
        .into_iter()
        .map(|(ind, err)| (ind, err.to_string()))
        .collect::<Vec<(usize, String)>>();
    errors.sort_by_key(|(ind, _)| *ind);
    let messages = errors.into_iter().map(|(_, msg)| msg).collect::<Vec<_>>();

    match first_transaction_error(&messages) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn is_not_executed(err: &Option<AppError>) -> bool {
    matches!(err, Some(AppError::SurrealDb { source }) if source.contains(NOT_EXECUTED))
}

/// Error messages in statement order. A failed commit comes through as
/// conflict text on every statement and maps to a retryable `Conflict`.
pub fn first_transaction_error(messages: &[String]) -> Option<AppError> {
    let query_err = messages.iter().fold(None, |ret: Option<AppError>, msg| {
        let placeholder = is_not_executed(&ret);
        if is_conflict_message(msg) {
            return match ret {
                Some(err) if !placeholder => Some(err),
                _ => Some(map_db_error_message(msg)),
            };
        }
        if msg.contains(NOT_EXECUTED) {
            return ret.or_else(|| {
                Some(AppError::SurrealDb {
                    source: msg.clone(),
                })
            });
        }
        match ret {
            Some(_) if placeholder => Some(map_db_error_message(msg)),
            Some(err) => Some(err),
            None => Some(map_db_error_message(msg)),
        }
    });

    match query_err {
        Some(AppError::SurrealDb { source }) if source.contains(NOT_EXECUTED) => {
            Some(map_db_error_message(&source))
        }
        other => other,
    }
}

/// One `BEGIN TRANSACTION .. COMMIT TRANSACTION` unit assembled from
/// statement fragments. Every unit defines `$event_at` and `$event_ident`
/// shared by all ledger entries it writes.
pub struct TransactionQry {
    statements: Vec<String>,
    bindings: HashMap<String, Value>,
}

impl Default for TransactionQry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionQry {
    pub fn new() -> Self {
        TransactionQry {
            statements: vec![
                "LET $event_at = time::now();".to_string(),
                "LET $event_ident = rand::ulid();".to_string(),
            ],
            bindings: HashMap::new(),
        }
    }

    pub fn push(&mut self, statement: impl Into<String>) -> &mut Self {
        self.statements.push(statement.into());
        self
    }

    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.bindings.insert(name.to_string(), value.into());
        self
    }

    pub fn push_qry(&mut self, qry: QryBindingsVal<Value>) -> &mut Self {
        let (stmt, bindings) = qry.into_parts();
        self.statements.push(stmt);
        self.bindings.extend(bindings);
        self
    }

    pub fn into_qry_bindings(self) -> QryBindingsVal<Value> {
        let qry = format!(
            "BEGIN TRANSACTION;\n{}\nCOMMIT TRANSACTION;",
            self.statements.join("\n")
        );
        QryBindingsVal::new(qry, self.bindings)
    }
}

/// Runs the unit and returns the value of its last statement.
pub async fn run_transaction<T: DeserializeOwned>(
    db: &Db,
    tx: TransactionQry,
) -> AppResult<Option<T>> {
    let qry = tx.into_qry_bindings();
    debug!(qry = %qry.get_query_string(), "running transaction");
    let mut res = qry
        .into_query(db)
        .await
        .map_err(|e| map_db_error_message(&e.to_string()))?;
    check_transaction_custom_error(&mut res)?;
    let last = res.num_statements().saturating_sub(1);
    Ok(res.take::<Option<T>>(last)?)
}

/// Re-runs `op` while it fails with a retryable conflict.
pub async fn with_tx_retries<T, F, Fut>(retries: u8, label: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt: u8 = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(operation = label, attempt, "transaction conflict, retrying");
            }
            res => return res,
        }
    }
}
