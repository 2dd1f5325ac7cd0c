//! SqliteStore - durable `UnlockStore` on a single SQLite file.
//!
//! One connection behind a `std::sync::Mutex`; every call runs on the
//! blocking pool. Multi-record changes use IMMEDIATE transactions, and the
//! one-unresolved-attempt rule is a partial unique index, so a lost race
//! surfaces as a constraint violation (`StoreError::Conflict`).

use std::error::Error as StdError;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};

use crate::domain::{
    CaptureOutcome, EvaluationRecord, GatewayPaymentId, EvaluationReport, OrderId, PaymentAttempt, PaymentCapture,
    PaymentStatus, StatusChange, TaskFilter, TaskId, TaskRecord, TaskStatus, UserAccount, UserId,
};
use crate::ports::{
    AccountDirectory, AttemptChange, CompletionOutcome, EvaluationCompletion, EvaluationStore,
    PaymentLedger, StoreError, TaskStore, UnlockStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    user_id     TEXT PRIMARY KEY,
    credits     INTEGER NOT NULL DEFAULT 0,
    is_premium  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    id             TEXT PRIMARY KEY,
    owner          TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT NOT NULL,
    code_text      TEXT NOT NULL,
    language       TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at_ms  INTEGER NOT NULL,
    updated_at_ms  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS tasks_owner_created ON tasks(owner, created_at_ms DESC);

CREATE TABLE IF NOT EXISTS evaluations (
    id                 TEXT PRIMARY KEY,
    task_id            TEXT NOT NULL UNIQUE REFERENCES tasks(id),
    score              REAL NOT NULL,
    strengths_json     TEXT NOT NULL,
    improvements_json  TEXT NOT NULL,
    summary            TEXT NOT NULL,
    unlocked           INTEGER NOT NULL DEFAULT 0,
    created_at_ms      INTEGER NOT NULL,
    updated_at_ms      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    id                  TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    task_id             TEXT NOT NULL,
    order_id            TEXT NOT NULL UNIQUE,
    gateway_payment_id  TEXT,
    signature           TEXT,
    amount_minor        INTEGER NOT NULL,
    currency            TEXT NOT NULL,
    receipt             TEXT NOT NULL,
    status              TEXT NOT NULL,
    created_at_ms       INTEGER NOT NULL,
    updated_at_ms       INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS payments_one_unresolved
    ON payments(user_id, task_id) WHERE status IN ('created', 'attempted');
CREATE INDEX IF NOT EXISTS payments_user_created ON payments(user_id, created_at_ms DESC);
"#;

const TASK_COLUMNS: &str =
    "id, owner, title, description, code_text, language, status, created_at_ms, updated_at_ms";

const EVALUATION_COLUMNS: &str = "id, task_id, score, strengths_json, improvements_json, summary, \
     unlocked, created_at_ms, updated_at_ms";

const PAYMENT_COLUMNS: &str = "id, user_id, task_id, order_id, gateway_payment_id, signature, \
     amount_minor, currency, receipt, status, created_at_ms, updated_at_ms";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("connection mutex poisoned: {e}")))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

// ========================================
// Row mapping
// ========================================

fn conversion_error(idx: usize, err: impl Into<Box<dyn StdError + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn StdError + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {ms}")))
}

fn json_list_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: parse_col(row, 0)?,
        owner: parse_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        code_text: row.get(4)?,
        language: row.get(5)?,
        status: parse_col(row, 6)?,
        created_at: time_col(row, 7)?,
        updated_at: time_col(row, 8)?,
    })
}

fn evaluation_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluationRecord> {
    Ok(EvaluationRecord {
        id: parse_col(row, 0)?,
        task_id: parse_col(row, 1)?,
        report: EvaluationReport {
            score: row.get(2)?,
            strengths: json_list_col(row, 3)?,
            improvements: json_list_col(row, 4)?,
            summary: row.get(5)?,
        },
        unlocked: row.get(6)?,
        created_at: time_col(row, 7)?,
        updated_at: time_col(row, 8)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentAttempt> {
    let amount: i64 = row.get(6)?;
    Ok(PaymentAttempt {
        id: parse_col(row, 0)?,
        owner: parse_col(row, 1)?,
        task_id: parse_col(row, 2)?,
        order_id: OrderId::new(row.get::<_, String>(3)?),
        gateway_payment_id: row
            .get::<_, Option<String>>(4)?
            .map(GatewayPaymentId::new),
        signature: row.get(5)?,
        amount_minor: u64::try_from(amount).map_err(|e| conversion_error(6, e))?,
        currency: row.get(7)?,
        receipt: row.get(8)?,
        status: parse_col(row, 9)?,
        created_at: time_col(row, 10)?,
        updated_at: time_col(row, 11)?,
    })
}

fn encode_list(items: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(items).map_err(|e| StoreError::Backend(e.to_string()))
}

fn amount_col(amount: u64) -> Result<i64, StoreError> {
    i64::try_from(amount).map_err(|_| StoreError::Backend(format!("amount {amount} too large")))
}

// ========================================
// Ports
// ========================================

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                &format!("INSERT INTO tasks({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    task.id.to_string(),
                    task.owner.to_string(),
                    task.title,
                    task.description,
                    task.code_text,
                    task.language,
                    task.status.as_str(),
                    task.created_at.timestamp_millis(),
                    task.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id.to_string()],
                    task_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_tasks(
        &self,
        owner: UserId,
        filter: TaskFilter,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE owner = ?1 AND (?2 IS NULL OR status = ?2) \
                 ORDER BY created_at_ms DESC, id DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt.query_map(
                params![
                    owner.to_string(),
                    filter.status.map(TaskStatus::as_str),
                    filter.limit as i64,
                    filter.offset as i64,
                ],
                task_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn transition_task(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError> {
        let from = from.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: TaskStatus = tx
                .query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![id.to_string()],
                    |row| parse_col(row, 0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
            if !from.contains(&current) {
                return Ok(StatusChange::Unchanged(current));
            }
            tx.execute(
                "UPDATE tasks SET status = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![id.to_string(), to.as_str(), at.timestamp_millis()],
            )?;
            tx.commit()?;
            Ok(StatusChange::Applied)
        })
        .await
    }

    async fn claim_for_evaluation(
        &self,
        id: TaskId,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let task = tx
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id.to_string()],
                    task_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
            if !task.is_claimable(stale_before) {
                return Ok(StatusChange::Unchanged(task.status));
            }
            tx.execute(
                "UPDATE tasks SET status = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![
                    id.to_string(),
                    TaskStatus::Processing.as_str(),
                    at.timestamp_millis()
                ],
            )?;
            tx.commit()?;
            Ok(StatusChange::Applied)
        })
        .await
    }
}

#[async_trait]
impl EvaluationStore for SqliteStore {
    async fn get_evaluation(
        &self,
        task_id: TaskId,
    ) -> Result<Option<EvaluationRecord>, StoreError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE task_id = ?1"),
                    params![task_id.to_string()],
                    evaluation_from_row,
                )
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl PaymentLedger for SqliteStore {
    async fn insert_attempt(&self, attempt: PaymentAttempt) -> Result<(), StoreError> {
        let amount = amount_col(attempt.amount_minor)?;
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO payments({PAYMENT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    attempt.id.to_string(),
                    attempt.owner.to_string(),
                    attempt.task_id.to_string(),
                    attempt.order_id.as_str(),
                    attempt.gateway_payment_id.as_ref().map(|p| p.as_str()),
                    attempt.signature,
                    amount,
                    attempt.currency,
                    attempt.receipt,
                    attempt.status.as_str(),
                    attempt.created_at.timestamp_millis(),
                    attempt.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_attempt(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let order_id = order_id.clone();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1"),
                    params![order_id.as_str()],
                    payment_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_attempts(&self, owner: UserId) -> Result<Vec<PaymentAttempt>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = ?1 \
                 ORDER BY created_at_ms DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![owner.to_string()], payment_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn advance_attempt(
        &self,
        order_id: &OrderId,
        to: PaymentStatus,
        payment_id: Option<&GatewayPaymentId>,
        at: DateTime<Utc>,
    ) -> Result<AttemptChange, StoreError> {
        let order_id = order_id.clone();
        let payment_id = payment_id.cloned();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: PaymentStatus = tx
                .query_row(
                    "SELECT status FROM payments WHERE order_id = ?1",
                    params![order_id.as_str()],
                    |row| parse_col(row, 0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
            if current == to {
                return Ok(AttemptChange::AlreadyThere);
            }
            if to == PaymentStatus::Paid || !current.can_transition_to(to) {
                return Ok(AttemptChange::Rejected(current));
            }
            tx.execute(
                "UPDATE payments SET status = ?2, updated_at_ms = ?3, \
                     gateway_payment_id = COALESCE(?4, gateway_payment_id) \
                 WHERE order_id = ?1",
                params![
                    order_id.as_str(),
                    to.as_str(),
                    at.timestamp_millis(),
                    payment_id.as_ref().map(|p| p.as_str()),
                ],
            )?;
            tx.commit()?;
            Ok(AttemptChange::Applied)
        })
        .await
    }
}

fn load_account(conn: &Connection, user: UserId) -> rusqlite::Result<Option<UserAccount>> {
    conn.query_row(
        "SELECT credits, is_premium FROM accounts WHERE user_id = ?1",
        params![user.to_string()],
        |row| {
            Ok(UserAccount {
                id: user,
                credits: row.get(0)?,
                is_premium: row.get(1)?,
            })
        },
    )
    .optional()
}

#[async_trait]
impl AccountDirectory for SqliteStore {
    async fn ensure_account(
        &self,
        user: UserId,
        initial_credits: u32,
    ) -> Result<UserAccount, StoreError> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO accounts(user_id, credits, is_premium) VALUES (?1, ?2, 0) \
                 ON CONFLICT(user_id) DO NOTHING",
                params![user.to_string(), initial_credits],
            )?;
            let account = load_account(&tx, user)?
                .ok_or_else(|| StoreError::Backend(format!("account {user} vanished")))?;
            tx.commit()?;
            Ok(account)
        })
        .await
    }

    async fn get_account(&self, user: UserId) -> Result<Option<UserAccount>, StoreError> {
        self.run(move |conn| Ok(load_account(conn, user)?)).await
    }
}

#[async_trait]
impl UnlockStore for SqliteStore {
    async fn apply_capture(
        &self,
        capture: &PaymentCapture,
        at: DateTime<Utc>,
    ) -> Result<CaptureOutcome, StoreError> {
        let capture = capture.clone();
        self.run(move |conn| {
            let at_ms = at.timestamp_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (status, task_id, owner): (PaymentStatus, TaskId, UserId) = tx
                .query_row(
                    "SELECT status, task_id, user_id FROM payments WHERE order_id = ?1",
                    params![capture.order_id.as_str()],
                    |row| Ok((parse_col(row, 0)?, parse_col(row, 1)?, parse_col(row, 2)?)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("order {}", capture.order_id)))?;
            match status {
                PaymentStatus::Paid => return Ok(CaptureOutcome::AlreadyPaid),
                PaymentStatus::Created | PaymentStatus::Attempted => {}
                other => return Ok(CaptureOutcome::Rejected(other)),
            }

            tx.execute(
                "UPDATE payments SET status = 'paid', \
                     gateway_payment_id = COALESCE(?2, gateway_payment_id), \
                     signature = COALESCE(?3, signature), updated_at_ms = ?4 \
                 WHERE order_id = ?1 AND status IN ('created', 'attempted')",
                params![
                    capture.order_id.as_str(),
                    capture.gateway_payment_id.as_ref().map(|p| p.as_str()),
                    capture.signature,
                    at_ms,
                ],
            )?;
            tx.execute(
                "UPDATE evaluations SET unlocked = 1, updated_at_ms = ?2 \
                 WHERE task_id = ?1 AND unlocked = 0",
                params![task_id.to_string(), at_ms],
            )?;
            tx.execute(
                "UPDATE tasks SET status = 'evaluated', updated_at_ms = ?2 \
                 WHERE id = ?1 AND status IN ('processing', 'locked')",
                params![task_id.to_string(), at_ms],
            )?;
            tx.execute(
                "INSERT INTO accounts(user_id, credits, is_premium) VALUES (?1, 0, 1) \
                 ON CONFLICT(user_id) DO UPDATE SET is_premium = 1",
                params![owner.to_string()],
            )?;
            tx.commit()?;
            Ok(CaptureOutcome::Applied)
        })
        .await
    }

    async fn complete_evaluation(
        &self,
        completion: EvaluationCompletion,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StoreError> {
        let strengths = encode_list(&completion.report.strengths)?;
        let improvements = encode_list(&completion.report.improvements)?;
        self.run(move |conn| {
            let at_ms = at.timestamp_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: TaskStatus = tx
                .query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![completion.task_id.to_string()],
                    |row| parse_col(row, 0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("task {}", completion.task_id)))?;
            if current != TaskStatus::Processing {
                return Ok(CompletionOutcome::Skipped(current));
            }

            let mut account = load_account(&tx, completion.owner)?
                .unwrap_or_else(|| UserAccount::new(completion.owner, 0));
            let unlocked = account.consume_unlock();
            tx.execute(
                "INSERT INTO accounts(user_id, credits, is_premium) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(user_id) DO UPDATE SET credits = excluded.credits",
                params![account.id.to_string(), account.credits, account.is_premium],
            )?;

            let status = if unlocked || !completion.lock_unpaid {
                TaskStatus::Evaluated
            } else {
                TaskStatus::Locked
            };
            let record = EvaluationRecord::new(
                completion.evaluation_id,
                completion.task_id,
                completion.report,
                unlocked,
                at,
            );
            tx.execute(
                &format!(
                    "INSERT INTO evaluations({EVALUATION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    record.id.to_string(),
                    record.task_id.to_string(),
                    record.report.score,
                    strengths,
                    improvements,
                    record.report.summary,
                    record.unlocked,
                    at_ms,
                    at_ms,
                ],
            )?;
            tx.execute(
                "UPDATE tasks SET status = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![record.task_id.to_string(), status.as_str(), at_ms],
            )?;
            tx.commit()?;
            Ok(CompletionOutcome::Completed { record, status })
        })
        .await
    }
}
