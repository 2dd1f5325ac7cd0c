//! Behaviour every `UnlockStore` must share. Each backend's test module calls
//! these against a fresh store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ulid::Ulid;

use crate::domain::{
    AckSource, CaptureOutcome, EvaluationId, EvaluationReport, GatewayPaymentId, NewTask, OrderId,
    PaymentAttempt, PaymentCapture, PaymentId, PaymentStatus, StatusChange, TaskFilter, TaskId,
    TaskRecord, TaskStatus, UserId,
};
use crate::ports::{
    AttemptChange, CompletionOutcome, EvaluationCompletion, StoreError, UnlockStore,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn report() -> EvaluationReport {
    EvaluationReport {
        score: 6.5,
        strengths: vec!["clear naming".into()],
        improvements: vec!["missing tests".into()],
        summary: "decent".into(),
    }
}

pub fn new_task(owner: UserId, at: DateTime<Utc>) -> TaskRecord {
    TaskRecord::new(
        TaskId::from_ulid(Ulid::new()),
        owner,
        NewTask {
            title: "two sum".into(),
            description: "find a pair".into(),
            code_text: "function f() {}".into(),
            language: None,
        },
        at,
    )
}

pub fn attempt(owner: UserId, task_id: TaskId, order: &str, at: DateTime<Utc>) -> PaymentAttempt {
    PaymentAttempt::created(
        PaymentId::from_ulid(Ulid::new()),
        owner,
        task_id,
        OrderId::new(order),
        1000,
        "INR",
        "rcpt_test",
        at,
    )
}

pub fn completion(task: &TaskRecord, lock_unpaid: bool) -> EvaluationCompletion {
    EvaluationCompletion {
        evaluation_id: EvaluationId::from_ulid(Ulid::new()),
        task_id: task.id,
        owner: task.owner,
        report: report(),
        lock_unpaid,
    }
}

pub fn capture_for(attempt: &PaymentAttempt) -> PaymentCapture {
    PaymentCapture {
        order_id: attempt.order_id.clone(),
        gateway_payment_id: Some(GatewayPaymentId::new("pay_test")),
        signature: Some("deadbeef".into()),
        source: AckSource::Webhook,
    }
}

/// Task evaluated without payment (locked), plus an open order for it.
pub async fn seed_locked_task_with_order<S>(store: &S) -> (TaskRecord, PaymentAttempt)
where
    S: UnlockStore + ?Sized,
{
    let owner = UserId::from_ulid(Ulid::new());
    store.ensure_account(owner, 0).await.unwrap();
    let task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();
    store
        .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Processing, t0())
        .await
        .unwrap();
    let outcome = store
        .complete_evaluation(completion(&task, true), t0())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CompletionOutcome::Completed {
            status: TaskStatus::Locked,
            ..
        }
    ));
    let order = format!("order_{}", Ulid::new());
    let attempt = attempt(owner, task.id, &order, t0());
    store.insert_attempt(attempt.clone()).await.unwrap();
    (task, attempt)
}

pub async fn task_lifecycle<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();

    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded, task);

    let dup = store.insert_task(task.clone()).await.unwrap_err();
    assert!(matches!(dup, StoreError::Conflict(_)));

    let later = t0() + Duration::seconds(5);
    let change = store
        .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Processing, later)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Applied);

    let again = store
        .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Processing, later)
        .await
        .unwrap();
    assert_eq!(again, StatusChange::Unchanged(TaskStatus::Processing));

    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Processing);
    assert_eq!(loaded.updated_at, later);

    let missing = store
        .transition_task(
            TaskId::from_ulid(Ulid::new()),
            &[TaskStatus::Pending],
            TaskStatus::Processing,
            later,
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(_)));
}

pub async fn listing_is_newest_first_and_filtered<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let stranger = UserId::from_ulid(Ulid::new());

    let mut ids = Vec::new();
    for i in 0..3 {
        let task = new_task(owner, t0() + Duration::minutes(i));
        ids.push(task.id);
        store.insert_task(task).await.unwrap();
    }
    store.insert_task(new_task(stranger, t0())).await.unwrap();
    store
        .transition_task(ids[0], &[TaskStatus::Pending], TaskStatus::Processing, t0())
        .await
        .unwrap();

    let all = store
        .list_tasks(owner, TaskFilter::default())
        .await
        .unwrap();
    let listed: Vec<TaskId> = all.iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let processing = store
        .list_tasks(
            owner,
            TaskFilter {
                status: Some(TaskStatus::Processing),
                ..TaskFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, ids[0]);

    let page = store
        .list_tasks(
            owner,
            TaskFilter {
                status: None,
                limit: 1,
                offset: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[1]);
}

pub async fn one_unresolved_attempt_per_task<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let task = new_task(owner, t0());
    let other_task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();
    store.insert_task(other_task.clone()).await.unwrap();

    let first = attempt(owner, task.id, "order_a", t0());
    store.insert_attempt(first.clone()).await.unwrap();

    let second = attempt(owner, task.id, "order_b", t0());
    let err = store.insert_attempt(second.clone()).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let reused_order = attempt(owner, other_task.id, "order_a", t0());
    let err = store.insert_attempt(reused_order).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // another task is independent
    store
        .insert_attempt(attempt(owner, other_task.id, "order_c", t0()))
        .await
        .unwrap();

    // once the first one fails, a new order may be opened
    let change = store
        .advance_attempt(&first.order_id, PaymentStatus::Failed, None, t0())
        .await
        .unwrap();
    assert_eq!(change, AttemptChange::Applied);
    store.insert_attempt(second).await.unwrap();

    let listed = store.list_attempts(owner).await.unwrap();
    assert_eq!(listed.len(), 3);
}

pub async fn capture_unlocks_everything_once<S: UnlockStore + ?Sized>(store: &S) {
    let (task, attempt) = seed_locked_task_with_order(store).await;
    let capture = capture_for(&attempt);
    let at = t0() + Duration::minutes(3);

    let outcome = store.apply_capture(&capture, at).await.unwrap();
    assert_eq!(outcome, CaptureOutcome::Applied);

    let paid = store.find_attempt(&attempt.order_id).await.unwrap().unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.gateway_payment_id, capture.gateway_payment_id);
    assert_eq!(paid.signature, capture.signature);
    assert_eq!(paid.updated_at, at);

    let evaluation = store.get_evaluation(task.id).await.unwrap().unwrap();
    assert!(evaluation.unlocked);

    let task_now = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task_now.status, TaskStatus::Evaluated);

    let account = store.get_account(task.owner).await.unwrap().unwrap();
    assert!(account.is_premium);

    let again = store.apply_capture(&capture, at).await.unwrap();
    assert_eq!(again, CaptureOutcome::AlreadyPaid);
    let evaluation_after = store.get_evaluation(task.id).await.unwrap().unwrap();
    assert_eq!(evaluation_after, evaluation);

    let unknown = PaymentCapture {
        order_id: OrderId::new("order_missing"),
        ..capture
    };
    let err = store.apply_capture(&unknown, at).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

pub async fn capture_never_revives_errored_task<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();
    store
        .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Processing, t0())
        .await
        .unwrap();
    store
        .transition_task(task.id, &[TaskStatus::Processing], TaskStatus::Error, t0())
        .await
        .unwrap();
    let attempt = attempt(owner, task.id, "order_err", t0());
    store.insert_attempt(attempt.clone()).await.unwrap();

    let outcome = store
        .apply_capture(&capture_for(&attempt), t0())
        .await
        .unwrap();
    assert_eq!(outcome, CaptureOutcome::Applied);

    let task_now = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task_now.status, TaskStatus::Error);
}

pub async fn attempt_state_machine_is_enforced<S: UnlockStore + ?Sized>(store: &S) {
    let (_, attempt) = seed_locked_task_with_order(store).await;
    let order = attempt.order_id.clone();

    let authorized = GatewayPaymentId::new("pay_authorized");
    assert_eq!(
        store
            .advance_attempt(&order, PaymentStatus::Attempted, Some(&authorized), t0())
            .await
            .unwrap(),
        AttemptChange::Applied
    );
    assert_eq!(
        store
            .advance_attempt(&order, PaymentStatus::Attempted, None, t0())
            .await
            .unwrap(),
        AttemptChange::AlreadyThere
    );
    let stored = store.find_attempt(&order).await.unwrap().unwrap();
    assert_eq!(stored.gateway_payment_id, Some(authorized));
    // paid only through a capture
    assert_eq!(
        store
            .advance_attempt(&order, PaymentStatus::Paid, None, t0())
            .await
            .unwrap(),
        AttemptChange::Rejected(PaymentStatus::Attempted)
    );
    assert_eq!(
        store.apply_capture(&capture_for(&attempt), t0()).await.unwrap(),
        CaptureOutcome::Applied
    );
    assert_eq!(
        store
            .advance_attempt(&order, PaymentStatus::Failed, None, t0())
            .await
            .unwrap(),
        AttemptChange::Rejected(PaymentStatus::Paid)
    );
    assert_eq!(
        store
            .advance_attempt(&order, PaymentStatus::Refunded, None, t0())
            .await
            .unwrap(),
        AttemptChange::Applied
    );
    assert_eq!(
        store.apply_capture(&capture_for(&attempt), t0()).await.unwrap(),
        CaptureOutcome::Rejected(PaymentStatus::Refunded)
    );

    let missing = store
        .advance_attempt(&OrderId::new("order_nope"), PaymentStatus::Failed, None, t0())
        .await
        .unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(_)));
}

pub async fn completion_spends_credits_then_locks<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    store.ensure_account(owner, 1).await.unwrap();
    // a second ensure must not reset credits
    assert_eq!(store.ensure_account(owner, 5).await.unwrap().credits, 1);

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let task = new_task(owner, t0());
        store.insert_task(task.clone()).await.unwrap();
        store
            .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Processing, t0())
            .await
            .unwrap();
        tasks.push(task);
    }

    let first = store
        .complete_evaluation(completion(&tasks[0], true), t0())
        .await
        .unwrap();
    match first {
        CompletionOutcome::Completed { record, status } => {
            assert!(record.unlocked);
            assert_eq!(status, TaskStatus::Evaluated);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.get_account(owner).await.unwrap().unwrap().credits, 0);

    let second = store
        .complete_evaluation(completion(&tasks[1], true), t0())
        .await
        .unwrap();
    match second {
        CompletionOutcome::Completed { record, status } => {
            assert!(!record.unlocked);
            assert_eq!(status, TaskStatus::Locked);
        }
        other => panic!("unexpected {other:?}"),
    }

    let third = store
        .complete_evaluation(completion(&tasks[2], false), t0())
        .await
        .unwrap();
    match third {
        CompletionOutcome::Completed { record, status } => {
            assert!(!record.unlocked);
            assert_eq!(status, TaskStatus::Evaluated);
        }
        other => panic!("unexpected {other:?}"),
    }

    let stored = store.get_evaluation(tasks[1].id).await.unwrap().unwrap();
    assert_eq!(stored.report, report());
    assert_eq!(
        store.get_task(tasks[1].id).await.unwrap().unwrap().status,
        TaskStatus::Locked
    );
}

pub async fn completion_skips_non_processing_task<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();

    let outcome = store
        .complete_evaluation(completion(&task, false), t0())
        .await
        .unwrap();
    assert_eq!(outcome, CompletionOutcome::Skipped(TaskStatus::Pending));
    assert!(store.get_evaluation(task.id).await.unwrap().is_none());

    let ghost = new_task(owner, t0());
    let err = store
        .complete_evaluation(completion(&ghost, false), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

pub async fn stale_processing_claim_can_be_taken_over<S: UnlockStore + ?Sized>(store: &S) {
    let owner = UserId::from_ulid(Ulid::new());
    let task = new_task(owner, t0());
    store.insert_task(task.clone()).await.unwrap();

    let claimed_at = t0() + Duration::seconds(1);
    let change = store
        .claim_for_evaluation(task.id, t0(), claimed_at)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Applied);

    // Fresh claim: the stale cutoff is still before it.
    let change = store
        .claim_for_evaluation(task.id, t0(), claimed_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Unchanged(TaskStatus::Processing));

    let taken_over_at = claimed_at + Duration::seconds(60);
    let change = store
        .claim_for_evaluation(task.id, claimed_at, taken_over_at)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Applied);
    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Processing);
    assert_eq!(loaded.updated_at, taken_over_at);

    store
        .complete_evaluation(completion(&task, true), taken_over_at)
        .await
        .unwrap();
    let change = store
        .claim_for_evaluation(task.id, taken_over_at + Duration::days(1), taken_over_at)
        .await
        .unwrap();
    assert_eq!(change, StatusChange::Unchanged(TaskStatus::Locked));

    let err = store
        .claim_for_evaluation(TaskId::from_ulid(Ulid::new()), t0(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
