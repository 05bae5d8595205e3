// ledger/tests/integration_tests.rs
use loyalty_ledger::{
    LedgerAdapter, LedgerError, LedgerSystem, Operation, OperationKind, Order,
    OrderState, POINTS, Registration, adapters::MemoryAdapter,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

fn setup() -> (LedgerSystem, Arc<dyn LedgerAdapter>, Uuid) {
    let system = LedgerSystem::new(Box::new(MemoryAdapter::new()));
    let adapter = system.adapter_arc();
    let user = Uuid::now_v7();

    (system, adapter, user)
}

async fn processed_order(ledger: &Arc<dyn LedgerAdapter>, user: Uuid, number: &str, amount: i64) {
    let order = Order::new(number, user, POINTS);
    assert_eq!(
        ledger.register_order(&order).await.unwrap(),
        Registration::Created
    );
    assert!(
        ledger
            .finalize_accrual(number, Decimal::from(amount))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_register_order_is_idempotent_per_owner() {
    let (_system, ledger, user) = setup();
    let other = Uuid::now_v7();

    let order = Order::new("79927398713", user, POINTS);
    assert_eq!(
        ledger.register_order(&order).await.unwrap(),
        Registration::Created
    );
    assert_eq!(
        ledger.register_order(&order).await.unwrap(),
        Registration::OwnedByCaller
    );

    let foreign = Order::new("79927398713", other, POINTS);
    assert_eq!(
        ledger.register_order(&foreign).await.unwrap(),
        Registration::OwnedByOther
    );

    let stored = ledger.get_order("79927398713").await.unwrap().unwrap();
    assert_eq!(stored.owner, user);
    assert_eq!(stored.state, OrderState::New);
    assert_eq!(ledger.get_orders(user).await.unwrap().len(), 1);
    assert!(ledger.get_orders(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_writes_exactly_one_accrual() {
    let (_system, ledger, user) = setup();
    processed_order(&ledger, user, "79927398713", 500).await;

    // Second finalization is a no-op
    assert!(
        !ledger
            .finalize_accrual("79927398713", Decimal::from(999))
            .await
            .unwrap()
    );

    let order = ledger.get_order("79927398713").await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Processed);
    assert_eq!(order.accrual, Some(Decimal::from(500)));

    assert_eq!(
        ledger
            .count_operations("79927398713", OperationKind::Accrual)
            .await
            .unwrap(),
        1
    );

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.current, Decimal::from(500));
    assert_eq!(balance.withdrawn, Decimal::ZERO);
}

#[tokio::test]
async fn test_finalize_unknown_order() {
    let (_system, ledger, _user) = setup();
    let err = ledger
        .finalize_accrual("79927398713", Decimal::from(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[tokio::test]
async fn test_status_updates_are_forward_only() {
    let (_system, ledger, user) = setup();
    let order = Order::new("12345678903", user, POINTS);
    ledger.register_order(&order).await.unwrap();

    ledger
        .update_order_status("12345678903", OrderState::Processing)
        .await
        .unwrap();
    // Repeated processing report
    ledger
        .update_order_status("12345678903", OrderState::Processing)
        .await
        .unwrap();
    ledger
        .update_order_status("12345678903", OrderState::Invalid)
        .await
        .unwrap();

    let err = ledger
        .update_order_status("12345678903", OrderState::Processing)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransition {
            from: OrderState::Invalid,
            to: OrderState::Processing
        }
    ));

    // Invalid orders never earn anything
    assert!(
        !ledger
            .finalize_accrual("12345678903", Decimal::from(10))
            .await
            .unwrap()
    );
    assert_eq!(
        ledger.get_balance(user).await.unwrap().current,
        Decimal::ZERO
    );
}

#[tokio::test]
async fn test_processed_only_through_finalization() {
    let (_system, ledger, user) = setup();
    ledger
        .register_order(&Order::new("12345678903", user, POINTS))
        .await
        .unwrap();

    let err = ledger
        .update_order_status("12345678903", OrderState::Processed)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_unresolved_orders_rotate_by_last_poll() {
    let (_system, ledger, user) = setup();
    let numbers = ["79927398713", "12345678903", "4561261212345467"];
    for number in numbers {
        ledger
            .register_order(&Order::new(number, user, POINTS))
            .await
            .unwrap();
    }
    processed_order(&ledger, user, "2377225624", 10).await;

    // Selecting a batch does not move anything in the rotation
    let first = ledger.unresolved_orders(2).await.unwrap();
    let again = ledger.unresolved_orders(2).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(
        first.iter().map(|o| &o.number).collect::<Vec<_>>(),
        again.iter().map(|o| &o.number).collect::<Vec<_>>()
    );

    // Only the polled order goes to the back
    ledger.mark_polled(&first[0].number).await.unwrap();
    let next = ledger.unresolved_orders(3).await.unwrap();
    assert_eq!(next.len(), 3);
    assert_eq!(next[2].number, first[0].number);
    assert_eq!(next[0].number, first[1].number);

    // Most recently polled goes last
    ledger.mark_polled(&next[0].number).await.unwrap();
    let after = ledger.unresolved_orders(3).await.unwrap();
    assert_eq!(after[2].number, next[0].number);
    assert_eq!(after[1].number, first[0].number);

    // Terminal orders are never selected
    assert!(after.iter().all(|o| o.number != "2377225624"));

    assert!(matches!(
        ledger.mark_polled("18").await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_withdrawal_reduces_balance() {
    let (_system, ledger, user) = setup();
    processed_order(&ledger, user, "79927398713", 500).await;

    let withdrawal = Operation::withdrawal(user, "2377225624", Decimal::from(200), POINTS);
    ledger.append_withdrawal(&withdrawal).await.unwrap();

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.current, Decimal::from(300));
    assert_eq!(balance.withdrawn, Decimal::from(200));

    let withdrawals = ledger
        .get_operations(user, Some(OperationKind::Withdraw))
        .await
        .unwrap();
    assert_eq!(withdrawals, vec![withdrawal]);
    assert_eq!(ledger.get_operations(user, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_withdrawal_rejects_overdraft() {
    let (_system, ledger, user) = setup();
    processed_order(&ledger, user, "79927398713", 100).await;

    let err = ledger
        .append_withdrawal(&Operation::withdrawal(
            user,
            "2377225624",
            Decimal::new(10001, 2),
            POINTS,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds));

    // Rolled back: nothing was written
    assert!(
        ledger
            .get_operations(user, Some(OperationKind::Withdraw))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        ledger.get_balance(user).await.unwrap().current,
        Decimal::from(100)
    );
}

#[tokio::test]
async fn test_withdrawal_rejects_duplicate_order_number() {
    let (_system, ledger, user) = setup();
    processed_order(&ledger, user, "79927398713", 500).await;

    ledger
        .append_withdrawal(&Operation::withdrawal(
            user,
            "79927398713",
            Decimal::from(200),
            POINTS,
        ))
        .await
        .unwrap();

    let err = ledger
        .append_withdrawal(&Operation::withdrawal(
            user,
            "79927398713",
            Decimal::from(200),
            POINTS,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateWithdrawal(_)));

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.current, Decimal::from(300));
    assert_eq!(balance.withdrawn, Decimal::from(200));
}

#[tokio::test]
async fn test_withdrawal_rejects_non_positive_amount() {
    let (_system, ledger, user) = setup();
    let err = ledger
        .append_withdrawal(&Operation::withdrawal(
            user,
            "79927398713",
            Decimal::ZERO,
            POINTS,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let (_system, ledger, user) = setup();
    processed_order(&ledger, user, "79927398713", 1000).await;

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            let op =
                Operation::withdrawal(user, format!("withdraw-{i}"), Decimal::from(150), POINTS);
            ledger.append_withdrawal(&op).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(LedgerError::InsufficientFunds) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 6);
    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.withdrawn, Decimal::from(900));
    assert_eq!(balance.current, Decimal::from(100));
}

#[tokio::test]
async fn test_closed_adapter_fails_with_storage_error() {
    let (system, ledger, user) = setup();
    system.shutdown().await;

    let err = ledger.get_balance(user).await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)));
}
