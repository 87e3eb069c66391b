//! Contention tests: the store is the only shared resource, so racing
//! workers must be serialized by the per-key transaction machinery alone.

use std::sync::{Arc, Mutex};

use branch_ledger::error::LedgerError;
use branch_ledger::expense::ExpenseWorkflow;
use branch_ledger::payment::PaymentAllocator;
use branch_ledger::purchase::{PurchaseItem, PurchaseLedger};
use branch_ledger::supplier::SupplierAccount;
use branch_ledger::types::{BusinessDate, Money};
use rust_decimal_macros::dec;
use tempfile::tempdir;

fn money(value: rust_decimal::Decimal) -> Money {
    Money::new(value).unwrap()
}

#[test]
fn concurrent_creations_yield_unique_references() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("unique_refs.db"))?);
    let workflow = Arc::new(ExpenseWorkflow::new(db));

    let references = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for worker in 0..8 {
            let workflow = Arc::clone(&workflow);
            let references = &references;
            scope.spawn(move || {
                for i in 0..5 {
                    let request = workflow
                        .create(
                            &format!("user-{worker}"),
                            "branch-01",
                            "fuel",
                            "operations",
                            &format!("top-up {i}"),
                            money(dec!(25)),
                            None,
                        )
                        .expect("create expense");
                    references.lock().unwrap().push(request.reference);
                }
            });
        }
    });

    let mut references = references.into_inner().unwrap();
    assert_eq!(references.len(), 40);
    references.sort();
    references.dedup();
    assert_eq!(references.len(), 40, "duplicate reference issued under contention");

    Ok(())
}

#[test]
fn racing_approvals_have_exactly_one_winner() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("approve_race.db"))?);
    let workflow = Arc::new(ExpenseWorkflow::new(db));

    let request = workflow.create(
        "user-1",
        "branch-01",
        "fuel",
        "operations",
        "diesel",
        money(dec!(25)),
        None,
    )?;

    let outcomes = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let workflow = Arc::clone(&workflow);
            let outcomes = &outcomes;
            let request_id = request.id.clone();
            scope.spawn(move || {
                let outcome = workflow.approve(&request_id, &format!("approver-{worker}"));
                outcomes.lock().unwrap().push(outcome);
            });
        }
    });

    let outcomes = outcomes.into_inner().unwrap();
    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1, "exactly one racing approval must win");
    for outcome in outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(err, LedgerError::InvalidState { .. } | LedgerError::Conflict),
                "loser failed with unexpected error: {err}"
            );
        }
    }

    Ok(())
}

#[test]
fn balance_invariant_holds_under_interleaved_operations() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("balance_race.db"))?);
    let suppliers = Arc::new(SupplierAccount::new(db.clone()));
    let purchases = Arc::new(PurchaseLedger::new(db.clone()));
    let payments = Arc::new(PaymentAllocator::new(db));

    let supplier = suppliers.register("Acme Fuels", None, money(dec!(100_000)), None, "admin")?;

    // Seed enough outstanding debt that concurrent payments always fit.
    for _ in 0..10 {
        purchases.create_purchase(
            &supplier.id,
            "branch-01",
            BusinessDate::new(2024, 3, 1)?,
            vec![PurchaseItem::new("diesel", 10, money(dec!(10)))?],
            "credit",
            "seed",
        )?;
    }

    // 120 interleaved operations: purchases add 10.00, payments remove 10.00.
    std::thread::scope(|scope| {
        for worker in 0..10 {
            let purchases = Arc::clone(&purchases);
            let payments = Arc::clone(&payments);
            let supplier_id = supplier.id.clone();
            scope.spawn(move || {
                for round in 0..12 {
                    if (worker + round) % 2 == 0 {
                        purchases
                            .create_purchase(
                                &supplier_id,
                                "branch-01",
                                BusinessDate::new(2024, 3, 2).unwrap(),
                                vec![PurchaseItem::new("diesel", 1, money(dec!(10))).unwrap()],
                                "credit",
                                &format!("worker-{worker}"),
                            )
                            .expect("create purchase");
                    } else {
                        payments
                            .apply(
                                &supplier_id,
                                money(dec!(10)),
                                "cash",
                                None,
                                BusinessDate::new(2024, 3, 2).unwrap(),
                                &format!("worker-{worker}"),
                                None,
                            )
                            .expect("apply payment");
                    }
                }
            });
        }
    });

    // balance() recomputes the authoritative sum and fails on drift.
    let balance = suppliers.balance(&supplier.id)?;
    let outstanding = purchases
        .outstanding(&supplier.id)?
        .iter()
        .fold(Money::zero(), |acc, p| {
            acc.checked_add(p.amount_due()).unwrap()
        });
    assert_eq!(balance, outstanding);

    // Seeded 10 x 100, then 60 purchases of 10 and 60 payments of 10.
    assert_eq!(balance, money(dec!(1000)));

    Ok(())
}

#[test]
fn racing_payments_never_overdraw_the_outstanding_balance() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("payment_race.db"))?);
    let suppliers = Arc::new(SupplierAccount::new(db.clone()));
    let purchases = Arc::new(PurchaseLedger::new(db.clone()));
    let payments = Arc::new(PaymentAllocator::new(db));

    let supplier = suppliers.register("Acme Fuels", None, money(dec!(1000)), None, "admin")?;
    purchases.create_purchase(
        &supplier.id,
        "branch-01",
        BusinessDate::new(2024, 3, 1)?,
        vec![PurchaseItem::new("diesel", 10, money(dec!(10)))?],
        "credit",
        "seed",
    )?;

    // Only one of two 60.00 payments fits into the 100.00 owed.
    let outcomes = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for worker in 0..2 {
            let payments = Arc::clone(&payments);
            let outcomes = &outcomes;
            let supplier_id = supplier.id.clone();
            scope.spawn(move || {
                let outcome = payments.apply(
                    &supplier_id,
                    money(dec!(60)),
                    "cash",
                    None,
                    BusinessDate::new(2024, 3, 2).unwrap(),
                    &format!("worker-{worker}"),
                    None,
                );
                outcomes.lock().unwrap().push(outcome);
            });
        }
    });

    let outcomes = outcomes.into_inner().unwrap();
    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in outcomes {
        if let Err(err) = outcome {
            assert!(matches!(
                err,
                LedgerError::InsufficientOutstandingBalance { .. } | LedgerError::Conflict
            ));
        }
    }
    assert_eq!(suppliers.balance(&supplier.id)?, money(dec!(40)));

    Ok(())
}
