use common::{Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use ledger::{
    BookRecord, ConditionGrade, InMemoryLedger, LedgerStore, OrderRecord, OrderState, OrderWrite,
};

fn make_book() -> BookRecord {
    BookRecord::new(
        "978-0262033848",
        "Introduction to Algorithms",
        ConditionGrade::LikeNew,
        Money::from_cents(5000),
        UserId::new(),
    )
}

fn bench_reserve_book(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("ledger/reserve_book", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryLedger::new();
                let book = make_book();
                ledger.insert_book(book.clone()).await.unwrap();
                let order = OrderRecord::new(&book, UserId::new(), "student union");
                ledger.reserve_book(book.id, order).await.unwrap();
            });
        });
    });
}

fn bench_commit_transition(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("ledger/commit_transition", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryLedger::new();
                let book = make_book();
                ledger.insert_book(book.clone()).await.unwrap();
                let order = OrderRecord::new(&book, UserId::new(), "student union");
                let order = ledger.reserve_book(book.id, order).await.unwrap();

                let mut paid = order;
                paid.state = OrderState::Paid;
                ledger
                    .commit(OrderWrite::new(paid).with_transition(OrderState::PendingPayment))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_orders_in_state(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryLedger::new();

    // Pre-populate with 100 pending orders
    rt.block_on(async {
        for _ in 0..100 {
            let book = make_book();
            ledger.insert_book(book.clone()).await.unwrap();
            let order = OrderRecord::new(&book, UserId::new(), "student union");
            ledger.reserve_book(book.id, order).await.unwrap();
        }
    });

    c.bench_function("ledger/orders_in_state_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let pending = ledger
                    .orders_in_state(OrderState::PendingPayment)
                    .await
                    .unwrap();
                assert_eq!(pending.len(), 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_book,
    bench_commit_transition,
    bench_orders_in_state,
);
criterion_main!(benches);
