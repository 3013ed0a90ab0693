//! Criterion benchmarks for aggregate roll-forward and ledger mutations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ebb_core::constants::{EPOCH_LENGTH, UNIT};
use ebb_core::traits::{DelegateDirectory, VotingPower};
use ebb_core::types::AccountId;
use ebb_escrow::{Aggregate, EscrowLedger, VeBalance};

struct NoDelegates;

impl DelegateDirectory for NoDelegates {
    fn is_registered(&self, _account: &AccountId) -> bool {
        false
    }
}

fn bench_roll_forward(c: &mut Criterion) {
    // 104 expiry boundaries, rolled across in one jump.
    let mut base = Aggregate::new();
    for e in 1..=104u64 {
        let expiry = e * EPOCH_LENGTH;
        let slope = 1_000u128 * e as u128;
        base.add(&VeBalance::from_lock(slope, expiry), expiry).unwrap();
    }
    c.bench_function("roll_forward_104_boundaries", |b| {
        b.iter(|| {
            let mut agg = base.clone();
            agg.roll_forward(black_box(105 * EPOCH_LENGTH));
            black_box(agg.checkpoint.balance)
        })
    });
}

fn bench_lazy_value(c: &mut Criterion) {
    let mut agg = Aggregate::new();
    for e in 1..=104u64 {
        let expiry = e * EPOCH_LENGTH;
        agg.add(&VeBalance::from_lock(1_000, expiry), expiry).unwrap();
    }
    c.bench_function("value_at_across_52_boundaries", |b| {
        b.iter(|| black_box(agg.value_at(black_box(52 * EPOCH_LENGTH + 1))))
    });
}

fn bench_create_lock(c: &mut Criterion) {
    c.bench_function("create_lock_1000", |b| {
        b.iter(|| {
            let mut ledger = EscrowLedger::new();
            for i in 0..1_000u64 {
                let owner = AccountId([(i % 251) as u8 + 1; 32]);
                let expiry = (2 + (i % 100)) * EPOCH_LENGTH;
                ledger
                    .create_lock(0, owner, expiry, 104_000 * UNIT, 0, None, &NoDelegates)
                    .unwrap();
            }
            black_box(ledger.total_power(0))
        })
    });
}

criterion_group!(benches, bench_roll_forward, bench_lazy_value, bench_create_lock);
criterion_main!(benches);
