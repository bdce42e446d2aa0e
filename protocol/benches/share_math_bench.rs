// Share and value arithmetic benchmarks for the custody protocol.
//
// Covers price normalization, token-to-value conversion across decimal
// precisions, mint/burn previews on a populated ledger, and the fee floor.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custody_protocol::flash::compute_fee;
use custody_protocol::math::{amount_to_value, normalize_price, value_to_amount};
use custody_protocol::reward::full_reward;
use custody_protocol::shares::ShareLedger;
use custody_protocol::AccountId;

fn bench_value_conversion(c: &mut Criterion) {
    let price = normalize_price(2_000_000_000, 6).unwrap();

    c.bench_function("math/amount_to_value_18dp", |b| {
        b.iter(|| amount_to_value(1_000_000_000_000_000_000, price, 18, 6));
    });

    c.bench_function("math/value_to_amount_18dp", |b| {
        b.iter(|| value_to_amount(2_500_000_000, price, 18, 6));
    });

    c.bench_function("math/normalize_price", |b| {
        b.iter(|| normalize_price(199_999_999_999_999, 12));
    });
}

fn bench_share_previews(c: &mut Criterion) {
    let mut group = c.benchmark_group("shares/preview");

    for holders in [10usize, 1_000, 100_000] {
        let ledger = ShareLedger::with_holdings(
            (0..holders).map(|i| (AccountId::new(format!("acct-{i}")), 1_000_003u128)),
        )
        .unwrap();
        let value = ledger.total_units() * 5 / 4;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("mint", holders), &ledger, |b, ledger| {
            b.iter(|| ledger.preview_mint(997_001, value, 1_000));
        });
        group.bench_with_input(BenchmarkId::new("burn", holders), &ledger, |b, ledger| {
            b.iter(|| ledger.preview_burn(1_000_003, 1_000_003, value));
        });
    }

    group.finish();
}

fn bench_fees_and_rewards(c: &mut Criterion) {
    c.bench_function("flash/compute_fee", |b| {
        b.iter(|| compute_fee(123_456_789, 9, 1));
    });

    c.bench_function("reward/full_reward", |b| {
        b.iter(|| full_reward(1_000_000_000, 31_536_000, 1_000));
    });
}

criterion_group!(
    benches,
    bench_value_conversion,
    bench_share_previews,
    bench_fees_and_rewards,
);
criterion_main!(benches);
