// Threshold sharing and key wrapping benchmarks for Keyward custody.
//
// Covers splitting and recombining a master key at a few policy sizes, and
// wrapping a share to a guardian's public key.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use keyward_custody::crypto::generate_master_key;
use keyward_custody::crypto::keys::RecipientKeypair;
use keyward_custody::crypto::wrap::{unwrap, wrap};
use keyward_custody::sharing::{combine, split, SharingPolicy};

const POLICIES: [(u8, u8); 3] = [(2, 3), (3, 5), (7, 10)];

fn bench_split(c: &mut Criterion) {
    let master_key = generate_master_key();
    let mut group = c.benchmark_group("shamir/split");
    group.throughput(Throughput::Bytes(master_key.len() as u64));

    for (t, n) in POLICIES {
        let policy = SharingPolicy::new(t, n).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{t}-of-{n}")), &policy, |b, p| {
            b.iter(|| split(&master_key, p).unwrap());
        });
    }
    group.finish();
}

fn bench_combine(c: &mut Criterion) {
    let master_key = generate_master_key();
    let mut group = c.benchmark_group("shamir/combine");

    for (t, n) in POLICIES {
        let shares = split(&master_key, &SharingPolicy::new(t, n).unwrap()).unwrap();
        let quorum = &shares[..t as usize];
        group.bench_with_input(BenchmarkId::from_parameter(format!("{t}-of-{n}")), quorum, |b, q| {
            b.iter(|| combine(q).unwrap());
        });
    }
    group.finish();
}

fn bench_wrap(c: &mut Criterion) {
    let recipient = RecipientKeypair::generate();
    let public = recipient.public_key();
    let master_key = generate_master_key();

    c.bench_function("wrap/seal_to_recipient", |b| {
        b.iter(|| wrap(&master_key, &public).unwrap());
    });

    let blob = wrap(&master_key, &public).unwrap();
    c.bench_function("wrap/open_as_recipient", |b| {
        b.iter(|| unwrap(&blob, &recipient).unwrap());
    });
}

criterion_group!(benches, bench_split, bench_combine, bench_wrap);
criterion_main!(benches);
