use criterion::{Criterion, Throughput};
use libmodem::modem::{decode_hex, encode_hex, encode_hex_append};
use rand::Rng;

fn payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.r#gen()).collect()
}

pub fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("hex_encode");
    // One socket send chunk.
    let data = payload(730);
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("encode_hex", |b| b.iter(|| encode_hex(&data)));
    group.bench_function("encode_hex_append", |b| {
        let mut out = String::with_capacity(data.len() * 2 + 32);
        b.iter(|| {
            out.clear();
            out.push_str("AT+MIPSEND=0,730,");
            encode_hex_append(&mut out, &data);
        })
    });
    group.finish();
}

pub fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("hex_decode");
    let hex = encode_hex(&payload(1024));
    group.throughput(Throughput::Bytes(hex.len() as u64 / 2));
    group.bench_function("decode_hex", |b| b.iter(|| decode_hex(&hex)));
    group.finish();
}
