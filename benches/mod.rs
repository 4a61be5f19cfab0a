use criterion::{criterion_group, criterion_main};

mod modem;

criterion_group!(
    benches,
    modem::hex::bench_encode,
    modem::hex::bench_decode,
    modem::parser::bench_terminal_lines,
    modem::parser::bench_notifications
);
criterion_main!(benches);
