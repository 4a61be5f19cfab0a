use criterion::{BatchSize, Criterion, Throughput};
use libmodem::modem::encode_hex;
use libmodem::modem::parser::next_line;

fn drain(buf: &mut Vec<u8>) -> usize {
    let mut lines = 0;
    while next_line(buf).is_some() {
        lines += 1;
    }
    lines
}

pub fn bench_terminal_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_terminal");
    let input: Vec<u8> = b"OK\r\n460001234567890\r\nERROR\r\n".repeat(50);
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("next_line", |b| {
        b.iter_batched_ref(|| input.clone(), |buf| drain(buf), BatchSize::SmallInput)
    });
    group.finish();
}

pub fn bench_notifications(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_notifications");
    let data = encode_hex(&[0x5Au8; 1024]);
    let line = format!("+MHTTPURC: \"content\",0,4096,1024,1024,{}\r\n", data);
    let input: Vec<u8> = line.as_bytes().repeat(4);
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("http_content", |b| {
        b.iter_batched_ref(|| input.clone(), |buf| drain(buf), BatchSize::SmallInput)
    });

    let input: Vec<u8> = b"+MQTTURC: \"publish\",0,1,\"dev/cmd\",5,5,7265736574\r\n+CSQ: 24,99\r\n+CEREG: 1,\"5A1F\",\"0B2C3D4E\",7\r\n"
        .repeat(20);
    group.bench_function("mixed", |b| {
        b.iter_batched_ref(|| input.clone(), |buf| drain(buf), BatchSize::SmallInput)
    });
    group.finish();
}
