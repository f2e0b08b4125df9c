//! Criterion benchmarks for the engine paths the relay exercises.

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kcp_relay::kcp_core::{
    constants, KcpCoreConfig, KcpEngine, KcpHeader, NodeDelayConfig, OutputFn,
};
use std::sync::{Arc, Mutex};

type Outbox = Arc<Mutex<Vec<Vec<u8>>>>;

fn engine(conv: u32, config: KcpCoreConfig) -> (KcpEngine, Outbox) {
    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let sink = outbox.clone();
    let output: OutputFn = Box::new(move |data: &[u8]| sink.lock().unwrap().push(data.to_vec()));
    (KcpEngine::new(conv, 0, config, output), outbox)
}

/// Deliver everything `from` emitted to `to`.
fn transfer(from: &Outbox, to: &mut KcpEngine) {
    for datagram in std::mem::take(&mut *from.lock().unwrap()) {
        let _ = to.input(&datagram);
    }
}

/// Lossless rounds of update + flush on both sides, counting messages
/// reassembled at `b`.
fn run_rounds(
    a: &mut KcpEngine,
    a_out: &Outbox,
    b: &mut KcpEngine,
    b_out: &Outbox,
    expected: usize,
) -> usize {
    let mut buf = vec![0u8; 64 * 1024];
    let mut received = 0;
    let mut now = 0u32;
    while received < expected && now < 600_000 {
        a.update(now);
        a.flush();
        transfer(a_out, b);

        while b.recv(&mut buf).is_ok() {
            received += 1;
        }

        b.update(now);
        b.flush();
        transfer(b_out, a);
        now += 10;
    }
    received
}

fn fast_config() -> KcpCoreConfig {
    KcpCoreConfig {
        snd_wnd: 128,
        rcv_wnd: 128,
        nodelay: NodeDelayConfig::fast(),
        send_queue_limit: 8192,
        ..KcpCoreConfig::default()
    }
}

fn engine_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");

    for &count in &[10usize, 100, 500] {
        let size = 16 * 1024;
        group.throughput(Throughput::Bytes((count * size) as u64));

        group.bench_with_input(BenchmarkId::new("16KiB_chunks", count), &count, |b, &count| {
            let payload = vec![0xABu8; size];
            b.iter(|| {
                let (mut tx, tx_out) = engine(0xBEEF, fast_config());
                let (mut rx, rx_out) = engine(0xBEEF, fast_config());
                for _ in 0..count {
                    tx.send(&payload).unwrap();
                }
                let received = run_rounds(&mut tx, &tx_out, &mut rx, &rx_out, count);
                assert_eq!(received, count);
            });
        });
    }

    group.finish();
}

fn header_codec(c: &mut Criterion) {
    let mut header = KcpHeader::new(69, constants::IKCP_CMD_PUSH);
    header.sn = 1234;
    header.len = 1376;

    c.bench_function("header_encode_decode", |b| {
        let mut buf = BytesMut::with_capacity(KcpHeader::SIZE);
        b.iter(|| {
            buf.clear();
            header.encode(&mut buf);
            let mut bytes = Bytes::copy_from_slice(&buf);
            KcpHeader::decode(&mut bytes)
        });
    });
}

fn malformed_input(c: &mut Criterion) {
    let (mut kcp, _out) = engine(69, KcpCoreConfig::default());
    let short = [0u8; 12];
    let mut foreign = BytesMut::new();
    KcpHeader::new(70, constants::IKCP_CMD_PUSH).encode(&mut foreign);

    c.bench_function("reject_short_datagram", |b| b.iter(|| kcp.input(&short)));
    c.bench_function("reject_foreign_conv", |b| b.iter(|| kcp.input(&foreign)));
}

criterion_group!(benches, engine_throughput, header_codec, malformed_input);
criterion_main!(benches);
