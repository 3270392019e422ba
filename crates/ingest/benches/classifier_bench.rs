//! Classifier and state benchmarks
//!
//! Measures per-line classification cost for each line category and the
//! throughput of classify + apply over a mixed batch.

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use emerald_core::types::ServerId;
use emerald_ingest::classifier::LineClassifier;
use emerald_ingest::config::InvariantPolicy;
use emerald_ingest::state::ServerState;

const QUEUE: &str = "[2025.05.17-02.01.30:123][ 42]LogNet: Join request: /Game/Maps/world_0/World_0?logintype=eos&login=Njshh&Name=Njshh&eosid=|0002e69a5b3c4d1e9f0a1b2c3d4e5f60";
const JOIN: &str = "[2025.05.17-02.01.31:007][ 43]LogOnline: Player |0002e69a5b3c4d1e9f0a1b2c3d4e5f60 successfully registered!";
const DISCONNECT: &str = "[2025.05.17-02.09.12:555][812]LogNet: UChannel::Close: Sending CloseBunch. ChIndex == 0. Name: [UChannel] ChIndex: 0, Closing: 0 [UNetConnection] RemoteAddr: 10.0.0.1:7777, UniqueId: EOS:|0002e69a5b3c4d1e9f0a1b2c3d4e5f60";
const AIRDROP: &str = "[2025.05.17-02.10.00:000][900]LogSFPS: AirDrop id=drop-17 status=Flying";
const MISSION: &str = "[2025.05.17-02.11.00:000][901]LogSFPS: Mission id=GA_Military_02_Mis1 level=4 state=Ready";
const SUPPRESSED: &str = "[2025.05.17-02.12.00:000][902]LogSFPS: SaveConstructions took 12.3ms";
const NOISE: &str = "[2025.05.17-02.13.00:000][903]LogStreaming: Display: Flushing async loaders.";

fn bench_classify(c: &mut Criterion) {
    let classifier = LineClassifier::new(3).unwrap();

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    for (name, line) in [
        ("queue", QUEUE),
        ("join", JOIN),
        ("disconnect", DISCONNECT),
        ("airdrop", AIRDROP),
        ("mission", MISSION),
        ("suppressed", SUPPRESSED),
        ("unclassified", NOISE),
    ] {
        group.bench_with_input(BenchmarkId::new("line", name), &line, |b, line| {
            b.iter(|| classifier.classify(black_box(line)))
        });
    }

    group.finish();
}

fn bench_classify_and_apply(c: &mut Criterion) {
    let classifier = LineClassifier::new(3).unwrap();
    let batch: Vec<&str> = [QUEUE, JOIN, NOISE, AIRDROP, SUPPRESSED, MISSION, DISCONNECT]
        .iter()
        .cycle()
        .take(7_000)
        .copied()
        .collect();

    let mut group = c.benchmark_group("classify_and_apply");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("mixed_batch", |b| {
        b.iter(|| {
            let mut state = ServerState::new(ServerId::new("bench"), InvariantPolicy::Clamp);
            let now = Utc::now();
            for line in &batch {
                state.apply(classifier.classify(black_box(line)), now);
            }
            state.snapshot()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_classify, bench_classify_and_apply);
criterion_main!(benches);
