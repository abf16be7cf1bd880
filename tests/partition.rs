// Broadcast-then-filter: every processor sees every event, exactly one acts.
use ingest_ring::{
    BufferBuilder, HandlerError, MetricRegistry, OutputBuffer, Partitioner, Sha256Partitioner,
    WaitStrategyKind,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct FirstByte;

impl Partitioner for FirstByte {
    fn partition(&self, identity: &[u8], count: usize) -> usize {
        identity.first().map_or(0, |b| *b as usize % count)
    }
}

#[test]
fn each_payload_is_handled_by_its_partition_owner() {
    let registry = Arc::new(MetricRegistry::new());
    let seen: Arc<Mutex<Vec<(usize, i64, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let seen = seen.clone();
        move |ordinal: usize, count: usize| {
            assert_eq!(count, 2);
            let seen = seen.clone();
            move |seq: i64, id: &String| -> Result<(), HandlerError> {
                seen.lock().push((ordinal, seq, id.clone()));
                Ok(())
            }
        }
    };
    let buffer: OutputBuffer<String, _> = BufferBuilder::new()
        .with_ring_size(8)
        .with_processor_count(2)
        .with_wait_strategy(WaitStrategyKind::Yielding)
        .build_buffer(factory, registry.clone())
        .unwrap();

    for i in 0..20 {
        buffer.insert_blocking(Arc::new(format!("message_{i}"))).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.queue_depth() != 0 {
            assert!(Instant::now() < deadline);
            thread::yield_now();
        }
    }
    buffer.shutdown().unwrap();

    assert_eq!(registry.meter("OutputBuffer.blockedInserts").count(), 0);

    let seen = seen.lock();
    assert_eq!(seen.len(), 20);

    let mut owners: HashMap<&str, usize> = HashMap::new();
    for (ordinal, _seq, id) in seen.iter() {
        assert!(owners.insert(id.as_str(), *ordinal).is_none(), "{id} handled twice");
    }
    for i in 0..20 {
        let id = format!("message_{i}");
        let expected = Sha256Partitioner.partition(id.as_bytes(), 2);
        assert_eq!(owners[id.as_str()], expected, "{id} went to the wrong processor");
    }

    for ordinal in 0..2 {
        let seqs: Vec<i64> = seen
            .iter()
            .filter(|(o, _, _)| *o == ordinal)
            .map(|(_, s, _)| *s)
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn custom_partitioner_routes_events() {
    let seen: Arc<Mutex<Vec<(usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let seen = seen.clone();
        move |ordinal: usize, _count: usize| {
            let seen = seen.clone();
            move |_seq: i64, id: &String| -> Result<(), HandlerError> {
                seen.lock().push((ordinal, id.clone()));
                Ok(())
            }
        }
    };
    let config = BufferBuilder::new()
        .with_ring_size(16)
        .with_processor_count(3)
        .with_wait_strategy(WaitStrategyKind::Yielding)
        .build()
        .unwrap();
    let buffer: OutputBuffer<String, _> =
        OutputBuffer::new(factory, Arc::new(MetricRegistry::new()))
            .with_partitioner(Arc::new(FirstByte));
    buffer.initialize(config).unwrap();

    // 'a' = 97 -> 1, 'b' = 98 -> 2, 'c' = 99 -> 0
    for id in ["apple", "banana", "cherry", "avocado"] {
        buffer.insert_blocking(Arc::new(id.to_string())).unwrap();
    }
    buffer.shutdown().unwrap();

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (0, "cherry".to_string()),
            (1, "apple".to_string()),
            (1, "avocado".to_string()),
            (2, "banana".to_string()),
        ]
    );
}

/// Panics on the identity "poison", owns everything else with ordinal 0.
#[derive(Debug)]
struct PoisonSensitive;

impl Partitioner for PoisonSensitive {
    fn partition(&self, identity: &[u8], _count: usize) -> usize {
        if identity == b"poison" {
            panic!("cannot partition poison");
        }
        0
    }
}

#[test]
fn panicking_partitioner_does_not_wedge_the_ring() {
    let registry = Arc::new(MetricRegistry::new());
    let config = BufferBuilder::new()
        .with_ring_size(4)
        .with_processor_count(1)
        .with_wait_strategy(WaitStrategyKind::Yielding)
        .build()
        .unwrap();
    let buffer: OutputBuffer<String, _> = OutputBuffer::new(
        |_ordinal: usize, _count: usize| {
            |_seq: i64, _id: &String| -> Result<(), HandlerError> { Ok(()) }
        },
        registry.clone(),
    )
    .with_partitioner(Arc::new(PoisonSensitive));
    buffer.initialize(config).unwrap();

    buffer.insert(Arc::new("poison".to_string())).unwrap();

    // Ten more events than fit in the ring: only possible if the cursor moves.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut accepted = 0;
    while accepted < 10 {
        assert!(Instant::now() < deadline, "ring stalled after a partitioner panic");
        match buffer.insert(Arc::new(format!("event-{accepted}"))) {
            Ok(()) => accepted += 1,
            Err(e) => {
                assert!(e.is_full());
                thread::yield_now();
            }
        }
    }
    while buffer.queue_depth() != 0 {
        assert!(Instant::now() < deadline, "processor did not drain the ring");
        thread::yield_now();
    }

    assert_eq!(buffer.processor_cursors(), vec![10]);
    let summary = buffer.shutdown().unwrap();
    assert_eq!(summary.detached_processors, 0);
    assert_eq!(registry.meter("OutputBuffer.processor-0.failedMessages").count(), 1);
    assert_eq!(registry.meter("OutputBuffer.processor-0.processedMessages").count(), 10);
}
