use ingest_ring::{
    BufferBuilder, BufferError, HandlerError, InsertError, LifecycleState, MetricRegistry,
    OutputBuffer, WaitStrategyKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type BoxedHandler = Box<dyn FnMut(i64, &String) -> Result<(), HandlerError> + Send>;

/// A handler that spins until `release` is set, flagging `entered` first.
fn stuck_factory(
    entered: Arc<AtomicBool>,
    release: Arc<AtomicBool>,
) -> impl Fn(usize, usize) -> BoxedHandler + Send + Sync {
    move |_ordinal: usize, _count: usize| {
        let entered = entered.clone();
        let release = release.clone();
        Box::new(move |_seq: i64, _id: &String| -> Result<(), HandlerError> {
            entered.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
    }
}

fn wait_for(flag: &AtomicBool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !flag.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn shutdown_drains_every_published_event() {
    let handled = Arc::new(AtomicU64::new(0));
    let factory = {
        let handled = handled.clone();
        move |_ordinal: usize, _count: usize| {
            let handled = handled.clone();
            move |_seq: i64, _id: &String| -> Result<(), HandlerError> {
                thread::sleep(Duration::from_micros(200));
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    };
    let buffer: OutputBuffer<String, _> = BufferBuilder::new()
        .with_ring_size(64)
        .with_processor_count(2)
        .build_buffer(factory, Arc::new(MetricRegistry::new()))
        .unwrap();

    for i in 0..50 {
        buffer.insert_blocking(Arc::new(format!("event-{i}"))).unwrap();
    }
    let summary = buffer.shutdown().unwrap();

    assert_eq!(summary.last_sequence, 49);
    assert!(summary.inserts_drained);
    assert_eq!(summary.detached_processors, 0);
    assert_eq!(handled.load(Ordering::SeqCst), 50);
    assert_eq!(buffer.state(), LifecycleState::ShutDown);
    assert_eq!(buffer.queue_depth(), 0);
    assert_eq!(buffer.gating_sequence(), None);
}

#[test]
fn stuck_processor_is_detached_after_timeout() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let buffer: OutputBuffer<String, _> = BufferBuilder::new()
        .with_ring_size(8)
        .with_processor_count(1)
        .with_shutdown_timeout(Duration::from_millis(200))
        .build_buffer(
            stuck_factory(entered.clone(), release.clone()),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();

    buffer.insert(Arc::new("wedge".to_string())).unwrap();
    wait_for(&entered);

    let started = Instant::now();
    let summary = buffer.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.detached_processors, 1);
    assert_eq!(buffer.state(), LifecycleState::ShutDown);

    release.store(true, Ordering::SeqCst);
}

#[test]
fn shutdown_releases_producers_blocked_on_a_full_ring() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let buffer: Arc<OutputBuffer<String, _>> = Arc::new(
        BufferBuilder::new()
            .with_ring_size(2)
            .with_processor_count(1)
            .with_wait_strategy(WaitStrategyKind::Blocking)
            .with_shutdown_timeout(Duration::from_millis(200))
            .build_buffer(
                stuck_factory(entered.clone(), release.clone()),
                Arc::new(MetricRegistry::new()),
            )
            .unwrap(),
    );

    buffer.insert_blocking(Arc::new("a".to_string())).unwrap();
    buffer.insert_blocking(Arc::new("b".to_string())).unwrap();
    wait_for(&entered);

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || buffer.insert_blocking(Arc::new("c".to_string())))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!producer.is_finished());

    let summary = buffer.shutdown().unwrap();
    assert!(!summary.inserts_drained);
    assert_eq!(summary.detached_processors, 1);

    match producer.join().unwrap() {
        Err(InsertError::NotRunning(payload)) => assert_eq!(*payload, "c"),
        other => panic!("expected NotRunning, got {other:?}"),
    }
    release.store(true, Ordering::SeqCst);
}

#[test]
fn lifecycle_operations_out_of_order_are_rejected() {
    let buffer: OutputBuffer<String, _> = OutputBuffer::new(
        |_ordinal: usize, _count: usize| {
            |_seq: i64, _id: &String| -> Result<(), HandlerError> { Ok(()) }
        },
        Arc::new(MetricRegistry::new()),
    );

    assert!(matches!(
        buffer.shutdown(),
        Err(BufferError::InvalidState {
            current: LifecycleState::Uninitialized,
            ..
        })
    ));

    let config = BufferBuilder::new().with_ring_size(8).build().unwrap();
    buffer.initialize(config.clone()).unwrap();
    buffer.shutdown().unwrap();

    assert!(matches!(
        buffer.initialize(config),
        Err(BufferError::InvalidState {
            current: LifecycleState::ShutDown,
            ..
        })
    ));
    assert!(buffer
        .insert(Arc::new("late".to_string()))
        .unwrap_err()
        .into_inner()
        .as_str()
        == "late");
}

#[test]
fn gauges_track_processor_progress() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let buffer: OutputBuffer<String, _> = BufferBuilder::new()
        .with_ring_size(16)
        .with_processor_count(1)
        .build_buffer(
            stuck_factory(entered.clone(), release.clone()),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();

    assert!(buffer.is_empty());
    assert_eq!(buffer.ring_size(), Some(16));
    assert_eq!(buffer.remaining_capacity(), 16);

    for i in 0..3 {
        buffer.insert(Arc::new(format!("e{i}"))).unwrap();
    }
    wait_for(&entered);

    assert_eq!(buffer.queue_depth(), 3);
    assert_eq!(buffer.usage(), 3);
    assert_eq!(buffer.processor_lag(), vec![3]);
    assert_eq!(buffer.processor_cursors(), vec![-1]);
    assert_eq!(buffer.gating_sequence(), Some(-1));
    assert_eq!(buffer.remaining_capacity(), 13);
    assert!(!buffer.is_empty());

    release.store(true, Ordering::SeqCst);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !buffer.is_empty() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(buffer.processor_lag(), vec![0]);
    assert_eq!(buffer.gating_sequence(), Some(2));
    buffer.shutdown().unwrap();
}
