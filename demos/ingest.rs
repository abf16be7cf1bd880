// In demos/ingest.rs
//
// cargo run --example ingest -- <num_messages> [wait_strategy] [--auto-exit]
use ingest_ring::{BufferBuilder, HandlerError, MetricRegistry, OutputBuffer, WaitStrategyKind};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <num_messages> [busy_spinning|yielding|blocking|sleeping] [--auto-exit]",
            args[0]
        );
        std::process::exit(1);
    }

    let num_messages: usize = args[1].parse().expect("Invalid number of messages");
    let wait_strategy: WaitStrategyKind = match args.get(2) {
        Some(s) if s != "--auto-exit" => s.parse()?,
        _ => WaitStrategyKind::default(),
    };
    let auto_exit = args.iter().any(|s| s == "--auto-exit");

    let keep_alive = Arc::new(AtomicBool::new(true));
    let keep_alive_for_handler = Arc::clone(&keep_alive);

    // Handle Ctrl+C to stop producing and shut down cleanly
    ctrlc::set_handler(move || {
        keep_alive_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    let registry = Arc::new(MetricRegistry::new());
    let buffer: Arc<OutputBuffer<String, _>> = Arc::new(
        BufferBuilder::new()
            .with_ring_size(8192)
            .with_processor_count(3)
            .with_wait_strategy(wait_strategy)
            .build_buffer(
                |ordinal: usize, count: usize| {
                    println!("Processor {}/{}: started", ordinal + 1, count);
                    move |seq: i64, message: &String| -> Result<(), HandlerError> {
                        if seq % 10_000 == 0 {
                            println!("Processor {}: sequence {} -> {}", ordinal, seq, message);
                        }
                        Ok(())
                    }
                },
                registry.clone(),
            )?,
    );

    let producers = 4;
    let per_producer = num_messages / producers;
    println!(
        "Ingest: {} producers sending {} messages with the {} wait strategy",
        producers,
        per_producer * producers,
        wait_strategy
    );

    let start = Instant::now();
    let mut handles = Vec::with_capacity(producers);
    for p in 0..producers {
        let buffer = Arc::clone(&buffer);
        let keep_alive = Arc::clone(&keep_alive);
        handles.push(thread::spawn(move || {
            let mut sent = 0;
            for i in 0..per_producer {
                if !keep_alive.load(Ordering::SeqCst) {
                    break;
                }
                // Format: "producer:message_number"
                if buffer
                    .insert_blocking(Arc::new(format!("{}:message_{}", p, i)))
                    .is_err()
                {
                    break;
                }
                sent += 1;
            }
            sent
        }));
    }

    let mut sent = 0;
    for h in handles {
        sent += h.join().unwrap_or(0);
    }
    let send_time = start.elapsed();
    println!("Ingest: Sent {} messages in {:.2?}", sent, send_time);
    println!(
        "Ingest: Throughput: {:.2} messages/sec",
        sent as f64 / send_time.as_secs_f64()
    );

    if !auto_exit {
        println!("Press Ctrl+C to shut down...");
        while keep_alive.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    println!("Ingest: Shutting down");
    let summary = buffer.shutdown()?;
    println!(
        "Ingest: Drained through sequence {} ({} processors detached)",
        summary.last_sequence, summary.detached_processors
    );

    for (name, count) in registry.snapshot() {
        println!("  {:<45} {}", name, count);
    }
    Ok(())
}
