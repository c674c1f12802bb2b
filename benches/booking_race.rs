//! Contended booking throughput: many tasks race for the same slots of one
//! professional, so every round has exactly one winner per slot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as Days, Utc};
use rust_decimal::Decimal;
use ulid::Ulid;

use apptd::engine::{Engine, EngineError, EnginePolicy};
use apptd::model::*;

const ROUNDS: usize = 200;
const CONTENDERS: usize = 32;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup(engine: &Engine) -> (Ulid, Ulid) {
    let service = Ulid::new();
    engine
        .upsert_service(Service {
            id: service,
            name: Some("Cut".into()),
            duration_min: 30,
            price: Decimal::from(1000),
            deposit: DepositConfig::default(),
        })
        .await
        .expect("service");

    let professional = Ulid::new();
    let hours = "mon 00:00-24:00, tue 00:00-24:00, wed 00:00-24:00, thu 00:00-24:00, \
                 fri 00:00-24:00, sat 00:00-24:00, sun 00:00-24:00";
    engine
        .upsert_professional(Professional {
            id: professional,
            name: Some("Bench".into()),
            hours: hours.parse().expect("hours"),
            services: vec![service],
        })
        .await
        .expect("professional");
    (professional, service)
}

async fn run() {
    let dir = std::env::temp_dir().join(format!("apptd_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("bench dir");
    let engine = Arc::new(
        Engine::new(dir.join("bench.wal"), EnginePolicy::default()).expect("engine"),
    );
    let (professional, service) = setup(&engine).await;

    let first_day = Utc::now().date_naive() + Days::days(1);
    let ctx = RequestContext::system();

    let mut won = Vec::new();
    let mut lost = Vec::new();
    let mut unexpected = 0usize;
    let started = Instant::now();

    for round in 0..ROUNDS {
        // 48 half-hour slots per day.
        let day = first_day + Days::days((round / 48) as i64);
        let start = day_start(day) + (round % 48) as Ms * 30 * MINUTE_MS;

        let mut handles = Vec::with_capacity(CONTENDERS);
        for _ in 0..CONTENDERS {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let req = NewBooking {
                    id: Ulid::new(),
                    professional_id: professional,
                    service_id: service,
                    customer_id: Ulid::new(),
                    start,
                    end: None,
                    notes: None,
                    allow_past: false,
                };
                let t = Instant::now();
                let result = engine.create_booking(&ctx, req).await;
                (result, t.elapsed())
            }));
        }

        let mut winners = 0;
        for handle in handles {
            let (result, elapsed) = handle.await.expect("task");
            match result {
                Ok(_) => {
                    winners += 1;
                    won.push(elapsed);
                }
                Err(EngineError::SlotConflict { .. }) => lost.push(elapsed),
                Err(_) => unexpected += 1,
            }
        }
        assert_eq!(winners, 1, "round {round}: expected exactly one winner");
    }

    let elapsed = started.elapsed();
    let attempts = ROUNDS * CONTENDERS;
    println!("booking_race: {ROUNDS} rounds x {CONTENDERS} contenders");
    println!(
        "  total {:.2}s, {:.0} attempts/s, {:.0} bookings/s, {unexpected} unexpected errors",
        elapsed.as_secs_f64(),
        attempts as f64 / elapsed.as_secs_f64(),
        ROUNDS as f64 / elapsed.as_secs_f64(),
    );
    print_latency("winners", &mut won);
    print_latency("conflicts", &mut lost);

    let _ = std::fs::remove_dir_all(&dir);
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    runtime.block_on(run());
}
