//! Benchmarks for the slot scheduler.
//!
//! Benchmarks cover:
//! - Slot table transitions and admission
//! - Watchdog sweeps over many open slots
//! - Scheduler ticks dispatching a backlog

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Runtime;

use prometheus_slot_scheduler::builders::build_service;
use prometheus_slot_scheduler::config::SlotsConfig;
use prometheus_slot_scheduler::core::{
    AuditLog, DispatchRequest, ExecutorHandle, ExecutorSpawner, HeartbeatMonitor, NewSlot,
    OwnerId, Scheduler, SlotError, SlotStatus, SlotTable, SlotUpdate, Submission, Token,
    WatchdogConfig,
};
use prometheus_slot_scheduler::util::{Clock, ManualClock};

// ============================================================================
// Helpers
// ============================================================================

struct NoOpExecutor;

#[async_trait]
impl ExecutorSpawner for NoOpExecutor {
    async fn spawn(&self, request: &DispatchRequest) -> Result<ExecutorHandle, SlotError> {
        Ok(ExecutorHandle {
            token: request.token.clone(),
            id: "bench".into(),
        })
    }
}

fn new_slot(i: u64) -> NewSlot {
    NewSlot {
        token: Token::new(format!("slot-{i}")),
        owner: OwnerId::from("bench"),
        title: format!("title-{i}"),
        payload: format!("payload-{i}"),
    }
}

// ============================================================================
// Table Benchmarks
// ============================================================================

fn bench_table_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lifecycle");

    for size in [100u64, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut table = SlotTable::new();
                for i in 0..size {
                    table.create(new_slot(i), 1_000).unwrap();
                }
                for i in 0..size {
                    let token = Token::new(format!("slot-{i}"));
                    table
                        .transition(&token, SlotStatus::Running, SlotUpdate::progress(50), 2_000)
                        .unwrap();
                    table
                        .transition(&token, SlotStatus::Done, SlotUpdate::output("ok"), 3_000)
                        .unwrap();
                }
                black_box(table.len());
            });
        });
    }
    group.finish();
}

fn bench_table_admit_under_limit(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_admit_under_limit");

    for size in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut table = SlotTable::new();
                for i in 0..size {
                    table.create(new_slot(i), 1_000).unwrap();
                }
                for i in 0..size {
                    let admitted = table
                        .admit(&Token::new(format!("slot-{i}")), 8, 2_000)
                        .unwrap();
                    black_box(admitted);
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Watchdog Benchmarks
// ============================================================================

fn bench_watchdog_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("watchdog_sweep");

    for size in [100u64, 1_000, 10_000] {
        let clock = ManualClock::new(1_000);
        let mut table = SlotTable::new();
        for i in 0..size {
            let slot = table.create(new_slot(i), 1_000).unwrap();
            table
                .transition(&slot.token, SlotStatus::Running, SlotUpdate::default(), 1_000)
                .unwrap();
            table.touch_heartbeat(&slot.token, Some(20), 1_000).unwrap();
        }
        let slots = table.list(&OwnerId::from("bench"));
        clock.advance(Duration::from_secs(30));

        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &slots, |b, slots| {
            let clock: Arc<dyn Clock> = Arc::new(clock.clone());
            let monitor = HeartbeatMonitor::new(WatchdogConfig::default(), clock);
            b.iter(|| black_box(monitor.sweep(slots)));
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks (Async)
// ============================================================================

fn bench_scheduler_tick_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_tick_backlog");

    for backlog in [50u64, 200, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(backlog),
            &backlog,
            |b, &backlog| {
                b.to_async(Runtime::new().unwrap()).iter(|| async move {
                    let cfg = SlotsConfig {
                        dispatch_delay_ms: 0,
                        ..SlotsConfig::default()
                    };
                    let service = build_service(
                        &cfg,
                        Arc::new(ManualClock::default()),
                        AuditLog::new(64).sink(),
                    )
                    .unwrap();
                    let owner = OwnerId::from("bench");
                    for i in 0..backlog {
                        service
                            .submit(
                                &owner,
                                Submission {
                                    token: Some(Token::new(format!("slot-{i}"))),
                                    title: "bench".into(),
                                    payload: format!("payload-{i}"),
                                },
                            )
                            .unwrap();
                    }
                    let scheduler =
                        Scheduler::new(owner, service, Arc::new(NoOpExecutor), Duration::ZERO);
                    black_box(scheduler.tick().await.unwrap());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(table_benches, bench_table_lifecycle, bench_table_admit_under_limit);

criterion_group!(watchdog_benches, bench_watchdog_sweep);

criterion_group!(scheduler_benches, bench_scheduler_tick_backlog);

criterion_main!(table_benches, watchdog_benches, scheduler_benches);
