//! End-to-end engine behavior: bounded concurrency, dispatch ordering,
//! deadlines, cache freshness, and shutdown draining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use calcgrid_engine::{
    handler_fn, CachePolicy, CalcHandler, CalcRequest, Engine, EngineConfig, EngineError,
    HandlerFailure, TaskType,
};

fn config(max_workers: usize, queue_size: usize) -> EngineConfig {
    EngineConfig {
        max_workers,
        queue_size,
        ..EngineConfig::default()
    }
}

/// Handler that records the order and overlap of its invocations.
struct TracingHandler {
    started: Arc<Mutex<Vec<i64>>>,
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
    delay: Duration,
}

impl TracingHandler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            started: Arc::new(Mutex::new(Vec::new())),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            delay,
        })
    }

    fn started_order(&self) -> Vec<i64> {
        self.started.lock().unwrap().clone()
    }

    fn max_seen(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalcHandler for TracingHandler {
    async fn run(&self, inputs: &Value) -> Result<Value, HandlerFailure> {
        self.started
            .lock()
            .unwrap()
            .push(inputs["n"].as_i64().unwrap_or(-1));
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"n": inputs["n"]}))
    }
}

/// Handler that never returns within any realistic deadline.
fn hang_handler() -> Arc<dyn CalcHandler> {
    struct Hang;

    #[async_trait]
    impl CalcHandler for Hang {
        async fn run(&self, _inputs: &Value) -> Result<Value, HandlerFailure> {
            tokio::time::sleep(Duration::from_secs(86400)).await;
            Ok(json!(null))
        }
    }

    Arc::new(Hang)
}

#[tokio::test(start_paused = true)]
async fn busy_slots_never_exceed_max_workers() {
    let engine = Engine::new(config(4, 20));
    let handler = TracingHandler::new(Duration::from_millis(50));
    engine.register(TaskType::Valuation, handler.clone());

    let submissions: Vec<_> = (0..12)
        .map(|n| {
            engine
                .submit(CalcRequest::new(TaskType::Valuation, json!({"n": n})))
                .unwrap()
        })
        .collect();

    for s in submissions {
        s.wait().await.unwrap();
    }

    assert_eq!(handler.started_order().len(), 12);
    assert!(
        handler.max_seen() <= 4,
        "observed {} concurrent executions",
        handler.max_seen()
    );
}

#[tokio::test(start_paused = true)]
async fn queued_tasks_dispatch_priority_descending_fifo_tie_break() {
    let engine = Engine::new(config(4, 10));
    let handler = TracingHandler::new(Duration::from_secs(1));
    // Distinct payloads so caching cannot short-circuit dispatch
    engine.register(TaskType::Optimization, handler.clone());

    // Fill all four slots.
    let mut pending = Vec::new();
    for n in 0..4 {
        pending.push(
            engine
                .submit(CalcRequest::new(
                    TaskType::Optimization,
                    json!({"n": n + 100}),
                ))
                .unwrap(),
        );
    }
    assert_eq!(engine.status().available_workers, 0);

    // Queue six more with mixed priorities.
    for (n, priority) in [5u32, 1, 5, 3, 1, 5].iter().enumerate() {
        pending.push(
            engine
                .submit(
                    CalcRequest::new(TaskType::Optimization, json!({"n": n}))
                        .with_priority(*priority),
                )
                .unwrap(),
        );
    }
    assert_eq!(engine.status().queued_tasks, 6);

    for s in pending {
        s.wait().await.unwrap();
    }

    // First four are the slot-fillers; the queued six follow in
    // priority-descending, submission-order-within-priority order.
    let order = handler.started_order();
    assert_eq!(order[..4], [100, 101, 102, 103]);
    assert_eq!(order[4..], [0, 2, 5, 3, 1, 4]);
}

#[tokio::test(start_paused = true)]
async fn queue_overflow_rejected_synchronously() {
    let engine = Engine::new(config(1, 2));
    engine.register(TaskType::Custom("slow".into()), hang_handler());

    let _running = engine
        .submit(CalcRequest::new(TaskType::Custom("slow".into()), json!({"n": 0})))
        .unwrap();
    let _q1 = engine
        .submit(CalcRequest::new(TaskType::Custom("slow".into()), json!({"n": 1})))
        .unwrap();
    let _q2 = engine
        .submit(CalcRequest::new(TaskType::Custom("slow".into()), json!({"n": 2})))
        .unwrap();

    let err = engine
        .submit(CalcRequest::new(TaskType::Custom("slow".into()), json!({"n": 3})))
        .unwrap_err();
    assert_eq!(err, EngineError::QueueFull { capacity: 2 });

    // Nothing dropped or double-counted.
    let status = engine.status();
    assert_eq!(status.queued_tasks, 2);
    assert_eq!(status.active_calculations, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_handler_times_out_and_frees_slot() {
    let engine = Engine::new(config(1, 10));
    engine.register(TaskType::Custom("hang".into()), hang_handler());
    engine.register(TaskType::Valuation, handler_fn(|_| Ok(json!({"ok": true}))));

    let hung = engine
        .submit(
            CalcRequest::new(TaskType::Custom("hang".into()), json!({}))
                .with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
    let queued = engine
        .submit(CalcRequest::new(TaskType::Valuation, json!({"sqm": 1})))
        .unwrap();
    assert_eq!(engine.status().queued_tasks, 1);

    let err = hung.wait().await.unwrap_err();
    assert_eq!(err, EngineError::Timeout { waited_ms: 5000 });

    // The reclaimed slot serves the queued task.
    let result = queued.wait().await.unwrap();
    assert_eq!(result.value, json!({"ok": true}));
    assert_eq!(engine.status().available_workers, 1);
}

#[tokio::test(start_paused = true)]
async fn task_can_time_out_while_still_queued() {
    let engine = Engine::new(config(1, 10));
    engine.register(TaskType::Custom("hang".into()), hang_handler());
    engine.register(TaskType::Valuation, handler_fn(|_| Ok(json!(1))));

    let _running = engine
        .submit(
            CalcRequest::new(TaskType::Custom("hang".into()), json!({}))
                .with_timeout(Duration::from_secs(120)),
        )
        .unwrap();
    let queued = engine
        .submit(
            CalcRequest::new(TaskType::Valuation, json!({}))
                .with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
    assert_eq!(engine.status().queued_tasks, 1);

    let err = queued.wait().await.unwrap_err();
    assert_eq!(err, EngineError::Timeout { waited_ms: 5000 });
    assert_eq!(engine.status().queued_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn cache_expires_after_ttl() {
    let mut cfg = config(2, 10);
    cfg.cache_ttl_seconds = 60;
    let engine = Engine::new(cfg);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_inner = calls.clone();
    engine.register(
        TaskType::Prediction,
        handler_fn(move |_| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"trend": "up"}))
        }),
    );

    let request = || CalcRequest::new(TaskType::Prediction, json!({"horizon": 30}));

    engine.submit(request()).unwrap().wait().await.unwrap();
    let hit = engine.submit(request()).unwrap().wait().await.unwrap();
    assert!(hit.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(61)).await;

    let fresh = engine.submit(request()).unwrap().wait().await.unwrap();
    assert!(!fresh.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn per_type_cache_policy_overrides_engine_ttl() {
    let engine = Engine::new(config(2, 10));

    let cached_calls = Arc::new(AtomicUsize::new(0));
    let inner = cached_calls.clone();
    engine.register_with(
        TaskType::Valuation,
        handler_fn(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(json!(1))
        }),
        CachePolicy {
            cacheable: true,
            ttl: Some(Duration::from_secs(5)),
        },
    );

    let uncached_calls = Arc::new(AtomicUsize::new(0));
    let inner = uncached_calls.clone();
    engine.register_with(
        TaskType::RiskAnalysis,
        handler_fn(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(json!(2))
        }),
        CachePolicy {
            cacheable: false,
            ttl: None,
        },
    );

    let val = || CalcRequest::new(TaskType::Valuation, json!({"a": 1}));
    let risk = || CalcRequest::new(TaskType::RiskAnalysis, json!({"a": 1}));

    engine.submit(val()).unwrap().wait().await.unwrap();
    engine.submit(val()).unwrap().wait().await.unwrap();
    assert_eq!(cached_calls.load(Ordering::SeqCst), 1);

    // Past the 5s override, well inside the engine-wide 300s default
    tokio::time::advance(Duration::from_secs(6)).await;
    engine.submit(val()).unwrap().wait().await.unwrap();
    assert_eq!(cached_calls.load(Ordering::SeqCst), 2);

    engine.submit(risk()).unwrap().wait().await.unwrap();
    engine.submit(risk()).unwrap().wait().await.unwrap();
    assert_eq!(uncached_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_hit_never_consumes_a_slot() {
    let engine = Engine::new(config(1, 10));
    engine.register(TaskType::RiskAnalysis, handler_fn(|_| Ok(json!({"r": 1}))));
    engine.register(TaskType::Custom("hang".into()), hang_handler());

    engine
        .submit(CalcRequest::new(TaskType::RiskAnalysis, json!({"ltv": 0.5})))
        .unwrap()
        .wait()
        .await
        .unwrap();

    // Occupy the only slot.
    let _hung = engine
        .submit(CalcRequest::new(TaskType::Custom("hang".into()), json!({})))
        .unwrap();
    assert_eq!(engine.status().available_workers, 0);

    let hit = engine
        .submit(CalcRequest::new(TaskType::RiskAnalysis, json!({"ltv": 0.5})))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(hit.from_cache);
    assert_eq!(engine.status().queued_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn failures_do_not_disturb_other_tasks_or_bookkeeping() {
    let engine = Engine::new(config(2, 10));
    engine.register(
        TaskType::Custom("flaky".into()),
        handler_fn(|_| Err(HandlerFailure::new("boom"))),
    );
    let handler = TracingHandler::new(Duration::from_millis(10));
    engine.register(TaskType::Valuation, handler.clone());

    let mut failures = Vec::new();
    let mut successes = Vec::new();
    for n in 0..4 {
        failures.push(
            engine
                .submit(CalcRequest::new(
                    TaskType::Custom("flaky".into()),
                    json!({"n": n}),
                ))
                .unwrap(),
        );
        successes.push(
            engine
                .submit(CalcRequest::new(TaskType::Valuation, json!({"n": n})))
                .unwrap(),
        );
    }

    for f in failures {
        assert!(matches!(f.wait().await, Err(EngineError::Handler(_))));
    }
    for s in successes {
        s.wait().await.unwrap();
    }

    let status = engine.status();
    assert_eq!(status.active_calculations, 0);
    assert_eq!(status.available_workers, 2);
    assert_eq!(status.queued_tasks, 0);

    let metrics = engine.metrics();
    assert_eq!(metrics.handler_errors, 4);
    assert_eq!(metrics.succeeded, 4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_queued_and_running_tasks() {
    let engine = Engine::new(config(2, 10));
    let handler = TracingHandler::new(Duration::from_secs(2));
    engine.register(TaskType::Optimization, handler.clone());

    let submissions: Vec<_> = (0..5)
        .map(|n| {
            engine
                .submit(CalcRequest::new(TaskType::Optimization, json!({"n": n})))
                .unwrap()
        })
        .collect();

    engine.shutdown().await;

    let status = engine.status();
    assert_eq!(status.active_calculations, 0);
    assert_eq!(status.queued_tasks, 0);
    assert_eq!(handler.started_order().len(), 5);

    for s in submissions {
        s.wait().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn metrics_track_terminal_outcomes() {
    let engine = Engine::new(config(1, 10));
    engine.register(TaskType::Valuation, handler_fn(|_| Ok(json!(1))));
    engine.register(TaskType::Custom("hang".into()), hang_handler());

    engine
        .submit(CalcRequest::new(TaskType::Valuation, json!({"n": 1})))
        .unwrap()
        .wait()
        .await
        .unwrap();
    // Cache hit
    engine
        .submit(CalcRequest::new(TaskType::Valuation, json!({"n": 1})))
        .unwrap()
        .wait()
        .await
        .unwrap();
    // Timeout
    let _ = engine
        .submit(
            CalcRequest::new(TaskType::Custom("hang".into()), json!({}))
                .with_timeout(Duration::from_secs(1)),
        )
        .unwrap()
        .wait()
        .await;

    let metrics = engine.metrics();
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.completed["valuation"], 1);
}
