//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use prometheus_slot_scheduler::builders::{build_coordinator, build_service};
use prometheus_slot_scheduler::config::SlotsConfig;
use prometheus_slot_scheduler::core::{
    AuditLog, DispatchRequest, ExecutorHandle, ExecutorSpawner, OwnerId, SlotError, SlotService,
    SlotStatus, Spawn, Submission, Token,
};
use prometheus_slot_scheduler::runtime::Coordinator;
use prometheus_slot_scheduler::util::ManualClock;

/// Runs background futures on the test's tokio runtime.
#[derive(Clone, Default)]
pub struct TestRuntime;

impl Spawn for TestRuntime {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut);
    }
}

/// Executor spawner double that records what it was asked to do.
#[derive(Default)]
pub struct RecordingSpawner {
    pub spawned: Mutex<Vec<Token>>,
    pub aborted: Mutex<Vec<Token>>,
    pub salvage_requests: AtomicUsize,
    pub ack_salvage: AtomicBool,
    pub fail_for: Mutex<HashSet<Token>>,
}

impl RecordingSpawner {
    pub fn spawned(&self) -> Vec<Token> {
        self.spawned.lock().clone()
    }

    pub fn aborted(&self) -> Vec<Token> {
        self.aborted.lock().clone()
    }
}

#[async_trait]
impl ExecutorSpawner for RecordingSpawner {
    async fn spawn(&self, request: &DispatchRequest) -> Result<ExecutorHandle, SlotError> {
        if self.fail_for.lock().contains(&request.token) {
            return Err(SlotError::Spawn(format!("no executor for {}", request.token)));
        }
        self.spawned.lock().push(request.token.clone());
        Ok(ExecutorHandle {
            token: request.token.clone(),
            id: format!("exec-{}", request.token),
        })
    }

    async fn request_salvage(&self, _handle: &ExecutorHandle) -> Result<bool, SlotError> {
        self.salvage_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.ack_salvage.load(Ordering::SeqCst))
    }

    async fn abort(&self, handle: &ExecutorHandle) -> bool {
        self.aborted.lock().push(handle.token.clone());
        true
    }
}

/// Config with no inter-dispatch pause and short relinquish waits.
pub fn test_config(limit: u32) -> SlotsConfig {
    SlotsConfig {
        concurrency_limit: limit,
        dispatch_delay_ms: 0,
        relinquish_wait_ms: 50,
        ..SlotsConfig::default()
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub audit: AuditLog,
    pub service: Arc<SlotService>,
    pub spawner: Arc<RecordingSpawner>,
    pub coordinator: Coordinator<TestRuntime>,
    pub owner: OwnerId,
}

impl Harness {
    pub fn new(cfg: &SlotsConfig) -> Self {
        let clock = ManualClock::default();
        let audit = AuditLog::new(1_000);
        let service = build_service(cfg, Arc::new(clock.clone()), audit.sink()).unwrap();
        let spawner = Arc::new(RecordingSpawner::default());
        let owner = OwnerId::from("alice");
        let coordinator = build_coordinator(
            cfg,
            owner.clone(),
            service.clone(),
            spawner.clone(),
            TestRuntime,
        );
        Self {
            clock,
            audit,
            service,
            spawner,
            coordinator,
            owner,
        }
    }

    pub fn with_limit(limit: u32) -> Self {
        Self::new(&test_config(limit))
    }

    /// Another coordinator for the same owner over the same service.
    pub fn second_coordinator(&self, cfg: &SlotsConfig) -> Coordinator<TestRuntime> {
        build_coordinator(
            cfg,
            self.owner.clone(),
            self.service.clone(),
            self.spawner.clone(),
            TestRuntime,
        )
    }

    pub fn submit(&self, token: &str) -> Token {
        self.service
            .submit(
                &self.owner,
                Submission {
                    token: Some(Token::from(token)),
                    title: format!("title {token}"),
                    payload: format!("payload {token}"),
                },
            )
            .unwrap()
            .token
    }

    pub fn status(&self, token: &Token) -> SlotStatus {
        self.service.get(token, &self.owner).unwrap().status
    }

    pub fn count(&self, status: SlotStatus) -> usize {
        self.service
            .list(&self.owner)
            .unwrap()
            .iter()
            .filter(|s| s.status == status)
            .count()
    }

    pub fn active(&self) -> usize {
        self.count(SlotStatus::Picked) + self.count(SlotStatus::Running)
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.service
            .list(&self.owner)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }
}
