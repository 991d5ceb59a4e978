//! Virtual user scheduler
//!
//! Users are started on 1-second ticks. After tick `k` (the first tick fires
//! immediately) the number of started users is `min(N, floor(rate * k))`, so
//! fractional rates accumulate and the final tick spawns the remainder.
//!
//! The stop signal is raised `run_duration` after the first tick. Users observe
//! it at loop boundaries only; a call in flight always completes and is
//! recorded. Users still blocked `grace_period` after the stop are aborted and
//! their in-flight call is recorded as a timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kbload_core::{OperationKind, RunConfig, TaskOutcome};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::executor::{Task, TaskExecutor};
use crate::sink::OutcomeSink;
use crate::workload::Workload;

const SPAWN_TICK: Duration = Duration::from_secs(1);
const PROGRESS_EVERY_TICKS: u64 = 10;

/// Tolerance for products such as `0.29 * 100` landing just below an integer.
const SPAWN_EPSILON: f64 = 1e-9;

/// Scheduling parameters, usually derived from a validated [`RunConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub spawn_rate: f64,
    pub run_duration: Duration,
    pub think_min: Duration,
    pub think_max: Duration,
    pub grace_period: Duration,
    pub seed: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        let (think_min, think_max) = config.think_time_range();
        Self {
            concurrency: config.load.concurrency,
            spawn_rate: config.load.spawn_rate,
            run_duration: config.run_duration(),
            think_min,
            think_max,
            grace_period: config.grace_period(),
            seed: config.load.seed,
        }
    }
}

/// What happened during the timed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerReport {
    /// First spawn tick.
    pub started_at: DateTime<Utc>,
    /// Stop signal raised.
    pub stopped_at: DateTime<Utc>,
    /// Every user exited or was torn down.
    pub finished_at: DateTime<Utc>,
    /// From first spawn tick to the stop signal.
    pub active_window: Duration,
    pub users_spawned: usize,
    /// Users torn down at the hard deadline.
    pub users_aborted: usize,
}

/// Total users started once spawn tick `tick` (1-based) has fired.
pub fn cumulative_spawned(spawn_rate: f64, concurrency: usize, tick: u64) -> usize {
    let target = (spawn_rate * tick as f64 + SPAWN_EPSILON).floor();
    if target >= concurrency as f64 {
        concurrency
    } else {
        target as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    kind: OperationKind,
    started_at: DateTime<Utc>,
    start: Instant,
}

type InFlightSlot = Arc<Mutex<Option<InFlight>>>;

struct UserHandle {
    id: usize,
    handle: JoinHandle<usize>,
    in_flight: InFlightSlot,
}

/// Drives virtual users against a shared workload.
pub struct Scheduler {
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    /// Run the ramped, timed phase. Every executed task lands in `sink`.
    pub async fn run(
        &self,
        workload: Arc<Workload>,
        executor: TaskExecutor,
        sink: Arc<OutcomeSink>,
    ) -> SchedulerReport {
        let settings = &self.settings;
        let (stop_tx, stop_rx) = watch::channel(false);

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + settings.run_duration;

        info!(
            users = settings.concurrency,
            spawn_rate = settings.spawn_rate,
            duration_secs = settings.run_duration.as_secs_f64(),
            "Starting virtual users"
        );

        let mut users: Vec<UserHandle> = Vec::with_capacity(settings.concurrency);
        let mut ticker = interval(SPAWN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = sleep_until(deadline) => break,
            }
            tick += 1;

            let target = cumulative_spawned(settings.spawn_rate, settings.concurrency, tick);
            while users.len() < target {
                let id = users.len();
                users.push(self.spawn_user(
                    id,
                    Arc::clone(&workload),
                    executor.clone(),
                    Arc::clone(&sink),
                    stop_rx.clone(),
                ));
            }

            if tick % PROGRESS_EVERY_TICKS == 0 {
                let (total, failures) =
                    sink.with_entries(|e| (e.len(), e.iter().filter(|o| !o.success).count()));
                info!(
                    elapsed_secs = start.elapsed().as_secs(),
                    active_users = users.len(),
                    requests = total,
                    failures,
                    "Load test progress"
                );
            }
        }

        let _ = stop_tx.send(true);
        let stopped_at = Utc::now();
        let active_window = start.elapsed();
        info!(users = users.len(), "Stop signal raised, waiting for in-flight tasks");

        let users_spawned = users.len();
        let users_aborted = Self::join_users(users, &sink, settings.grace_period).await;

        SchedulerReport {
            started_at,
            stopped_at,
            finished_at: Utc::now(),
            active_window,
            users_spawned,
            users_aborted,
        }
    }

    fn spawn_user(
        &self,
        id: usize,
        workload: Arc<Workload>,
        executor: TaskExecutor,
        sink: Arc<OutcomeSink>,
        stop: watch::Receiver<bool>,
    ) -> UserHandle {
        let rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        let think = (self.settings.think_min, self.settings.think_max);
        let in_flight: InFlightSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&in_flight);

        debug!(user = id, "Spawning virtual user");
        let handle = tokio::spawn(async move {
            user_loop(id, workload, executor, sink, stop, think, rng, slot).await
        });

        UserHandle {
            id,
            handle,
            in_flight,
        }
    }

    /// Wait for users up to the grace deadline, tearing down the rest.
    async fn join_users(users: Vec<UserHandle>, sink: &OutcomeSink, grace: Duration) -> usize {
        let grace_deadline = Instant::now() + grace;
        let mut aborted = 0;

        for mut user in users {
            let joined = timeout_at(grace_deadline, &mut user.handle).await;
            match joined {
                Ok(Ok(tasks)) => debug!(user = user.id, tasks, "Virtual user finished"),
                Ok(Err(e)) => warn!(user = user.id, "Virtual user task failed: {}", e),
                Err(_) => {
                    if Self::tear_down(user, sink) {
                        aborted += 1;
                    }
                }
            }
        }

        aborted
    }

    /// Abort a user still running at the hard deadline. Returns true when a
    /// call was in flight and has been recorded as a timeout here.
    fn tear_down(user: UserHandle, sink: &OutcomeSink) -> bool {
        // Claim the slot before aborting so exactly one side records.
        let in_flight = user.in_flight.lock().take();
        user.handle.abort();

        match in_flight {
            Some(call) => {
                warn!(
                    user = user.id,
                    kind = %call.kind,
                    "Tearing down virtual user blocked past the grace period"
                );
                sink.record(TaskOutcome::timed_out(
                    call.kind,
                    call.started_at,
                    call.start.elapsed(),
                ));
                true
            }
            None => {
                debug!(user = user.id, "Virtual user had no call in flight at the deadline");
                false
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn user_loop(
    id: usize,
    workload: Arc<Workload>,
    executor: TaskExecutor,
    sink: Arc<OutcomeSink>,
    mut stop: watch::Receiver<bool>,
    (think_min, think_max): (Duration, Duration),
    mut rng: StdRng,
    in_flight: InFlightSlot,
) -> usize {
    let mut executed = 0;

    loop {
        if *stop.borrow() {
            break;
        }

        let task = Task::from(workload.next_item(&mut rng));
        *in_flight.lock() = Some(InFlight {
            kind: task.kind(),
            started_at: Utc::now(),
            start: Instant::now(),
        });

        let outcome = executor.execute(task).await;

        // The slot is gone only if the scheduler already recorded this call.
        if in_flight.lock().take().is_none() {
            break;
        }
        sink.record(outcome);
        executed += 1;

        if *stop.borrow() {
            break;
        }

        let pause = think_time(&mut rng, think_min, think_max);
        tokio::select! {
            _ = sleep(pause) => {}
            _ = stop.changed() => break,
        }
    }

    debug!(user = id, executed, "Virtual user stopping");
    executed
}

fn think_time<R: Rng>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let micros = rng.gen_range(min.as_micros() as u64..=max.as_micros() as u64);
    Duration::from_micros(micros)
}
