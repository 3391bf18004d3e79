//! Fixed-interval background scheduler.
//!
//! A [`Scheduler`] owns at most one spawned loop that runs a [`Job`] once,
//! sleeps for the interval and repeats. Ticks are strictly sequential and
//! each one is isolated: an error or a panic is logged and the loop goes on.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Work executed on every tick.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    job: Arc<dyn Job>,
    interval: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            running: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        match self.running.lock().await.as_ref() {
            Some(running) if !running.handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// Spawn the tick loop. No-op if already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.job.clone(), self.interval, shutdown_rx));
        *running = Some(RunningLoop { shutdown, handle });
        info!(job = self.job.name(), interval_secs = self.interval.as_secs(), "scheduler started");
    }

    /// Signal the loop to exit and wait until its task has terminated.
    ///
    /// A pending sleep is cut short; a tick already in progress runs to
    /// completion first. No-op if not running.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(RunningLoop { shutdown, handle }) = running.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(err) = handle.await {
            warn!(job = self.job.name(), error = %err, "scheduler task ended abnormally");
        }
        info!(job = self.job.name(), "scheduler stopped");
    }
}

/// Dropping a running scheduler signals its loop to exit after the current
/// tick without waiting for it. Call [`Scheduler::stop`] to wait.
impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_loop(job: Arc<dyn Job>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        run_tick(job.as_ref()).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Run one tick, containing both errors and panics.
async fn run_tick(job: &dyn Job) {
    match AssertUnwindSafe(job.run_once()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(job = job.name(), error = ?err, "scheduled job failed"),
        Err(_) => error!(job = job.name(), "scheduled job panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJob {
        ticks: AtomicUsize,
        fail_on: Option<usize>,
        panic_on: Option<usize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) -> Result<()> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_on == Some(tick) {
                panic!("tick {tick} exploded");
            }
            if self.fail_on == Some(tick) {
                return Err(anyhow!("tick {tick} failed"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct SlowJob {
        started: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run_once(&self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_until(counter: &AtomicUsize, n: usize) {
        while counter.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_ticks(job: &CountingJob, n: usize) {
        while job.ticks.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_does_not_stop_the_loop() {
        let job = Arc::new(CountingJob {
            fail_on: Some(1),
            ..Default::default()
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(300));
        scheduler.start().await;
        wait_for_ticks(&job, 2).await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_is_contained() {
        let job = Arc::new(CountingJob {
            panic_on: Some(1),
            ..Default::default()
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(60));
        scheduler.start().await;
        wait_for_ticks(&job, 3).await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_spawns_one_loop() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(300));
        scheduler.start().await;
        scheduler.start().await;
        wait_for_ticks(&job, 1).await;
        // Well inside the first interval: a second loop would have ticked again.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_sleep_terminates_and_restart_resumes() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(300));

        scheduler.stop().await; // not running: no-op
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);

        scheduler.start().await;
        wait_for_ticks(&job, 1).await;
        scheduler.stop().await;
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);

        let after_stop = job.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), after_stop);

        scheduler.start().await;
        wait_for_ticks(&job, after_stop + 2).await;
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_tick_waits_for_it_to_finish() {
        let job = Arc::new(SlowJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(300));
        scheduler.start().await;
        wait_until(&job.started, 1).await;
        assert_eq!(job.done.load(Ordering::SeqCst), 0);

        let before = tokio::time::Instant::now();
        scheduler.stop().await;
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        assert_eq!(job.done.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);

        scheduler.start().await;
        wait_until(&job.started, 2).await;
        scheduler.stop().await;
        assert_eq!(job.done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_ends_its_loop() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(60));
        scheduler.start().await;
        wait_for_ticks(&job, 1).await;
        drop(scheduler);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), 1);
        // The loop task released its handle on the job.
        assert_eq!(Arc::strong_count(&job), 1);
    }
}
