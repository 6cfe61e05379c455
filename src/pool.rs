//! A bounded pool of workers that run sessions.
//!
//! Each submitted [Job] gets its own task, but no more than `size` of them hold a permit at once.
//! The caller waits on a [Ticket] with the job's timeout; if that expires the task is aborted,
//! which drops its transport and kills the process behind it.

use crate::core::Credentials;
use crate::session::{self, Invocation, Outcome, SessionError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{AbortHandle, JoinSet};

/// One session to run.
#[derive(Clone, Debug)]
pub struct Job {
    pub invocation: Invocation,
    pub credentials: Arc<Credentials>,
    pub timeout: Duration,
}

/// Runs a [Job] to completion.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> Result<Outcome, SessionError>;
}

/// The real, production-ready [Runner]. Spawns the invocation on a pty.
#[derive(Clone, Debug, Default)]
pub struct SessionRunner;

#[async_trait]
impl Runner for SessionRunner {
    async fn run(&self, job: Job) -> Result<Outcome, SessionError> {
        session::execute(&job.invocation, &job.credentials, job.timeout).await
    }
}

/// A fixed number of workers sharing one [Runner].
#[derive(Debug)]
pub struct WorkerPool<R> {
    runner: Arc<R>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    size: usize,
}

impl<R: Runner> WorkerPool<R> {
    /// Creates a pool of `size` workers. A `size` of zero is treated as one.
    pub fn new(runner: Arc<R>, size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            runner,
            permits: Arc::new(Semaphore::new(size)),
            tasks: Mutex::new(JoinSet::new()),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `job` and returns a [Ticket] for its result.
    pub fn submit(&self, job: Job) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let timeout = job.timeout;
        let runner = self.runner.clone();
        let permits = self.permits.clone();

        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Forget tasks that already delivered their result.
        while tasks.try_join_next().is_some() {}

        let abort = tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = runner.run(job).await;
            // The receiver is gone if the caller already gave up on this job.
            let _ = tx.send(result);
        });

        Ticket { rx, abort, timeout }
    }
}

impl<R> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            if !tasks.is_empty() {
                tracing::debug!(remaining = tasks.len(), "stopping workers");
            }
            tasks.abort_all();
        }
    }
}

/// A claim on the result of a submitted [Job].
#[derive(Debug)]
pub struct Ticket {
    rx: oneshot::Receiver<Result<Outcome, SessionError>>,
    abort: AbortHandle,
    timeout: Duration,
}

impl Ticket {
    /// Waits at most the job's timeout for its result.
    ///
    /// The job is aborted if the wait times out.
    pub async fn wait(self) -> Result<Outcome, SessionError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(SessionError::WorkerLost),
            Err(_elapsed) => {
                self.abort.abort();
                Err(SessionError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Sleeps for a duration taken from the command, tracking how many runs overlap.
    #[derive(Default)]
    struct SleepyRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Runner for SleepyRunner {
        async fn run(&self, job: Job) -> Result<Outcome, SessionError> {
            let Invocation::Local { args, .. } = &job.invocation else {
                return Err(SessionError::StreamClosed);
            };
            let millis: u64 = args[0].parse().unwrap();

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            Ok(Outcome {
                status: 0,
                output: millis.to_string(),
            })
        }
    }

    fn job(millis: u64, timeout: Duration) -> Job {
        Job {
            invocation: Invocation::Local {
                program: "sleep".to_string(),
                args: vec![millis.to_string()],
            },
            credentials: Arc::new(Credentials::default()),
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_and_returns_outcome() {
        let pool = WorkerPool::new(Arc::new(SleepyRunner::default()), 2);
        let outcome = pool.submit(job(10, Duration::from_secs(1))).wait().await.unwrap();
        assert_eq!("10", outcome.output);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_size() {
        let runner = Arc::new(SleepyRunner::default());
        let pool = WorkerPool::new(runner.clone(), 3);
        let tickets: Vec<_> = (0..8)
            .map(|_| pool.submit(job(100, Duration::from_secs(10))))
            .collect();
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }
        assert_eq!(3, runner.peak.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_aborts() {
        let pool = WorkerPool::new(Arc::new(SleepyRunner::default()), 1);
        let result = pool.submit(job(5_000, Duration::from_secs(1))).wait().await;
        assert!(matches!(result, Err(SessionError::Timeout)));

        // The aborted job releases its permit, so the next one runs.
        tokio::task::yield_now().await;
        let outcome = pool.submit(job(10, Duration::from_secs(1))).wait().await.unwrap();
        assert_eq!("10", outcome.output);
    }

    #[tokio::test]
    async fn timeout_kills_real_process() {
        let dir = tempfile::TempDir::with_prefix("volley-").unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 3; touch {}", marker.display());
        let job = Job {
            invocation: Invocation::Local {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), script],
            },
            credentials: Arc::new(Credentials::default()),
            timeout: Duration::from_secs(1),
        };

        let pool = WorkerPool::new(Arc::new(SessionRunner), 1);
        let result = pool.submit(job).wait().await;
        assert!(matches!(result, Err(SessionError::Timeout)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!marker.exists());
    }

    #[test]
    fn zero_size_means_one() {
        let pool = WorkerPool::new(Arc::new(SessionRunner), 0);
        assert_eq!(1, pool.size());
    }
}
