//! Synthetic workload against in-process workers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{Context, Result, eyre};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use callstore::KvStore;

use crate::config::Config;
use crate::domain::{RegisteredSealProof, SectorRef, TaskType};
use crate::error::SchedError;
use crate::scheduler::{RequestContext, SchedDiagInfo, Scheduler};
use crate::selector::{AffinitySelector, TaskSelector, WorkerSelector};
use crate::worker::{LocalWorker, Worker, action, noop_action};

/// Miner id used for simulated sectors
const SIM_MINER: u64 = 1000;

/// Outcome counts of one simulation run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulationReport {
    pub assigner: String,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Tasks completed per worker hostname
    pub per_worker: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
    /// Scheduler state after the last task returned
    pub diag: SchedDiagInfo,
}

/// Submit `tasks` synthetic tasks to the configured fleet and wait for all of them
pub async fn run_simulation(
    config: &Config,
    store: Arc<dyn KvStore>,
    tasks: usize,
    assigner: Option<&str>,
) -> Result<SimulationReport> {
    debug!(tasks, ?assigner, "run_simulation: called");
    let sim = &config.simulation;
    if sim.workers.is_empty() {
        return Err(eyre!("Simulation needs at least one worker"));
    }
    let kinds = if sim.tasks.is_empty() {
        vec![TaskType::AddPiece]
    } else {
        sim.tasks.clone()
    };

    let mut sched_config = config.scheduler.clone();
    sched_config.init_wait_ms = sim.init_wait_ms;
    if let Some(assigner) = assigner {
        sched_config.assigner = assigner.to_string();
    }
    let assigner_name = sched_config.assigner_kind()?.to_string();

    let scheduler = Scheduler::new(sched_config, config.resource_table(), store).context("Failed to start scheduler")?;

    for worker_config in &sim.workers {
        let worker = if worker_config.tasks.is_empty() {
            LocalWorker::new(worker_config.hostname.clone(), worker_config.resources())
        } else {
            LocalWorker::with_tasks(
                worker_config.hostname.clone(),
                worker_config.resources(),
                worker_config.tasks.iter().copied(),
            )
        };
        let id = scheduler
            .add_worker(Arc::new(worker))
            .await
            .context(format!("Failed to add worker {}", worker_config.hostname))?;
        info!(%id, hostname = %worker_config.hostname, "Simulated worker added");
    }

    let per_worker = Arc::new(Mutex::new(BTreeMap::<String, usize>::new()));
    let work_time = Duration::from_millis(sim.task_ms);
    let started = Instant::now();

    let submissions = (0..tasks).map(|i| {
        let scheduler = scheduler.clone();
        let per_worker = per_worker.clone();
        let task = kinds[i % kinds.len()];
        // Consecutive task types of one sector share a sector number
        let sector = SectorRef::new(SIM_MINER, (i / kinds.len()) as u64, RegisteredSealProof::StackedDrg2KiBV1_1);
        let fail = sim.fail_every > 0 && (i as u64 + 1) % sim.fail_every == 0;

        async move {
            let selector: Arc<dyn WorkerSelector> = Arc::new(AffinitySelector::new(
                Arc::new(TaskSelector::new()),
                scheduler.tracker().clone(),
                sector.id,
            ));
            let work = action(move |worker: Arc<dyn Worker>| {
                let per_worker = per_worker.clone();
                async move {
                    tokio::time::sleep(work_time).await;
                    if fail {
                        return Err(eyre!("simulated failure on {}", task));
                    }
                    let hostname = worker.info().await?.hostname;
                    *per_worker.lock().await.entry(hostname).or_default() += 1;
                    Ok(())
                }
            });
            let ctx = RequestContext::new().with_priority(task_priority(task));
            scheduler.schedule(&ctx, sector, task, selector, noop_action(), work).await
        }
    });
    let results = join_all(submissions).await;

    let mut report = SimulationReport {
        assigner: assigner_name,
        submitted: tasks,
        elapsed_ms: started.elapsed().as_millis() as u64,
        ..Default::default()
    };
    for result in results {
        match result {
            Ok(()) => report.succeeded += 1,
            Err(e) if e.is_cancellation() => report.cancelled += 1,
            Err(SchedError::Execution(e)) => {
                debug!(error = %e, "run_simulation: task failed");
                report.failed += 1;
            }
            Err(e) => return Err(e).context("Scheduling failed"),
        }
    }

    report.diag = scheduler.info(&CancellationToken::new()).await?;
    report.per_worker = per_worker.lock().await.clone();
    scheduler.close().await;

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    Ok(report)
}

/// Later sealing stages run first so sectors finish before new ones start
fn task_priority(task: TaskType) -> i32 {
    match task {
        TaskType::AddPiece | TaskType::Fetch => 0,
        TaskType::PreCommit1 => 10,
        TaskType::PreCommit2 => 20,
        TaskType::Commit1 | TaskType::Commit2 => 30,
        _ => 40,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimWorkerConfig;
    use callstore::MemoryStore;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.scheduler.resched_interval_ms = 50;
        config.scheduler.heartbeat_interval_ms = 20;
        config.simulation.init_wait_ms = 10;
        config.simulation.task_ms = 5;
        config
    }

    #[tokio::test]
    async fn test_simulation_completes_all_tasks() {
        let config = fast_config();
        let report = run_simulation(&config, Arc::new(MemoryStore::new()), 12, None).await.unwrap();

        assert_eq!(report.assigner, "utilization");
        assert_eq!(report.submitted, 12);
        assert_eq!(report.succeeded, 12);
        assert_eq!(report.failed, 0);
        assert_eq!(report.per_worker.values().sum::<usize>(), 12);
        assert!(report.diag.requests.is_empty());
    }

    #[tokio::test]
    async fn test_simulation_counts_failures() {
        let mut config = fast_config();
        config.simulation.fail_every = 3;
        let report = run_simulation(&config, Arc::new(MemoryStore::new()), 9, Some("spread")).await.unwrap();

        assert_eq!(report.assigner, "spread");
        assert_eq!(report.failed, 3);
        assert_eq!(report.succeeded, 6);
    }

    #[tokio::test]
    async fn test_simulation_rejects_bad_input() {
        let mut config = fast_config();
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        assert!(run_simulation(&config, store.clone(), 1, Some("round-robin")).await.is_err());

        config.simulation.workers = Vec::<SimWorkerConfig>::new();
        assert!(run_simulation(&config, store, 1, None).await.is_err());
    }
}
