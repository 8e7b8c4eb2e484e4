//! Scheduler core
//!
//! One state mutex guards the queue and the running-set. The periodic tick
//! is the only writer of launch state; public operations run on caller tasks
//! and take the same lock only where consistency demands it.

use chrono::Utc;
use gpuq_core::{
    session_name, GpuRecord, GpuStatusReport, GpuStatusView, GpuqError, GpuqResult, NewTask,
    SchedulerConfig, Task, TaskStatus, MAX_GPU_COUNT,
};
use gpuq_probe::GpuProbe;
use gpuq_runner::{SessionRunner, TaskPaths, WorkTree};
use gpuq_store::{TaskPatch, TaskStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::FreePool;

/// Tail of a task's log file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogs {
    pub task_id: i64,
    pub lines: Vec<String>,
    /// True iff the file held more lines than were returned
    pub truncated: bool,
}

/// In-memory record of a launched task
#[derive(Debug, Clone)]
struct RunningTask {
    id: i64,
    session_name: String,
    assigned_gpus: Vec<u32>,
    paths: TaskPaths,
}

#[derive(Default)]
struct SchedState {
    /// Queued task ids in submission order
    queue: VecDeque<i64>,
    /// Launched tasks still believed alive
    running: HashMap<i64, RunningTask>,
}

enum LaunchError {
    /// Store write failed; the task must stay queued and retry next tick
    Store(GpuqError),
    /// Task was marked failed; admission continues with the next task
    Failed,
}

/// The scheduler: queue, running-set, tick loop, and public operations
///
/// Constructed once at startup; `start` spawns the tick loop, `shutdown`
/// stops it. Live sessions are never killed on shutdown; they are adopted
/// again by [`Scheduler::recover`] on the next start.
pub struct Scheduler {
    store: TaskStore,
    probe: Arc<dyn GpuProbe>,
    runner: Arc<dyn SessionRunner>,
    work_tree: WorkTree,
    config: SchedulerConfig,
    state: Mutex<SchedState>,
    stop: Notify,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: TaskStore,
        probe: Arc<dyn GpuProbe>,
        runner: Arc<dyn SessionRunner>,
        config: SchedulerConfig,
    ) -> Self {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let work_tree = WorkTree::new(config.tasks_dir(), workdir, config.shell_init.clone());
        Self {
            store,
            probe,
            runner,
            work_tree,
            config,
            state: Mutex::new(SchedState::default()),
            stop: Notify::new(),
            tick_task: Mutex::new(None),
        }
    }

    /// Rebuild in-memory state from the store after a restart
    ///
    /// Queued tasks re-enter the queue in id order. Previously running tasks
    /// are adopted when their session is still alive; otherwise they are
    /// finalized from the exit-code file (missing file means the session was
    /// lost with the old process).
    pub async fn recover(&self) -> GpuqResult<()> {
        let mut state = self.state.lock().await;

        for task in self.store.list_by_status(TaskStatus::Queued).await? {
            state.queue.push_back(task.id);
        }

        for task in self.store.load_running().await? {
            let session = task
                .session_name
                .clone()
                .unwrap_or_else(|| session_name(task.id));
            let paths = self.work_tree.paths(task.id);

            let alive = match self.runner.exists(&session).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "Liveness probe failed during recovery");
                    false
                }
            };
            if alive {
                info!(task_id = task.id, session = %session, gpus = ?task.assigned_gpus, "Adopted running task");
                state.running.insert(
                    task.id,
                    RunningTask {
                        id: task.id,
                        session_name: session,
                        assigned_gpus: task.assigned_gpus.clone(),
                        paths,
                    },
                );
                continue;
            }

            let exit_code = WorkTree::read_exit_code(&paths).await;
            let (status, error) = finish_status(exit_code, "session lost across restart");
            self.transition(
                task.id,
                status,
                TaskPatch {
                    completed_at: Some(Utc::now()),
                    exit_code: Some(exit_code),
                    error: Some(error),
                    ..Default::default()
                },
            )
            .await?;
            info!(task_id = task.id, status = %status, "Finalized task from previous run");
        }

        info!(
            queued = state.queue.len(),
            running = state.running.len(),
            "Recovered scheduler state"
        );
        Ok(())
    }

    /// Recover persisted state and spawn the periodic tick loop
    pub async fn start(self: Arc<Self>) -> GpuqResult<()> {
        self.recover().await?;

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        *self.tick_task.lock().await = Some(handle);
        info!(
            interval_secs = self.config.poll_interval_secs,
            "Scheduler loop started"
        );
        Ok(())
    }

    /// Signal the tick loop to stop and wait for it
    ///
    /// Running sessions stay alive on purpose; the next start adopts them.
    pub async fn shutdown(&self) {
        self.stop.notify_one();
        if let Some(handle) = self.tick_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop join failed");
            }
        }
        info!("Scheduler stopped");
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_tick().await,
                _ = self.stop.notified() => break,
            }
        }
    }

    /// One scheduling pass: snapshot, admission, reconciliation
    ///
    /// Probe failure aborts the whole tick; no state changes.
    pub async fn run_tick(&self) {
        let snapshot = match self.probe.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, "GPU probe failed, skipping tick");
                return;
            }
        };

        let mut state = self.state.lock().await;
        if let Err(e) = self.admit(&mut state, &snapshot).await {
            warn!(error = %e, "Admission pass stopped on store error");
        }
        self.reconcile(&mut state).await;
    }

    /// FIFO admission with head-of-line blocking
    async fn admit(&self, state: &mut SchedState, snapshot: &[GpuRecord]) -> GpuqResult<()> {
        if state.queue.is_empty() {
            return Ok(());
        }

        let held: HashSet<u32> = state
            .running
            .values()
            .flat_map(|rt| rt.assigned_gpus.iter().copied())
            .collect();
        let mut pool = FreePool::from_snapshot(snapshot, &held);

        while let Some(&head_id) = state.queue.front() {
            let task = match self.store.get(head_id).await? {
                Some(task) => task,
                None => {
                    // Stale queue entry with no row behind it
                    state.queue.pop_front();
                    continue;
                }
            };
            if task.status != TaskStatus::Queued {
                state.queue.pop_front();
                continue;
            }

            if pool.available(&task.gpu_type) < task.gpu_count as usize {
                // The head waits for its full requirement; nothing skips it
                break;
            }
            let Some(assigned) = pool.take(&task.gpu_type, task.gpu_count as usize) else {
                break;
            };

            match self.launch(&task, &assigned).await {
                Ok(running) => {
                    info!(
                        task_id = task.id,
                        session = %running.session_name,
                        gpus = ?running.assigned_gpus,
                        "Launched task"
                    );
                    state.queue.pop_front();
                    state.running.insert(task.id, running);
                }
                Err(LaunchError::Failed) => {
                    state.queue.pop_front();
                    pool.restore(&task.gpu_type, assigned);
                }
                Err(LaunchError::Store(e)) => {
                    // Task is still queued both in memory and on disk
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Persist a status change, refusing moves the state machine forbids
    async fn transition(
        &self,
        id: i64,
        next: TaskStatus,
        mut patch: TaskPatch,
    ) -> GpuqResult<()> {
        let current = self.store.get(id).await?.ok_or(GpuqError::NotFound(id))?;
        if !current.status.can_transition_to(next) {
            return Err(GpuqError::IllegalState(format!(
                "cannot move task {} from {} to {}",
                id, current.status, next
            )));
        }
        patch.status = Some(next);
        self.store.update(id, patch).await
    }

    /// Persist the running record, materialize the work tree, start the session
    ///
    /// Persist-then-start: if the daemon dies mid-launch, recovery finalizes
    /// the task instead of losing it. The state machine has no queued ->
    /// failed edge, so the running record lands before anything can fail.
    async fn launch(&self, task: &Task, assigned: &[u32]) -> Result<RunningTask, LaunchError> {
        let session = session_name(task.id);
        let paths = self.work_tree.paths(task.id);

        self.transition(
            task.id,
            TaskStatus::Running,
            TaskPatch {
                started_at: Some(Utc::now()),
                assigned_gpus: Some(assigned.to_vec()),
                session_name: Some(Some(session.clone())),
                log_path: Some(Some(paths.log_file.clone())),
                ..Default::default()
            },
        )
        .await
        .map_err(LaunchError::Store)?;

        if let Err(e) = self
            .work_tree
            .materialize(task.id, &task.command, assigned)
            .await
        {
            return self
                .fail_launch(task.id, format!("failed to prepare work tree: {}", e))
                .await;
        }

        if let Err(e) = self.runner.start(&session, &paths.run_script).await {
            return self
                .fail_launch(task.id, format!("failed to start session: {}", e))
                .await;
        }

        Ok(RunningTask {
            id: task.id,
            session_name: session,
            assigned_gpus: assigned.to_vec(),
            paths,
        })
    }

    async fn fail_launch(&self, task_id: i64, message: String) -> Result<RunningTask, LaunchError> {
        warn!(task_id, error = %message, "Task launch failed");
        self.transition(
            task_id,
            TaskStatus::Failed,
            TaskPatch {
                completed_at: Some(Utc::now()),
                assigned_gpus: Some(Vec::new()),
                session_name: Some(None),
                error: Some(Some(message)),
                ..Default::default()
            },
        )
        .await
        .map_err(LaunchError::Store)?;
        Err(LaunchError::Failed)
    }

    /// Observe session liveness and finalize tasks whose session ended
    async fn reconcile(&self, state: &mut SchedState) {
        if state.running.is_empty() {
            return;
        }

        let mut ids: Vec<i64> = state.running.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(rt) = state.running.get(&id).cloned() else {
                continue;
            };
            match self.runner.exists(&rt.session_name).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id = id, error = %e, "Session liveness probe failed");
                    continue;
                }
            }

            let exit_code = WorkTree::read_exit_code(&rt.paths).await;
            let (status, error) =
                finish_status(exit_code, "session ended without recording exit code");
            if let Err(e) = self
                .transition(
                    id,
                    status,
                    TaskPatch {
                        completed_at: Some(Utc::now()),
                        exit_code: Some(exit_code),
                        error: Some(error),
                        ..Default::default()
                    },
                )
                .await
            {
                match e {
                    // The stored row is gone or already terminal; holding the
                    // GPUs any longer serves nothing
                    GpuqError::NotFound(_) | GpuqError::IllegalState(_) => {
                        warn!(task_id = id, error = %e, "Dropping finished task from running-set");
                        state.running.remove(&id);
                    }
                    // Keep it in the running-set; next tick retries
                    e => warn!(task_id = id, error = %e, "Failed to persist task completion"),
                }
                continue;
            }
            info!(task_id = id, status = %status, exit_code = ?exit_code, "Task finished");
            state.running.remove(&id);
        }
    }

    /// Validate and enqueue a task; launch happens on a later tick
    pub async fn submit(&self, new: NewTask) -> GpuqResult<Task> {
        if new.gpu_count < 1 {
            return Err(GpuqError::Validation(
                "gpu_count must be at least 1".to_string(),
            ));
        }
        if new.gpu_count > MAX_GPU_COUNT {
            return Err(GpuqError::Validation(format!(
                "gpu_count must be at most {}",
                MAX_GPU_COUNT
            )));
        }
        if new.command.trim().is_empty() {
            return Err(GpuqError::Validation(
                "command must not be empty".to_string(),
            ));
        }

        let snapshot = self.probe.snapshot().await.map_err(|e| {
            debug!(error = %e, "Probe failed during submit validation");
            GpuqError::Validation("GPU inventory unavailable".to_string())
        })?;
        let known_type = snapshot
            .iter()
            .filter_map(|gpu| gpu.name.as_deref())
            .any(|name| name == new.gpu_type);
        if !known_type {
            return Err(GpuqError::Validation(format!(
                "GPU type '{}' not present on this host",
                new.gpu_type
            )));
        }

        // Insert and enqueue under one critical section: concurrent submits
        // must not interleave, or queue order diverges from id order
        let mut state = self.state.lock().await;
        let task = self.store.insert(&new).await?;
        state.queue.push_back(task.id);
        drop(state);

        info!(
            task_id = task.id,
            name = %task.name,
            gpu_type = %task.gpu_type,
            gpu_count = task.gpu_count,
            "Queued task"
        );
        Ok(task)
    }

    /// Every task, newest first
    pub async fn list(&self) -> GpuqResult<Vec<Task>> {
        self.store.list_all().await
    }

    pub async fn get(&self, id: i64) -> GpuqResult<Task> {
        self.store.get(id).await?.ok_or(GpuqError::NotFound(id))
    }

    /// Live GPU occupancy, consistent with the running-set
    ///
    /// Probe failure does not fail the call: the report carries the error and
    /// an empty device list.
    pub async fn gpu_status(&self) -> GpuStatusReport {
        let (records, error) = match self.probe.snapshot().await {
            Ok(records) => (records, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        let state = self.state.lock().await;
        let mut assigned: HashMap<u32, i64> = HashMap::new();
        for rt in state.running.values() {
            for &index in &rt.assigned_gpus {
                assigned.insert(index, rt.id);
            }
        }

        let gpus = records
            .into_iter()
            .map(|record| {
                let holder = assigned.get(&record.index).copied();
                GpuStatusView::from_record(record, holder)
            })
            .collect();
        GpuStatusReport { gpus, error }
    }

    /// Final `tail` lines of the task's log
    pub async fn logs(&self, id: i64, tail: Option<usize>) -> GpuqResult<TaskLogs> {
        let task = self.get(id).await?;
        let limit = self.config.clamp_tail(tail);

        let empty = TaskLogs {
            task_id: id,
            lines: Vec::new(),
            truncated: false,
        };
        let Some(log_path) = task.log_path else {
            return Ok(empty);
        };
        let bytes = match tokio::fs::read(&log_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(empty),
            Err(e) => {
                warn!(task_id = id, error = %e, "Failed to read task log");
                return Ok(empty);
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let mut lines: VecDeque<String> = VecDeque::new();
        let mut total = 0usize;
        for line in content.lines() {
            total += 1;
            if limit == 0 {
                continue;
            }
            if lines.len() == limit {
                lines.pop_front();
            }
            lines.push_back(line.to_string());
        }

        let lines: Vec<String> = lines.into();
        Ok(TaskLogs {
            task_id: id,
            truncated: total > lines.len(),
            lines,
        })
    }

    /// Cancel a task, queued or running
    pub async fn cancel(&self, id: i64) -> GpuqResult<Task> {
        let mut state = self.state.lock().await;
        let task = self.store.get(id).await?.ok_or(GpuqError::NotFound(id))?;

        match task.status {
            TaskStatus::Queued => {
                state.queue.retain(|&queued| queued != id);
                self.transition(
                    id,
                    TaskStatus::Cancelled,
                    TaskPatch {
                        completed_at: Some(Utc::now()),
                        error: Some(Some("cancelled before start".to_string())),
                        ..Default::default()
                    },
                )
                .await?;
                info!(task_id = id, "Cancelled queued task");
            }
            TaskStatus::Running => {
                let session = state
                    .running
                    .remove(&id)
                    .map(|rt| rt.session_name)
                    .or(task.session_name);
                if let Some(session) = session {
                    if let Err(e) = self.runner.kill(&session).await {
                        warn!(task_id = id, session = %session, error = %e, "Session kill failed");
                    }
                }
                // Eager transition; the exit-code file is ignored on cancel
                self.transition(
                    id,
                    TaskStatus::Cancelled,
                    TaskPatch {
                        completed_at: Some(Utc::now()),
                        error: Some(Some("cancelled by user".to_string())),
                        ..Default::default()
                    },
                )
                .await?;
                info!(task_id = id, "Cancelled running task");
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                return Err(GpuqError::IllegalState("task already terminal".to_string()));
            }
        }

        drop(state);
        self.get(id).await
    }
}

/// Map a recorded exit code to the terminal status and error message
fn finish_status(exit_code: Option<i64>, missing_msg: &str) -> (TaskStatus, Option<String>) {
    match exit_code {
        Some(0) => (TaskStatus::Completed, None),
        Some(code) => (TaskStatus::Failed, Some(format!("exit code {}", code))),
        None => (TaskStatus::Failed, Some(missing_msg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_status_mapping() {
        assert_eq!(finish_status(Some(0), "m"), (TaskStatus::Completed, None));
        assert_eq!(
            finish_status(Some(3), "m"),
            (TaskStatus::Failed, Some("exit code 3".to_string()))
        );
        assert_eq!(
            finish_status(None, "session lost across restart"),
            (
                TaskStatus::Failed,
                Some("session lost across restart".to_string())
            )
        );
    }
}
