//! Directory-backed job queue.
//!
//! One JSON document per job under a state directory. Every successful
//! mutation rewrites the affected document before it touches in-memory
//! state, so a restart observes exactly the jobs that were acknowledged.
//! The in-memory side (dependant index, unfinished-dep counters, per-type
//! ready queues, lease table) is rebuilt from the documents on open.
//!
//! Leases are volatile: a job found started-but-unfinished at load time
//! lost its worker with the process and is returned to the pending pool.
//!
//! Locking: a single mutex serializes every operation. Blocking dequeues
//! never hold it across an await; they register on a [`Notify`] before
//! re-checking the ready queues, so a promotion between the check and the
//! wait cannot be missed.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DequeuedJob, JobInfo, JobQueue, JobState, QueueError};

/// On-disk job document. Field names are the durable format; renaming one
/// breaks existing state directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    id: Uuid,
    job_type: String,
    args: serde_json::Value,
    #[serde(default)]
    deps: Vec<Uuid>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    queued_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    canceled: bool,
}

impl JobRecord {
    fn is_terminal(&self) -> bool {
        self.finished_at.is_some() || self.canceled
    }
}

/// A live lease. `detached` is set when the job was canceled out from under
/// the worker: the token still resolves so the worker's finish attempt gets
/// a proper `NotRunning`, but the lease no longer counts as alive.
struct Lease {
    job_id: Uuid,
    last_heartbeat: DateTime<Utc>,
    detached: bool,
}

/// An entry in a ready queue, stamped with its pending-transition moment so
/// dequeues can pick the oldest entry across several type queues.
struct ReadyEntry {
    id: Uuid,
    since: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, JobRecord>,
    /// Jobs whose deps contain the key. Maintained in lockstep with `jobs`.
    dependants: HashMap<Uuid, Vec<Uuid>>,
    /// Unfinished-dep counters for non-terminal jobs.
    unfinished_deps: HashMap<Uuid, usize>,
    /// One FIFO per job-type of jobs whose deps are satisfied.
    ready: HashMap<String, VecDeque<ReadyEntry>>,
    /// Lease token -> lease.
    leases: HashMap<Uuid, Lease>,
    /// Job id -> outstanding token. At most one per job.
    tokens: HashMap<Uuid, Uuid>,
}

impl QueueState {
    /// Count deps that still gate the job. Finished and canceled deps both
    /// satisfy the counter; a canceled dep will have canceled the job
    /// itself through the cascade anyway.
    fn count_unfinished(&self, deps: &[Uuid]) -> usize {
        deps.iter()
            .filter(|d| self.jobs.get(d).map(|j| !j.is_terminal()).unwrap_or(false))
            .count()
    }

    fn push_ready(&mut self, id: Uuid, job_type: &str, since: DateTime<Utc>) {
        self.ready
            .entry(job_type.to_string())
            .or_default()
            .push_back(ReadyEntry { id, since });
    }

    fn remove_ready(&mut self, id: Uuid, job_type: &str) {
        if let Some(queue) = self.ready.get_mut(job_type) {
            queue.retain(|entry| entry.id != id);
        }
    }

    /// Pop the oldest ready entry across the named queues. Ties break in
    /// the order the caller listed the types.
    fn pop_oldest(&mut self, job_types: &[String]) -> Option<Uuid> {
        let mut best: Option<(usize, DateTime<Utc>)> = None;
        for (idx, job_type) in job_types.iter().enumerate() {
            let front = self.ready.get(job_type).and_then(|q| q.front());
            if let Some(entry) = front {
                match best {
                    Some((_, since)) if entry.since >= since => {}
                    _ => best = Some((idx, entry.since)),
                }
            }
        }
        let (idx, _) = best?;
        self.ready
            .get_mut(&job_types[idx])
            .and_then(|q| q.pop_front())
            .map(|entry| entry.id)
    }
}

/// Durable job queue persisting one JSON document per job.
pub struct FsJobQueue {
    dir: PathBuf,
    state: Mutex<QueueState>,
    /// Signaled whenever a job becomes ready.
    changed: Notify,
}

impl FsJobQueue {
    /// Open a queue over `dir`, creating the directory if needed and
    /// rebuilding the in-memory indexes from any existing job documents.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut jobs = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            let mut record: JobRecord = serde_json::from_slice(&bytes)?;

            // The worker that held this job died with the previous process;
            // return the job to the pending pool.
            if record.started_at.is_some() && !record.is_terminal() {
                warn!(job_id = %record.id, job_type = %record.job_type, "requeueing job interrupted by restart");
                record.started_at = None;
                write_record(&dir, &record)?;
            }
            jobs.insert(record.id, record);
        }

        let mut state = QueueState {
            jobs,
            ..QueueState::default()
        };

        for job in state.jobs.values() {
            for dep in &job.deps {
                state
                    .dependants
                    .entry(*dep)
                    .or_insert_with(Vec::new)
                    .push(job.id);
            }
        }

        let mut pending: Vec<(Uuid, String, DateTime<Utc>)> = Vec::new();
        let non_terminal: Vec<(Uuid, Vec<Uuid>)> = state
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .map(|j| (j.id, j.deps.clone()))
            .collect();
        for (id, deps) in non_terminal {
            let unfinished = state.count_unfinished(&deps);
            state.unfinished_deps.insert(id, unfinished);
            if unfinished == 0 {
                let job = &state.jobs[&id];
                pending.push((id, job.job_type.clone(), job.queued_at));
            }
        }
        // The original pending-transition order did not survive the
        // restart; enqueue order is the closest durable approximation.
        pending.sort_by_key(|(_, _, queued_at)| *queued_at);
        for (id, job_type, queued_at) in pending {
            state.push_ready(id, &job_type, queued_at);
        }

        debug!(dir = %dir.display(), jobs = state.jobs.len(), "job queue opened");

        Ok(Self {
            dir,
            state: Mutex::new(state),
            changed: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, record: &JobRecord) -> Result<(), QueueError> {
        write_record(&self.dir, record)
    }

    /// Lease one ready job of the named types, if any.
    fn try_dequeue(
        &self,
        state: &mut QueueState,
        job_types: &[String],
    ) -> Result<Option<DequeuedJob>, QueueError> {
        let id = match state.pop_oldest(job_types) {
            Some(id) => id,
            None => return Ok(None),
        };
        self.lease(state, id).map(Some)
    }

    /// Stamp `started_at`, persist, and mint a lease token for a job that
    /// has already been removed from its ready queue.
    fn lease(&self, state: &mut QueueState, id: Uuid) -> Result<DequeuedJob, QueueError> {
        let now = Utc::now();
        let mut record = state.jobs[&id].clone();
        record.started_at = Some(now);
        self.persist(&record)?;

        let token = Uuid::new_v4();
        state.leases.insert(
            token,
            Lease {
                job_id: id,
                last_heartbeat: now,
                detached: false,
            },
        );
        state.tokens.insert(id, token);

        let dequeued = DequeuedJob {
            id,
            token,
            job_type: record.job_type.clone(),
            args: record.args.clone(),
            deps: record.deps.clone(),
        };
        state.jobs.insert(id, record);

        debug!(job_id = %id, token = %token, "job leased");
        Ok(dequeued)
    }

    /// Mark `id` and all transitive dependants canceled. Pending entries
    /// leave their ready queues; an outstanding lease is detached so the
    /// worker's next finish attempt observes `NotRunning`.
    fn cancel_tree(&self, state: &mut QueueState, id: Uuid) -> Result<(), QueueError> {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let mut record = match state.jobs.get(&next) {
                Some(r) if !r.is_terminal() => r.clone(),
                _ => continue,
            };
            record.canceled = true;
            self.persist(&record)?;

            let job_type = record.job_type.clone();
            state.jobs.insert(next, record);
            state.unfinished_deps.remove(&next);
            state.remove_ready(next, &job_type);
            if let Some(token) = state.tokens.get(&next) {
                if let Some(lease) = state.leases.get_mut(token) {
                    lease.detached = true;
                }
            }
            debug!(job_id = %next, "job canceled");

            if let Some(dependants) = state.dependants.get(&next) {
                stack.extend(dependants.iter().copied());
            }
        }
        Ok(())
    }
}

fn write_record(dir: &Path, record: &JobRecord) -> Result<(), QueueError> {
    let path = dir.join(format!("{}.json", record.id));
    let tmp = dir.join(format!("{}.json.tmp", record.id));
    std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[async_trait]
impl JobQueue for FsJobQueue {
    async fn enqueue(
        &self,
        job_type: &str,
        args: serde_json::Value,
        deps: &[Uuid],
    ) -> Result<Uuid, QueueError> {
        let mut state = self.lock();

        for dep in deps {
            if !state.jobs.contains_key(dep) {
                return Err(QueueError::UnknownDep(*dep));
            }
        }

        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            args,
            deps: deps.to_vec(),
            result: None,
            queued_at: now,
            started_at: None,
            finished_at: None,
            canceled: false,
        };
        self.persist(&record)?;

        let id = record.id;
        let unfinished = state.count_unfinished(deps);
        for dep in deps {
            state
                .dependants
                .entry(*dep)
                .or_insert_with(Vec::new)
                .push(id);
        }
        state.unfinished_deps.insert(id, unfinished);
        state.jobs.insert(id, record);

        if unfinished == 0 {
            state.push_ready(id, job_type, now);
            drop(state);
            self.changed.notify_waiters();
        }

        debug!(job_id = %id, job_type = %job_type, deps = deps.len(), "job enqueued");
        Ok(id)
    }

    async fn dequeue(
        &self,
        ctx: &CancellationToken,
        job_types: &[String],
    ) -> Result<DequeuedJob, QueueError> {
        loop {
            // Register interest before re-checking so a promotion between
            // the check and the wait still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(job) = self.try_dequeue(&mut state, job_types)? {
                    return Ok(job);
                }
            }

            if ctx.is_cancelled() {
                return Err(QueueError::DequeueTimeout);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = ctx.cancelled() => return Err(QueueError::DequeueTimeout),
            }
        }
    }

    async fn dequeue_by_id(&self, id: Uuid) -> Result<DequeuedJob, QueueError> {
        let mut state = self.lock();
        let record = state.jobs.get(&id).ok_or(QueueError::NotExist)?;

        let pending = !record.is_terminal()
            && record.started_at.is_none()
            && state.unfinished_deps.get(&id).copied() == Some(0);
        if !pending {
            return Err(QueueError::NotPending);
        }

        let job_type = record.job_type.clone();
        state.remove_ready(id, &job_type);
        self.lease(&mut state, id)
    }

    async fn finish_job(&self, token: Uuid, result: serde_json::Value) -> Result<(), QueueError> {
        let mut state = self.lock();

        let job_id = match state.leases.get(&token) {
            Some(lease) => lease.job_id,
            // Not a lease token: a job id (leased or not) cannot finish a
            // job, but it deserves NotRunning rather than NotExist.
            None if state.jobs.contains_key(&token) => return Err(QueueError::NotRunning),
            None => return Err(QueueError::NotExist),
        };

        let record = state.jobs.get(&job_id).ok_or(QueueError::NotExist)?;
        if record.canceled {
            // Canceled while running: retire the lease, discard the result.
            state.leases.remove(&token);
            state.tokens.remove(&job_id);
            return Err(QueueError::NotRunning);
        }
        if record.finished_at.is_some() || record.started_at.is_none() {
            return Err(QueueError::NotRunning);
        }

        let mut record = record.clone();
        record.result = Some(result);
        record.finished_at = Some(Utc::now());
        self.persist(&record)?;

        state.jobs.insert(job_id, record);
        state.leases.remove(&token);
        state.tokens.remove(&job_id);
        state.unfinished_deps.remove(&job_id);

        // Promote dependants whose last gate this was.
        let dependants = state.dependants.get(&job_id).cloned().unwrap_or_default();
        let mut promoted = false;
        let now = Utc::now();
        for dependant in dependants {
            let remaining = match state.unfinished_deps.get_mut(&dependant) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => continue,
            };
            if remaining == 0 {
                let job_type = state.jobs[&dependant].job_type.clone();
                state.push_ready(dependant, &job_type, now);
                promoted = true;
                debug!(job_id = %dependant, "job promoted to pending");
            }
        }
        drop(state);
        if promoted {
            self.changed.notify_waiters();
        }

        debug!(job_id = %job_id, "job finished");
        Ok(())
    }

    async fn cancel_job(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.lock();
        let terminal = match state.jobs.get(&id) {
            None => return Err(QueueError::NotExist),
            Some(record) => record.is_terminal(),
        };
        if terminal {
            return Err(QueueError::NotRunning);
        }
        self.cancel_tree(&mut state, id)
    }

    async fn job(&self, id: Uuid) -> Result<JobInfo, QueueError> {
        let state = self.lock();
        let record = state.jobs.get(&id).ok_or(QueueError::NotExist)?;
        Ok(JobInfo {
            job_type: record.job_type.clone(),
            args: record.args.clone(),
            deps: record.deps.clone(),
        })
    }

    async fn job_status(&self, id: Uuid) -> Result<JobState, QueueError> {
        let state = self.lock();
        let record = state.jobs.get(&id).ok_or(QueueError::NotExist)?;
        Ok(JobState {
            job_type: record.job_type.clone(),
            result: record.result.clone(),
            queued_at: record.queued_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            canceled: record.canceled,
            deps: record.deps.clone(),
        })
    }

    async fn id_from_token(&self, token: Uuid) -> Result<Uuid, QueueError> {
        let state = self.lock();
        match state.leases.get(&token) {
            Some(lease) if !lease.detached => Ok(lease.job_id),
            _ => Err(QueueError::NotExist),
        }
    }

    async fn refresh_heartbeat(&self, token: Uuid) {
        let mut state = self.lock();
        if let Some(lease) = state.leases.get_mut(&token) {
            if !lease.detached {
                lease.last_heartbeat = Utc::now();
            }
        }
    }

    async fn stale_leases(&self, older_than: Duration) -> Vec<Uuid> {
        let state = self.lock();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        state
            .leases
            .iter()
            .filter(|(_, lease)| {
                !lease.detached
                    && lease.last_heartbeat < cutoff
                    && state
                        .jobs
                        .get(&lease.job_id)
                        .map(|j| !j.is_terminal())
                        .unwrap_or(false)
            })
            .map(|(token, _)| *token)
            .collect()
    }
}
