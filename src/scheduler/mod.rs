//! Scheduler & lane runtime: assigns tasks to worker threads, guaranteeing
//! at-most-one concurrent mutation per blob fingerprint.

pub mod lane;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::id::BlobId;
use lane::{make_lane_groups, LaneGroup};
use worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Admin,
    LowLatency,
    LongRunning,
}

impl Priority {
    fn group_index(self) -> usize {
        match self {
            Priority::Admin => 0,
            Priority::LowLatency => 1,
            Priority::LongRunning => 2,
        }
    }
}

pub struct TaskMeta {
    pub task_state_id: u64,
    pub method: u32,
    pub lane_hash: u32,
    pub priority: Priority,
    pub period: Option<Duration>,
    pub deadline: Option<Instant>,
    pub cancel: Arc<AtomicBool>,
}

/// `FnMut` (not `FnOnce`) so a periodic task's closure can be re-run every
/// time the worker re-enqueues it after its period elapses.
pub struct Task {
    pub meta: TaskMeta,
    pub work: Box<dyn FnMut() -> Result<()> + Send>,
}

pub struct TaskHandle {
    pub task_state_id: u64,
    pub cancel: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

pub struct Scheduler {
    groups: Arc<[LaneGroup; 3]>,
    shutdown: Arc<AtomicBool>,
    next_task_id: AtomicU64,
    /// Highest lane index any group currently has a worker for; grown by
    /// `resize` as needed so a lane added by growing a group always has an
    /// owning worker thread.
    worker_count: AtomicUsize,
    worker_handles: parking_lot::Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(num_lanes: usize, queue_depth: usize) -> Arc<Self> {
        let groups = make_lane_groups(num_lanes, queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::new(Self {
            groups: groups.clone(),
            shutdown: shutdown.clone(),
            next_task_id: AtomicU64::new(1),
            worker_count: AtomicUsize::new(num_lanes),
            worker_handles: parking_lot::Mutex::new(Vec::new()),
        });

        let handles = Self::spawn_workers(0, num_lanes, &groups, &shutdown);
        *scheduler.worker_handles.lock() = handles;
        scheduler
    }

    fn spawn_workers(
        from: usize,
        to: usize,
        groups: &Arc<[LaneGroup; 3]>,
        shutdown: &Arc<AtomicBool>,
    ) -> Vec<std::thread::JoinHandle<()>> {
        (from..to)
            .map(|lane_id| {
                let worker = Worker { lane_id, groups: groups.clone(), shutdown: shutdown.clone() };
                std::thread::spawn(move || worker.run())
            })
            .collect()
    }

    pub fn num_lanes(&self) -> usize {
        self.worker_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Submits a one-shot task whose fingerprint is `lane_hash`. For blob
    /// mutations the caller passes `hash(blob_id)` so every mutation on the
    /// same blob lands on the same lane, serialising it without a per-blob
    /// lock.
    pub fn submit(
        &self,
        priority: Priority,
        lane_hash: u32,
        method: u32,
        work: impl FnMut() -> Result<()> + Send + 'static,
    ) -> Result<TaskHandle> {
        let task_state_id = self.next_id();
        let cancel = Arc::new(AtomicBool::new(false));
        let task = Task {
            meta: TaskMeta {
                task_state_id,
                method,
                lane_hash,
                priority,
                period: None,
                deadline: None,
                cancel: cancel.clone(),
            },
            work: Box::new(work),
        };
        self.groups[priority.group_index()].emplace(lane_hash, task)?;
        Ok(TaskHandle { task_state_id, cancel })
    }

    /// Submits a long-running periodic task; the worker re-enqueues it
    /// after `period` elapses each time it completes.
    pub fn submit_periodic(
        &self,
        lane_hash: u32,
        method: u32,
        period: Duration,
        work: impl FnMut() -> Result<()> + Send + 'static,
    ) -> Result<TaskHandle> {
        let task_state_id = self.next_id();
        let cancel = Arc::new(AtomicBool::new(false));
        let task = Task {
            meta: TaskMeta {
                task_state_id,
                method,
                lane_hash,
                priority: Priority::LongRunning,
                period: Some(period),
                deadline: None,
                cancel: cancel.clone(),
            },
            work: Box::new(work),
        };
        self.groups[Priority::LongRunning.group_index()].emplace(lane_hash, task)?;
        Ok(TaskHandle { task_state_id, cancel })
    }

    /// Resizes one priority's lane group and, if this grows the lane count
    /// past every worker index spawned so far, spawns the extra workers so
    /// the new lanes have someone reading from them. Shrinking leaves
    /// surplus workers running; they simply idle once their cached
    /// receivers go stale and `receiver` returns `None` for their index.
    pub fn resize(&self, priority: Priority, new_num_lanes: usize) {
        self.groups[priority.group_index()].resize(new_num_lanes);

        let mut handles = self.worker_handles.lock();
        let current = self.worker_count.load(std::sync::atomic::Ordering::Relaxed);
        if new_num_lanes > current {
            handles.extend(Self::spawn_workers(current, new_num_lanes, &self.groups, &self.shutdown));
            self.worker_count.store(new_num_lanes, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        let handles = std::mem::take(&mut *self.worker_handles.lock());
        for h in handles {
            let _ = h.join();
        }
    }
}

/// `fingerprint = blob_id` for blob mutations.
pub fn blob_fingerprint(blob_id: BlobId) -> u32 {
    crate::id::hash_id(blob_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn tasks_with_same_lane_hash_run_in_order() {
        let scheduler = Scheduler::start(2, 32);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            scheduler
                .submit(Priority::LowLatency, 7, 0, move || {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(200));
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec![0, 1, 2, 3, 4]);
        scheduler.shutdown();
    }

    #[test]
    fn admin_tasks_run_before_low_latency() {
        let counter = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::start(1, 32);
        // Fill the low-latency lane first so both are pending when the
        // worker wakes.
        let first = Arc::new(AtomicU32::new(u32::MAX));
        let c1 = counter.clone();
        let f1 = first.clone();
        scheduler
            .submit(Priority::LowLatency, 0, 0, move || {
                let n = c1.fetch_add(1, Ordering::SeqCst);
                f1.compare_exchange(u32::MAX, n, Ordering::SeqCst, Ordering::SeqCst).ok();
                std::thread::sleep(Duration::from_millis(50));
                Ok(())
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let c2 = counter.clone();
        scheduler
            .submit(Priority::Admin, 0, 0, move || {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
    }
}
