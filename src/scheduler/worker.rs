//! Worker thread loop: plain blocking dequeue-run-loop. Long-running tasks
//! are re-enqueued with a deadline rather than suspended in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Select};
use tracing::{debug, warn};

use super::lane::LaneGroup;
use super::Task;

/// A worker owns lane index `lane_id` in every priority group — the same
/// physical lane index across admin/low-latency/long-running — so a given
/// fingerprint (which always hashes to the same lane index) is always
/// serviced by the same worker thread, with no cross-worker stealing.
pub struct Worker {
    pub lane_id: usize,
    pub groups: Arc<[LaneGroup; 3]>,
    pub shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn run(self) {
        let mut generations = [0usize; 3];
        let mut receivers: [Option<Receiver<Task>>; 3] = [None, None, None];
        self.refresh_stale(&mut generations, &mut receivers);

        while !self.shutdown.load(Ordering::Relaxed) {
            self.refresh_stale(&mut generations, &mut receivers);
            if self.try_drain_in_priority_order(&receivers) {
                continue;
            }
            self.block_for_next(&receivers);
        }
    }

    /// Re-fetches any receiver whose group's lane vector has been replaced
    /// by a `resize` since this worker last looked, including picking up a
    /// receiver for the first time if this lane index didn't exist yet.
    fn refresh_stale(&self, generations: &mut [usize; 3], receivers: &mut [Option<Receiver<Task>>; 3]) {
        for i in 0..3 {
            let current = self.groups[i].generation();
            if receivers[i].is_none() || current != generations[i] {
                generations[i] = current;
                receivers[i] = self.groups[i].receiver(self.lane_id);
            }
        }
    }

    /// Priority order: admin > low-latency > long-running. Returns `true`
    /// if a task ran.
    fn try_drain_in_priority_order(&self, receivers: &[Option<Receiver<Task>>; 3]) -> bool {
        for (group_idx, rx) in receivers.iter().enumerate() {
            if let Some(rx) = rx {
                if let Ok(task) = rx.try_recv() {
                    self.run_task(task, group_idx);
                    return true;
                }
            }
        }
        false
    }

    fn block_for_next(&self, receivers: &[Option<Receiver<Task>>; 3]) {
        let mut select = Select::new();
        let mut group_for_index = Vec::with_capacity(3);
        for (group_idx, rx) in receivers.iter().enumerate() {
            if let Some(rx) = rx {
                select.recv(rx);
                group_for_index.push(group_idx);
            }
        }
        if group_for_index.is_empty() {
            // No lane currently assigned to this worker in any group
            // (shrunk past our index); wait for a resize to hand us one.
            std::thread::sleep(Duration::from_millis(100));
            return;
        }
        if let Ok(op) = select.select_timeout(Duration::from_millis(100)) {
            let group_idx = group_for_index[op.index()];
            if let Some(rx) = &receivers[group_idx] {
                if let Ok(task) = op.recv(rx) {
                    self.run_task(task, group_idx);
                }
            }
        }
    }

    fn run_task(&self, mut task: Task, group_idx: usize) {
        if task.meta.cancel.load(Ordering::Relaxed) {
            debug!(task = task.meta.task_state_id, "dropping cancelled task at yield point");
            return;
        }
        if let Some(deadline) = task.meta.deadline {
            if Instant::now() > deadline {
                warn!(task = task.meta.task_state_id, "dropping task past deadline");
                return;
            }
        }

        if let Err(e) = (task.work)() {
            warn!(task = task.meta.task_state_id, error = %e, "task failed");
        }

        if let Some(period) = task.meta.period {
            let groups = self.groups.clone();
            let lane_hash = task.meta.lane_hash;
            std::thread::spawn(move || {
                std::thread::sleep(period);
                if !task.meta.cancel.load(Ordering::Relaxed) {
                    let _ = groups[group_idx].emplace(lane_hash, task);
                }
            });
        }
    }
}
