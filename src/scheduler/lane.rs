//! Lane groups: `num_lanes` bounded FIFOs per priority, plus the
//! resize-plug protocol.
//!
//! `emplace(prio, lane_hash, data)` computes `lane_hash % num_lanes` and
//! pushes into that lane; resizing sets a plug bit that blocks new
//! emplaces, waits for in-flight pops to drain, mutates the lane vector,
//! then clears the plug. Lanes are `crossbeam_channel` bounded FIFOs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::error::{HermesError, Result};
use crate::scheduler::Task;

struct Lane {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

/// One priority tier's set of lanes. `resize_plug` blocks `emplace` while
/// `in_flight_emplaces` drains to zero, then the lane vector may be
/// mutated; this is the only operation that takes the group-wide write
/// lock.
pub struct LaneGroup {
    lanes: RwLock<Vec<Lane>>,
    queue_depth: usize,
    resize_plug: AtomicBool,
    in_flight_emplaces: AtomicUsize,
    /// Bumped every time `resize` swaps in a fresh lane vector, so a worker
    /// that cached a `Receiver` can notice its handle is stale and re-fetch.
    generation: AtomicUsize,
}

impl LaneGroup {
    pub fn new(num_lanes: usize, queue_depth: usize) -> Self {
        let lanes = (0..num_lanes.max(1))
            .map(|_| {
                let (tx, rx) = bounded(queue_depth);
                Lane { tx, rx }
            })
            .collect();
        Self {
            lanes: RwLock::new(lanes),
            queue_depth,
            resize_plug: AtomicBool::new(false),
            in_flight_emplaces: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
        }
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.read().len()
    }

    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    fn lane_id_for(&self, lane_hash: u32, num_lanes: usize) -> usize {
        (lane_hash as usize) % num_lanes.max(1)
    }

    /// `lane = lane_hash mod num_lanes`; blocks (spins) while a resize is in
    /// progress.
    pub fn emplace(&self, lane_hash: u32, task: Task) -> Result<()> {
        loop {
            if !self.resize_plug.load(Ordering::Acquire) {
                self.in_flight_emplaces.fetch_add(1, Ordering::AcqRel);
                if self.resize_plug.load(Ordering::Acquire) {
                    self.in_flight_emplaces.fetch_sub(1, Ordering::AcqRel);
                    std::hint::spin_loop();
                    continue;
                }
                let lanes = self.lanes.read();
                let id = self.lane_id_for(lane_hash, lanes.len());
                let result = lanes[id]
                    .tx
                    .send(task)
                    .map_err(|_| HermesError::Shutdown);
                drop(lanes);
                self.in_flight_emplaces.fetch_sub(1, Ordering::AcqRel);
                return result;
            }
            std::hint::spin_loop();
        }
    }

    /// `None` if `lane_id` is no longer within bounds after a shrink.
    pub fn receiver(&self, lane_id: usize) -> Option<Receiver<Task>> {
        self.lanes.read().get(lane_id).map(|l| l.rx.clone())
    }

    /// Grows or shrinks to `new_num_lanes`, plugging emplace in the
    /// meantime, and bumps `generation` so workers holding a receiver from
    /// before the swap know to re-fetch it. In-flight pops drain from the
    /// old receivers as workers notice the bump.
    pub fn resize(&self, new_num_lanes: usize) {
        self.resize_plug.store(true, Ordering::Release);
        while self.in_flight_emplaces.load(Ordering::Acquire) > 0 {
            std::hint::spin_loop();
        }
        {
            let mut lanes = self.lanes.write();
            let new_lanes = (0..new_num_lanes.max(1))
                .map(|_| {
                    let (tx, rx) = bounded(self.queue_depth);
                    Lane { tx, rx }
                })
                .collect();
            *lanes = new_lanes;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.resize_plug.store(false, Ordering::Release);
    }
}

pub fn make_lane_groups(num_lanes: usize, queue_depth: usize) -> Arc<[LaneGroup; 3]> {
    Arc::new([
        LaneGroup::new(num_lanes, queue_depth),
        LaneGroup::new(num_lanes, queue_depth),
        LaneGroup::new(num_lanes, queue_depth),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Priority, TaskMeta};
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    fn dummy_task(lane_hash: u32) -> Task {
        Task {
            meta: TaskMeta {
                task_state_id: 0,
                method: 0,
                lane_hash,
                priority: Priority::LowLatency,
                period: None,
                deadline: None,
                cancel: Arc::new(StdAtomicBool::new(false)),
            },
            work: Box::new(|| Ok(())),
        }
    }

    #[test]
    fn same_hash_always_same_lane() {
        let group = LaneGroup::new(4, 16);
        assert_eq!(group.lane_id_for(10, 4), group.lane_id_for(10, 4));
    }

    #[test]
    fn emplace_and_receive() {
        let group = LaneGroup::new(2, 16);
        group.emplace(5, dummy_task(5)).unwrap();
        let lane_id = 5 % 2;
        let rx = group.receiver(lane_id).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn resize_changes_lane_count() {
        let group = LaneGroup::new(2, 16);
        assert_eq!(group.num_lanes(), 2);
        group.resize(4);
        assert_eq!(group.num_lanes(), 4);
    }

    #[test]
    fn resize_bumps_generation_and_orphans_old_receiver() {
        let group = LaneGroup::new(2, 16);
        let gen_before = group.generation();
        let old_rx = group.receiver(0).unwrap();
        group.resize(4);
        assert!(group.generation() > gen_before);
        group.emplace(0, dummy_task(0)).unwrap();
        // The pre-resize receiver handle is disconnected from the new lane.
        assert!(old_rx.try_recv().is_err());
        let new_rx = group.receiver(0).unwrap();
        assert!(new_rx.try_recv().is_ok());
    }
}
