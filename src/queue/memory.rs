//! In-memory replication queue
//!
//! Records pushed jobs instead of replicating anything. The factory keeps
//! every client it ever built, which lets tests assert the swap discipline
//! (old client closed only after its replacement reported ready).

use super::{
    QueueDescriptor, QueueError, QueueFactory, QueueResult, RepairJob, ReplicationQueue,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct MemoryQueue {
    descriptor: QueueDescriptor,
    jobs: Mutex<Vec<RepairJob>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(descriptor: QueueDescriptor) -> Self {
        Self {
            descriptor,
            jobs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.descriptor
    }

    pub fn jobs(&self) -> Vec<RepairJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicationQueue for MemoryQueue {
    async fn push(&self, job: RepairJob) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(self.jobs.lock().unwrap().len() as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MemoryQueueFactory {
    built: Mutex<Vec<Arc<MemoryQueue>>>,
}

impl MemoryQueueFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every client built so far, oldest first.
    pub fn built(&self) -> Vec<Arc<MemoryQueue>> {
        self.built.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<Arc<MemoryQueue>> {
        self.built.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl QueueFactory for MemoryQueueFactory {
    async fn build(&self, descriptor: &QueueDescriptor) -> QueueResult<Arc<dyn ReplicationQueue>> {
        let queue = Arc::new(MemoryQueue::new(descriptor.clone()));
        self.built.lock().unwrap().push(queue.clone());
        Ok(queue)
    }
}
