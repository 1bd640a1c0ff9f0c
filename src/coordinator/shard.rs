//! Per-shard write path
//!
//! A shard handle captures the member node list at creation, so an upload in
//! flight keeps a stable view even if the shard table changes under it.
//! Uploads run the sequence spool, account, distribute, repair. Nodes are
//! tried strictly one at a time in random order (sequential attempts add
//! latency when nodes are down, but never spend bandwidth on duplicate
//! transfers during the synchronous leg), and every member that missed the
//! direct write gets an asynchronous repair push once the client has its
//! response.

use crate::common::{Error, EventSink, Result};
use crate::coordinator::registry::ClusterView;
use crate::coordinator::sizes::SizeAccounting;
use crate::coordinator::spool::Spool;
use crate::queue::{QueueSlot, RepairJob};
use bytes::Bytes;
use futures_util::Stream;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use reqwest::header::CONTENT_LENGTH;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::io::ReaderStream;

/// Everything a write path needs from the coordinator.
#[derive(Clone)]
pub(crate) struct WriteContext {
    pub view: Arc<ClusterView>,
    pub accounting: Arc<SizeAccounting>,
    pub queue: QueueSlot,
    pub events: EventSink,
    pub http: reqwest::Client,
    pub spool_dir: Option<PathBuf>,
    pub rng: Arc<Mutex<StdRng>>,
}

pub struct Shard {
    pub id: String,
    nodes: Vec<String>,
    ctx: WriteContext,
}

impl Shard {
    pub(crate) fn new(id: String, nodes: Vec<String>, ctx: WriteContext) -> Self {
        Self { id, nodes, ctx }
    }

    /// Member node ids captured when this handle was built.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Run one upload through this shard. `path` is forwarded verbatim to
    /// the storage node; `size` is the declared content length.
    pub async fn accept_write<S, E>(&self, path: &str, size: u64, body: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut spool = Spool::create_in(self.ctx.spool_dir.as_deref())?;
        spool.fill(body).await?;

        // Accounting is fire-and-forget from the client's perspective; a
        // failed increment never fails an otherwise-successful upload.
        let accounting = self.ctx.accounting.clone();
        let events = self.ctx.events.clone();
        let shard_id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = accounting.increment(&shard_id, size).await {
                events.report(e);
            }
        });

        let winner = self.distribute(path, size, &spool).await?;
        self.schedule_repairs(&winner, path);
        Ok(())
    }

    /// Try nodes in uniformly shuffled order until one accepts the write.
    async fn distribute(&self, path: &str, size: u64, spool: &Spool) -> Result<String> {
        let mut order = self.nodes.clone();
        order.shuffle(&mut *self.ctx.rng.lock().unwrap());

        for node_id in order {
            match self.put_to_node(&node_id, path, size, spool).await {
                Ok(()) => {
                    tracing::info!(
                        "uploaded {} to node {} from shard {}",
                        path,
                        node_id,
                        self.id
                    );
                    return Ok(node_id);
                }
                Err(e) => {
                    tracing::debug!("node {} failed for {}: {}", node_id, path, e);
                }
            }
        }

        Err(Error::UploadFailed {
            path: path.to_string(),
            nodes: self.nodes.clone(),
        })
    }

    /// Size-declared PUT of the spooled content to one node. Success is
    /// exactly 201 or 204; anything else, including a body-read error, is a
    /// node failure. The response stream is drained either way so the
    /// connection can be reused.
    async fn put_to_node(&self, node_id: &str, path: &str, size: u64, spool: &Spool) -> Result<()> {
        let node = self
            .ctx
            .view
            .node(node_id)
            .ok_or_else(|| Error::NodeUnknown(node_id.to_string()))?;
        let url = format!("http://{}:{}{}", node.host, node.port, path);

        let reader = ReaderStream::new(spool.reader()?);
        let response = self
            .ctx
            .http
            .put(url)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(reader))
            .send()
            .await?;

        let status = response.status();
        let drained = response.bytes().await;
        if status != reqwest::StatusCode::CREATED && status != reqwest::StatusCode::NO_CONTENT {
            return Err(Error::NodeRejected {
                node: node_id.to_string(),
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        drained?;
        Ok(())
    }

    /// Queue a repair push for every member that missed the direct write,
    /// sourced from the node that has the bytes. Runs after the client
    /// response; failures surface on the event stream only.
    fn schedule_repairs(&self, winner: &str, path: &str) {
        for node_id in &self.nodes {
            if node_id == winner {
                continue;
            }
            let job = RepairJob {
                sources: vec![winner.to_string()],
                target: node_id.clone(),
                path: path.to_string(),
            };
            let queue = self.ctx.queue.current();
            let events = self.ctx.events.clone();
            tokio::spawn(async move {
                match queue {
                    Some(queue) => {
                        tracing::debug!(
                            "repair push: {} -> {} ({})",
                            job.sources.join(","),
                            job.target,
                            job.path
                        );
                        if let Err(e) = queue.push(job).await {
                            events.report(e.into());
                        }
                    }
                    None => events.report(Error::QueueUnavailable),
                }
            });
        }
    }
}
