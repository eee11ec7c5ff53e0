//! The grouping pipeline: stages chained by bounded channels.
//!
//! Each stage reads the ungrouped remainder of the previous one. Groups from
//! every stage are merged into a single output; whatever survives the last
//! stage comes out ungrouped, in arrival order.

use crate::config::GroupingConfig;
use crate::core::asset::Asset;
use crate::core::group::AssetGroup;
use crate::core::stage::{ClusterRule, ClusterStage, Grouper};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Grouping was cancelled")]
    Cancelled,

    #[error("Output of {0} closed before the stage finished")]
    StageClosed(String),

    #[error("Stage task failed: {0}")]
    StagePanicked(#[from] JoinError),
}

pub struct GroupPipeline<A: Asset> {
    stages: Vec<Box<dyn Grouper<A>>>,
    capacity: usize,
}

impl<A: Asset> GroupPipeline<A> {
    /// An empty pipeline passes everything through.
    pub fn new(capacity: usize) -> Self {
        Self {
            stages: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn with_stage(mut self, stage: impl Grouper<A> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Series by name, burst by time, raw+jpg, heic+jpg.
    pub fn standard(config: &GroupingConfig) -> Self {
        let capacity = config.channel_capacity;
        Self::new(capacity)
            .with_stage(ClusterStage::new(ClusterRule::series(config.series_gap()), capacity))
            .with_stage(ClusterStage::new(ClusterRule::burst(config.burst_gap()), capacity))
            .with_stage(ClusterStage::new(ClusterRule::raw_jpg(config.pair_gap()), capacity))
            .with_stage(ClusterStage::new(ClusterRule::heic_jpg(config.pair_gap()), capacity))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `input` until it closes. Both outputs are
    /// dropped when this returns, so consumers see them close.
    pub async fn group(
        &self,
        cancel: CancellationToken,
        input: mpsc::Receiver<A>,
        out: mpsc::Sender<A>,
        groups_out: mpsc::Sender<AssetGroup<A>>,
    ) -> Result<(), PipelineError> {
        // Tripped on the first failure so no stage stays parked on a send.
        let abort = cancel.child_token();
        let mut tasks = Vec::with_capacity(self.stages.len());
        let mut forwarders = Vec::with_capacity(self.stages.len());
        let mut current = input;

        for stage in &self.stages {
            let handle = stage.consume(abort.clone(), current);
            tasks.push(handle.task);
            forwarders.push(tokio::spawn(forward(
                abort.clone(),
                handle.groups,
                groups_out.clone(),
                format!("{} groups", stage.name()),
            )));
            current = handle.ungrouped;
        }
        drop(groups_out);

        let mut outcome = forward(abort.clone(), current, out, "ungrouped".to_string()).await;
        if outcome.is_err() {
            abort.cancel();
        }

        for handle in tasks.into_iter().chain(forwarders) {
            let result = handle.await.map_err(PipelineError::from).and_then(|r| r);
            if result.is_err() {
                abort.cancel();
            }
            outcome = match (outcome, result) {
                (Ok(()), result) => result,
                (Err(PipelineError::Cancelled), Err(e)) => Err(e),
                (Err(PipelineError::StageClosed(_)), Err(e @ PipelineError::StagePanicked(_))) => {
                    Err(e)
                }
                (outcome, _) => outcome,
            };
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        outcome
    }

    /// Feed `assets` through the pipeline and collect both outputs.
    pub async fn group_all(
        &self,
        cancel: CancellationToken,
        assets: Vec<A>,
    ) -> Result<(Vec<A>, Vec<AssetGroup<A>>), PipelineError> {
        let (in_tx, in_rx) = mpsc::channel(self.capacity);
        let (out_tx, mut out_rx) = mpsc::channel(self.capacity);
        let (groups_tx, mut groups_rx) = mpsc::channel(self.capacity);

        let feed = async move {
            for asset in assets {
                if in_tx.send(asset).await.is_err() {
                    break;
                }
            }
        };

        let drain = async {
            let mut ungrouped = Vec::new();
            let mut groups = Vec::new();
            let (mut assets_open, mut groups_open) = (true, true);

            while assets_open || groups_open {
                tokio::select! {
                    asset = out_rx.recv(), if assets_open => match asset {
                        Some(asset) => ungrouped.push(asset),
                        None => assets_open = false,
                    },
                    group = groups_rx.recv(), if groups_open => match group {
                        Some(group) => groups.push(group),
                        None => groups_open = false,
                    },
                }
            }
            (ungrouped, groups)
        };

        let ((), result, (ungrouped, groups)) =
            tokio::join!(feed, self.group(cancel, in_rx, out_tx, groups_tx), drain);
        result?;

        log::info!(
            "Grouping done: {} groups, {} ungrouped assets",
            groups.len(),
            ungrouped.len()
        );
        Ok((ungrouped, groups))
    }
}

async fn forward<T>(
    cancel: CancellationToken,
    mut from: mpsc::Receiver<T>,
    to: mpsc::Sender<T>,
    what: String,
) -> Result<(), PipelineError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            next = from.recv() => next,
        };
        let Some(item) = next else {
            return Ok(());
        };
        let delivered = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            sent = to.send(item) => sent.is_ok(),
        };
        if !delivered {
            return Err(PipelineError::StageClosed(what));
        }
    }
}
