use crate::config::{ConfigError, Settings};
use crate::core::asset::{Asset, LocalAsset};
use crate::core::group::{AssetGroup, GroupingKind};
use crate::core::index::AssetIndex;
use crate::core::pipeline::{GroupPipeline, PipelineError};
use crate::services::catalog::{CatalogClient, CatalogError};
use crate::services::dispatcher::{
    AlbumRegistry, DispatchError, DispatchOptions, GroupDispatcher,
};
use crate::services::journal::Journal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Grouping failed: {0}")]
    Pipeline(PipelineError),

    #[error("Upload was cancelled")]
    Cancelled,
}

impl From<PipelineError> for UploadError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Cancelled => UploadError::Cancelled,
            e => UploadError::Pipeline(e),
        }
    }
}

#[derive(Debug, Default)]
pub struct UploadReport {
    /// Groups of two or more assets.
    pub groups: usize,
    pub singles: usize,
    pub assets: usize,
    pub errors: Vec<DispatchError>,
}

impl UploadReport {
    fn record(&mut self, kind: GroupingKind, size: usize) {
        if kind == GroupingKind::None {
            self.singles += 1;
        } else {
            self.groups += 1;
        }
        self.assets += size;
    }
}

/// Groups incoming files and hands every group to the dispatcher.
pub struct UploadRunner {
    pipeline: GroupPipeline<LocalAsset>,
    dispatcher: GroupDispatcher,
    capacity: usize,
}

impl UploadRunner {
    /// Load the catalog's assets and albums. The listing is taken once; files
    /// uploaded during the run are added to the index as they go.
    pub async fn connect(
        catalog: Arc<dyn CatalogClient>,
        settings: &Settings,
        journal: Arc<dyn Journal>,
    ) -> Result<Self, UploadError> {
        let recognizer = settings.recognizer()?;

        let assets: Vec<_> = catalog
            .all_assets()
            .await?
            .into_iter()
            .map(|a| a.recognized(&recognizer))
            .collect();
        log::info!("The catalog holds {} assets", assets.len());
        let index = Arc::new(AssetIndex::new(
            assets,
            settings.upload.capture_tolerance(),
        ));

        let albums = catalog.all_albums().await?;
        log::info!("The catalog holds {} albums", albums.len());
        let albums = Arc::new(AlbumRegistry::new(albums));

        let dispatcher = GroupDispatcher::new(
            catalog,
            index,
            albums,
            journal,
            DispatchOptions::from(&settings.upload),
        );

        Ok(Self {
            pipeline: GroupPipeline::standard(&settings.grouping),
            dispatcher,
            capacity: settings.grouping.channel_capacity.max(1),
        })
    }

    /// Runs until `input` closes. Dispatch failures are collected in the
    /// report; only pipeline failures and cancellation end the run early.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        input: mpsc::Receiver<LocalAsset>,
    ) -> Result<UploadReport, UploadError> {
        let (out_tx, mut out_rx) = mpsc::channel(self.capacity);
        let (groups_tx, mut groups_rx) = mpsc::channel(self.capacity);

        let grouping = self.pipeline.group(cancel.clone(), input, out_tx, groups_tx);

        let dispatch = async {
            let mut report = UploadReport::default();
            let (mut assets_open, mut groups_open) = (true, true);

            while assets_open || groups_open {
                let group = tokio::select! {
                    asset = out_rx.recv(), if assets_open => match asset {
                        Some(asset) => AssetGroup::single(asset),
                        None => {
                            assets_open = false;
                            continue;
                        }
                    },
                    group = groups_rx.recv(), if groups_open => match group {
                        Some(group) => group,
                        None => {
                            groups_open = false;
                            continue;
                        }
                    },
                };

                log::debug!(
                    "Dispatching {} group of {} with cover {}",
                    group.kind(),
                    group.assets().len(),
                    group.cover().name_info().base
                );
                report.record(group.kind(), group.assets().len());
                if let Err(failures) = self.dispatcher.handle_group(group).await {
                    report.errors.extend(failures.errors);
                }
            }
            report
        };

        let (result, report) = tokio::join!(grouping, dispatch);
        result?;

        log::info!(
            "Upload done: {} assets in {} groups and {} singles, {} errors",
            report.assets,
            report.groups,
            report.singles,
            report.errors.len()
        );
        Ok(report)
    }
}
