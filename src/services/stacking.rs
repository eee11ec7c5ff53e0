//! Stacking assets already in the catalog, one confirmed stack at a time.

use crate::core::asset::Asset;
use crate::core::date_range::DateRange;
use crate::core::names::Recognizer;
use crate::core::stack::{Stack, StackBuilder};
use crate::services::catalog::{CatalogClient, CatalogError};
use crate::services::confirm::{Confirm, ConfirmError};
use crate::services::journal::{FileEvent, Journal};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Confirmation failed: {0}")]
    Confirm(#[from] ConfirmError),

    #[error("Stacking was cancelled")]
    Cancelled,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StackReport {
    /// Assets listed by the catalog.
    pub received: usize,
    pub proposed: usize,
    pub stacked: usize,
    pub declined: usize,
    pub failed: usize,
}

pub struct StackWorkflow {
    catalog: Arc<dyn CatalogClient>,
    recognizer: Recognizer,
    range: DateRange,
    confirm: Box<dyn Confirm>,
    journal: Arc<dyn Journal>,
}

impl StackWorkflow {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        recognizer: Recognizer,
        confirm: Box<dyn Confirm>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            catalog,
            recognizer,
            range: DateRange::default(),
            confirm,
            journal,
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Candidate stacks from every untrashed asset in range, before any
    /// confirmation. Assets already stacked on the server are proposed again.
    pub async fn propose(&self) -> Result<(usize, Vec<Stack>), StackError> {
        let assets = self.catalog.all_assets().await?;
        let received = assets.len();

        let mut builder = StackBuilder::new(self.recognizer.tz());
        for asset in assets.into_iter().filter(|a| !a.is_trashed) {
            let asset = asset.recognized(&self.recognizer);
            if !self.range.is_unbounded() {
                let in_range = asset
                    .date_taken()
                    .map(|t| self.range.contains(t.with_timezone(&self.recognizer.tz()).date_naive()))
                    .unwrap_or(false);
                if !in_range {
                    continue;
                }
            }
            builder.process_asset(&asset);
        }

        Ok((received, builder.stacks()))
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<StackReport, StackError> {
        let (received, stacks) = self.propose().await?;
        let mut report = StackReport {
            received,
            proposed: stacks.len(),
            ..Default::default()
        };
        log::info!("{} stacks proposed from {} assets", stacks.len(), received);

        for stack in stacks {
            if cancel.is_cancelled() {
                return Err(StackError::Cancelled);
            }

            let mut names = stack.names.clone();
            names.sort();
            let question = format!(
                "Stack {} files taken on {}: {}?",
                names.len(),
                stack.date,
                names.join(", ")
            );
            if !self.confirm.confirm(&question)? {
                report.declined += 1;
                continue;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(StackError::Cancelled),
                result = self.catalog.stack(&stack.cover_id, &stack.ids) => result,
            };
            match result {
                Ok(()) => {
                    for name in &stack.names {
                        self.journal
                            .record(FileEvent::Stacked, name, &[("cover", &stack.cover_id)]);
                    }
                    report.stacked += 1;
                }
                Err(e) => {
                    self.journal.record(
                        FileEvent::Error,
                        &stack.names[0],
                        &[("error", &e.to_string())],
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
