use crate::core::asset::{Asset, RemoteAsset};
use chrono::{FixedOffset, NaiveDate};
use std::collections::HashMap;

/// Catalog assets to be collapsed under one cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    pub date: NaiveDate,
    pub cover_id: String,
    pub ids: Vec<String>,
    pub names: Vec<String>,
}

/// Buckets catalog assets by capture day and radical in a single pass.
pub struct StackBuilder {
    tz: FixedOffset,
    stacks: Vec<Stack>,
    by_key: HashMap<(NaiveDate, String), usize>,
}

impl StackBuilder {
    /// Capture days are taken in `tz`.
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            tz,
            stacks: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// `asset` must already be recognized. Its capture time falls back to
    /// the time embedded in the name, and assets with neither are ignored.
    pub fn process_asset(&mut self, asset: &RemoteAsset) {
        let Some(taken) = asset.date_taken() else {
            log::debug!(
                "Skipping {} ({}): no capture time",
                asset.original_file_name,
                asset.id
            );
            return;
        };
        let date = taken.with_timezone(&self.tz).date_naive();
        let key = (date, asset.name_info().radical.to_lowercase());

        match self.by_key.get(&key) {
            Some(&i) => {
                let stack = &mut self.stacks[i];
                stack.ids.push(asset.id.clone());
                stack.names.push(asset.original_file_name.clone());
            }
            None => {
                self.by_key.insert(key, self.stacks.len());
                self.stacks.push(Stack {
                    date,
                    cover_id: asset.id.clone(),
                    ids: vec![asset.id.clone()],
                    names: vec![asset.original_file_name.clone()],
                });
            }
        }
    }

    /// Stacks with at least two members, oldest day first.
    pub fn stacks(self) -> Vec<Stack> {
        let mut stacks: Vec<Stack> = self
            .stacks
            .into_iter()
            .filter(|s| s.ids.len() >= 2)
            .collect();
        stacks.sort_by_key(|s| s.date);
        stacks
    }
}
