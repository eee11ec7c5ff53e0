//! Grouping stages.
//!
//! A stage reads assets from its input channel and writes two outputs: the
//! assets it leaves alone and the groups it completes. Every standard stage is
//! a [`ClusterStage`] driven by a [`ClusterRule`]: accepted assets are
//! gathered into contiguous clusters, anything else passes straight through.

use crate::core::asset::Asset;
use crate::core::group::{AssetGroup, GroupingKind};
use crate::core::names::{NameInfo, NameKind};
use crate::core::pipeline::PipelineError;
use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outputs of a running stage. The channels close once the task returns.
pub struct StageHandle<A> {
    pub ungrouped: mpsc::Receiver<A>,
    pub groups: mpsc::Receiver<AssetGroup<A>>,
    pub task: JoinHandle<Result<(), PipelineError>>,
}

pub trait Grouper<A: Asset>: Send + Sync {
    fn name(&self) -> &str;

    /// Spawn the stage on `input`.
    fn consume(&self, cancel: CancellationToken, input: mpsc::Receiver<A>) -> StageHandle<A>;
}

/// How a stage decides which assets belong together.
#[derive(Debug, Clone, Copy)]
pub struct ClusterRule {
    pub name: &'static str,
    pub kind: GroupingKind,
    /// Largest distance between a member and the next one. Only checked when
    /// both capture times are known.
    pub max_gap: TimeDelta,
    /// Assets without a capture time are passed through untouched.
    pub needs_time: bool,
    pub accepts: fn(&NameInfo) -> bool,
    pub key: fn(&NameInfo) -> String,
    /// Called with the open cluster, oldest first, and the candidate.
    pub joins: fn(&[&NameInfo], &NameInfo) -> bool,
    pub complete: fn(&[&NameInfo]) -> bool,
}

fn two_or_more(members: &[&NameInfo]) -> bool {
    members.len() >= 2
}

fn radical(info: &NameInfo) -> String {
    info.radical.clone()
}

fn lowercase_radical(info: &NameInfo) -> String {
    info.radical.to_lowercase()
}

fn single_lane(_: &NameInfo) -> String {
    String::new()
}

impl ClusterRule {
    /// Names a vendor flagged as burst or series frames, gathered by radical.
    pub fn series(max_gap: TimeDelta) -> Self {
        Self {
            name: "series",
            kind: GroupingKind::Burst,
            max_gap,
            needs_time: false,
            accepts: |info| info.kind != NameKind::None && info.media.is_image(),
            key: radical,
            joins: |members, next| !members.iter().any(|m| m.index == next.index),
            complete: two_or_more,
        }
    }

    /// Consecutive shots a few hundred milliseconds apart with increasing
    /// counters, like `IMG_001.jpg`, `IMG_002.jpg`.
    pub fn burst(max_gap: TimeDelta) -> Self {
        Self {
            name: "burst",
            kind: GroupingKind::Burst,
            max_gap,
            needs_time: true,
            accepts: |info| info.media.is_image(),
            key: single_lane,
            joins: |members, next| match members.last() {
                Some(last) => {
                    next.index > last.index
                        && next.ext.eq_ignore_ascii_case(&last.ext)
                        && next.prefix() == last.prefix()
                }
                None => true,
            },
            complete: two_or_more,
        }
    }

    pub fn raw_jpg(max_gap: TimeDelta) -> Self {
        Self {
            name: "raw+jpg",
            kind: GroupingKind::RawJpg,
            max_gap,
            needs_time: false,
            accepts: |info| info.is_raw() || info.is_jpeg(),
            key: lowercase_radical,
            joins: |members, next| match members {
                [only] => (only.is_raw() && next.is_jpeg()) || (only.is_jpeg() && next.is_raw()),
                _ => false,
            },
            complete: two_or_more,
        }
    }

    pub fn heic_jpg(max_gap: TimeDelta) -> Self {
        Self {
            name: "heic+jpg",
            kind: GroupingKind::HeicJpg,
            max_gap,
            needs_time: false,
            accepts: |info| info.is_heic() || info.is_jpeg(),
            key: lowercase_radical,
            joins: |members, next| match members {
                [only] => {
                    (only.is_heic() && next.is_jpeg()) || (only.is_jpeg() && next.is_heic())
                }
                _ => false,
            },
            complete: two_or_more,
        }
    }

    fn admits<A: Asset>(&self, asset: &A) -> bool {
        (self.accepts)(asset.name_info()) && (!self.needs_time || asset.date_taken().is_some())
    }
}

#[derive(Debug)]
pub enum Emission<A> {
    Pass(A),
    Group(AssetGroup<A>),
}

/// The synchronous half of a stage: one open cluster at a time.
pub struct Clusterer<A> {
    rule: ClusterRule,
    key: String,
    open: Vec<A>,
}

impl<A: Asset> Clusterer<A> {
    pub fn new(rule: ClusterRule) -> Self {
        Self {
            rule,
            key: String::new(),
            open: Vec::new(),
        }
    }

    /// Feed one asset. Returns whatever the asset caused to be released, in
    /// arrival order.
    pub fn push(&mut self, asset: A) -> Vec<Emission<A>> {
        if !self.rule.admits(&asset) {
            let mut released = self.flush();
            released.push(Emission::Pass(asset));
            return released;
        }

        let key = (self.rule.key)(asset.name_info());
        if self.continues(&key, &asset) {
            self.open.push(asset);
            return Vec::new();
        }

        let released = self.flush();
        self.key = key;
        self.open.push(asset);
        released
    }

    /// Release the open cluster at end of input.
    pub fn finish(&mut self) -> Vec<Emission<A>> {
        self.flush()
    }

    fn continues(&self, key: &str, asset: &A) -> bool {
        let Some(last) = self.open.last() else {
            return false;
        };
        if key != self.key || !self.within_gap(last, asset) {
            return false;
        }
        let members: Vec<&NameInfo> = self.open.iter().map(|a| a.name_info()).collect();
        (self.rule.joins)(&members, asset.name_info())
    }

    fn within_gap(&self, last: &A, next: &A) -> bool {
        match (last.date_taken(), next.date_taken()) {
            (Some(a), Some(b)) => {
                let gap = if b >= a { b - a } else { a - b };
                gap <= self.rule.max_gap
            }
            _ => !self.rule.needs_time,
        }
    }

    fn flush(&mut self) -> Vec<Emission<A>> {
        let members = std::mem::take(&mut self.open);
        let complete = {
            let infos: Vec<&NameInfo> = members.iter().map(|a| a.name_info()).collect();
            (self.rule.complete)(&infos)
        };

        if complete {
            AssetGroup::new(self.rule.kind, members)
                .map(Emission::Group)
                .into_iter()
                .collect()
        } else {
            members.into_iter().map(Emission::Pass).collect()
        }
    }
}

/// A [`Grouper`] running one [`ClusterRule`] on its own task.
pub struct ClusterStage {
    rule: ClusterRule,
    capacity: usize,
}

impl ClusterStage {
    pub fn new(rule: ClusterRule, capacity: usize) -> Self {
        Self {
            rule,
            capacity: capacity.max(1),
        }
    }
}

impl<A: Asset> Grouper<A> for ClusterStage {
    fn name(&self) -> &str {
        self.rule.name
    }

    fn consume(&self, cancel: CancellationToken, input: mpsc::Receiver<A>) -> StageHandle<A> {
        let (ungrouped_tx, ungrouped) = mpsc::channel(self.capacity);
        let (groups_tx, groups) = mpsc::channel(self.capacity);
        let task = tokio::spawn(run_stage(self.rule, cancel, input, ungrouped_tx, groups_tx));

        StageHandle {
            ungrouped,
            groups,
            task,
        }
    }
}

async fn run_stage<A: Asset>(
    rule: ClusterRule,
    cancel: CancellationToken,
    mut input: mpsc::Receiver<A>,
    ungrouped: mpsc::Sender<A>,
    groups: mpsc::Sender<AssetGroup<A>>,
) -> Result<(), PipelineError> {
    let mut clusterer = Clusterer::new(rule);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            next = input.recv() => next,
        };
        let Some(asset) = next else {
            break;
        };
        for emission in clusterer.push(asset) {
            emit(rule.name, &cancel, &ungrouped, &groups, emission).await?;
        }
    }

    for emission in clusterer.finish() {
        emit(rule.name, &cancel, &ungrouped, &groups, emission).await?;
    }
    log::debug!("Stage {} drained", rule.name);
    Ok(())
}

async fn emit<A: Asset>(
    stage: &str,
    cancel: &CancellationToken,
    ungrouped: &mpsc::Sender<A>,
    groups: &mpsc::Sender<AssetGroup<A>>,
    emission: Emission<A>,
) -> Result<(), PipelineError> {
    let delivered = match emission {
        Emission::Pass(asset) => tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            sent = ungrouped.send(asset) => sent.is_ok(),
        },
        Emission::Group(group) => {
            log::debug!(
                "Stage {} completed a {} group of {}",
                stage,
                group.kind(),
                group.assets().len()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                sent = groups.send(group) => sent.is_ok(),
            }
        }
    };

    if delivered {
        Ok(())
    } else {
        Err(PipelineError::StageClosed(stage.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::SupportedMedia;
    use crate::core::names::Recognizer;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};

    #[derive(Debug, Clone, PartialEq)]
    struct Shot {
        info: NameInfo,
        taken: Option<DateTime<Utc>>,
    }

    impl Asset for Shot {
        fn name_info(&self) -> &NameInfo {
            &self.info
        }

        fn date_taken(&self) -> Option<DateTime<Utc>> {
            self.taken
        }
    }

    fn shot(name: &str, millis: Option<i64>) -> Shot {
        let r = Recognizer::new(FixedOffset::east_opt(0).unwrap(), SupportedMedia::new());
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        Shot {
            info: r.recognize(name),
            taken: millis.map(|ms| base + TimeDelta::milliseconds(ms)),
        }
    }

    fn run(rule: ClusterRule, shots: Vec<Shot>) -> (Vec<String>, Vec<(GroupingKind, Vec<String>)>) {
        let mut clusterer = Clusterer::new(rule);
        let mut emissions = Vec::new();
        for s in shots {
            emissions.extend(clusterer.push(s));
        }
        emissions.extend(clusterer.finish());

        let mut passed = Vec::new();
        let mut grouped = Vec::new();
        for e in emissions {
            match e {
                Emission::Pass(s) => passed.push(s.info.base),
                Emission::Group(g) => grouped.push((
                    g.kind(),
                    g.assets().iter().map(|s| s.info.base.clone()).collect(),
                )),
            }
        }
        (passed, grouped)
    }

    #[test]
    fn test_burst_by_time() {
        let shots = (1..=4)
            .map(|i| shot(&format!("IMG_00{i}.jpg"), Some(i * 200)))
            .chain([shot("photo1.jpg", Some(60_000))])
            .collect();

        let (passed, grouped) = run(ClusterRule::burst(TimeDelta::milliseconds(900)), shots);

        assert_eq!(passed, vec!["photo1.jpg"]);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].0, GroupingKind::Burst);
        assert_eq!(grouped[0].1.len(), 4);
    }

    #[test]
    fn test_burst_breaks_on_gap_and_counter() {
        let shots = vec![
            shot("IMG_001.jpg", Some(0)),
            shot("IMG_002.jpg", Some(2_000)),
            shot("IMG_002.raw", Some(2_100)),
            shot("IMG_001.jpg", Some(2_200)),
        ];

        let (passed, grouped) = run(ClusterRule::burst(TimeDelta::milliseconds(900)), shots);

        assert!(grouped.is_empty());
        assert_eq!(passed.len(), 4);
    }

    #[test]
    fn test_burst_skips_undated() {
        let shots = vec![
            shot("IMG_001.jpg", None),
            shot("IMG_002.jpg", None),
            shot("clip.mp4", Some(0)),
        ];

        let (passed, grouped) = run(ClusterRule::burst(TimeDelta::milliseconds(900)), shots);

        assert!(grouped.is_empty());
        assert_eq!(passed, vec!["IMG_001.jpg", "IMG_002.jpg", "clip.mp4"]);
    }

    #[test]
    fn test_series_by_name() {
        let shots = vec![
            shot("IMG_20231014_183246_BURST001_COVER.jpg", Some(0)),
            shot("IMG_20231014_183246_BURST002.jpg", Some(0)),
            shot("photo.jpg", Some(0)),
            shot("20231207_101605_001.jpg", None),
            shot("20231207_101605_001.jpg", None),
        ];

        let (passed, grouped) = run(ClusterRule::series(TimeDelta::seconds(10)), shots);

        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(
            passed,
            vec!["photo.jpg", "20231207_101605_001.jpg", "20231207_101605_001.jpg"]
        );
    }

    #[test]
    fn test_raw_jpg_pair() {
        let shots = vec![
            shot("IMG_003.jpg", Some(0)),
            shot("IMG_003.RAW", Some(0)),
            shot("IMG_005.raw", Some(0)),
            shot("IMG_005.jpg", Some(3_600_000)),
        ];

        let (passed, grouped) = run(ClusterRule::raw_jpg(TimeDelta::seconds(1)), shots);

        assert_eq!(grouped, vec![(GroupingKind::RawJpg, vec!["IMG_003.jpg".to_string(), "IMG_003.RAW".to_string()])]);
        assert_eq!(passed, vec!["IMG_005.raw", "IMG_005.jpg"]);
    }

    #[test]
    fn test_pair_needs_complementary_types() {
        let shots = vec![
            shot("IMG_004.jpg", Some(0)),
            shot("IMG_004.jpeg", Some(0)),
            shot("IMG_004.heic", Some(0)),
        ];

        let (passed, grouped) = run(ClusterRule::heic_jpg(TimeDelta::seconds(1)), shots);

        assert_eq!(passed, vec!["IMG_004.jpg"]);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].0, GroupingKind::HeicJpg);
    }

    #[tokio::test]
    async fn test_cluster_stage_closes_outputs() {
        let stage = ClusterStage::new(ClusterRule::raw_jpg(TimeDelta::seconds(1)), 1);
        let (tx, rx) = mpsc::channel(4);
        let mut handle = Grouper::<Shot>::consume(&stage, CancellationToken::new(), rx);

        tx.send(shot("IMG_003.jpg", Some(0))).await.unwrap();
        tx.send(shot("IMG_003.raw", Some(0))).await.unwrap();
        tx.send(shot("photo.png", Some(0))).await.unwrap();
        drop(tx);

        let group = handle.groups.recv().await.unwrap();
        assert_eq!(group.assets().len(), 2);
        assert_eq!(handle.ungrouped.recv().await.unwrap().info.base, "photo.png");
        assert!(handle.ungrouped.recv().await.is_none());
        assert!(handle.groups.recv().await.is_none());
        assert!(handle.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cluster_stage_cancellation() {
        let stage = ClusterStage::new(ClusterRule::burst(TimeDelta::milliseconds(900)), 1);
        let (_tx, rx) = mpsc::channel::<Shot>(1);
        let cancel = CancellationToken::new();
        let handle = stage.consume(cancel.clone(), rx);

        cancel.cancel();

        assert!(matches!(
            handle.task.await.unwrap(),
            Err(PipelineError::Cancelled)
        ));
    }
}
