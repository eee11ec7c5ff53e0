use chrono::{FixedOffset, TimeDelta, TimeZone, Utc};
use stackrs::config::GroupingConfig;
use stackrs::core::asset::LocalAsset;
use stackrs::core::group::{AssetGroup, GroupingKind};
use stackrs::core::media::SupportedMedia;
use stackrs::core::names::Recognizer;
use stackrs::core::pipeline::GroupPipeline;
use tokio_util::sync::CancellationToken;

const HOUR: i64 = 3_600_000;

fn recognizer() -> Recognizer {
    Recognizer::new(FixedOffset::east_opt(0).unwrap(), SupportedMedia::new())
}

/// A file whose capture time comes from its name, if any.
fn named(name: &str) -> LocalAsset {
    LocalAsset::new(format!("/photos/{name}"), &recognizer())
}

fn at(name: &str, offset_ms: i64) -> LocalAsset {
    let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    named(name).with_taken(Some(base + TimeDelta::milliseconds(offset_ms)))
}

fn stream() -> Vec<LocalAsset> {
    let mut assets = vec![
        at("photo1.jpg", 50 * HOUR),
        at("photo2.jpg", 55 * HOUR),
        named("IMG_20231014_183246_BURST001_COVER.jpg"),
        named("IMG_20231014_183246_BURST002.jpg"),
        named("IMG_20231014_183246_BURST003.jpg"),
    ];
    assets.extend((1..=9).map(|i| at(&format!("IMG_00{i}.jpg"), (i - 1) * 200)));
    assets.extend([
        named("clip.mp4").with_taken(None),
        named("00001IMG_00001_BURST20210101153000.jpg"),
        named("00002IMG_00002_BURST20210101153000_COVER.jpg"),
        named("00003IMG_00003_BURST20210101153000.jpg"),
        at("photo3.jpg", 5 * HOUR),
        at("IMG_003.jpg", 9 * HOUR),
        at("IMG_003.raw", 9 * HOUR),
        at("IMG_004.heic", 10 * HOUR),
        at("IMG_004.jpg", 10 * HOUR + 100),
        named("20231207_101605_001.jpg"),
        at("photo4.jpg", 20 * HOUR),
    ]);
    assets
}

fn summary(group: &AssetGroup<LocalAsset>) -> (GroupingKind, Vec<String>, String) {
    (
        group.kind(),
        group.assets().iter().map(|a| a.file_name.clone()).collect(),
        group.cover().file_name.clone(),
    )
}

#[tokio::test]
async fn test_mixed_camera_roll() {
    let pipeline = GroupPipeline::standard(&GroupingConfig::default());

    let (ungrouped, groups) = pipeline
        .group_all(CancellationToken::new(), stream())
        .await
        .unwrap();

    let mut found: Vec<_> = groups.iter().map(summary).collect();
    found.sort_by(|a, b| a.1.cmp(&b.1));

    let burst: Vec<String> = (1..=9).map(|i| format!("IMG_00{i}.jpg")).collect();
    let mut expected = vec![
        (
            GroupingKind::Burst,
            vec![
                "00001IMG_00001_BURST20210101153000.jpg".to_string(),
                "00002IMG_00002_BURST20210101153000_COVER.jpg".to_string(),
                "00003IMG_00003_BURST20210101153000.jpg".to_string(),
            ],
            "00002IMG_00002_BURST20210101153000_COVER.jpg".to_string(),
        ),
        (
            GroupingKind::Burst,
            vec![
                "IMG_20231014_183246_BURST001_COVER.jpg".to_string(),
                "IMG_20231014_183246_BURST002.jpg".to_string(),
                "IMG_20231014_183246_BURST003.jpg".to_string(),
            ],
            "IMG_20231014_183246_BURST001_COVER.jpg".to_string(),
        ),
        (GroupingKind::Burst, burst, "IMG_001.jpg".to_string()),
        (
            GroupingKind::RawJpg,
            vec!["IMG_003.jpg".to_string(), "IMG_003.raw".to_string()],
            "IMG_003.jpg".to_string(),
        ),
        (
            GroupingKind::HeicJpg,
            vec!["IMG_004.heic".to_string(), "IMG_004.jpg".to_string()],
            "IMG_004.heic".to_string(),
        ),
    ];
    expected.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(found, expected);

    let names: Vec<&str> = ungrouped.iter().map(|a| a.file_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "photo1.jpg",
            "photo2.jpg",
            "clip.mp4",
            "photo3.jpg",
            "20231207_101605_001.jpg",
            "photo4.jpg",
        ]
    );
}

#[tokio::test]
async fn test_burst_gap_is_configurable() {
    let config = GroupingConfig {
        burst_gap_ms: 100,
        ..Default::default()
    };
    let assets: Vec<LocalAsset> = (1..=4).map(|i| at(&format!("IMG_00{i}.jpg"), i * 200)).collect();

    let (ungrouped, groups) = GroupPipeline::standard(&config)
        .group_all(CancellationToken::new(), assets)
        .await
        .unwrap();

    assert!(groups.is_empty());
    assert_eq!(ungrouped.len(), 4);
}
