use crate::core::asset::{Album, Asset};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKind {
    #[default]
    None,
    Burst,
    RawJpg,
    HeicJpg,
}

impl fmt::Display for GroupingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroupingKind::None => "none",
            GroupingKind::Burst => "burst",
            GroupingKind::RawJpg => "raw+jpg",
            GroupingKind::HeicJpg => "heic+jpg",
        };
        f.write_str(label)
    }
}

/// Assets that belong together. Never empty.
#[derive(Debug, Clone)]
pub struct AssetGroup<A> {
    kind: GroupingKind,
    assets: Vec<A>,
    cover_index: usize,
    albums: Vec<Album>,
}

impl<A: Asset> AssetGroup<A> {
    /// `None` for an empty member list. The cover is the first member whose
    /// name flags it, else the first member.
    pub fn new(kind: GroupingKind, assets: Vec<A>) -> Option<Self> {
        if assets.is_empty() {
            return None;
        }
        let cover_index = assets
            .iter()
            .position(|a| a.name_info().is_cover)
            .unwrap_or(0);

        Some(Self {
            kind,
            assets,
            cover_index,
            albums: Vec::new(),
        })
    }

    /// A lone asset, for uniform handling downstream.
    pub fn single(asset: A) -> Self {
        Self {
            kind: GroupingKind::None,
            assets: vec![asset],
            cover_index: 0,
            albums: Vec::new(),
        }
    }

    /// Out of range indexes are ignored.
    pub fn set_cover(mut self, index: usize) -> Self {
        if index < self.assets.len() {
            self.cover_index = index;
        }
        self
    }

    pub fn kind(&self) -> GroupingKind {
        self.kind
    }

    pub fn assets(&self) -> &[A] {
        &self.assets
    }

    pub fn cover_index(&self) -> usize {
        self.cover_index
    }

    pub fn cover(&self) -> &A {
        &self.assets[self.cover_index]
    }

    pub fn albums(&self) -> &[Album] {
        &self.albums
    }

    /// Adds the album unless one with the same title is already there.
    pub fn add_album(&mut self, album: Album) {
        if !self.albums.iter().any(|a| a.title == album.title) {
            self.albums.push(album);
        }
    }

    pub fn into_parts(self) -> (GroupingKind, Vec<A>, usize, Vec<Album>) {
        (self.kind, self.assets, self.cover_index, self.albums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::names::NameInfo;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone)]
    struct Named(NameInfo);

    impl Asset for Named {
        fn name_info(&self) -> &NameInfo {
            &self.0
        }

        fn date_taken(&self) -> Option<DateTime<Utc>> {
            None
        }
    }

    fn named(radical: &str, is_cover: bool) -> Named {
        Named(NameInfo {
            radical: radical.to_string(),
            is_cover,
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_group_is_rejected() {
        assert!(AssetGroup::<Named>::new(GroupingKind::Burst, Vec::new()).is_none());
    }

    #[test]
    fn test_cover_defaults_to_flagged_member() {
        let group = AssetGroup::new(
            GroupingKind::Burst,
            vec![named("a", false), named("a", true), named("a", false)],
        )
        .unwrap();

        assert_eq!(group.cover_index(), 1);
        assert!(group.cover().name_info().is_cover);
    }

    #[test]
    fn test_cover_falls_back_to_first() {
        let group =
            AssetGroup::new(GroupingKind::RawJpg, vec![named("a", false), named("a", false)])
                .unwrap();

        assert_eq!(group.cover_index(), 0);
    }

    #[test]
    fn test_set_cover_bounds() {
        let group = AssetGroup::new(GroupingKind::Burst, vec![named("a", false), named("a", false)])
            .unwrap()
            .set_cover(1)
            .set_cover(7);

        assert_eq!(group.cover_index(), 1);
    }

    #[test]
    fn test_albums_accumulate_once() {
        let mut group = AssetGroup::single(named("a", false));
        group.add_album(Album::new("Trip"));
        group.add_album(Album::new("Trip"));
        group.add_album(Album::new("Family"));

        assert_eq!(group.kind(), GroupingKind::None);
        assert_eq!(group.albums().len(), 2);
    }
}
