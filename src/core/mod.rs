pub mod asset;
pub mod date_range;
pub mod exif;
pub mod group;
pub mod hash;
pub mod index;
pub mod media;
pub mod names;
pub mod pipeline;
pub mod stack;
pub mod stage;

pub use asset::{Album, Asset, LocalAsset, RemoteAsset};
pub use group::{AssetGroup, GroupingKind};
pub use index::{Advice, AssetIndex, UploadAdvice};
pub use names::Recognizer;
pub use pipeline::GroupPipeline;
