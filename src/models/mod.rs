mod asset;

pub use asset::{Asset, AssetInfo, DocAssetLink};
