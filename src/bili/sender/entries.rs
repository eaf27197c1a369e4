use serde::{Deserialize, Serialize};

/// Common envelope every Bilibili API response is wrapped in.
///
/// `data` is kept as a raw value so the envelope can be checked for an error
/// code before the payload shape is enforced.
#[derive(Deserialize, Debug)]
pub(crate) struct ApiEnvelope {
    pub(crate) code: i64,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) data: Option<serde_json::Value>,
}

/// Payload of the splash brand-list endpoint.
#[derive(Deserialize, Debug)]
pub(crate) struct SplashList {
    #[serde(default)]
    pub(crate) list: Vec<SplashEntry>,
}

/// A single app splash screen. Serialized back out into the metadata snapshot,
/// so it round-trips through serde.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct SplashEntry {
    pub(crate) id: i64,
    /// URL of the full-size splash image.
    pub(crate) thumb: String,
    #[serde(default)]
    pub(crate) thumb_name: String,
    #[serde(default)]
    pub(crate) mode: String,
    #[serde(default)]
    pub(crate) source: String,
    #[serde(default = "default_show_logo")]
    pub(crate) show_logo: bool,
    #[serde(default)]
    pub(crate) thumb_hash: String,
    #[serde(default)]
    pub(crate) thumb_size: i64,
    #[serde(default)]
    pub(crate) logo_url: String,
    #[serde(default)]
    pub(crate) logo_hash: String,
    #[serde(default)]
    pub(crate) logo_size: i64,
}

fn default_show_logo() -> bool {
    true
}

/// Payload of the wallpaper listing endpoint. The first page carries the
/// overall `total_count` used for pagination; every page carries `items`.
#[derive(Deserialize, Debug)]
pub(crate) struct WallpaperPage {
    #[serde(default)]
    pub(crate) total_count: u64,
    #[serde(default)]
    pub(crate) items: Vec<AlbumEntry>,
}

/// One wallpaper album: a batch of pictures uploaded together.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct AlbumEntry {
    #[serde(default)]
    pub(crate) doc_id: i64,
    pub(crate) upload_time: String,
    #[serde(default)]
    pub(crate) pictures: Vec<PictureEntry>,
}

/// A single photo inside an album.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PictureEntry {
    pub(crate) img_src: String,
}
