use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::bili::error::DownloadError;

/// Extensions accepted when deriving a file name from an image URL; anything
/// else falls back to `.jpg`.
const KNOWN_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// Subdirectory for app splash screens.
const SPLASH_DIR: &str = "app_splash";

/// Subdirectory grouping all wallpaper albums.
const WALLPAPER_DIR: &str = "wallpapers";

/// Manages the directory structure under the output root:
///
/// ```text
/// <root>/app_splash/<id>.<ext>
/// <root>/wallpapers/<album upload time>/<basename>
/// ```
#[derive(Debug, Clone)]
pub(crate) struct DirectoryManager {
    root_dir: PathBuf,
    splash_dir: PathBuf,
    wallpaper_dir: PathBuf,
}

impl DirectoryManager {
    /// Creates a new DirectoryManager rooted at `root_dir` and makes sure the
    /// base structure exists.
    pub(crate) fn new(root_dir: &Path) -> Result<Self> {
        let manager = DirectoryManager {
            root_dir: root_dir.to_path_buf(),
            splash_dir: root_dir.join(SPLASH_DIR),
            wallpaper_dir: root_dir.join(WALLPAPER_DIR),
        };

        fs::create_dir_all(&manager.root_dir)
            .with_context(|| format!("Failed to create output directory {:?}", manager.root_dir))?;

        Ok(manager)
    }

    /// Root of the whole output tree.
    pub(crate) fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding splash screen images.
    pub(crate) fn splash_dir(&self) -> &Path {
        &self.splash_dir
    }

    /// Directory for one wallpaper album, keyed by its upload time.
    pub(crate) fn album_dir(&self, upload_time: &str) -> PathBuf {
        self.wallpaper_dir.join(sanitize_component(upload_time))
    }

    /// Writes image bytes to `path`, creating parent directories as needed.
    /// Callers check for existence first; this never overwrites deliberately
    /// but a racing writer is out of scope (single sequential process).
    pub(crate) fn save_image(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Replaces characters that are invalid in directory or file names. Colons are
/// dropped entirely so album names stay close to their `upload_time` source.
pub(crate) fn sanitize_component(text: &str) -> String {
    text.chars()
        .filter(|c| *c != ':')
        .map(|c| match c {
            '?' | '*' | '<' | '>' | '"' | '|' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Derives a `<id>.<ext>` file name for a splash image from its URL, keeping
/// the extension only when it is a known image type.
pub(crate) fn splash_file_name(url: &str, id: i64) -> String {
    match url_extension(url) {
        Some(ext) => format!("{id}.{ext}"),
        None => format!("{id}.jpg"),
    }
}

/// Derives a file name for a wallpaper image: the URL basename, sanitized,
/// with a `.jpg` fallback when the basename is unusable.
pub(crate) fn image_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let basename = path.rsplit('/').next().unwrap_or("");
    if basename.is_empty() || !basename.contains('.') {
        return "image.jpg".to_string();
    }
    sanitize_component(basename)
}

/// Extension of the path portion of a URL, lowercased, if it is a known image
/// type.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_lowercase();
    if KNOWN_EXTENSIONS.contains(&ext.as_str()) && !path.ends_with('/') {
        Some(ext)
    } else {
        None
    }
}
