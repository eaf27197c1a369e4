use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use crate::bili::error::DownloadError;
use crate::bili::io::directory::{self, DirectoryManager};
use crate::bili::io::ledger::UrlLedger;
use crate::bili::sender::RequestSender;
use crate::bili::sender::entries::{AlbumEntry, SplashEntry};

/// Pause between wallpaper listing pages to stay under the API's rate limit.
const PAGE_THROTTLE: Duration = Duration::from_secs(1);

/// A grabbed image that contains all information needed to download it.
#[derive(Clone, Debug)]
pub(crate) struct GrabbedImage {
    url: String,
    file_path: PathBuf,
    album: Option<String>,
    is_new: bool,
}

impl GrabbedImage {
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    pub(crate) fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }

    /// Whether this image has not been downloaded by any previous run.
    pub(crate) fn is_new(&self) -> bool {
        self.is_new
    }
}

/// Turns API listings into download work items, marking each one as new or
/// already-seen against the ledger and the files on disk.
pub(crate) struct Grabber {
    request_sender: RequestSender,
}

impl Grabber {
    pub(crate) fn new(request_sender: RequestSender) -> Self {
        Grabber { request_sender }
    }

    /// Fetches the splash listing and returns the work items together with the
    /// raw entries (the entries feed the metadata snapshot).
    pub(crate) fn grab_splash(
        &self,
        directories: &DirectoryManager,
        ledger: &UrlLedger,
    ) -> Result<(Vec<GrabbedImage>, Vec<SplashEntry>), DownloadError> {
        trace!("Fetching splash screen listing...");
        let entries = self.request_sender.fetch_splash_list()?;
        info!("Splash listing returned {} entries", entries.len());

        let images = splash_images(&entries, directories, ledger);
        Ok((images, entries))
    }

    /// Walks every page of the wallpaper album listing and returns work items
    /// for each picture, grouped under timestamp-named album directories.
    pub(crate) fn grab_wallpapers(
        &self,
        directories: &DirectoryManager,
        ledger: &UrlLedger,
        sessdata: &str,
        page_size: u32,
    ) -> Result<Vec<GrabbedImage>, DownloadError> {
        trace!("Fetching wallpaper album index...");
        let index = self
            .request_sender
            .fetch_wallpaper_page(0, page_size, sessdata)?;
        if index.total_count == 0 {
            warn!("Wallpaper listing reported no albums");
            return Ok(Vec::new());
        }

        let pages = page_count(index.total_count, page_size);
        info!(
            "Found {} albums across {} page(s)",
            index.total_count, pages
        );

        let mut images = Vec::new();
        for page in 0..pages {
            // Page 0 was already fetched as the index.
            let listing = if page == 0 {
                index.items.clone()
            } else {
                sleep(PAGE_THROTTLE);
                let fetched = self
                    .request_sender
                    .fetch_wallpaper_page(page, page_size, sessdata)?;
                fetched.items
            };

            debug!("Page {}/{} listed {} albums", page + 1, pages, listing.len());
            for album in &listing {
                if album.pictures.is_empty() {
                    debug!("Skipping empty album: {}", album.upload_time);
                    continue;
                }
                images.extend(album_images(album, directories, ledger));
            }
        }

        Ok(images)
    }
}

/// Number of listing pages needed for `total` albums. Computed in u64 so an
/// implausibly large count can't wrap.
pub(crate) fn page_count(total: u64, page_size: u32) -> u64 {
    total.div_ceil(u64::from(page_size.max(1)))
}

/// Builds work items for the splash entries.
pub(crate) fn splash_images(
    entries: &[SplashEntry],
    directories: &DirectoryManager,
    ledger: &UrlLedger,
) -> Vec<GrabbedImage> {
    entries
        .iter()
        .map(|entry| {
            let name = directory::splash_file_name(&entry.thumb, entry.id);
            let file_path = directories.splash_dir().join(name);
            let is_new = !ledger.contains(&entry.thumb) && !file_path.exists();
            GrabbedImage {
                url: entry.thumb.clone(),
                file_path,
                album: None,
                is_new,
            }
        })
        .collect()
}

/// Builds work items for one wallpaper album.
pub(crate) fn album_images(
    album: &AlbumEntry,
    directories: &DirectoryManager,
    ledger: &UrlLedger,
) -> Vec<GrabbedImage> {
    let album_name = directory::sanitize_component(&album.upload_time);
    let album_dir = directories.album_dir(&album.upload_time);
    album
        .pictures
        .iter()
        .map(|picture| {
            let file_path = album_dir.join(directory::image_file_name(&picture.img_src));
            let is_new = !ledger.contains(&picture.img_src) && !file_path.exists();
            GrabbedImage {
                url: picture.img_src.clone(),
                file_path,
                album: Some(album_name.clone()),
                is_new,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bili::sender::entries::PictureEntry;
    use tempfile::tempdir;

    fn splash_entry(id: i64, url: &str) -> SplashEntry {
        SplashEntry {
            id,
            thumb: url.to_string(),
            thumb_name: String::new(),
            mode: "full".to_string(),
            source: "brand".to_string(),
            show_logo: true,
            thumb_hash: String::new(),
            thumb_size: 0,
            logo_url: String::new(),
            logo_hash: String::new(),
            logo_size: 0,
        }
    }

    #[test]
    fn page_count_handles_totals_beyond_u32() {
        assert_eq!(page_count(90, 45), 2);
        assert_eq!(page_count(91, 45), 3);
        assert_eq!(page_count(5_000_000_000, 45), 111_111_112);
    }

    #[test]
    fn splash_items_are_keyed_by_id() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let ledger = UrlLedger::load(&dir.path().join("urls.txt")).unwrap();

        let entries = vec![splash_entry(9, "https://i0.hdslb.com/splash/x.png")];
        let images = splash_images(&entries, &directories, &ledger);

        assert_eq!(images.len(), 1);
        assert!(images[0].is_new());
        assert!(images[0].file_path().ends_with("app_splash/9.png"));
    }

    #[test]
    fn ledgered_urls_are_not_new() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let mut ledger = UrlLedger::load(&dir.path().join("urls.txt")).unwrap();
        ledger
            .record("cafe", "https://i0.hdslb.com/splash/seen.png")
            .unwrap();

        let entries = vec![
            splash_entry(1, "https://i0.hdslb.com/splash/seen.png"),
            splash_entry(2, "https://i0.hdslb.com/splash/new.png"),
        ];
        let images = splash_images(&entries, &directories, &ledger);
        assert!(!images[0].is_new());
        assert!(images[1].is_new());
    }

    #[test]
    fn existing_files_are_not_new_even_without_a_ledger_entry() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let ledger = UrlLedger::load(&dir.path().join("urls.txt")).unwrap();

        let on_disk = directories.splash_dir().join("5.png");
        directories.save_image(&on_disk, b"old").unwrap();

        let entries = vec![splash_entry(5, "https://i0.hdslb.com/splash/5.png")];
        let images = splash_images(&entries, &directories, &ledger);
        assert!(!images[0].is_new());
    }

    #[test]
    fn album_items_land_under_the_album_directory() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let ledger = UrlLedger::load(&dir.path().join("urls.txt")).unwrap();

        let album = AlbumEntry {
            doc_id: 77,
            upload_time: "2026-08-01 10:20:30".to_string(),
            pictures: vec![
                PictureEntry {
                    img_src: "https://i0.hdslb.com/album/a.jpg".to_string(),
                },
                PictureEntry {
                    img_src: "https://i0.hdslb.com/album/b.jpg".to_string(),
                },
            ],
        };
        let images = album_images(&album, &directories, &ledger);

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].album(), Some("2026-08-01 102030"));
        assert!(
            images[1]
                .file_path()
                .ends_with("wallpapers/2026-08-01 102030/b.jpg")
        );
    }
}
