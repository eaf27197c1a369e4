use std::fs;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::bili::error::DownloadError;
use crate::bili::grabber::{GrabbedImage, Grabber};
use crate::bili::io::Config;
use crate::bili::io::directory::DirectoryManager;
use crate::bili::io::ledger::UrlLedger;
use crate::bili::sender::RequestSender;
use crate::bili::sender::entries::SplashEntry;

pub(crate) mod error;
pub(crate) mod grabber;
pub(crate) mod io;
pub(crate) mod sender;

/// Run report written under the output root after every run.
const REPORT_NAME: &str = "download_report.json";

/// Snapshot of the current splash entries, refreshed every run.
const METADATA_NAME: &str = "splash_metadata.json";

/// The two sync tasks a run can perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Task {
    Splash,
    Wallpapers,
}

impl Task {
    fn name(self) -> &'static str {
        match self {
            Task::Splash => "splash",
            Task::Wallpapers => "wallpapers",
        }
    }
}

/// Per-task outcome counters.
#[derive(Serialize, Debug, Default, Clone)]
pub(crate) struct TaskCounters {
    pub(crate) listed: usize,
    pub(crate) downloaded: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
}

/// One failed item, kept for the report.
#[derive(Serialize, Debug)]
struct ReportedError {
    task: &'static str,
    url: String,
    error: String,
}

#[derive(Serialize)]
struct RunReport<'a> {
    start_time: String,
    end_time: String,
    execution_seconds: f64,
    splash: &'a TaskCounters,
    wallpapers: &'a TaskCounters,
    errors: &'a [ReportedError],
}

#[derive(Serialize)]
struct SplashMetadata<'a> {
    last_updated: String,
    items: &'a [SplashEntry],
}

/// A web connector that sequences each sync task: grab the listing, filter new
/// URLs against the ledger, then download, hash, write and record each image in
/// turn. Per-item failures are counted and skipped; only IO errors abort.
pub(crate) struct BiliWebConnector {
    request_sender: RequestSender,
    grabber: Grabber,
    directories: DirectoryManager,
    ledger: UrlLedger,
    splash: TaskCounters,
    wallpapers: TaskCounters,
    errors: Vec<ReportedError>,
    failed_tasks: Vec<&'static str>,
    started: Instant,
    start_stamp: String,
}

impl BiliWebConnector {
    pub(crate) fn new(
        request_sender: RequestSender,
        directories: DirectoryManager,
        ledger: UrlLedger,
    ) -> Self {
        BiliWebConnector {
            grabber: Grabber::new(request_sender.clone()),
            request_sender,
            directories,
            ledger,
            splash: TaskCounters::default(),
            wallpapers: TaskCounters::default(),
            errors: Vec::new(),
            failed_tasks: Vec::new(),
            started: Instant::now(),
            start_stamp: now_stamp(),
        }
    }

    /// Syncs the app splash screens and refreshes the metadata snapshot.
    pub(crate) fn sync_splash(&mut self) -> Result<(), DownloadError> {
        let (images, entries) = self.grabber.grab_splash(&self.directories, &self.ledger)?;
        self.write_splash_metadata(&entries)?;
        self.splash.listed = images.len();
        self.download_batch(images, Task::Splash)
    }

    /// Syncs the wallpaper albums.
    pub(crate) fn sync_wallpapers(&mut self, sessdata: &str) -> Result<(), DownloadError> {
        let images = self.grabber.grab_wallpapers(
            &self.directories,
            &self.ledger,
            sessdata,
            Config::get().page_size(),
        )?;
        self.wallpapers.listed = images.len();
        self.download_batch(images, Task::Wallpapers)
    }

    /// Downloads every new image in the batch. Network failures on a single
    /// item are logged and counted without stopping the batch; disk failures
    /// propagate and abort the run.
    fn download_batch(
        &mut self,
        images: Vec<GrabbedImage>,
        task: Task,
    ) -> Result<(), DownloadError> {
        let new_count = images.iter().filter(|i| i.is_new()).count();
        info!(
            "{}: {} listed, {} new",
            task.name(),
            images.len(),
            new_count
        );

        for image in &images {
            if !image.is_new() {
                trace!("Already downloaded, skipping: {}", image.url());
                self.counters_mut(task).skipped += 1;
                continue;
            }

            let bytes = match self.request_sender.get_bytes(image.url()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!("Failed to download {}: {err}", image.url());
                    self.counters_mut(task).failed += 1;
                    self.errors.push(ReportedError {
                        task: task.name(),
                        url: image.url().to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let hash = store_image(&self.directories, &mut self.ledger, image, &bytes)?;
            self.counters_mut(task).downloaded += 1;
            debug!("Stored {} ({} bytes, sha256 {})", image.url(), bytes.len(), hash);
            info!(
                "Downloaded: {}{}",
                image
                    .album()
                    .map(|a| format!("{a}/"))
                    .unwrap_or_default(),
                image
                    .file_path()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| image.url().to_string())
            );
        }

        Ok(())
    }

    /// Records a task-level failure (listing fetch or parse) so the run exits
    /// non-zero after the remaining tasks had their chance.
    pub(crate) fn mark_task_failed(&mut self, task: Task, err: &DownloadError) {
        error!("Task {} failed: {err}", task.name());
        self.failed_tasks.push(task.name());
        self.errors.push(ReportedError {
            task: task.name(),
            url: String::new(),
            error: err.to_string(),
        });
    }

    /// Whether any task failed at the listing level or had failed items.
    pub(crate) fn any_failures(&self) -> bool {
        !self.failed_tasks.is_empty() || self.splash.failed > 0 || self.wallpapers.failed > 0
    }

    /// Writes the run report under the output root.
    pub(crate) fn write_report(&self) -> Result<(), DownloadError> {
        let report = RunReport {
            start_time: self.start_stamp.clone(),
            end_time: now_stamp(),
            execution_seconds: self.started.elapsed().as_secs_f64(),
            splash: &self.splash,
            wallpapers: &self.wallpapers,
            errors: &self.errors,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|err| DownloadError::parse("report serialization", &err.to_string()))?;
        fs::write(self.directories.root_dir().join(REPORT_NAME), json)?;
        Ok(())
    }

    /// Logs the closing summary block.
    pub(crate) fn log_summary(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let downloaded = self.splash.downloaded + self.wallpapers.downloaded;
        let skipped = self.splash.skipped + self.wallpapers.skipped;
        let failed = self.splash.failed + self.wallpapers.failed;

        info!("{}", "=".repeat(60));
        info!("Sync completed in {elapsed:.1}s");
        info!("- Downloaded: {}", console::style(downloaded).green());
        info!("- Skipped:    {}", console::style(skipped).dim());
        info!("- Failed:     {}", console::style(failed).red());
        info!("- Ledger now tracks {} URLs", self.ledger.len());
        if !self.failed_tasks.is_empty() {
            info!("- Failed tasks: {}", self.failed_tasks.join(", "));
        }
        info!("{}", "=".repeat(60));
    }

    fn counters_mut(&mut self, task: Task) -> &mut TaskCounters {
        match task {
            Task::Splash => &mut self.splash,
            Task::Wallpapers => &mut self.wallpapers,
        }
    }

    fn write_splash_metadata(&self, entries: &[SplashEntry]) -> Result<(), DownloadError> {
        let metadata = SplashMetadata {
            last_updated: now_stamp(),
            items: entries,
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|err| DownloadError::parse("metadata serialization", &err.to_string()))?;
        fs::write(self.directories.root_dir().join(METADATA_NAME), json)?;
        trace!("Refreshed splash metadata snapshot ({} items)", entries.len());
        Ok(())
    }
}

/// Persists one downloaded image: hashes the content, writes the file and
/// appends the ledger line. Returns the content hash.
fn store_image(
    directories: &DirectoryManager,
    ledger: &mut UrlLedger,
    image: &GrabbedImage,
    bytes: &[u8],
) -> Result<String, DownloadError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = hex::encode(hasher.finalize());

    directories.save_image(image.file_path(), bytes)?;
    ledger.record(&hash, image.url())?;
    Ok(hash)
}

fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bili::sender::entries::{AlbumEntry, PictureEntry};
    use std::fs::read_to_string;
    use tempfile::tempdir;

    fn work_items(urls: &[&str], directories: &DirectoryManager, ledger: &UrlLedger) -> Vec<GrabbedImage> {
        let album = AlbumEntry {
            doc_id: 1,
            upload_time: "2026-08-20 08:00:00".to_string(),
            pictures: urls
                .iter()
                .map(|u| PictureEntry {
                    img_src: u.to_string(),
                })
                .collect(),
        };
        crate::bili::grabber::album_images(&album, directories, ledger)
    }

    #[test]
    fn three_new_urls_yield_three_files_and_three_ledger_lines() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let ledger_path = dir.path().join("urls.txt");
        let mut ledger = UrlLedger::load(&ledger_path).unwrap();

        let urls = [
            "https://i0.hdslb.com/album/a.jpg",
            "https://i0.hdslb.com/album/b.jpg",
            "https://i0.hdslb.com/album/c.jpg",
        ];
        let images = work_items(&urls, &directories, &ledger);
        assert!(images.iter().all(|i| i.is_new()));

        for image in &images {
            store_image(&directories, &mut ledger, image, b"bytes").unwrap();
        }

        let album_dir = directories.album_dir("2026-08-20 08:00:00");
        assert_eq!(std::fs::read_dir(&album_dir).unwrap().count(), 3);

        let ledger_lines = read_to_string(&ledger_path)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .count();
        assert_eq!(ledger_lines, 3);
    }

    #[test]
    fn second_pass_sees_nothing_new() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let ledger_path = dir.path().join("urls.txt");
        let mut ledger = UrlLedger::load(&ledger_path).unwrap();

        let urls = ["https://i0.hdslb.com/album/a.jpg"];
        for image in &work_items(&urls, &directories, &ledger) {
            store_image(&directories, &mut ledger, image, b"bytes").unwrap();
        }

        // Fresh load, as a scheduled re-run would do.
        let reloaded = UrlLedger::load(&ledger_path).unwrap();
        let second_pass = work_items(&urls, &directories, &reloaded);
        assert!(second_pass.iter().all(|i| !i.is_new()));
    }

    #[test]
    fn store_image_returns_the_content_hash() {
        let dir = tempdir().unwrap();
        let directories = DirectoryManager::new(dir.path()).unwrap();
        let mut ledger = UrlLedger::load(&dir.path().join("urls.txt")).unwrap();

        let images = work_items(&["https://i0.hdslb.com/album/a.jpg"], &directories, &ledger);
        let hash = store_image(&directories, &mut ledger, &images[0], b"payload").unwrap();
        assert_eq!(hash.len(), 64);
        assert!(ledger.contains("https://i0.hdslb.com/album/a.jpg"));
    }
}
