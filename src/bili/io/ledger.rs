use std::collections::HashSet;
use std::fs::{File, OpenOptions, read_to_string};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only record of every URL that has been downloaded successfully.
///
/// Persisted as a flat text file with one `sha256|url` line per image. Lines
/// holding a bare URL (the original format, before content hashes were added)
/// are still accepted on load. Comment lines start with `#`.
///
/// Not safe for concurrent writers; the scheduler guarantees a single run at a
/// time.
#[derive(Debug)]
pub(crate) struct UrlLedger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl UrlLedger {
    /// Loads the ledger from `path`, creating it with a header when missing.
    pub(crate) fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = File::create(path)?;
            writeln!(file, "# Downloaded URL record")?;
            writeln!(file, "# Generated at {}", chrono::Utc::now().to_rfc3339())?;
            debug!("Created new URL ledger at {}", path.display());
        }

        let mut seen = HashSet::new();
        for line in read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // hash|url lines, or bare url lines from older runs
            let url = line.rsplit('|').next().unwrap_or(line);
            seen.insert(url.to_string());
        }

        info!("Loaded {} URLs from ledger {}", seen.len(), path.display());
        Ok(UrlLedger {
            path: path.to_path_buf(),
            seen,
        })
    }

    /// Whether `url` has been downloaded by a previous run (or earlier in this
    /// one).
    pub(crate) fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    /// Appends a successful download to the ledger file and the in-memory set.
    pub(crate) fn record(&mut self, content_hash: &str, url: &str) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{content_hash}|{url}")?;
        self.seen.insert(url.to_string());
        Ok(())
    }

    /// Number of URLs currently known.
    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}
