use std::env::current_dir;

use anyhow::{Error, bail};

use crate::bili::io::Config;
use crate::bili::io::directory::DirectoryManager;
use crate::bili::io::ledger::UrlLedger;
use crate::bili::sender::RequestSender;
use crate::bili::{BiliWebConnector, Task};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of a sync run and its exit status.
pub(crate) struct Program;

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Runs the sync: splash screens first, then wallpaper albums, then the
    /// report and summary. Returns `Err` when anything failed so the calling
    /// scheduler sees a non-zero exit code.
    pub(crate) fn run(&self) -> Result<(), Error> {
        trace!("Starting bili downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        if let Ok(cwd) = current_dir() {
            trace!("Program Working Directory: {}", cwd.display());
        }

        let config = Config::get();
        let request_sender = RequestSender::new(config.proxy())?;
        let directories = DirectoryManager::new(config.output())?;
        let ledger = UrlLedger::load(config.ledger_path())?;
        let mut connector = BiliWebConnector::new(request_sender, directories, ledger);

        if config.splash_enabled() {
            if let Err(err) = connector.sync_splash() {
                if err.is_fatal() {
                    connector.log_summary();
                    return Err(err.into());
                }
                connector.mark_task_failed(Task::Splash, &err);
            }
        } else {
            info!("Splash task skipped by request");
        }

        if config.wallpapers_enabled() {
            match config.sessdata() {
                Some(token) => {
                    if let Err(err) = connector.sync_wallpapers(token) {
                        if err.is_fatal() {
                            connector.log_summary();
                            return Err(err.into());
                        }
                        connector.mark_task_failed(Task::Wallpapers, &err);
                    }
                }
                None => {
                    bail!(
                        "wallpaper sync requires a session token; \
                         pass --sessdata or set BILI_SESSDATA, or run with --skip-wallpapers"
                    );
                }
            }
        } else {
            info!("Wallpaper task skipped by request");
        }

        connector.write_report()?;
        connector.log_summary();

        if connector.any_failures() {
            bail!("sync completed with failures; see the log for details");
        }

        info!("Finished syncing images!");
        Ok(())
    }
}
