use std::env;
use std::path::PathBuf;

use anyhow::{Error, bail};
use clap::Parser;
use once_cell::sync::OnceCell;

pub(crate) mod directory;
pub(crate) mod ledger;

/// Name of the URL ledger file inside the output directory.
pub(crate) const LEDGER_NAME: &str = "urls.txt";

/// Environment variable consulted for the session token when `--sessdata` is
/// not passed (CI secret injection).
const SESSDATA_ENV: &str = "BILI_SESSDATA";

/// Command-line interface of the downloader.
#[derive(Parser, Debug)]
#[command(name = "bili-downloader", version, about = "Archives Bilibili splash screens and wallpaper albums")]
pub(crate) struct Args {
    /// Root directory the images and the URL ledger are written under.
    #[arg(long, default_value = "archive")]
    pub(crate) output: PathBuf,

    /// Path of the log file.
    #[arg(long = "log-file", default_value = "bili_downloader.log")]
    pub(crate) log_file: PathBuf,

    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,

    /// Session cookie (SESSDATA) for the wallpaper listing endpoint.
    /// Falls back to the BILI_SESSDATA environment variable.
    #[arg(long)]
    pub(crate) sessdata: Option<String>,

    /// Proxy URL for all requests (http://, https:// or socks5h://).
    #[arg(long)]
    pub(crate) proxy: Option<String>,

    /// Skip the splash screen task.
    #[arg(long = "skip-splash")]
    pub(crate) skip_splash: bool,

    /// Skip the wallpaper album task.
    #[arg(long = "skip-wallpapers")]
    pub(crate) skip_wallpapers: bool,

    /// Page size used when listing wallpaper albums.
    #[arg(long = "page-size", default_value_t = 45)]
    pub(crate) page_size: u32,
}

/// Resolved run configuration, built once from [Args] and the environment.
#[derive(Debug)]
pub(crate) struct Config {
    output: PathBuf,
    ledger_path: PathBuf,
    sessdata: Option<String>,
    proxy: Option<String>,
    page_size: u32,
    skip_splash: bool,
    skip_wallpapers: bool,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    /// Materializes the global config from parsed arguments. Must run exactly
    /// once, before any call to [Config::get].
    pub(crate) fn init(args: Args) -> Result<(), Error> {
        let sessdata = args
            .sessdata
            .or_else(|| env::var(SESSDATA_ENV).ok())
            .filter(|token| !token.is_empty());

        let ledger_path = args.output.join(LEDGER_NAME);
        let config = Config {
            output: args.output,
            ledger_path,
            sessdata,
            proxy: args.proxy,
            page_size: args.page_size.max(1),
            skip_splash: args.skip_splash,
            skip_wallpapers: args.skip_wallpapers,
        };

        if CONFIG.set(config).is_err() {
            bail!("configuration was initialized twice");
        }
        Ok(())
    }

    /// Gets the global instance of the `Config`.
    pub(crate) fn get() -> &'static Config {
        CONFIG
            .get()
            .expect("Config::get called before Config::init")
    }

    /// Root directory for all outputs.
    pub(crate) fn output(&self) -> &PathBuf {
        &self.output
    }

    /// Location of the URL ledger file.
    pub(crate) fn ledger_path(&self) -> &PathBuf {
        &self.ledger_path
    }

    /// Session token for cookie-authed endpoints, if one was supplied.
    pub(crate) fn sessdata(&self) -> Option<&str> {
        self.sessdata.as_deref()
    }

    /// Proxy URL, if one was supplied.
    pub(crate) fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Wallpaper listing page size.
    pub(crate) fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Whether the splash task should run.
    pub(crate) fn splash_enabled(&self) -> bool {
        !self.skip_splash
    }

    /// Whether the wallpaper task should run.
    pub(crate) fn wallpapers_enabled(&self) -> bool {
        !self.skip_wallpapers
    }
}
