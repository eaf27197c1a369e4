#[macro_use]
extern crate log;

use std::env::consts::{ARCH, FAMILY, OS};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Error;
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::bili::io::{Args, Config as RunConfig};
use crate::program::Program;

mod bili;
mod program;

/// A buffered file writer for the log file that flushes periodically so a
/// killed run still leaves a usable log behind.
struct BufferedFileWriter {
    inner: Arc<Mutex<BufWriter<std::fs::File>>>,
    line_count: Arc<Mutex<usize>>,
}

impl BufferedFileWriter {
    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let buffered_writer = BufWriter::with_capacity(64 * 1024, file);

        Ok(Self {
            inner: Arc::new(Mutex::new(buffered_writer)),
            line_count: Arc::new(Mutex::new(0)),
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Failed to acquire lock"))?;

        let size = writer.write(buf)?;

        // Flush every 50 lines so the tail of the log survives a hard stop.
        if let Ok(mut count) = self.line_count.lock() {
            if buf.contains(&b'\n') {
                *count += buf.iter().filter(|&&b| b == b'\n').count();
                if *count % 50 == 0 {
                    writer.flush()?;
                }
            }
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Failed to acquire lock"))?;
        writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writer.flush();
        }
    }
}

fn main() -> Result<(), Error> {
    let args = Args::parse();
    initialize_logger(&args.log_file, args.debug);
    log_system_information();

    RunConfig::init(args)?;

    let program = Program::new();
    program.run()
}

/// Initializes the logger: terminal output plus an appending log file. Falls
/// back to terminal-only logging when the log file cannot be opened.
fn initialize_logger(log_file: &Path, debug: bool) {
    let term_level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("bili_downloader");

    let buffered_file_writer = match BufferedFileWriter::new(log_file) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "Failed to open log file {}: {}. Logging will only output to terminal.",
                log_file.display(),
                e
            );
            let _ = TermLogger::init(
                term_level,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            term_level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), buffered_file_writer),
    ]) {
        eprintln!("Failed to initialize combined logger: {e}. Falling back to terminal-only logging.");
        let _ = TermLogger::init(
            term_level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:    \"{}\"", ARCH);
    trace!("FAMILY:  \"{}\"", FAMILY);
    trace!("OS:      \"{}\"", OS);
}
