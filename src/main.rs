// src/main.rs
//! `scache-inspect`: dumps the contents of a pipeline state cache file.

use std::backtrace::Backtrace;
use std::fs::File;
use std::io::BufReader;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use log::{error, warn, LevelFilter};

use slop_state_cache::cache_file::{self, CacheHeader};

fn main() -> ExitCode {
    setup_diagnostics();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: scache-inspect <cache file>");
        return ExitCode::from(2);
    };

    match inspect(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn inspect(path: &Path) -> Result<()> {
    if path.extension().map_or(true, |ext| ext != cache_file::CACHE_EXTENSION) {
        warn!("{} does not have the .{} extension", path.display(), cache_file::CACHE_EXTENSION);
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let file_len = file.metadata().context("reading file size")?.len();
    let mut reader = BufReader::new(file);

    let header = CacheHeader::read(&mut reader).context("reading cache header")?;
    println!("file:      {}", path.display());
    println!("version:   {}", header.version);
    println!("key size:  {} bytes", header.key_size);
    header.check().context("cache file was written by an incompatible build")?;

    let contents = cache_file::read_records(&mut reader);
    println!("records:   {}", contents.keys.len());
    println!("skipped:   {}", contents.skipped);
    let torn = file_len.saturating_sub(CacheHeader::SIZE as u64 + contents.end_offset);
    if torn > 0 {
        println!("torn tail: {} bytes", torn);
    }

    for (index, key) in contents.keys.iter().enumerate() {
        println!("{:6}  {}", index, key);
    }

    Ok(())
}

/// Logger plus a panic hook that prints the backtrace.
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));

        eprintln!("scache-inspect crashed: {}\nLocation: {}\n\n{}", msg, location, backtrace);
    }));
}
