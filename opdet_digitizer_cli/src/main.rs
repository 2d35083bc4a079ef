//! # opdet_digitizer_cli
//!
//! Part of the opdet_digitizer crate family.
//!
//! This is the command line application for digitizing photon detector data.
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! opdet_digitizer_cli new -p config.yml
//! ```
//!
//! then edit it and run
//!
//! ```bash
//! opdet_digitizer_cli -p config.yml
//! ```
//!
//! Progress is shown on the terminal; details go to `opdet_digitizer.log` in the working
//! directory.
use clap::{Arg, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

use libopdet_digitizer::config::Config;
use libopdet_digitizer::constants::LOG_FILE_NAME;
use libopdet_digitizer::process::process;
use libopdet_digitizer::worker_status::{BarColor, UnitStatus};

fn build_logger(log_path: &Path) -> Result<Arc<spdlog::Logger>, spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(log_path)
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    // Only problems make it to the terminal; the progress bar covers the rest
    let term_sink = Arc::new(
        spdlog::sink::StdStreamSink::builder()
            .std_stream(spdlog::sink::StdStream::Stderr)
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Warn))
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()?,
    );
    Ok(logger)
}

fn init_logging() -> Result<(), spdlog::Error> {
    spdlog::set_default_logger(build_logger(Path::new(LOG_FILE_NAME))?);
    Ok(())
}

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => spdlog::info!("Done."),
        Err(e) => spdlog::error!("Could not write template config: {e}"),
    }
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}",
        BarColor::MAGENTA => "[{elapsed_precise}] {bar:40.magenta/blue} {pos:>3}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn update_bar(pb: &ProgressBar, status: &UnitStatus, color: &mut BarColor) {
    if status.color != *color {
        *color = status.color.clone();
        pb.set_style(bar_style(color));
    }
    if let Some(progress) = status.progress {
        pb.set_position((progress * 100.0) as u64);
    }
    pb.set_message(format!(
        "unit {} ({} done, {} windows, {} faults)",
        status.unit_id, status.units_done, status.n_windows, status.n_faults
    ));
}

fn main() {
    // Create a cli
    let matches = Command::new("opdet_digitizer_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    if let Err(e) = init_logging() {
        eprintln!("Could not create logging: {e}");
        return;
    }

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            spdlog::error!("A configuration path is required (-p)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Input Path: {}", config.input_path.to_string_lossy());
    spdlog::info!("Output Path: {}", config.output_path.to_string_lossy());
    match &config.channel_map_path {
        Some(path) => spdlog::info!("Channel Map Path: {}", path.to_string_lossy()),
        None => spdlog::info!("Channel Map Path: bundled default"),
    }
    spdlog::info!("Number of Workers: {}", config.n_threads);
    spdlog::info!("Photon Form: {:?}", config.photon_form);

    // Setup the progress bar
    let mut color = BarColor::default();
    let pb = ProgressBar::new(100);
    pb.set_style(bar_style(&color));

    // Spawn the task!
    let (tx, rx) = channel::<UnitStatus>();
    let handle = std::thread::spawn(move || process(config, tx));

    // The sender is dropped when processing ends, which ends this loop
    for status in rx.iter() {
        update_bar(&pb, &status, &mut color);
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(_) => spdlog::info!("Successfully digitized data!"),
            Err(e) => spdlog::error!("Digitization failed with error: {e}"),
        },
        Err(_) => spdlog::error!("Failed to join digitization task!"),
    }

    pb.finish();

    spdlog::info!("Done.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_writes_file() {
        let path = std::env::temp_dir().join("opdet_digitizer_cli_logger_test.log");
        let logger = build_logger(&path).unwrap();
        spdlog::info!(logger: logger, "unit 3 digitized");
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(contents.contains("unit 3 digitized"));
        assert!(contents.contains("info"));
    }
}
