use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use spdlog::formatter::{Formatter, FormatterContext};
use spdlog::sink::Sink;
use spdlog::{ErrorHandler, LevelFilter, Record, StringBuf};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};

use libwaveform_timing::config::{Config, EventPolicy, NsamplesPolicy, RunOverrides};
use libwaveform_timing::error::ProcessorError;
use libwaveform_timing::process::{process_analysis, process_conversion};
use libwaveform_timing::worker_status::{Stage, WorkerStatus};

const LOG_FILE: &str = "./waveform_timing.log";

fn make_template_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Terminal sink which hides the progress bars while a line is written, so they are
/// redrawn below the log instead of being torn by it.
struct ProgressSink {
    bars: MultiProgress,
    formatter: Mutex<Box<dyn Formatter>>,
    level_filter: Mutex<LevelFilter>,
}

impl ProgressSink {
    fn new(bars: MultiProgress, formatter: Box<dyn Formatter>) -> Self {
        Self {
            bars,
            formatter: Mutex::new(formatter),
            level_filter: Mutex::new(LevelFilter::All),
        }
    }
}

impl Sink for ProgressSink {
    fn log(&self, record: &Record) -> spdlog::Result<()> {
        let mut line = StringBuf::new();
        let mut ctx = FormatterContext::new();
        lock(&self.formatter).format(record, &mut line, &mut ctx)?;
        self.bars
            .suspend(|| {
                let mut out = std::io::stdout().lock();
                out.write_all(line.as_bytes())?;
                out.flush()
            })
            .map_err(spdlog::Error::WriteRecord)
    }

    fn flush(&self) -> spdlog::Result<()> {
        std::io::stdout()
            .flush()
            .map_err(spdlog::Error::FlushBuffer)
    }

    fn level_filter(&self) -> LevelFilter {
        *lock(&self.level_filter)
    }

    fn set_level_filter(&self, level_filter: LevelFilter) {
        *lock(&self.level_filter) = level_filter;
    }

    fn set_formatter(&self, formatter: Box<dyn Formatter>) {
        *lock(&self.formatter) = formatter;
    }

    // write errors are returned to the logger as they happen
    fn set_error_handler(&self, _handler: Option<ErrorHandler>) {}
}

/// Log to the terminal (above the progress bars) and to a truncated log file in the working
/// directory
fn init_logging(bars: &MultiProgress) -> Result<(), spdlog::Error> {
    let pattern = || {
        spdlog::formatter::PatternFormatter::new(spdlog::formatter::pattern!(
            "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
        ))
    };
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_FILE))
            .formatter(pattern())
            .truncate(true)
            .build()?,
    );
    let term_sink = Arc::new(ProgressSink::new(bars.clone(), Box::new(pattern())));
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Parse START:END into a half-open event range
fn parse_event_range(value: &str) -> Result<Range<usize>, String> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| format!("event range '{value}' is not of the form START:END"))?;
    let start = start
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad event range start '{start}': {e}"))?;
    let end = end
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad event range end '{end}': {e}"))?;
    Ok(start..end)
}

/// Relative paths given on the command line are taken from the working directory
fn absolute_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return Ok(path);
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .map_err(|e| format!("cannot resolve '{value}': {e}"))
}

/// Collect the per-run settings of a subcommand. Arguments the subcommand does not define
/// are left unset.
fn run_overrides(sub: &ArgMatches) -> RunOverrides {
    let string = |id: &str| sub.try_get_one::<String>(id).ok().flatten().cloned();
    let count = |id: &str| sub.try_get_one::<usize>(id).ok().flatten().copied();
    let path = |id: &str| sub.try_get_one::<PathBuf>(id).ok().flatten().cloned();
    let flag = |id: &str| matches!(sub.try_get_one::<bool>(id), Ok(Some(true)));

    let input_is_ascii = if flag("ascii") {
        Some(true)
    } else if flag("binary") {
        Some(false)
    } else {
        None
    };

    RunOverrides {
        event_policy: string("event-policy").map(EventPolicy::from),
        nsamples_policy: string("nsamples-policy").map(NsamplesPolicy::from),
        input_is_ascii,
        chunk_size: count("chunk-size"),
        max_cores: count("max-cores"),
        n_channels: count("channels"),
        input_pattern: string("pattern"),
        waveforms_file: path("input"),
        features_file: path("output"),
    }
}

/// Render one bar per (stage, worker) until every sender is gone
fn show_progress(rx: Receiver<WorkerStatus>, pb_manager: &MultiProgress) {
    let style = ProgressStyle::with_template("{prefix:>12} [{bar:40}] {percent:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let mut bars: HashMap<(Stage, usize), ProgressBar> = HashMap::new();

    for status in rx.iter() {
        let bar = bars
            .entry((status.stage, status.worker_id))
            .or_insert_with(|| {
                let bar = pb_manager.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(format!("{} {}", status.stage, status.worker_id));
                bar
            });
        bar.set_position((status.progress.clamp(0.0, 1.0) * 100.0) as u64);
    }

    for bar in bars.values() {
        bar.finish();
    }
}

fn run(matches: &ArgMatches, config: Config, pb_manager: &MultiProgress) -> Result<(), String> {
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let handle = match matches.subcommand() {
        Some(("convert", _)) => std::thread::spawn(move || -> Result<(), ProcessorError> {
            let summary = process_conversion(&config, &tx)?;
            spdlog::info!(
                "Converted {} of {} triggers ({} skipped).",
                summary.n_written,
                summary.n_triggers,
                summary.n_skipped
            );
            Ok(())
        }),
        Some(("analyze", sub)) => {
            let range = sub.get_one::<Range<usize>>("event-range").cloned();
            std::thread::spawn(move || -> Result<(), ProcessorError> {
                let n_written = process_analysis(&config, range, &tx)?;
                spdlog::info!("Analyzed {n_written} events.");
                Ok(())
            })
        }
        _ => return Ok(()),
    };

    show_progress(rx, pb_manager);

    match handle.join() {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(String::from("Failed to join processing task!")),
    }
}

fn nsamples_policy_arg() -> Arg {
    Arg::new("nsamples-policy")
        .long("nsamples-policy")
        .value_parser(["strict", "pad"])
        .help("Override nsamples_policy for this run")
}

fn max_cores_arg() -> Arg {
    Arg::new("max-cores")
        .long("max-cores")
        .value_parser(value_parser!(usize))
        .help("Override max_cores for this run")
}

fn main() -> ExitCode {
    let matches = Command::new("waveform_timing_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("convert")
                .about("Convert raw channel files into a waveform file")
                .arg(
                    Arg::new("event-policy")
                        .long("event-policy")
                        .value_parser(["error", "warn", "skip"])
                        .help("Override event_policy for this run"),
                )
                .arg(nsamples_policy_arg())
                .arg(
                    Arg::new("ascii")
                        .long("ascii")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("binary")
                        .help("Read the channel files as ASCII dumps"),
                )
                .arg(
                    Arg::new("binary")
                        .long("binary")
                        .action(ArgAction::SetTrue)
                        .help("Read the channel files as binary records"),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .value_parser(value_parser!(usize))
                        .help("Override chunk_size for this run"),
                )
                .arg(max_cores_arg())
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .value_parser(value_parser!(usize))
                        .help("Override n_channels for this run"),
                )
                .arg(
                    Arg::new("pattern")
                        .long("pattern")
                        .help("Override input_pattern for this run, %d is the channel"),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Extract timing features from a waveform file")
                .arg(
                    Arg::new("event-range")
                        .long("event-range")
                        .value_name("START:END")
                        .value_parser(parse_event_range)
                        .help("Only analyze the events START..END"),
                )
                .arg(nsamples_policy_arg())
                .arg(max_cores_arg())
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_parser(absolute_path)
                        .help("Waveform file to analyze"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_parser(absolute_path)
                        .help("Feature file to write"),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    let pb_manager = MultiProgress::new();
    if let Err(e) = init_logging(&pb_manager) {
        eprintln!("Could not create logging: {e}");
        return ExitCode::FAILURE;
    }

    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => return ExitCode::FAILURE,
    };

    let sub = match matches.subcommand() {
        Some(("new", _)) => {
            spdlog::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            return match make_template_config(&config_path) {
                Ok(()) => {
                    spdlog::info!("Done.");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    spdlog::error!("Could not write template config: {e}");
                    ExitCode::FAILURE
                }
            };
        }
        Some((_, sub)) => sub,
        None => return ExitCode::FAILURE,
    };

    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let mut config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.apply_overrides(run_overrides(sub)) {
        spdlog::error!("{e}");
        return ExitCode::FAILURE;
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Input Path: {}", config.converter.input_dir.to_string_lossy());
    spdlog::info!("Output Path: {}", config.output_dir.to_string_lossy());
    spdlog::info!(
        "Channels: {} Max Cores: {} Max Events: {} Chunk Size: {}",
        config.n_channels,
        config.max_cores,
        config.max_events,
        config.chunk_size
    );
    spdlog::info!(
        "Event Policy: {} Nsamples Policy: {} ASCII Input: {}",
        String::from(config.converter.event_policy),
        String::from(config.nsamples_policy),
        config.converter.input_is_ascii
    );

    match run(&matches, config, &pb_manager) {
        Ok(()) => {
            spdlog::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            spdlog::error!("Processing failed with error: {e}");
            ExitCode::FAILURE
        }
    }
}
