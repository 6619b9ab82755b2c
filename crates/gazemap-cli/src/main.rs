//! gazemap command-line interface: map scene-camera gaze onto a calibration grid and score it.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use gazemap::{
    build_fixed_chain_from_images, correlate, load_gray, tsv, CalibrationPoint, FeatureExtractor,
    FrameBoundaryPolicy, FrameSource, GazePipeline, GazeTimeUnit, ImageSequence, MappingRun,
    PipelineConfig, ReferenceImages, ScoreReport, TaskStartPolicy, TrialScorer,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "gazemap")]
#[command(about = "Map head-mounted eye-tracker gaze onto a calibration grid and score accuracy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Assign gaze samples to scene-video frames.
    Correlate(CliCorrelateArgs),

    /// Register every frame and map gaze into reference and grid space.
    Map(CliMapArgs),

    /// Score mapped gaze against a calibration task log.
    Score(CliScoreArgs),

    /// Map, then score, in one invocation.
    Run(CliRunArgs),

    /// Build the fixed chain between the reference and grid images and print it.
    ReferenceInfo(CliReferenceInfoArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BoundaryArg {
    FrameMidpoint,
    NextFrameStart,
}

impl BoundaryArg {
    fn to_core(self) -> FrameBoundaryPolicy {
        match self {
            Self::FrameMidpoint => FrameBoundaryPolicy::FrameMidpoint,
            Self::NextFrameStart => FrameBoundaryPolicy::NextFrameStart,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimeUnitArg {
    Seconds,
    Milliseconds,
}

impl TimeUnitArg {
    fn to_core(self) -> GazeTimeUnit {
        match self {
            Self::Seconds => GazeTimeUnit::Seconds,
            Self::Milliseconds => GazeTimeUnit::Milliseconds,
        }
    }
}

/// JSON config plus per-field overrides, applied in that order.
#[derive(Debug, Clone, Args)]
struct CliConfigArgs {
    /// Pipeline config (JSON). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// How frame gaze buckets are closed.
    #[arg(long, value_enum)]
    boundary: Option<BoundaryArg>,

    /// Unit of gaze and frame timestamps.
    #[arg(long, value_enum)]
    time_unit: Option<TimeUnitArg>,

    /// Maximum keypoints per image.
    #[arg(long)]
    max_features: Option<usize>,

    /// Ratio-test threshold for descriptor matches.
    #[arg(long)]
    match_ratio: Option<f32>,

    /// Accepted matches must exceed this for a usable registration.
    #[arg(long)]
    min_good_matches: Option<usize>,

    /// RANSAC inlier threshold in pixels.
    #[arg(long)]
    ransac_thresh_px: Option<f64>,

    /// Maximum RANSAC iterations.
    #[arg(long)]
    ransac_iters: Option<usize>,

    /// Per-frame registration budget in milliseconds.
    #[arg(long)]
    frame_budget_ms: Option<u64>,

    /// Samples below this confidence are not mapped.
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Matches the start cue must exceed to be considered visible.
    #[arg(long)]
    start_cue_min_matches: Option<usize>,

    /// Accuracy outlier gate in degrees.
    #[arg(long)]
    max_outlier_deg: Option<f64>,

    /// Viewing-distance key selecting pixels per degree (e.g. 1M, 2M, 3M).
    #[arg(long)]
    viewing_distance: Option<String>,

    /// Trial duration after presentation, in ms.
    #[arg(long)]
    trial_duration_ms: Option<f64>,

    /// Analysis window start, in ms after trial onset.
    #[arg(long)]
    window_start_ms: Option<f64>,

    /// Analysis window end, in ms after trial onset.
    #[arg(long)]
    window_end_ms: Option<f64>,

    /// Nominal gaze sampling rate in Hz.
    #[arg(long)]
    sampling_rate_hz: Option<f64>,

    /// Registration worker threads (default: one per core).
    #[arg(long)]
    threads: Option<usize>,

    /// Frames decoded per registration batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,
}

impl CliConfigArgs {
    fn load(&self) -> CliResult<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::info!("Loading config: {}", path.display());
                PipelineConfig::from_json_file(path)?
            }
            None => PipelineConfig::default(),
        };

        if let Some(b) = self.boundary {
            config.correlation.boundary = b.to_core();
        }
        if let Some(u) = self.time_unit {
            config.scoring.gaze_time_unit = u.to_core();
        }
        if let Some(v) = self.max_features {
            config.features.max_features = v;
        }
        if let Some(v) = self.match_ratio {
            config.registration.match_distance_ratio = v;
        }
        if let Some(v) = self.min_good_matches {
            config.registration.min_good_matches = v;
        }
        if let Some(v) = self.ransac_thresh_px {
            config.registration.ransac.inlier_threshold = v;
        }
        if let Some(v) = self.ransac_iters {
            config.registration.ransac.max_iters = v;
        }
        if self.frame_budget_ms.is_some() {
            config.registration.frame_budget_ms = self.frame_budget_ms;
        }
        if self.min_confidence.is_some() {
            config.mapping.min_confidence = self.min_confidence;
        }
        if let Some(v) = self.start_cue_min_matches {
            config.start_cue.min_matches = v;
        }
        if let Some(v) = self.max_outlier_deg {
            config.scoring.max_outlier_deg = v;
        }
        if let Some(v) = &self.viewing_distance {
            config.scoring.viewing_distance = v.clone();
        }
        if let Some(v) = self.trial_duration_ms {
            config.scoring.trial_duration_ms = v;
        }
        if let Some(v) = self.window_start_ms {
            config.scoring.analysis_window_ms[0] = v;
        }
        if let Some(v) = self.window_end_ms {
            config.scoring.analysis_window_ms[1] = v;
        }
        if let Some(v) = self.sampling_rate_hz {
            config.scoring.sampling_rate_hz = v;
        }
        if self.threads.is_some() {
            config.workers.threads = self.threads;
        }
        if let Some(v) = self.batch_size {
            config.workers.batch_size = v;
        }
        if self.max_frames.is_some() {
            config.workers.max_frames = self.max_frames;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
struct CliCorrelateArgs {
    /// Gaze samples (TSV with timestamp, norm_pos_x, norm_pos_y, confidence).
    #[arg(long)]
    gaze: PathBuf,

    /// Scene-video frame timestamps (TSV or one value per line).
    #[arg(long)]
    frame_timestamps: PathBuf,

    /// Path to write the correlated gaze (TSV).
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    config: CliConfigArgs,
}

/// Inputs shared by `map` and `run`.
#[derive(Debug, Clone, Args)]
struct CliMapInputs {
    /// Directory of extracted scene-video frames, ordered by file name.
    #[arg(long)]
    frames: PathBuf,

    /// Gaze samples (TSV).
    #[arg(long)]
    gaze: PathBuf,

    /// Scene-video frame timestamps.
    #[arg(long)]
    frame_timestamps: PathBuf,

    /// Intermediate reference image every frame is registered against.
    #[arg(long)]
    reference: PathBuf,

    /// Calibration-grid image.
    #[arg(long)]
    grid: PathBuf,

    /// Image shown on screen at task start; searched for when no start is given.
    #[arg(long)]
    start_cue: Option<PathBuf>,

    /// Task start time, in the gaze time unit.
    #[arg(long, conflicts_with = "start_frame")]
    task_start: Option<f64>,

    /// Frame index at which the task started.
    #[arg(long)]
    start_frame: Option<usize>,

    /// Path to write the per-frame registration report (JSON).
    #[arg(long)]
    report: Option<PathBuf>,
}

impl CliMapInputs {
    fn task_start_policy(&self) -> TaskStartPolicy {
        match (self.task_start, self.start_frame) {
            (Some(t), _) => TaskStartPolicy::Time(t),
            (None, Some(f)) => TaskStartPolicy::Frame(f),
            (None, None) => TaskStartPolicy::Detect,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliMapArgs {
    #[command(flatten)]
    inputs: CliMapInputs,

    /// Path to write the mapped gaze (TSV).
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    config: CliConfigArgs,
}

#[derive(Debug, Clone, Args)]
struct CliScoreArgs {
    /// Mapped gaze (TSV written by `map`).
    #[arg(long)]
    mapped: PathBuf,

    /// Calibration task log (TSV with col, row, time in ms).
    #[arg(long)]
    log: PathBuf,

    /// Task start time, in the gaze time unit.
    #[arg(long)]
    task_start: f64,

    /// Directory for trial_details.tsv, trial_summary.tsv and point_summary.tsv.
    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    config: CliConfigArgs,
}

#[derive(Debug, Clone, Args)]
struct CliRunArgs {
    #[command(flatten)]
    inputs: CliMapInputs,

    /// Calibration task log (TSV with col, row, time in ms).
    #[arg(long)]
    log: PathBuf,

    /// Directory for mapped_gaze.tsv and the scoring tables.
    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    config: CliConfigArgs,
}

#[derive(Debug, Clone, Args)]
struct CliReferenceInfoArgs {
    /// Intermediate reference image (A).
    #[arg(long)]
    reference: PathBuf,

    /// Calibration-grid image (B).
    #[arg(long)]
    grid: PathBuf,

    /// Path to write the chain and its statistics (JSON).
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    config: CliConfigArgs,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Correlate(args) => run_correlate(&args),
        Commands::Map(args) => run_map(&args),
        Commands::Score(args) => run_score(&args),
        Commands::Run(args) => run_run(&args),
        Commands::ReferenceInfo(args) => run_reference_info(&args),
    }
}

// ── correlate ──────────────────────────────────────────────────────────

fn run_correlate(args: &CliCorrelateArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let samples = tsv::read_gaze_samples(&args.gaze)?;
    let timestamps = tsv::read_frame_timestamps(&args.frame_timestamps)?;
    tracing::info!(
        "Loaded {} gaze samples, {} frame timestamps",
        samples.len(),
        timestamps.len()
    );

    let correlation = correlate(&samples, &timestamps, config.correlation.boundary);
    tracing::info!(
        "Assigned {} samples to frames ({} dropped)",
        correlation.groups.n_assigned(),
        correlation.dropped
    );

    tsv::write_file(&args.out, |w| tsv::write_correlated_gaze(w, &correlation))?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

// ── map ────────────────────────────────────────────────────────────────

fn load_image(path: &Path) -> CliResult<image::GrayImage> {
    tracing::info!("Loading image: {}", path.display());
    let img = load_gray(path)?;
    let (w, h) = img.dimensions();
    tracing::info!("Image size: {}x{}", w, h);
    Ok(img)
}

/// Build the pipeline and run the frame loop. Shared by `map` and `run`.
fn map_recording(
    inputs: &CliMapInputs,
    config: PipelineConfig,
) -> CliResult<(GazePipeline, MappingRun)> {
    let reference = load_image(&inputs.reference)?;
    let grid = load_image(&inputs.grid)?;
    let start_cue = inputs.start_cue.as_deref().map(load_image).transpose()?;

    let policy = inputs.task_start_policy();
    if policy == TaskStartPolicy::Detect && start_cue.is_none() {
        tracing::warn!("No --start-cue, --task-start or --start-frame: task start stays unknown");
    }

    let pipeline = GazePipeline::new(
        config,
        ReferenceImages {
            reference: &reference,
            grid: &grid,
            start_cue: start_cue.as_ref(),
        },
    )?;
    let chain = pipeline.reference_chain();
    tracing::info!(
        "Reference chain: {}/{} inliers, mean_err={:.2}px, p95={:.2}px",
        chain.quality.n_inliers,
        chain.quality.n_correspondences,
        chain.quality.mean_err_px,
        chain.quality.p95_err_px,
    );

    let samples = tsv::read_gaze_samples(&inputs.gaze)?;
    let timestamps = tsv::read_frame_timestamps(&inputs.frame_timestamps)?;
    let mut frames = ImageSequence::open(&inputs.frames)?;
    tracing::info!(
        "Loaded {} gaze samples, {} frame timestamps, {} frame images",
        samples.len(),
        timestamps.len(),
        frames.len_hint().unwrap_or(0)
    );

    let run = pipeline.map(&samples, &timestamps, &mut frames, policy)?;

    if let Some(path) = &inputs.report {
        let json = serde_json::to_string_pretty(&run.report())?;
        std::fs::write(path, &json)?;
        tracing::info!("Frame report written to {}", path.display());
    }

    Ok((pipeline, run))
}

fn run_map(args: &CliMapArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let (_, run) = map_recording(&args.inputs, config)?;

    tsv::write_file(&args.out, |w| tsv::write_mapped_gaze(w, &run.mapped))?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

// ── score ──────────────────────────────────────────────────────────────

fn write_score_tables(out_dir: &Path, report: &ScoreReport) -> CliResult<()> {
    let details = out_dir.join("trial_details.tsv");
    tsv::write_file(&details, |w| tsv::write_trial_details(w, &report.details))?;
    let trials = out_dir.join("trial_summary.tsv");
    tsv::write_file(&trials, |w| tsv::write_trial_summaries(w, &report.trials))?;
    let points = out_dir.join("point_summary.tsv");
    tsv::write_file(&points, |w| tsv::write_point_summaries(w, &report.points))?;
    tracing::info!("Scores written to {}", out_dir.display());
    Ok(())
}

fn log_score_summary(report: &ScoreReport) {
    let valid = report.trials.iter().filter(|t| t.retained > 0).count();
    tracing::info!(
        "Scored {} trials ({} with retained gaze), {} detail rows, {} grid points",
        report.trials.len(),
        valid,
        report.details.len(),
        report.points.len()
    );
}

fn read_log(path: &Path) -> CliResult<Vec<CalibrationPoint>> {
    let (log, issues) = tsv::read_task_log(path)?;
    tracing::info!(
        "Loaded {} calibration points ({} rows skipped)",
        log.len(),
        issues.len()
    );
    Ok(log)
}

fn run_score(args: &CliScoreArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let mapped = tsv::read_mapped_gaze(&args.mapped)?;
    let log = read_log(&args.log)?;

    let scorer = TrialScorer::new(config.scoring)?;
    let report = scorer.score(&mapped, &log, args.task_start);
    log_score_summary(&report);

    std::fs::create_dir_all(&args.out_dir)?;
    write_score_tables(&args.out_dir, &report)
}

// ── run ────────────────────────────────────────────────────────────────

fn run_run(args: &CliRunArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let log = read_log(&args.log)?;
    let (pipeline, run) = map_recording(&args.inputs, config)?;

    std::fs::create_dir_all(&args.out_dir)?;
    let mapped_path = args.out_dir.join("mapped_gaze.tsv");
    tsv::write_file(&mapped_path, |w| tsv::write_mapped_gaze(w, &run.mapped))?;
    tracing::info!("Results written to {}", mapped_path.display());

    let report = pipeline.score(&run, &log)?;
    log_score_summary(&report);
    write_score_tables(&args.out_dir, &report)
}

// ── reference-info ─────────────────────────────────────────────────────

fn run_reference_info(args: &CliReferenceInfoArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let reference = load_image(&args.reference)?;
    let grid = load_image(&args.grid)?;

    let extractor = FeatureExtractor::new(config.features.clone());
    let chain = build_fixed_chain_from_images(
        &reference,
        &grid,
        &extractor,
        &config.registration,
        &config.reference,
    )?;

    println!("gazemap reference chain (reference -> grid)");
    for row in chain.b_from_a.to_rows() {
        println!("  [{:>12.6} {:>12.6} {:>12.6}]", row[0], row[1], row[2]);
    }
    println!("  ratio-test matches:   {}", chain.match_count);
    println!(
        "  RANSAC inliers:       {}/{}",
        chain.quality.n_inliers, chain.quality.n_correspondences
    );
    println!("  mean reproj error:    {:.3} px", chain.quality.mean_err_px);
    println!("  p95 reproj error:     {:.3} px", chain.quality.p95_err_px);
    println!(
        "  inlier spread:        {:.1} px (reference), {:.1} px (grid)",
        chain.spread_px[0], chain.spread_px[1]
    );

    if let Some(out) = &args.out {
        let json = serde_json::to_string_pretty(&chain)?;
        std::fs::write(out, &json)?;
        tracing::info!("Results written to {}", out.display());
    }

    Ok(())
}
