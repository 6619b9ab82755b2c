//! Pipeline orchestrator: reference chain → correlate → frame loop → score.

use std::time::Instant;

use image::GrayImage;
use rayon::prelude::*;

use super::result::{FrameReport, MappingRun};
use crate::config::PipelineConfig;
use crate::correlate::correlate;
use crate::error::GazeMapError;
use crate::features::FeatureExtractor;
use crate::frames::FrameSource;
use crate::gaze::{FrameTimestamps, GazeSample};
use crate::reference_chain::{build_fixed_chain, ReferenceChain};
use crate::registration::{FrameRegistrar, RegistrationResult};
use crate::scoring::{CalibrationPoint, ScoreReport, TrialScorer};
use crate::start_cue::{task_start_at_frame, StartCueDetector, TaskStart, TaskStartPolicy};
use crate::transform_chain::TransformChain;

/// The static images of one recording.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceImages<'a> {
    /// Intermediate registration target that every frame is matched against.
    pub reference: &'a GrayImage,
    /// Calibration-grid image.
    pub grid: &'a GrayImage,
    /// Image shown on screen when the task starts.
    pub start_cue: Option<&'a GrayImage>,
}

/// Per-frame work done on the pool.
struct FrameOutcome {
    registration: RegistrationResult,
    start_cue_matches: Option<usize>,
}

/// A configured pipeline for one recording.
///
/// Holds the reference keypoints and the fixed chain; both are read-only and
/// shared by every worker.
pub struct GazePipeline {
    config: PipelineConfig,
    registrar: FrameRegistrar,
    chain: ReferenceChain,
    transform: TransformChain,
    start_cue: Option<StartCueDetector>,
    scorer: TrialScorer,
    pool: rayon::ThreadPool,
}

impl GazePipeline {
    /// Validate `config` and build the fixed reference chain.
    pub fn new(config: PipelineConfig, images: ReferenceImages<'_>) -> Result<Self, GazeMapError> {
        config.validate().map_err(|e| e.in_stage("config"))?;
        let scorer = TrialScorer::new(config.scoring.clone()).map_err(|e| e.in_stage("config"))?;

        let extractor = FeatureExtractor::new(config.features.clone());
        let reference = extractor.extract(images.reference);
        let grid = extractor.extract(images.grid);
        tracing::info!(
            "Reference keypoints: reference={}, grid={}",
            reference.len(),
            grid.len()
        );
        let chain = build_fixed_chain(&reference, &grid, &config.registration, &config.reference)
            .map_err(|e| e.in_stage("reference-chain"))?;

        let start_cue = images.start_cue.map(|img| {
            let cue = extractor.extract(img);
            tracing::info!("Start-cue keypoints: {}", cue.len());
            StartCueDetector::new(cue, &config.start_cue, config.registration.match_distance_ratio)
        });

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = config.workers.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| GazeMapError::Config(format!("thread pool: {}", e)).in_stage("workers"))?;

        Ok(Self {
            transform: TransformChain::new(chain.b_from_a),
            registrar: FrameRegistrar::new(extractor, reference, config.registration.clone()),
            chain,
            start_cue,
            scorer,
            pool,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn reference_chain(&self) -> &ReferenceChain {
        &self.chain
    }

    /// Register a batch in parallel; results come back in batch order.
    fn register_batch(&self, batch: &[(usize, GrayImage)], search_cue: bool) -> Vec<FrameOutcome> {
        let cue = self.start_cue.as_ref().filter(|_| search_cue);
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|(_, frame)| {
                    let started = Instant::now();
                    let keypoints = self.registrar.extractor().extract(frame);
                    FrameOutcome {
                        registration: self.registrar.register_keypoints(&keypoints, started),
                        start_cue_matches: cue.map(|c| c.match_count(&keypoints)),
                    }
                })
                .collect()
        })
    }

    /// Correlate, register and map every frame of `frames`.
    ///
    /// Stops when the source is exhausted, the frame timestamps run out, or
    /// `workers.max_frames` frames have been processed.
    pub fn map(
        &self,
        samples: &[GazeSample],
        frame_timestamps: &FrameTimestamps,
        frames: &mut dyn FrameSource,
        task_start: TaskStartPolicy,
    ) -> Result<MappingRun, GazeMapError> {
        let cfg = &self.config;
        let correlation = correlate(samples, frame_timestamps, cfg.correlation.boundary);

        let mut start: Option<TaskStart> = match task_start {
            TaskStartPolicy::Time(time) => Some(TaskStart {
                frame_index: None,
                time,
            }),
            TaskStartPolicy::Frame(f) => Some(
                task_start_at_frame(f, &correlation.groups, frame_timestamps).ok_or_else(|| {
                    GazeMapError::Config(format!(
                        "start frame {} is beyond the {} frame timestamps",
                        f,
                        frame_timestamps.len()
                    ))
                    .in_stage("start-cue")
                })?,
            ),
            TaskStartPolicy::Detect => None,
        };
        let mut searching = task_start == TaskStartPolicy::Detect && self.start_cue.is_some();

        let limit = cfg
            .workers
            .max_frames
            .map_or(frame_timestamps.len(), |m| m.min(frame_timestamps.len()));
        let batch_size = cfg.workers.batch_size;

        let mut reports = Vec::with_capacity(limit);
        let mut mapped = Vec::with_capacity(correlation.groups.n_assigned());
        let mut next_index = 0usize;
        let mut exhausted = false;

        while !exhausted && next_index < limit {
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size && next_index < limit {
                match frames.next_frame().map_err(|e| e.in_stage("decode"))? {
                    Some(frame) => {
                        batch.push((next_index, frame));
                        next_index += 1;
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if batch.is_empty() {
                break;
            }

            let outcomes = self.register_batch(&batch, searching);
            for ((frame_index, frame), outcome) in batch.iter().zip(outcomes) {
                let frame_index = *frame_index;
                let reg = &outcome.registration;
                match &reg.failure {
                    None => tracing::debug!(
                        "Frame {}: registered, {} matches, {} inliers",
                        frame_index,
                        reg.match_count,
                        reg.n_inliers
                    ),
                    Some(failure) => tracing::debug!("Frame {}: not registered, {}", frame_index, failure),
                }

                let cue_matches = outcome.start_cue_matches.filter(|_| searching);
                if let (Some(n), Some(cue)) = (cue_matches, &self.start_cue) {
                    if cue.is_visible(n) {
                        start = task_start_at_frame(frame_index, &correlation.groups, frame_timestamps);
                        searching = false;
                        tracing::info!(
                            "Start cue found in frame {} ({} matches), task start {:?}",
                            frame_index,
                            n,
                            start.map(|s| s.time)
                        );
                    }
                }

                let samples = correlation.groups.samples(frame_index);
                mapped.extend(self.transform.map_frame_gaze(
                    frame_index,
                    samples,
                    frame.dimensions(),
                    reg,
                    cfg.mapping.min_confidence,
                ));
                reports.push(FrameReport::new(
                    frame_index,
                    frame_timestamps.get(frame_index),
                    reg,
                    samples.len(),
                    cue_matches,
                ));
            }
        }

        if next_index < frame_timestamps.len() {
            let unmapped: usize = (next_index..frame_timestamps.len())
                .map(|f| correlation.groups.samples(f).len())
                .sum();
            tracing::info!(
                "Stopped after {} of {} frames; {} gaze samples in later frames not mapped",
                next_index,
                frame_timestamps.len(),
                unmapped
            );
        }
        if searching {
            tracing::warn!("Start cue not found in {} frames", reports.len());
        }

        let run = MappingRun {
            reference_chain: self.chain.clone(),
            correlation,
            frames: reports,
            mapped,
            task_start: start,
        };
        tracing::info!(
            "Processed {} frames ({} registered), {} gaze points mapped ({} in grid space)",
            run.frames.len(),
            run.frames_registered(),
            run.mapped.len(),
            run.valid_points()
        );
        Ok(run)
    }

    /// Score a mapping run against the task log.
    pub fn score(&self, run: &MappingRun, log: &[CalibrationPoint]) -> Result<ScoreReport, GazeMapError> {
        let start = run.task_start.ok_or_else(|| {
            GazeMapError::Config(
                "task start unknown: supply a start-cue image that appears in the video, \
                 a start frame or a start time"
                    .into(),
            )
            .in_stage("score")
        })?;
        Ok(self.scorer.score(&run.mapped, log, start.time))
    }
}
