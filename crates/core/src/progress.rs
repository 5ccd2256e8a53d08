//! Job progress accounting.
//!
//! `progress_percent` on the job row is a step-weighted figure so the
//! status surface shows smooth forward motion across the whole
//! pipeline, not just within the transcode step. Values are monotonic
//! within one attempt because each step only ever adds to the floor of
//! the steps before it.

/// Percent of the total attributed to each pipeline step, in order:
/// probe, thumbnail, transcode, master playlist, finalize.
pub const STEP_WEIGHTS: [(PipelineStep, i16); 5] = [
    (PipelineStep::Probe, 5),
    (PipelineStep::Thumbnail, 5),
    (PipelineStep::Transcode, 85),
    (PipelineStep::MasterPlaylist, 3),
    (PipelineStep::Finalize, 2),
];

/// The ordered steps of the transcoding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStep {
    Probe,
    Thumbnail,
    Transcode,
    MasterPlaylist,
    Finalize,
    Done,
}

/// Percent accumulated by all steps strictly before `step`.
pub fn step_floor(step: PipelineStep) -> i16 {
    STEP_WEIGHTS
        .iter()
        .take_while(|(s, _)| *s < step)
        .map(|(_, w)| w)
        .sum()
}

/// Overall job percent while inside `step`, given that step's own
/// completion fraction in `0.0..=1.0`.
pub fn overall_percent(step: PipelineStep, fraction_of_step: f64) -> i16 {
    if step == PipelineStep::Done {
        return 100;
    }
    let weight = STEP_WEIGHTS
        .iter()
        .find(|(s, _)| *s == step)
        .map(|(_, w)| *w)
        .unwrap_or(0);
    let f = fraction_of_step.clamp(0.0, 1.0);
    (step_floor(step) + (f64::from(weight) * f) as i16).min(100)
}

/// Fraction of the transcode step done, from per-quality progress.
///
/// Each quality contributes equally; completed/failed/skipped rungs
/// count as fully consumed (a failed rung will not be retried within
/// this attempt, so progress must still move forward past it).
pub fn transcode_fraction(qualities_done: usize, total: usize, current_fraction: f64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    let done = qualities_done.min(total) as f64;
    ((done + current_fraction.clamp(0.0, 1.0)) / total as f64).clamp(0.0, 1.0)
}
