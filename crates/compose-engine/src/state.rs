//! Shared build state.
//!
//! `BuildState` is the aggregate every stage reads. It is owned by the
//! director's aggregator: segment tasks report outcomes as messages and a
//! single writer applies them, so no two stages ever mutate a field
//! concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A resolved, timeline-placed audio clip.
#[derive(Debug, Clone)]
pub struct LoadedClip {
    pub name: String,
    pub path: PathBuf,
    pub start: f64,
    pub duration: f64,
    pub volume: Option<f64>,
}

/// Aggregate state for one compile.
#[derive(Debug, Default)]
pub struct BuildState {
    pub total_segments: usize,

    /// Sum of all video segment durations, in seconds.
    pub total_length: f64,

    /// Monotonic progress, clamped to `[0.0, 1.0]`.
    pub current_progress: f64,

    /// Section name -> duration in seconds.
    pub durations: HashMap<String, f64>,

    /// Rendered segment paths, one slot per video segment in declaration
    /// order. Slots fill as builds complete, in any order.
    pub video_inputs: Vec<Option<PathBuf>>,

    /// Timeline audio clips, resolved to local paths.
    pub audio_segments: Vec<LoadedClip>,

    /// The composed audio mix, once built.
    pub audio_path: Option<PathBuf>,

    /// Background audio bed (loaded from the descriptor, or extracted from
    /// a section).
    pub background_audio_path: Option<PathBuf>,

    pub subtitle_path: Option<PathBuf>,

    /// Music bed, after loading (and later, looping).
    pub music_path: Option<PathBuf>,

    /// Per-section music volume levels, in build order.
    pub music_volumes: Vec<(String, f64)>,

    /// Concat manifest path.
    pub file_concat_path: Option<PathBuf>,

    /// Names of sections/stages that failed.
    pub errors: Vec<String>,
}

impl BuildState {
    /// Record a section's duration into the totals.
    pub fn record_duration(&mut self, name: &str, seconds: f64) {
        self.total_length += seconds;
        self.durations.insert(name.to_string(), seconds);
    }

    /// Record a failed section or stage.
    pub fn record_error(&mut self, stage: impl Into<String>) {
        self.errors.push(stage.into());
    }

    /// Advance progress by one segment's share and return the new value.
    /// Never decreases, never exceeds 1.0.
    pub fn advance_progress(&mut self, segment_seconds: f64) -> f64 {
        if self.total_length > 0.0 {
            let next = (self.current_progress + segment_seconds / self.total_length).min(1.0);
            if next > self.current_progress {
                self.current_progress = next;
            }
        }
        self.current_progress
    }

    /// Fill a segment's slot with its rendered output path.
    pub fn set_video_input(&mut self, index: usize, path: PathBuf) {
        if index < self.video_inputs.len() {
            self.video_inputs[index] = Some(path);
        }
    }

    /// Concat manifest contents: one `file <path>` line per completed
    /// segment, in declaration order regardless of completion order.
    pub fn manifest_contents(&self) -> String {
        self.video_inputs
            .iter()
            .flatten()
            .map(|p| format!("file {}\n", p.display()))
            .collect()
    }

    /// Reset after a completed compile so the state cannot be reused.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Strip the `file ` prefix from a concat manifest line.
pub fn manifest_entry(line: &str) -> &Path {
    Path::new(line.trim().strip_prefix("file ").unwrap_or(line.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic_and_terminal() {
        let mut state = BuildState::default();
        state.record_duration("a", 2.0);
        state.record_duration("b", 3.0);
        state.record_duration("c", 5.0);

        let mut last = 0.0;
        for seconds in [2.0, 3.0, 5.0] {
            let p = state.advance_progress(seconds);
            assert!(p >= last);
            assert!(p <= 1.0);
            last = p;
        }
        assert!((last - 1.0).abs() < 1e-9);

        // further updates cannot push past 1.0 or regress
        assert!((state.advance_progress(2.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_without_total_stays_zero() {
        let mut state = BuildState::default();
        assert_eq!(state.advance_progress(1.0), 0.0);
    }

    #[test]
    fn test_manifest_preserves_declaration_order() {
        let mut state = BuildState {
            video_inputs: vec![None, None, None],
            ..Default::default()
        };

        // completion order: 2, 0, 1
        state.set_video_input(2, PathBuf::from("/b/outro_output.mp4"));
        state.set_video_input(0, PathBuf::from("/b/intro_output.mp4"));
        state.set_video_input(1, PathBuf::from("/b/body_output.mp4"));

        assert_eq!(
            state.manifest_contents(),
            "file /b/intro_output.mp4\nfile /b/body_output.mp4\nfile /b/outro_output.mp4\n"
        );
    }

    #[test]
    fn test_manifest_entry_strips_prefix() {
        assert_eq!(
            manifest_entry("file /b/intro_output.mp4"),
            Path::new("/b/intro_output.mp4")
        );
        assert_eq!(manifest_entry("/plain/path.mp4"), Path::new("/plain/path.mp4"));
    }
}
