//! Compile progress events and cooperative cancellation.
//!
//! The director pushes events into an explicit observer callback; there is
//! no ambient emitter. Cancellation is a token checked before each segment
//! dispatch — already-running tool invocations are allowed to finish.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reelsmith_template_model::TemplateAssets;

/// Events observed during a compile.
#[derive(Debug, Clone)]
pub enum CompileEvent {
    /// Cumulative progress in `[0.0, 1.0]`.
    Progress(f64),

    /// One video segment finished building.
    SegmentCompleted { section: String },

    /// The compile stopped before completion (error or cancellation).
    TaskStopped { message: String },

    /// The compile finished; the final video and touched assets.
    Finalized {
        video: PathBuf,
        assets: TemplateAssets,
    },
}

/// Observer callback for compile events.
pub type EventObserver = Box<dyn Fn(&CompileEvent) + Send + Sync>;

/// Cooperative cancellation flag, cloneable across tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
