//! Cross-stage progress aggregation
//!
//! Each stage owns a band of the overall 0-100 range. A stage's own
//! sub-progress is mapped linearly into its band, and the tracker never lets
//! the reported value go backwards.

use crate::stages::Stage;
use serde::Serialize;

/// One progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u32>,
}

/// Receives progress events for a run
pub trait ProgressObserver {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressEvent),
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// Observer that drops every event
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// A closed sub-range of the overall progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Map stage-local progress (0-100) into the band
    pub fn map(self, sub: u8) -> u8 {
        let span = self.end.saturating_sub(self.start) as u16;
        let sub = sub.min(100) as u16;
        self.start + (span * sub / 100) as u8
    }

    pub fn contains(self, percent: u8) -> bool {
        (self.start..=self.end).contains(&percent)
    }
}

/// Bands for every stage of one run.
///
/// Rigging needs room between the mesh stages and avatar conversion, so a
/// run that plans to rig compresses the mesh bands to end at 65.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandPlan {
    pub enhance: ProgressBand,
    pub preview: ProgressBand,
    pub refine: ProgressBand,
    pub image_to_mesh: ProgressBand,
    pub retexture: ProgressBand,
    pub mesh_download: ProgressBand,
    pub rig: ProgressBand,
    pub avatar: ProgressBand,
    pub persist: ProgressBand,
}

impl BandPlan {
    pub fn new(with_rigging: bool) -> Self {
        let base = Self {
            enhance: ProgressBand::new(0, 5),
            preview: ProgressBand::new(10, 45),
            refine: ProgressBand::new(50, 95),
            image_to_mesh: ProgressBand::new(10, 95),
            retexture: ProgressBand::new(10, 95),
            mesh_download: ProgressBand::new(95, 95),
            rig: ProgressBand::new(95, 95),
            avatar: ProgressBand::new(95, 97),
            persist: ProgressBand::new(97, 99),
        };
        if !with_rigging {
            return base;
        }
        Self {
            preview: ProgressBand::new(10, 35),
            refine: ProgressBand::new(40, 65),
            image_to_mesh: ProgressBand::new(10, 65),
            mesh_download: ProgressBand::new(65, 70),
            rig: ProgressBand::new(70, 85),
            ..base
        }
    }

    pub fn band(&self, stage: Stage) -> ProgressBand {
        match stage {
            Stage::EnhancePrompt => self.enhance,
            Stage::MeshPreview => self.preview,
            Stage::MeshRefine => self.refine,
            Stage::ImageToMesh => self.image_to_mesh,
            Stage::Retexture => self.retexture,
            Stage::Download => self.mesh_download,
            Stage::Rig => self.rig,
            Stage::ConvertAvatarFormat => self.avatar,
            Stage::Persist => self.persist,
        }
    }
}

/// Monotonic progress state for one run
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    percent: u8,
    status: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `percent`, clamped so it never falls below what was already
    /// reported. Returns the value actually emitted.
    pub fn report(
        &mut self,
        observer: &mut dyn ProgressObserver,
        stage: Stage,
        percent: u8,
        message: impl Into<String>,
        queue_depth: Option<u32>,
    ) -> u8 {
        let percent = percent.min(100).max(self.percent);
        self.percent = percent;
        self.status = message.into();
        observer.on_progress(&ProgressEvent {
            stage,
            percent,
            message: self.status.clone(),
            queue_depth,
        });
        percent
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// The most recent human-readable status line
    pub fn status(&self) -> &str {
        &self.status
    }
}
