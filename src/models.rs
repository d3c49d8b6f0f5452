use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DataShapeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QualityLabel {
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
    Acceptable,
    Excellent,
}

impl QualityLabel {
    /// Display order used by every chart and legend.
    pub const ALL: [QualityLabel; 3] = [
        QualityLabel::NeedsImprovement,
        QualityLabel::Acceptable,
        QualityLabel::Excellent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QualityLabel::NeedsImprovement => "Needs Improvement",
            QualityLabel::Acceptable => "Acceptable",
            QualityLabel::Excellent => "Excellent",
        }
    }

    pub fn severity(self) -> u8 {
        match self {
            QualityLabel::NeedsImprovement => 3,
            QualityLabel::Acceptable => 2,
            QualityLabel::Excellent => 1,
        }
    }

    pub fn index(self) -> usize {
        match self {
            QualityLabel::NeedsImprovement => 0,
            QualityLabel::Acceptable => 1,
            QualityLabel::Excellent => 2,
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLabel {
    type Err = DataShapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Needs Improvement" => Ok(QualityLabel::NeedsImprovement),
            "Acceptable" => Ok(QualityLabel::Acceptable),
            "Excellent" => Ok(QualityLabel::Excellent),
            other => Err(DataShapeError::UnknownLabel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    G1,
    G2,
    G3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::G1, Stage::G2, Stage::G3];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::G1 => "G1",
            Stage::G2 => "G2",
            Stage::G3 => "G3",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DataShapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "G1" => Ok(Stage::G1),
            "G2" => Ok(Stage::G2),
            "G3" => Ok(Stage::G3),
            other => Err(DataShapeError::UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseRecord {
    pub id: String,
    pub name: String,
    pub enrollment_count: u64,
    pub course_quality_score: f64,
    pub learning_interaction_score: f64,
    pub quality_label: QualityLabel,
    pub engagement: Engagement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Engagement {
    pub comments_total: Option<u64>,
    pub views_total: Option<u64>,
    pub pos_count: Option<u64>,
    pub neg_count: Option<u64>,
    pub n_users_content_interaction: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageObservation {
    pub stage: Stage,
    pub prediction: Option<QualityLabel>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OngoingCourse {
    pub id: String,
    pub name: String,
    pub current_students: u64,
    pub stages: Vec<StageObservation>,
    pub details: CourseDetails,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseDetails {
    pub num_chapters: Option<u64>,
    pub n_videos: Option<u64>,
    pub n_exercises: Option<u64>,
    pub n_problems: Option<u64>,
    pub assignment_coverage: Option<f64>,
    pub video_coverage: Option<f64>,
    pub discussion_coverage: Option<f64>,
    pub correct_rate_course: Option<f64>,
    pub inactive_rate: Option<f64>,
    pub progress_ratio: Option<f64>,
}

/// Summary counts as served by `GET /api/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStats {
    pub critical: u64,
    pub critical_percentage: f64,
    pub acceptable: u64,
    pub acceptable_percentage: f64,
    pub excellent: u64,
    pub excellent_percentage: f64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryShare {
    pub label: QualityLabel,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSummary {
    pub categories: [CategoryShare; 3],
    pub total: usize,
    /// Courses counted in `total` without a category (no prediction yet).
    pub pending: usize,
}

impl DistributionSummary {
    pub fn share(&self, label: QualityLabel) -> &CategoryShare {
        &self.categories[label.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EnrollmentBand {
    Small,
    Medium,
    Large,
}

impl EnrollmentBand {
    pub const ALL: [EnrollmentBand; 3] = [
        EnrollmentBand::Small,
        EnrollmentBand::Medium,
        EnrollmentBand::Large,
    ];

    pub fn for_enrollment(enrollment_count: u64) -> Self {
        match enrollment_count {
            0..=49 => EnrollmentBand::Small,
            50..=199 => EnrollmentBand::Medium,
            _ => EnrollmentBand::Large,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnrollmentBand::Small => "Small (<50)",
            EnrollmentBand::Medium => "Medium (50-200)",
            EnrollmentBand::Large => "Large (>=200)",
        }
    }

    fn index(self) -> usize {
        match self {
            EnrollmentBand::Small => 0,
            EnrollmentBand::Medium => 1,
            EnrollmentBand::Large => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrollmentSegmentation {
    /// Indexed by band, then by label display order.
    counts: [[usize; 3]; 3],
}

impl EnrollmentSegmentation {
    pub fn record(&mut self, band: EnrollmentBand, label: QualityLabel) {
        self.counts[band.index()][label.index()] += 1;
    }

    pub fn count(&self, band: EnrollmentBand, label: QualityLabel) -> usize {
        self.counts[band.index()][label.index()]
    }

    pub fn band_total(&self, band: EnrollmentBand) -> usize {
        self.counts[band.index()].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStatistic {
    pub stage: Stage,
    /// Per-label share of the courses that reached this stage.
    pub labels: [CategoryShare; 3],
    pub reached: usize,
    pub not_reached: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestPrediction {
    pub label: QualityLabel,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageRow {
    pub stage: Stage,
    pub prediction: Option<QualityLabel>,
    pub confidence: Option<f64>,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseDetailView {
    pub id: String,
    pub name: String,
    pub current_students: u64,
    pub latest: Option<LatestPrediction>,
    pub stages: Vec<StageRow>,
    pub assignment_coverage_pct: f64,
    pub video_coverage_pct: f64,
    pub discussion_coverage_pct: f64,
    pub correct_rate_pct: f64,
    pub inactive_rate_pct: f64,
    pub progress_pct: f64,
    pub content: ContentCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentCounts {
    pub chapters: u64,
    pub videos: u64,
    pub exercises: u64,
    pub problems: u64,
}

/// One archived distribution snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub id: uuid::Uuid,
    pub kind: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub total: i32,
    pub pending: i32,
    pub needs_improvement: i32,
    pub acceptable: i32,
    pub excellent: i32,
    pub needs_improvement_pct: f64,
    pub acceptable_pct: f64,
    pub excellent_pct: f64,
    pub rejected: i32,
}
