use std::cmp::Reverse;

use crate::models::{
    ApiStats, CategoryShare, ContentCounts, CourseDetailView, CourseRecord, DistributionSummary,
    EnrollmentBand, EnrollmentSegmentation, LatestPrediction, OngoingCourse, QualityLabel, Stage,
    StageObservation, StageRow, StageStatistic,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StageFilter {
    #[default]
    All,
    G1,
    G2,
    G3,
}

impl StageFilter {
    pub fn stage(self) -> Option<Stage> {
        match self {
            StageFilter::All => None,
            StageFilter::G1 => Some(Stage::G1),
            StageFilter::G2 => Some(Stage::G2),
            StageFilter::G3 => Some(Stage::G3),
        }
    }
}

pub fn summarize_distribution(records: &[CourseRecord]) -> DistributionSummary {
    let mut counts = [0usize; 3];
    for record in records {
        counts[record.quality_label.index()] += 1;
    }
    build_summary(counts, records.len())
}

/// Counts ongoing courses by their latest prediction. Courses without any
/// prediction stay in `total` and are reported as `pending`.
pub fn summarize_ongoing_distribution(courses: &[OngoingCourse]) -> DistributionSummary {
    let mut counts = [0usize; 3];
    for course in courses {
        if let Some(latest) = resolve_latest(&course.stages) {
            counts[latest.label.index()] += 1;
        }
    }
    build_summary(counts, courses.len())
}

fn build_summary(counts: [usize; 3], total: usize) -> DistributionSummary {
    let categorized: usize = counts.iter().sum();
    DistributionSummary {
        categories: shares(counts, total),
        total,
        pending: total - categorized,
    }
}

fn shares(counts: [usize; 3], total: usize) -> [CategoryShare; 3] {
    let percentages = apportion_percentages(counts, total);
    QualityLabel::ALL.map(|label| CategoryShare {
        label,
        count: counts[label.index()],
        percentage: percentages[label.index()],
    })
}

/// Percentages of `total` at one decimal place, apportioned in tenths with
/// the largest-remainder method so the parts add up to the rounded whole.
///
/// With `total == 0` every share is `0.0`. Remainder ties go to the earlier
/// category.
pub fn apportion_percentages(counts: [usize; 3], total: usize) -> [f64; 3] {
    if total == 0 {
        return [0.0; 3];
    }

    let total = total as u64;
    let mut tenths = [0u64; 3];
    let mut remainders = [0u64; 3];
    for (index, count) in counts.iter().enumerate() {
        let scaled = *count as u64 * 1000;
        tenths[index] = scaled / total;
        remainders[index] = scaled % total;
    }

    let categorized: u64 = counts.iter().map(|count| *count as u64).sum();
    let target = (categorized * 2000 + total) / (2 * total);
    let assigned: u64 = tenths.iter().sum();
    let leftover = target.saturating_sub(assigned) as usize;

    let mut order = [0usize, 1, 2];
    order.sort_by_key(|index| Reverse(remainders[*index]));
    for index in order.iter().take(leftover) {
        tenths[*index] += 1;
    }

    tenths.map(|value| value as f64 / 10.0)
}

pub fn segment_by_enrollment(records: &[CourseRecord]) -> EnrollmentSegmentation {
    let mut segmentation = EnrollmentSegmentation::default();
    for record in records {
        segmentation.record(
            EnrollmentBand::for_enrollment(record.enrollment_count),
            record.quality_label,
        );
    }
    segmentation
}

pub fn stage_progression(courses: &[OngoingCourse]) -> [StageStatistic; 3] {
    Stage::ALL.map(|stage| {
        let mut counts = [0usize; 3];
        for course in courses {
            let prediction = course
                .stages
                .iter()
                .find(|observation| observation.stage == stage)
                .and_then(|observation| observation.prediction);
            if let Some(label) = prediction {
                counts[label.index()] += 1;
            }
        }

        let reached: usize = counts.iter().sum();
        StageStatistic {
            stage,
            labels: shares(counts, reached),
            reached,
            not_reached: courses.len() - reached,
        }
    })
}

/// The last stage, scanning backwards, that carries a prediction.
pub fn resolve_latest(stages: &[StageObservation]) -> Option<LatestPrediction> {
    stages.iter().rev().find_map(|observation| {
        observation.prediction.map(|label| LatestPrediction {
            label,
            stage: observation.stage,
        })
    })
}

pub fn severity(course: &OngoingCourse) -> u8 {
    resolve_latest(&course.stages)
        .map(|latest| latest.label.severity())
        .unwrap_or(0)
}

/// Most urgent first; courses of equal severity keep their input order.
pub fn rank_by_severity(courses: &[OngoingCourse]) -> Vec<&OngoingCourse> {
    let mut ranked: Vec<&OngoingCourse> = courses.iter().collect();
    ranked.sort_by_key(|course| Reverse(severity(course)));
    ranked
}

pub fn critical_courses(courses: &[OngoingCourse], filter: StageFilter) -> Vec<&OngoingCourse> {
    courses
        .iter()
        .filter(|course| match resolve_latest(&course.stages) {
            Some(latest) if latest.label == QualityLabel::NeedsImprovement => filter
                .stage()
                .map_or(true, |stage| latest.stage == stage),
            _ => false,
        })
        .collect()
}

/// Critical course counts keyed by the stage of their latest prediction.
pub fn critical_counts_by_stage(courses: &[OngoingCourse]) -> [(Stage, usize); 3] {
    Stage::ALL.map(|stage| {
        let filter = match stage {
            Stage::G1 => StageFilter::G1,
            Stage::G2 => StageFilter::G2,
            Stage::G3 => StageFilter::G3,
        };
        (stage, critical_courses(courses, filter).len())
    })
}

pub fn course_detail(course: &OngoingCourse) -> CourseDetailView {
    let latest = resolve_latest(&course.stages);
    let stages = course
        .stages
        .iter()
        .map(|observation| StageRow {
            stage: observation.stage,
            prediction: observation.prediction,
            confidence: observation.confidence,
            is_current: latest.is_some_and(|latest| latest.stage == observation.stage),
        })
        .collect();
    let as_percentage = |value: Option<f64>| value.unwrap_or(0.0) * 100.0;

    CourseDetailView {
        id: course.id.clone(),
        name: course.name.clone(),
        current_students: course.current_students,
        latest,
        stages,
        assignment_coverage_pct: as_percentage(course.details.assignment_coverage),
        video_coverage_pct: as_percentage(course.details.video_coverage),
        discussion_coverage_pct: as_percentage(course.details.discussion_coverage),
        correct_rate_pct: as_percentage(course.details.correct_rate_course),
        inactive_rate_pct: as_percentage(course.details.inactive_rate),
        progress_pct: as_percentage(course.details.progress_ratio),
        content: ContentCounts {
            chapters: course.details.num_chapters.unwrap_or(0),
            videos: course.details.n_videos.unwrap_or(0),
            exercises: course.details.n_exercises.unwrap_or(0),
            problems: course.details.n_problems.unwrap_or(0),
        },
    }
}

pub fn as_api_stats(summary: &DistributionSummary) -> ApiStats {
    let critical = summary.share(QualityLabel::NeedsImprovement);
    let acceptable = summary.share(QualityLabel::Acceptable);
    let excellent = summary.share(QualityLabel::Excellent);

    ApiStats {
        critical: critical.count as u64,
        critical_percentage: critical.percentage,
        acceptable: acceptable.count as u64,
        acceptable_percentage: acceptable.percentage,
        excellent: excellent.count as u64,
        excellent_percentage: excellent.percentage,
        total: summary.total as u64,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CourseDetails, Engagement};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    pub(crate) fn record(id: &str, label: QualityLabel, enrollment_count: u64) -> CourseRecord {
        CourseRecord {
            id: id.to_string(),
            name: format!("Course {id}"),
            enrollment_count,
            course_quality_score: 0.5,
            learning_interaction_score: 0.5,
            quality_label: label,
            engagement: Engagement::default(),
        }
    }

    pub(crate) fn ongoing(id: &str, predictions: &[Option<QualityLabel>]) -> OngoingCourse {
        OngoingCourse {
            id: id.to_string(),
            name: format!("Course {id}"),
            current_students: 100,
            stages: predictions
                .iter()
                .zip(Stage::ALL)
                .map(|(prediction, stage)| StageObservation {
                    stage,
                    prediction: *prediction,
                    confidence: None,
                })
                .collect(),
            details: CourseDetails::default(),
        }
    }

    use QualityLabel::{Acceptable, Excellent, NeedsImprovement};

    #[test]
    fn distribution_of_two_records() {
        let records = vec![record("a", Excellent, 10), record("b", NeedsImprovement, 300)];
        let summary = summarize_distribution(&records);

        let view: Vec<_> = summary
            .categories
            .iter()
            .map(|share| (share.label, share.count, share.percentage))
            .collect();
        assert_eq!(
            view,
            vec![
                (NeedsImprovement, 1, 50.0),
                (Acceptable, 0, 0.0),
                (Excellent, 1, 50.0),
            ]
        );
        assert_eq!(summary.total, 2);
        assert_eq!(summary.pending, 0);
    }

    #[test]
    fn empty_distribution_is_zero_filled() {
        let summary = summarize_distribution(&[]);
        assert_eq!(summary.total, 0);
        for share in summary.categories {
            assert_eq!(share.count, 0);
            assert_eq!(share.percentage, 0.0);
        }
    }

    #[test]
    fn thirds_are_apportioned_to_a_whole() {
        assert_eq!(apportion_percentages([1, 1, 1], 3), [33.4, 33.3, 33.3]);
        assert_eq!(apportion_percentages([2, 2, 2], 7), [28.6, 28.6, 28.5]);
        assert_eq!(apportion_percentages([1, 0, 2], 3), [33.3, 0.0, 66.7]);
    }

    #[test]
    fn segmentation_of_two_records() {
        let records = vec![record("a", Excellent, 10), record("b", NeedsImprovement, 300)];
        let segmentation = segment_by_enrollment(&records);

        assert_eq!(segmentation.count(EnrollmentBand::Small, Excellent), 1);
        assert_eq!(segmentation.count(EnrollmentBand::Large, NeedsImprovement), 1);
        assert_eq!(segmentation.band_total(EnrollmentBand::Medium), 0);
        assert_eq!(segmentation.total(), 2);
    }

    #[test]
    fn enrollment_band_boundaries() {
        assert_eq!(EnrollmentBand::for_enrollment(0), EnrollmentBand::Small);
        assert_eq!(EnrollmentBand::for_enrollment(49), EnrollmentBand::Small);
        assert_eq!(EnrollmentBand::for_enrollment(50), EnrollmentBand::Medium);
        assert_eq!(EnrollmentBand::for_enrollment(199), EnrollmentBand::Medium);
        assert_eq!(EnrollmentBand::for_enrollment(200), EnrollmentBand::Large);
        assert_eq!(EnrollmentBand::for_enrollment(u64::MAX), EnrollmentBand::Large);
    }

    #[test]
    fn resolver_skips_trailing_null_stage() {
        let course = ongoing("x", &[None, Some(Acceptable), None]);
        assert_eq!(
            resolve_latest(&course.stages),
            Some(LatestPrediction {
                label: Acceptable,
                stage: Stage::G2
            })
        );
    }

    #[test]
    fn resolver_handles_missing_predictions() {
        assert_eq!(resolve_latest(&[]), None);
        let course = ongoing("x", &[None, None, None]);
        assert_eq!(resolve_latest(&course.stages), None);
        assert_eq!(severity(&course), 0);
    }

    #[test]
    fn severity_ranking_is_stable() {
        let courses = vec![
            ongoing("excellent", &[Some(Excellent)]),
            ongoing("first-critical", &[Some(NeedsImprovement)]),
            ongoing("acceptable", &[Some(Acceptable)]),
            ongoing("second-critical", &[Some(Acceptable), Some(NeedsImprovement)]),
            ongoing("pending", &[None]),
        ];

        let ids: Vec<&str> = rank_by_severity(&courses)
            .iter()
            .map(|course| course.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "first-critical",
                "second-critical",
                "acceptable",
                "excellent",
                "pending"
            ]
        );
    }

    #[test]
    fn critical_courses_filter_by_current_stage() {
        let courses = vec![
            ongoing("g1", &[Some(NeedsImprovement)]),
            ongoing("g2", &[Some(Excellent), Some(NeedsImprovement), None]),
            ongoing("recovered", &[Some(NeedsImprovement), Some(Acceptable)]),
            ongoing("g3", &[Some(Acceptable), Some(Acceptable), Some(NeedsImprovement)]),
        ];

        let ids = |filter| -> Vec<String> {
            critical_courses(&courses, filter)
                .iter()
                .map(|course| course.id.clone())
                .collect()
        };
        assert_eq!(ids(StageFilter::All), vec!["g1", "g2", "g3"]);
        assert_eq!(ids(StageFilter::G2), vec!["g2"]);
        assert_eq!(ids(StageFilter::G1), vec!["g1"]);
        assert_eq!(
            critical_counts_by_stage(&courses),
            [(Stage::G1, 1), (Stage::G2, 1), (Stage::G3, 1)]
        );
    }

    #[test]
    fn stage_progression_counts_reached_and_pending() {
        let courses = vec![
            ongoing("a", &[Some(NeedsImprovement), Some(Acceptable), None]),
            ongoing("b", &[Some(Acceptable), None, None]),
            ongoing("short", &[Some(Excellent)]),
        ];

        let [g1, g2, g3] = stage_progression(&courses);
        assert_eq!((g1.reached, g1.not_reached), (3, 0));
        assert_eq!(g1.labels[NeedsImprovement.index()].count, 1);
        assert_eq!(g1.labels[Acceptable.index()].percentage, 33.3);
        assert_eq!(g1.labels[NeedsImprovement.index()].percentage, 33.4);
        assert_eq!((g2.reached, g2.not_reached), (1, 2));
        assert_eq!(g2.labels[Acceptable.index()].percentage, 100.0);
        assert_eq!((g3.reached, g3.not_reached), (0, 3));
        assert!(g3.labels.iter().all(|share| share.percentage == 0.0));
    }

    #[test]
    fn ongoing_distribution_counts_pending_courses() {
        let courses = vec![
            ongoing("a", &[Some(NeedsImprovement)]),
            ongoing("b", &[None]),
            ongoing("c", &[Some(Excellent), Some(Excellent)]),
            ongoing("d", &[Some(NeedsImprovement), None]),
        ];

        let summary = summarize_ongoing_distribution(&courses);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.share(NeedsImprovement).count, 2);
        assert_eq!(summary.share(NeedsImprovement).percentage, 50.0);
        assert_eq!(summary.share(Excellent).percentage, 25.0);

        let stats = as_api_stats(&summary);
        assert_eq!(stats.critical, 2);
        assert_eq!(stats.total, 4);
    }

    #[test]
    fn detail_marks_current_stage() {
        let mut course = ongoing("x", &[Some(Acceptable), Some(NeedsImprovement), None]);
        course.details.video_coverage = Some(0.25);
        course.details.n_videos = Some(14);

        let detail = course_detail(&course);
        assert_eq!(
            detail.latest.map(|latest| latest.stage),
            Some(Stage::G2)
        );
        let current: Vec<Stage> = detail
            .stages
            .iter()
            .filter(|row| row.is_current)
            .map(|row| row.stage)
            .collect();
        assert_eq!(current, vec![Stage::G2]);
        assert_eq!(detail.video_coverage_pct, 25.0);
        assert_eq!(detail.assignment_coverage_pct, 0.0);
        assert_eq!(detail.content.videos, 14);
        assert_eq!(detail.content.chapters, 0);
    }

    fn label_strategy() -> impl Strategy<Value = QualityLabel> {
        prop_oneof![Just(NeedsImprovement), Just(Acceptable), Just(Excellent)]
    }

    fn prediction_strategy() -> impl Strategy<Value = Option<QualityLabel>> {
        proptest::option::of(label_strategy())
    }

    proptest! {
        #[test]
        fn percentages_sum_to_whole(labels in proptest::collection::vec(label_strategy(), 1..300)) {
            let records: Vec<_> = labels
                .iter()
                .enumerate()
                .map(|(index, label)| record(&index.to_string(), *label, 10))
                .collect();
            let summary = summarize_distribution(&records);
            let sum: f64 = summary.categories.iter().map(|share| share.percentage).sum();
            prop_assert!((sum - 100.0).abs() < 1e-6);

            for share in summary.categories {
                let exact = share.count as f64 / records.len() as f64 * 100.0;
                prop_assert!((share.percentage - exact).abs() <= 0.1 + 1e-9);
            }
        }

        #[test]
        fn every_enrollment_lands_in_one_band(
            enrollments in proptest::collection::vec(any::<u64>(), 0..200)
        ) {
            let records: Vec<_> = enrollments
                .iter()
                .map(|enrollment| record("r", Acceptable, *enrollment))
                .collect();
            let segmentation = segment_by_enrollment(&records);
            let band_sum: usize = EnrollmentBand::ALL
                .iter()
                .map(|band| segmentation.band_total(*band))
                .sum();
            prop_assert_eq!(band_sum, records.len());
        }

        #[test]
        fn resolver_returns_highest_indexed_prediction(
            predictions in proptest::collection::vec(prediction_strategy(), 0..=3)
        ) {
            let course = ongoing("p", &predictions);
            let expected = predictions
                .iter()
                .enumerate()
                .rev()
                .find_map(|(index, prediction)| {
                    prediction.map(|label| (label, Stage::ALL[index]))
                });
            let resolved =
                resolve_latest(&course.stages).map(|latest| (latest.label, latest.stage));
            prop_assert_eq!(resolved, expected);
            prop_assert_eq!(resolved.is_none(), predictions.iter().all(Option::is_none));
        }

        #[test]
        fn ranking_is_severity_descending(
            courses in proptest::collection::vec(
                proptest::collection::vec(prediction_strategy(), 0..=3),
                0..40
            )
        ) {
            let courses: Vec<_> = courses
                .iter()
                .enumerate()
                .map(|(index, predictions)| ongoing(&index.to_string(), predictions))
                .collect();
            let ranked = rank_by_severity(&courses);
            prop_assert_eq!(ranked.len(), courses.len());
            for pair in ranked.windows(2) {
                prop_assert!(severity(pair[0]) >= severity(pair[1]));
                if severity(pair[0]) == severity(pair[1]) {
                    let first: usize = pair[0].id.parse().unwrap();
                    let second: usize = pair[1].id.parse().unwrap();
                    prop_assert!(first < second);
                }
            }
        }
    }
}
