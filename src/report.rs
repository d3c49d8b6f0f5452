use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::aggregate::{self, StageFilter};
use crate::ingest::{Ingested, Rejection};
use crate::models::{
    CourseDetailView, CourseRecord, DistributionSummary, EnrollmentBand, EnrollmentSegmentation,
    OngoingCourse, QualityLabel, SnapshotRecord, StageStatistic,
};
use crate::paginate::TableView;

pub fn render_distribution(output: &mut String, summary: &DistributionSummary) {
    if summary.total == 0 {
        let _ = writeln!(output, "No records in this snapshot.");
        return;
    }

    for share in summary.categories.iter() {
        let _ = writeln!(
            output,
            "- {}: {} ({:.1}%)",
            share.label, share.count, share.percentage
        );
    }
    if summary.pending > 0 {
        let _ = writeln!(output, "- No prediction yet: {}", summary.pending);
    }
    let _ = writeln!(output, "- Total: {}", summary.total);
}

pub fn render_segmentation(output: &mut String, segmentation: &EnrollmentSegmentation) {
    let _ = writeln!(
        output,
        "| Enrollment | Needs Improvement | Acceptable | Excellent | Total |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|");
    for band in EnrollmentBand::ALL {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            band.label(),
            segmentation.count(band, QualityLabel::NeedsImprovement),
            segmentation.count(band, QualityLabel::Acceptable),
            segmentation.count(band, QualityLabel::Excellent),
            segmentation.band_total(band)
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "{} courses segmented.", segmentation.total());
}

pub fn render_stage_progression(output: &mut String, stages: &[StageStatistic]) {
    let _ = writeln!(
        output,
        "| Stage | Reached | Not yet reached | Needs Improvement | Acceptable | Excellent |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|");
    for stat in stages {
        let cells: Vec<String> = stat
            .labels
            .iter()
            .map(|share| format!("{} ({:.1}%)", share.count, share.percentage))
            .collect();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            stat.stage,
            stat.reached,
            stat.not_reached,
            cells.join(" | ")
        );
    }
}

pub fn render_course_table(output: &mut String, view: &TableView<'_>) {
    let _ = writeln!(
        output,
        "Page {} of {} ({} courses)",
        view.number, view.total_pages, view.total_items
    );
    if view.rows.is_empty() {
        let _ = writeln!(output, "No courses match this filter.");
        return;
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "| Course | Label | Quality | Interaction | Enrollment | Active learners | Comments | Views | Sentiment (+/-) |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|");
    for record in &view.rows {
        let engagement = &record.engagement;
        let _ = writeln!(
            output,
            "| {} ({}) | {} | {:.3} | {:.3} | {} | {} | {} | {} | {}/{} |",
            record.name,
            record.id,
            record.quality_label,
            record.course_quality_score,
            record.learning_interaction_score,
            record.enrollment_count,
            optional_count(engagement.n_users_content_interaction),
            optional_count(engagement.comments_total),
            optional_count(engagement.views_total),
            optional_count(engagement.pos_count),
            optional_count(engagement.neg_count)
        );
    }
}

fn optional_count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |count| count.to_string())
}

pub fn render_ranked_courses(output: &mut String, courses: &[&OngoingCourse], limit: usize) {
    if courses.is_empty() {
        let _ = writeln!(output, "No courses found.");
        return;
    }

    for course in courses.iter().take(limit) {
        let status = match aggregate::resolve_latest(&course.stages) {
            Some(latest) => format!("{} at {}", latest.label, latest.stage),
            None => "no prediction yet".to_string(),
        };
        let _ = writeln!(
            output,
            "- {} ({}, {} students): {}",
            course.name, course.id, course.current_students, status
        );
    }
    if courses.len() > limit {
        let _ = writeln!(output, "- ... and {} more", courses.len() - limit);
    }
}

pub fn render_detail(output: &mut String, detail: &CourseDetailView) {
    let _ = writeln!(output, "# {} ({})", detail.name, detail.id);
    let _ = writeln!(output, "Current students: {}", detail.current_students);
    match detail.latest {
        Some(latest) => {
            let _ = writeln!(output, "Latest prediction: {} at {}", latest.label, latest.stage);
        }
        None => {
            let _ = writeln!(output, "Latest prediction: none yet");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Stages");
    for row in &detail.stages {
        let prediction = row
            .prediction
            .map(QualityLabel::as_str)
            .unwrap_or("not reached");
        let marker = if row.is_current { " (current)" } else { "" };
        let confidence = row
            .confidence
            .map(|confidence| format!(" (confidence {confidence:.2})"))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "- {}{}: {}{}",
            row.stage, marker, prediction, confidence
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Coverage");
    let _ = writeln!(output, "- Assignments: {:.1}%", detail.assignment_coverage_pct);
    let _ = writeln!(output, "- Videos: {:.1}%", detail.video_coverage_pct);
    let _ = writeln!(output, "- Discussion: {:.1}%", detail.discussion_coverage_pct);
    let _ = writeln!(output, "- Correct answers: {:.1}%", detail.correct_rate_pct);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity");
    let _ = writeln!(output, "- Progress: {:.1}%", detail.progress_pct);
    let _ = writeln!(output, "- Inactive learners: {:.1}%", detail.inactive_rate_pct);
    let _ = writeln!(
        output,
        "- Content: {} chapters, {} videos, {} exercises, {} problems",
        detail.content.chapters,
        detail.content.videos,
        detail.content.exercises,
        detail.content.problems
    );
}

pub fn render_rejections(output: &mut String, rejected: &[Rejection]) {
    for rejection in rejected.iter().take(10) {
        let _ = writeln!(
            output,
            "- record {} ({}): {}",
            rejection.index,
            rejection.id.as_deref().unwrap_or("no id"),
            rejection.error
        );
    }
    if rejected.len() > 10 {
        let _ = writeln!(output, "- ... and {} more", rejected.len() - 10);
    }
}

pub fn render_history(output: &mut String, history: &[SnapshotRecord]) {
    if history.is_empty() {
        let _ = writeln!(output, "No archived snapshots.");
        return;
    }

    for snapshot in history {
        let _ = writeln!(
            output,
            "- {} {} [{}]: {} courses, Needs Improvement {} ({:.1}%), Acceptable {} ({:.1}%), Excellent {} ({:.1}%), pending {}, rejected {}",
            snapshot.captured_at.format("%Y-%m-%d %H:%M"),
            snapshot.kind,
            snapshot.id,
            snapshot.total,
            snapshot.needs_improvement,
            snapshot.needs_improvement_pct,
            snapshot.acceptable,
            snapshot.acceptable_pct,
            snapshot.excellent,
            snapshot.excellent_pct,
            snapshot.pending,
            snapshot.rejected
        );
    }
}

pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    historical: &Ingested<CourseRecord>,
    ongoing: &Ingested<OngoingCourse>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Quality Report");
    let _ = writeln!(
        output,
        "Generated from {} at {}",
        source,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Historical Quality Distribution");
    render_distribution(&mut output, &aggregate::summarize_distribution(&historical.records));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Quality by Enrollment Size");
    render_segmentation(&mut output, &aggregate::segment_by_enrollment(&historical.records));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ongoing Courses by Latest Prediction");
    render_distribution(
        &mut output,
        &aggregate::summarize_ongoing_distribution(&ongoing.records),
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Stage Progression");
    render_stage_progression(&mut output, &aggregate::stage_progression(&ongoing.records));

    let critical = aggregate::critical_courses(&ongoing.records, StageFilter::All);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Critical Courses");
    let by_stage: Vec<String> = aggregate::critical_counts_by_stage(&ongoing.records)
        .iter()
        .map(|(stage, count)| format!("{stage}: {count}"))
        .collect();
    let _ = writeln!(output, "{} courses ({})", critical.len(), by_stage.join(", "));
    let _ = writeln!(output);
    render_ranked_courses(&mut output, &critical, 20);

    let rejected = historical.rejected.len() + ongoing.rejected.len();
    if rejected > 0 {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Rejected Records");
        let _ = writeln!(output, "{rejected} records failed validation and were excluded.");
        render_rejections(&mut output, &historical.rejected);
        render_rejections(&mut output, &ongoing.rejected);
    }

    output
}
