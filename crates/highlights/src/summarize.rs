use super::extract::{classify, extract, STRONG_SCORE};
use models::{
    github::{Job, Step},
    Conclusion,
};
use regex::Regex;
use std::collections::HashSet;

/// Number of highlights extracted from each inspected job log.
pub const MAX_HIGHLIGHTS: usize = 6;
/// Maximum number of failed jobs of a run whose logs are fetched.
pub const MAX_INSPECTED_JOBS: usize = 2;
/// Maximum number of supporting points of a summary.
pub const MAX_POINTS: usize = 4;
/// Points longer than this are truncated with an ellipsis.
pub const POINT_DISPLAY_CHARS: usize = 180;

const RAW_POINTS_PER_JOB: usize = 2;
const ELLIPSIS: char = '…';

/// Summary of why a job or run failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Summary {
    /// One line describing the failure.
    pub summary: String,
    /// Short supporting points, none of which repeat the summary.
    pub points: Vec<String>,
}

/// LogSource fetches the raw log of a job.
pub trait LogSource: Send + Sync {
    fn job_log(
        &self,
        job_id: i64,
    ) -> impl std::future::Future<Output = anyhow::Result<String>> + Send;
}

lazy_static::lazy_static! {
    static ref ERROR_CLASS_RE: Regex = Regex::new(r"(?i)\b(database|compilation|runtime) error\b").unwrap();
    static ref OBJECT_RE: Regex = Regex::new(r"(?i)\bin (model|test|seed|snapshot|source|macro) '([^']+)'").unwrap();
    static ref THRESHOLD_RE: Regex = Regex::new(r"(?i)\bconfigured to (warn|fail|error) if ([^,;]+)").unwrap();
    static ref DEBUG_LOG_RE: Regex = Regex::new(r"(?i)\bdebug logs?\b|\blogs/dbt\.log\b").unwrap();
}

/// Summarize a single failed job from its metadata and log `highlights`,
/// which are ordered most-relevant first.
pub fn summarize_job(job: &Job, highlights: &[String]) -> Summary {
    let failed_step = job
        .steps
        .iter()
        .find(|s| s.conclusion.is_some_and(|c| c.is_failure()));

    let strong = highlights
        .iter()
        .any(|h| classify(h).is_some_and(|(_, score)| score >= STRONG_SCORE));

    if job.conclusion == Some(Conclusion::Cancelled) && !strong {
        let cancelled_step = job
            .steps
            .iter()
            .find(|s| s.conclusion == Some(Conclusion::Cancelled))
            .or(failed_step);

        let summary = match cancelled_step {
            Some(Step { number, name, .. }) => {
                format!("{}: cancelled at step {number} ({name})", job.name)
            }
            None => format!("{}: cancelled before completion", job.name),
        };
        return Summary {
            summary,
            points: Vec::new(),
        };
    }

    if !highlights.is_empty() {
        let headline = structured_headline(highlights).unwrap_or_else(|| highlights[0].clone());
        let (notes, context_points) = operational_context(highlights);

        let mut summary = job.name.clone();
        if let Some(step) = failed_step {
            summary.push_str(&format!(" (failed at step: {})", step.name));
        }
        summary.push_str(": ");
        summary.push_str(&headline);
        if let Some(note) = notes.first() {
            summary.push_str(&format!(" ({note})"));
        }

        let mut points: Vec<String> = context_points
            .into_iter()
            .map(|point| truncate_display(&format!("{}: {point}", job.name)))
            .collect();

        points.extend(
            highlights
                .iter()
                .map(|h| truncate_display(&format!("{}: {h}", job.name)))
                .filter(|point| !is_redundant(&summary, point))
                .take(RAW_POINTS_PER_JOB),
        );

        let points = dedupe_points(&summary, points);
        return Summary { summary, points };
    }

    let summary = match failed_step {
        Some(Step {
            number,
            name,
            conclusion,
            ..
        }) => format!(
            "{}: step {number} ({name}) concluded {}",
            job.name,
            conclusion.map(|c| c.name()).unwrap_or("unknown"),
        ),
        None => format!(
            "{}: job conclusion was {}",
            job.name,
            job.conclusion.map(|c| c.name()).unwrap_or("unknown"),
        ),
    };

    Summary {
        summary,
        points: Vec::new(),
    }
}

/// Summarize a run from its `jobs`, fetching logs of up to
/// MAX_INSPECTED_JOBS failed jobs. Returns None if no job failed.
///
/// A job log which can't be fetched is summarized from metadata alone.
pub async fn summarize_run<L: LogSource>(jobs: &[Job], logs: &L) -> Option<Summary> {
    let failed: Vec<&Job> = jobs
        .iter()
        .filter(|job| job.conclusion.is_some_and(|c| c.is_failure()))
        .collect();

    let mut summaries = Vec::with_capacity(MAX_INSPECTED_JOBS);
    for job in failed.iter().take(MAX_INSPECTED_JOBS) {
        let highlights = match logs.job_log(job.id).await {
            Ok(log) => extract(&log, MAX_HIGHLIGHTS),
            Err(err) => {
                tracing::warn!(job_id = job.id, job = %job.name, error = ?err, "failed to fetch job log");
                Vec::new()
            }
        };
        summaries.push(summarize_job(job, &highlights));
    }

    let mut summaries = summaries.into_iter();
    let first = summaries.next()?;
    let rest: Vec<Summary> = summaries.collect();

    if rest.is_empty() && failed.len() == 1 {
        return Some(first);
    }

    let mut summary = format!("{} failed jobs: {}", failed.len(), first.summary);
    if failed.len() > MAX_INSPECTED_JOBS {
        summary.push_str(&format!(
            " (+{} more failed jobs)",
            failed.len() - MAX_INSPECTED_JOBS
        ));
    }

    let mut points: Vec<String> = rest.iter().map(|s| truncate_display(&s.summary)).collect();
    points.extend(first.points);
    points.extend(rest.into_iter().flat_map(|s| s.points));

    let mut points = dedupe_points(&summary, points);
    points.truncate(MAX_POINTS);

    Some(Summary { summary, points })
}

/// Remove points which are empty, repeat an earlier point, or repeat the
/// `summary`. Comparisons ignore case, whitespace runs and trailing ellipses,
/// and a point also repeats the summary if it does so after removal of a
/// leading "prefix: " segment.
pub fn dedupe_points(summary: &str, points: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();

    points
        .into_iter()
        .filter(|point| !is_redundant(summary, point) && seen.insert(normalize(point)))
        .collect()
}

fn is_redundant(summary: &str, point: &str) -> bool {
    let summary = normalize(summary);
    let point = normalize(point);

    if point.is_empty() || summary.contains(&point) {
        return true;
    }
    match point.split_once(": ") {
        Some((_prefix, rest)) => !rest.is_empty() && summary.contains(rest),
        None => false,
    }
}

fn normalize(s: &str) -> String {
    s.trim()
        .trim_end_matches(ELLIPSIS)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn truncate_display(s: &str) -> String {
    if s.chars().count() <= POINT_DISPLAY_CHARS {
        return s.to_string();
    }
    let mut out: String = s
        .chars()
        .take(POINT_DISPLAY_CHARS - 1)
        .collect::<String>()
        .trim_end()
        .to_string();
    out.push(ELLIPSIS);
    out
}

// Compose an error class with the objects it references, e.g.
// "Database Error in model 'stg_orders'".
fn structured_headline(highlights: &[String]) -> Option<String> {
    let (line, class) = highlights
        .iter()
        .find_map(|h| ERROR_CLASS_RE.captures(h).map(|c| (h, c[1].to_lowercase())))?;

    let mut seen = HashSet::new();
    let objects: Vec<String> = highlights
        .iter()
        .flat_map(|h| OBJECT_RE.captures_iter(h))
        .map(|c| format!("{} '{}'", c[1].to_lowercase(), &c[2]))
        .filter(|object| seen.insert(object.clone()))
        .collect();

    if objects.is_empty() {
        return Some(line.clone());
    }

    let class = match class.as_str() {
        "database" => "Database Error",
        "compilation" => "Compilation Error",
        _ => "Runtime Error",
    };
    Some(format!("{class} in {}", objects.join(", ")))
}

// Extract operational context from highlights: a short note suitable for the
// summary line, and a longer supporting point for each.
fn operational_context(highlights: &[String]) -> (Vec<String>, Vec<String>) {
    let mut notes = Vec::new();
    let mut points = Vec::new();

    if let Some(c) = highlights.iter().find_map(|h| THRESHOLD_RE.captures(h)) {
        let verb = c[1].to_lowercase();
        let condition = c[2].trim().trim_end_matches('.');
        notes.push(format!("test threshold: {verb} if {condition}"));
        points.push(format!("test threshold exceeded ({verb} if {condition})"));
    }
    if highlights.iter().any(|h| DEBUG_LOG_RE.is_match(h)) {
        notes.push("see debug logs".to_string());
        points.push("full details are in the vendor debug log".to_string());
    }

    (notes, points)
}
