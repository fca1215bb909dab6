//! Turns raw CI job logs into a handful of ranked, human-readable failure
//! highlights, and composes those highlights with job and step metadata into
//! one-line failure summaries.
//!
//! `extract` is a pure function of its input. `summarize_job` is too, while
//! `summarize_run` additionally fetches job logs through a `LogSource`.

mod extract;
mod summarize;

pub use extract::{classify, extract, extract_scored, Category, Highlight, STRONG_SCORE, TAIL_CHARS};
pub use summarize::{
    dedupe_points, summarize_job, summarize_run, LogSource, Summary, MAX_HIGHLIGHTS,
    MAX_INSPECTED_JOBS, MAX_POINTS, POINT_DISPLAY_CHARS,
};
