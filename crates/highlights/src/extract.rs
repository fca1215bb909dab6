use regex::Regex;
use std::collections::HashSet;

/// Only this many trailing characters of a log are inspected.
pub const TAIL_CHARS: usize = 120_000;
/// Highlights scoring at least this much are considered strong diagnostics.
pub const STRONG_SCORE: u8 = 4;

const MIN_LINE_CHARS: usize = 8;
const MAX_LINE_CHARS: usize = 240;

/// Category of diagnostic recognized within a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DatabaseError,
    CompilationError,
    RuntimeError,
    Exception,
    CompilerError,
    Panic,
    TestFailure,
    FailureTally,
    StackTrace,
    ErrorKeyword,
    FailureKeyword,
    DebugLogReference,
}

/// Highlight is a log line recognized as a likely failure diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Highlight {
    /// Cleaned text of the line.
    pub line: String,
    pub category: Category,
    /// Confidence of the diagnostic, from 5 (structured) down to 1 (keyword hit).
    pub score: u8,
    /// Zero for the last matched line of the log, increasing towards its start.
    pub recency: usize,
}

struct Pattern {
    category: Category,
    score: u8,
    re: Regex,
}

fn pattern(category: Category, score: u8, re: &str) -> Pattern {
    Pattern {
        category,
        score,
        re: Regex::new(re).expect("highlight pattern must parse"),
    }
}

lazy_static::lazy_static! {
    // Ordered by descending score: the first matching pattern classifies a line.
    static ref PATTERNS: Vec<Pattern> = vec![
        pattern(Category::DatabaseError, 5, r"(?i)\bdatabase error\b"),
        pattern(Category::CompilationError, 5, r"(?i)\bcompilation error\b"),
        pattern(Category::RuntimeError, 5, r"(?i)\bruntime error\b"),
        pattern(Category::Exception, 4, r"\b[A-Z][A-Za-z0-9_]*(?:Error|Exception):"),
        pattern(Category::CompilerError, 4, r"(?i)^error(?:\[[a-z]*\d+\])?:"),
        pattern(Category::Panic, 4, r"\bpanicked at\b"),
        pattern(Category::TestFailure, 3, r"^(?:--- )?(?:FAIL|FAILED|FAILURE)\b"),
        pattern(Category::FailureTally, 3, r"(?i)\b[1-9]\d* (?:failed|failures?|errors?)\b"),
        pattern(Category::StackTrace, 2, r"Traceback \(most recent call last\)|^at [\w.$<>]+ \("),
        pattern(Category::ErrorKeyword, 2, r"(?i)\berrors?\b"),
        pattern(Category::FailureKeyword, 1, r"(?i)\b(?:fail|failed|failure|exception)\b"),
        pattern(Category::DebugLogReference, 1, r"(?i)\bdebug logs?\b|\blogs/dbt\.log\b"),
    ];

    static ref ANSI_RE: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
    static ref ISO_TIMESTAMP_RE: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?\s*"
    ).unwrap();
    static ref TIME_OF_DAY_RE: Regex = Regex::new(r"^\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?\s+").unwrap();
    static ref ERROR_MARKER_RE: Regex = Regex::new(r"^(?:##\[error\]|::error(?:\s[^:]*)?::)\s*").unwrap();

    static ref RUN_RE: Regex = Regex::new(r"^Run\s").unwrap();
    static ref WARNING_RE: Regex = Regex::new(r"(?i)^(?:##\[warning\]|::warning|warning:)").unwrap();
    static ref BOILERPLATE_RE: Regex = Regex::new(concat!(
        r#"(?i)^print\(["']error:"#,
        r"|^process completed with exit code \d+",
        r"|<frozen [\w.]+>",
        r#"|^file ".*(?:site-packages|dist-packages|lib/python\d)"#,
    )).unwrap();
}

/// Classify a cleaned log line, returning its category and score
/// if it looks like a failure diagnostic.
pub fn classify(line: &str) -> Option<(Category, u8)> {
    PATTERNS
        .iter()
        .find(|p| p.re.is_match(line))
        .map(|p| (p.category, p.score))
}

/// Extract up to `max_lines` human-relevant failure lines from `raw_log`,
/// most relevant first.
pub fn extract(raw_log: &str, max_lines: usize) -> Vec<String> {
    extract_scored(raw_log, max_lines)
        .into_iter()
        .map(|h| h.line)
        .collect()
}

/// Extract ranked Highlights from `raw_log`. Highlights are ordered by
/// descending score and then by recency, and never repeat a line.
pub fn extract_scored(raw_log: &str, max_lines: usize) -> Vec<Highlight> {
    let mut candidates: Vec<Highlight> = tail(raw_log, TAIL_CHARS)
        .lines()
        .rev()
        .map(clean_line)
        .filter(|line| !is_noise(line))
        .filter_map(|line| classify(&line).map(|(category, score)| (line, category, score)))
        .enumerate()
        .map(|(recency, (line, category, score))| Highlight {
            line,
            category,
            score,
            recency,
        })
        .collect();

    candidates.sort_by(|l, r| r.score.cmp(&l.score).then(l.recency.cmp(&r.recency)));

    let mut seen = HashSet::new();
    candidates.retain(|h| seen.insert(h.line.clone()));
    candidates.truncate(max_lines);

    candidates
}

fn tail(log: &str, max_chars: usize) -> &str {
    match log.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((offset, _)) if max_chars != 0 => &log[offset..],
        Some(_) => "",
        None => log,
    }
}

// Remove terminal escapes, timestamp prefixes, and CI annotation markers.
fn clean_line(line: &str) -> String {
    let line = ANSI_RE.replace_all(line, "");
    let line = line.trim();
    let line = ISO_TIMESTAMP_RE.replace(line, "");
    let line = ERROR_MARKER_RE.replace(&line, "");
    let line = TIME_OF_DAY_RE.replace(&line, "");
    line.trim().to_string()
}

fn is_noise(line: &str) -> bool {
    let chars = line.chars().count();

    if chars < MIN_LINE_CHARS || chars > MAX_LINE_CHARS {
        return true;
    }
    if line.starts_with("[command]") || line.starts_with('#') {
        return true;
    }
    // Echoed `Run <script>` headers are noise, unless the script itself
    // carries a strong diagnostic.
    if RUN_RE.is_match(line) && !classify(line).is_some_and(|(_, score)| score >= STRONG_SCORE) {
        return true;
    }
    WARNING_RE.is_match(line) || BOILERPLATE_RE.is_match(line)
}
