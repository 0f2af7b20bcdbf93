// ABOUTME: Worker pool sizing from task-text heuristics
// ABOUTME: Monotone additive score over length, structure, and domain breadth

/// Domain keyword groups; each distinct group matched adds one point.
const DOMAIN_GROUPS: &[(&str, &[&str])] = &[
    (
        "ui",
        &["ui", "frontend", "interface", "screen", "view", "layout", "css", "component"],
    ),
    (
        "backend",
        &["backend", "server", "api", "endpoint", "service", "handler"],
    ),
    (
        "data-store",
        &["database", "db", "schema", "migration", "sql", "storage", "cache", "index"],
    ),
    (
        "test",
        &["test", "tests", "testing", "coverage", "regression", "fixture"],
    ),
    (
        "deployment",
        &["deploy", "deployment", "release", "ci", "pipeline", "docker", "rollout"],
    ),
    (
        "docs",
        &["docs", "documentation", "readme", "changelog", "guide"],
    ),
];

/// Keywords signalling a large refactor; presence adds a fixed bonus.
const REFACTOR_KEYWORDS: &[&str] = &["refactor", "rewrite", "restructure", "overhaul"];

/// Size the worker pool from the task text. The score is a sum of
/// non-negative features, so augmenting a task with more length or more
/// distinct domain keywords never decreases the result. The floor is 2
/// regardless of score; the cap is 4.
pub fn size_pool(task_text: &str) -> usize {
    let score = score_task(task_text);
    match score {
        0..=2 => 2,
        3..=5 => 3,
        _ => 4,
    }
}

fn score_task(task_text: &str) -> usize {
    let lower = task_text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    let mut score = 0;

    score += match words.len() {
        0..=24 => 0,
        25..=59 => 1,
        _ => 2,
    };

    score += match clause_separators(&lower) {
        0..=3 => 0,
        4..=7 => 1,
        _ => 2,
    };

    let tokens: std::collections::HashSet<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    score += DOMAIN_GROUPS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| tokens.contains(k)))
        .count();

    if REFACTOR_KEYWORDS.iter().any(|k| tokens.contains(k)) {
        score += 2;
    }

    score
}

/// Commas, semicolons, newlines, numbered-list markers, and "and" all count
/// as clause separators.
fn clause_separators(lower: &str) -> usize {
    let punctuation = lower
        .chars()
        .filter(|c| *c == ',' || *c == ';' || *c == '\n')
        .count();

    let numbered = lower
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
                && trimmed.contains('.')
        })
        .count();

    let ands = lower.split_whitespace().filter(|w| *w == "and").count();

    punctuation + numbered + ands
}
