/// Script patterns that suggest part of the page renders after the initial response.
pub const LATE_CONTENT_PATTERNS: &[&str] = &[
    "settimeout",
    "setinterval",
    "requestanimationframe",
    "intersectionobserver",
    "mutationobserver",
    "fetch(",
    "$.ajax",
    "$.get",
    "$.post",
    "import(",
    "system.import",
];

/// Minimum size change for a second render to replace the first.
pub(crate) const MIN_SECOND_PASS_GROWTH: usize = 100;

/// Case-insensitive sniff for deferred-content scripts.
///
/// This is a heuristic: a match only means a second render might capture more content.
pub fn has_late_loading_content(html: &str) -> bool {
    let lowered = html.to_ascii_lowercase();
    LATE_CONTENT_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

pub(crate) fn second_pass_is_better(first: &str, second: &str) -> bool {
    !second.trim().is_empty() && first.len().abs_diff(second.len()) > MIN_SECOND_PASS_GROWTH
}
