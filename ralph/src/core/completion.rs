//! Completion detection for an invocation's terminal result.

/// Literal marker an agent emits in its final result once every task is done.
pub const COMPLETION_SENTINEL: &str = "<promise>COMPLETE</promise>";

/// Returns true if the sentinel appears anywhere in `result_text`.
///
/// Case-sensitive literal substring search. The marker embedded in larger
/// text still counts; an empty result never does.
pub fn detect(result_text: &str) -> bool {
    !result_text.is_empty() && result_text.contains(COMPLETION_SENTINEL)
}

/// Returns true if any captured result text contains the sentinel.
pub fn detect_any(results: &[String]) -> bool {
    results.iter().any(|result| detect(result))
}
