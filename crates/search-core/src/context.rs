use common::ScoredContext;

/// Fixed reply when retrieval finds nothing to ground an answer on.
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in the document to answer this question.";

/// Joins context texts with blank lines, in ranking order.
pub fn render_context(contexts: &[ScoredContext]) -> String {
    contexts
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
