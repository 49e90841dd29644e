//! Optional query rewriting ahead of retrieval.

use std::future::Future;

/// Turns a user question into a query better suited for search.
pub trait QueryRewriter: Send + Sync {
    fn rewrite(&self, question: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Leaves the question as typed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRewriter;

impl QueryRewriter for PassthroughRewriter {
    async fn rewrite(&self, question: &str) -> anyhow::Result<String> {
        Ok(question.to_string())
    }
}

/// Runs the rewriter, falling back to `question` when it fails or returns
/// blank text.
pub async fn rewrite_or_original<W: QueryRewriter>(rewriter: &W, question: &str) -> String {
    match rewriter.rewrite(question).await {
        Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
        Ok(_) => {
            tracing::debug!("rewriter returned blank text, using original question");
            question.to_string()
        }
        Err(err) => {
            tracing::warn!(error = %err, "query rewrite failed, using original question");
            question.to_string()
        }
    }
}
