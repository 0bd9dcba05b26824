use docrag_core::types::RetrievedChunk;

/// Grounded prompt: preamble, retrieved contents joined by newlines, then the
/// question.
pub fn build_prompt(preamble: &str, question: &str, context: &[RetrievedChunk]) -> String {
    let context = context.iter().map(|hit| hit.chunk.content.as_str()).collect::<Vec<_>>().join("\n");
    format!("{preamble}\n\nContext: {context}\n\nQuestion: {question}\n\nAnswer:")
}
