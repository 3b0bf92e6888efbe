//! Fixed system instructions for the two model call types.
//!
//! The refiner instruction constrains output to one search-query line.
//! The comparator instruction holds the "complete deviation" threshold:
//! the engine itself applies no numeric scoring, so this text is the only
//! place where the hallucination boundary is defined.

use atlas_core::MAX_QUERY_WORDS;
use url::Url;

/// System instruction for query refinement.
pub const REFINER_SYSTEM_PROMPT: &str = r#"
You are a search query writer.

You receive a user's free-text question. Rewrite it as ONE query for a web
search engine that will return pages answering exactly what the user is
looking for.

## Rules
1. Stay aligned with the user's intent - do not add or drop topics
2. Resolve ambiguous or indirect phrasing into concrete search terms
3. Search operators such as intitle: or intext: are allowed when they sharpen results
4. Never mention the name of the search engine in the query
5. Never emit newlines, tabs, or any other control characters
6. At most 32 words
7. Return only the query text - no quotes, labels, or explanation
"#;

/// System instruction for the comparator.
pub const COMPARATOR_SYSTEM_PROMPT: &str = r#"
You are a hallucination detector.

You receive three inputs:
- ANSWER: a response produced by a language model
- EVIDENCE: text retrieved from the web, often rendered as Markdown
- SOURCE: the URL the evidence came from

Compare ANSWER against EVIDENCE and decide whether ANSWER is supported.

## Decision Threshold
1. Report "hallucination_detected" ONLY when ANSWER is a complete deviation
   from EVIDENCE: the facts it states contradict the facts in EVIDENCE
2. Paraphrases, rewordings, summaries and compatible subsets of the same
   fact are "no_hallucination"
3. If EVIDENCE is empty, unrelated to ANSWER, or says it could not be
   retrieved, report "inconclusive"
4. Never flag content that is not a hallucination

## Output Format (JSON)
{
  "status": "no_hallucination" | "hallucination_detected" | "inconclusive",
  "hallucinated_span": "the exact part of ANSWER that deviates, or empty",
  "evidence_span": "the exact part of EVIDENCE that contradicts it, or empty",
  "source": "SOURCE, copied verbatim"
}

## Output Constraints
- Return only the JSON object - no Markdown fences, no commentary
- Both spans MUST be empty strings when status is "no_hallucination"
- Never emit newlines, tabs, or other control characters inside string values
"#;

/// User message for the refiner.
pub fn refiner_message(raw_query: &str) -> String {
    format!(
        "Question: {}\n\nRespond with a search query of at most {} words.",
        raw_query.trim(),
        MAX_QUERY_WORDS
    )
}

/// User message for the comparator.
pub fn comparator_message(answer: &str, evidence: &str, source: &Url) -> String {
    format!(
        "ANSWER:\n{}\n\nEVIDENCE:\n{}\n\nSOURCE:\n{}",
        answer.trim(),
        evidence.trim(),
        source
    )
}
