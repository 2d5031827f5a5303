//! Query expansion: ask a generation capability for alternative phrasings
//! and parse its free-form reply defensively.
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::generator::Generator;

// List markers the model tends to prepend: "-", "*", "•", "1.", "2)"
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("valid literal regex"));

pub struct QueryExpander {
    generator: Option<Arc<dyn Generator>>,
}

impl QueryExpander {
    pub fn new(generator: Option<Arc<dyn Generator>>) -> Self {
        Self { generator }
    }

    /// Produce up to `n` paraphrased variants of `query`, original first.
    ///
    /// The generator's output is untrusted: lines are stripped of list
    /// markers and surrounding quotes, empties and duplicates discarded,
    /// and the count capped at `n`. Any failure falls back to `[query]`
    /// alone; expansion never errors.
    pub fn expand(&self, query: &str, n: usize) -> Vec<String> {
        let mut variants = vec![query.to_string()];

        let Some(generator) = &self.generator else {
            return variants;
        };
        if n == 0 {
            return variants;
        }

        let prompt = format!(
            "Rephrase the following search query in {n} different ways. \
             Keep each rephrasing short and on its own line, with no numbering \
             or commentary.\n\nQuery: {query}"
        );

        let response = match generator.complete(&prompt) {
            Ok(text) => text,
            Err(e) => {
                warn!("Query expansion failed, using original query only: {e}");
                return variants;
            }
        };

        for line in response.lines() {
            if variants.len() > n {
                break;
            }
            let cleaned = self.clean_line(line);
            if cleaned.is_empty() {
                continue;
            }
            if variants.iter().any(|v| v.eq_ignore_ascii_case(&cleaned)) {
                continue;
            }
            variants.push(cleaned);
        }

        debug!("Expanded query into {} variants", variants.len());
        variants
    }

    fn clean_line(&self, line: &str) -> String {
        let stripped = LIST_MARKER.replace(line, "");
        stripped
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorError;

    struct CannedGenerator(String);
    struct FailingGenerator;

    impl Generator for CannedGenerator {
        fn complete(&self, _prompt: &str) -> Result<String, GeneratorError> {
            Ok(self.0.clone())
        }
    }

    impl Generator for FailingGenerator {
        fn complete(&self, _prompt: &str) -> Result<String, GeneratorError> {
            Err(GeneratorError::ServiceUnreachable(
                "connection refused".to_string(),
            ))
        }
    }

    fn expander(response: &str) -> QueryExpander {
        QueryExpander::new(Some(Arc::new(CannedGenerator(response.to_string()))))
    }

    #[test]
    fn test_original_query_always_first() {
        let e = expander("alternative one\nalternative two");
        let variants = e.expand("how to configure logging", 3);
        assert_eq!(variants[0], "how to configure logging");
        assert_eq!(variants.len(), 3);
    }

    #[test]
    fn test_strips_list_markers_and_quotes() {
        let e = expander("1. \"first variant\"\n- second variant\n• third variant");
        let variants = e.expand("original", 3);
        assert_eq!(
            variants,
            vec!["original", "first variant", "second variant", "third variant"]
        );
    }

    #[test]
    fn test_discards_empty_and_duplicate_lines() {
        let e = expander("\n\nsame thing\nSAME THING\noriginal\n");
        let variants = e.expand("original", 5);
        assert_eq!(variants, vec!["original", "same thing"]);
    }

    #[test]
    fn test_caps_variant_count() {
        let e = expander("a\nb\nc\nd\ne\nf");
        let variants = e.expand("q", 2);
        // original plus at most n variants
        assert_eq!(variants.len(), 3);
    }

    #[test]
    fn test_generator_failure_falls_back_to_original() {
        let e = QueryExpander::new(Some(Arc::new(FailingGenerator)));
        let variants = e.expand("resilient query", 3);
        assert_eq!(variants, vec!["resilient query"]);
    }

    #[test]
    fn test_no_generator_returns_original_only() {
        let e = QueryExpander::new(None);
        let variants = e.expand("plain query", 3);
        assert_eq!(variants, vec!["plain query"]);
    }

    #[test]
    fn test_numbered_paren_markers() {
        let e = expander("1) one\n2) two");
        let variants = e.expand("q", 3);
        assert_eq!(variants, vec!["q", "one", "two"]);
    }
}
