use nolia_contracts::{AnswerStyle, AskMode, EvidenceSource, GroundedFact, Language};

use crate::excerpt::truncate_chars;

pub const MAX_SNIPPET_CHARS: usize = 500;
pub const MAX_EXTRACTED_CHARS: usize = 2500;

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptOptions {
    pub strict_citations: bool,
    pub sources_count: usize,
}

/// Deterministic system prompt built from the request options and the
/// current UTC date. Nothing about it depends on runtime state beyond the
/// arguments, so a given request always produces the same instructions.
pub fn system_prompt(
    style: AnswerStyle,
    mode: AskMode,
    language: Language,
    today_utc: &str,
    options: &PromptOptions,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are Nolia, a careful research assistant that answers questions using the evidence provided.\n",
    );
    prompt.push_str(&format!("Current date (UTC): {}.\n", today_utc));

    prompt.push_str(match style {
        AnswerStyle::Concise => "Style: answer in a few tight sentences, no filler.\n",
        AnswerStyle::Balanced => "Style: balanced depth, short paragraphs or bullets.\n",
        AnswerStyle::Detailed => "Style: thorough coverage with structured sections.\n",
        AnswerStyle::Creative => "Style: engaging and vivid, but keep facts exact.\n",
    });

    prompt.push_str(match language {
        Language::Auto => {
            "Language: reply in the language of the question, including transliterated Hindi.\n"
        }
        Language::En => "Language: reply in English.\n",
        Language::Hi => "Language: reply in Hindi (transliterated Hindi is fine).\n",
    });

    if mode == AskMode::Verified {
        prompt.push_str("Mode: verified. Prefer accuracy over completeness; do not speculate.\n");
    } else {
        prompt.push_str("Mode: fast. Be direct; skip hedging.\n");
    }

    if options.sources_count > 0 {
        prompt.push_str(&format!(
            "You are given {count} numbered sources. Cite them inline as [n] with 1 <= n <= {count} immediately after the claims they support. Never invent source numbers outside that range.\n",
            count = options.sources_count
        ));
        prompt.push_str(
            "Do not append a Sources or References footer; the citation markers are the only attribution.\n",
        );
        if options.strict_citations {
            prompt.push_str(
                "Strict citations: every factual sentence or bullet must carry at least one [n] marker, and when the sources do not cover a detail, say so explicitly instead of asserting it.\n",
            );
        }
    }

    prompt.push_str(
        "Safety: refuse requests that facilitate self-harm, violence, weapons, drugs, cybercrime, or the sexual exploitation of minors.\n",
    );

    prompt
}

/// Plain-text evidence block: numbered entries the model cites as `[n]`.
pub fn evidence_block(sources: &[EvidenceSource]) -> String {
    let mut block = String::new();
    for (idx, source) in sources.iter().enumerate() {
        if idx > 0 {
            block.push('\n');
        }
        block.push_str(&format!("[{}] {}\n", idx + 1, source.title));
        block.push_str(&format!("URL: {}\n", source.url));
        if !source.snippet.trim().is_empty() {
            block.push_str(&format!(
                "Snippet: {}\n",
                truncate_chars(source.snippet.trim(), MAX_SNIPPET_CHARS)
            ));
        }
        if let Some(extracted) = &source.extracted_text
            && !extracted.trim().is_empty()
        {
            block.push_str(&format!(
                "Extracted: {}\n",
                truncate_chars(extracted.trim(), MAX_EXTRACTED_CHARS)
            ));
        }
    }
    block
}

pub fn facts_block(facts: &[GroundedFact]) -> String {
    facts
        .iter()
        .map(|fact| {
            let markers = fact
                .citations
                .iter()
                .map(|n| format!("[{}]", n))
                .collect::<Vec<_>>()
                .join("");
            format!("- {} {}", fact.fact, markers)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn facts_extraction_prompt(sources_count: usize) -> String {
    format!(
        "Extract the verifiable facts that answer the user's question from the numbered sources.\n\
         Reply with ONLY a JSON array of objects shaped {{\"fact\": string, \"citations\": number[]}}.\n\
         Each fact must be a single short claim (at most 500 characters) supported by 1 to 3 source numbers between 1 and {}.\n\
         If the sources contain nothing relevant, reply with [].",
        sources_count
    )
}

pub fn compose_from_facts_prompt() -> &'static str {
    "Write the final answer for the user using ONLY the grounded facts below. \
     Keep each fact's [n] markers attached to the claims they support. \
     Do not introduce information that is not in the facts."
}

pub fn follow_ups_prompt() -> &'static str {
    "Suggest up to 3 short follow-up questions the user might ask next, \
     each under 140 characters, in the same language as the question. \
     Reply with ONLY a JSON array of strings."
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source(title: &str, url: &str) -> EvidenceSource {
        EvidenceSource {
            title: title.to_string(),
            url: url.to_string(),
            snippet: "snippet text".to_string(),
            extracted_text: None,
        }
    }

    #[test]
    fn system_prompt_is_deterministic() {
        let options = PromptOptions {
            strict_citations: false,
            sources_count: 3,
        };
        let a = system_prompt(
            AnswerStyle::Balanced,
            AskMode::Verified,
            Language::Auto,
            "2025-06-15",
            &options,
        );
        let b = system_prompt(
            AnswerStyle::Balanced,
            AskMode::Verified,
            Language::Auto,
            "2025-06-15",
            &options,
        );
        assert_eq!(a, b);
        assert!(a.contains("1 <= n <= 3"));
        assert!(a.contains("Sources or References footer"));
        assert!(!a.contains("Strict citations"));
    }

    #[test]
    fn strict_flag_appends_the_directive() {
        let options = PromptOptions {
            strict_citations: true,
            sources_count: 2,
        };
        let prompt = system_prompt(
            AnswerStyle::Concise,
            AskMode::Verified,
            Language::En,
            "2025-06-15",
            &options,
        );
        assert!(prompt.contains("Strict citations"));
    }

    #[test]
    fn no_sources_means_no_citation_rules() {
        let prompt = system_prompt(
            AnswerStyle::Balanced,
            AskMode::Fast,
            Language::Auto,
            "2025-06-15",
            &PromptOptions::default(),
        );
        assert!(!prompt.contains("numbered sources"));
    }

    #[test]
    fn evidence_block_numbers_from_one() {
        let sources = vec![
            sample_source("First", "https://a.example/1"),
            sample_source("Second", "https://b.example/2"),
        ];
        let block = evidence_block(&sources);
        assert!(block.contains("[1] First"));
        assert!(block.contains("[2] Second"));
        assert!(block.contains("URL: https://a.example/1"));
        assert!(block.contains("Snippet: snippet text"));
    }

    #[test]
    fn evidence_block_truncates_long_fields() {
        let mut source = sample_source("T", "https://a.example");
        source.snippet = "s".repeat(2 * MAX_SNIPPET_CHARS);
        source.extracted_text = Some("e".repeat(2 * MAX_EXTRACTED_CHARS));
        let block = evidence_block(&[source]);
        let snippet_line = block
            .lines()
            .find(|l| l.starts_with("Snippet: "))
            .unwrap();
        assert_eq!(snippet_line.len(), "Snippet: ".len() + MAX_SNIPPET_CHARS);
        let extracted_line = block
            .lines()
            .find(|l| l.starts_with("Extracted: "))
            .unwrap();
        assert_eq!(
            extracted_line.len(),
            "Extracted: ".len() + MAX_EXTRACTED_CHARS
        );
    }

    #[test]
    fn facts_block_keeps_citation_markers() {
        let facts = vec![GroundedFact {
            fact: "Water boils at 100C at sea level".to_string(),
            citations: vec![1, 3],
        }];
        assert_eq!(
            facts_block(&facts),
            "- Water boils at 100C at sea level [1][3]"
        );
    }
}
