// ZapLine Engine — Knowledge Retrieval
//
// Scores the agent's authored knowledge pool against the inbound message
// with a transparent additive rule system — deliberately NOT an embedding
// search, so knowledge-base authors can predict and tune which snippets
// surface. The weight set and the kind→keyword table are versioned
// configuration data, independent of the scoring loop.

use crate::atoms::types::{ChunkKind, KnowledgeChunk, MatchKind, ScoredMatch};

// ── Scoring configuration ──────────────────────────────────────────────────

/// Additive score weights. Tuned together with the keyword table below;
/// bump `KEYWORD_TABLE_VERSION` when either changes.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    /// Query contains the whole title, or the title contains the whole query.
    pub title_containment: i32,
    /// Per title word (len > 2) overlapping a query word.
    pub title_word: i32,
    /// Per query word (len > 2) found in the chunk content.
    pub content_word: i32,
    /// Per query word found in the tag string (non-empty tags only).
    pub tag_word: i32,
    /// Per occurrence of a kind-keyword in the query.
    pub kind_keyword: i32,
    /// Flat bonus multiplied by the chunk's priority, regardless of match
    /// quality.
    pub priority_factor: i32,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            title_containment: 100,
            title_word: 20,
            content_word: 10,
            tag_word: 15,
            kind_keyword: 25,
            priority_factor: 5,
        }
    }
}

pub const KEYWORD_TABLE_VERSION: u32 = 1;

/// Fixed trigger vocabulary per chunk kind (Portuguese-first, English
/// mirrored — matching the customer base).
pub fn kind_keywords(kind: ChunkKind) -> &'static [&'static str] {
    match kind {
        ChunkKind::Objection => &[
            "preço", "caro", "desconto", "valor", "investimento", "barato",
            "price", "expensive", "discount", "cost",
        ],
        ChunkKind::Faq => &[
            "como", "quando", "onde", "dúvida", "pergunta", "funciona",
            "how", "when", "where", "question",
        ],
        ChunkKind::Case => &[
            "exemplo", "cliente", "resultado", "depoimento",
            "case", "example", "result", "story",
        ],
        ChunkKind::Feature => &[
            "recurso", "função", "funcionalidade", "plano",
            "feature", "plan", "include",
        ],
        ChunkKind::Process => &[
            "processo", "etapa", "passo", "prazo", "entrega",
            "process", "step", "deadline",
        ],
        ChunkKind::Script => &[
            "roteiro", "abordagem", "apresentação",
            "script", "pitch", "approach",
        ],
        ChunkKind::Policy => &[
            "política", "regra", "garantia", "reembolso", "cancelamento", "troca",
            "policy", "refund", "warranty", "cancel",
        ],
        ChunkKind::Manual => &[
            "manual", "instrução", "guia", "tutorial", "configurar", "instalar",
            "instruction", "guide", "setup", "install",
        ],
    }
}

// ── Retrieval ──────────────────────────────────────────────────────────────

/// Score the pool against `query` and return the top-K matches, highest
/// score first; ties broken by chunk priority, then recency. Inactive
/// chunks never participate; a total score of zero excludes a chunk.
pub fn search(chunks: &[KnowledgeChunk], query: &str, top_k: usize) -> Vec<ScoredMatch> {
    search_weighted(chunks, query, top_k, &Weights::default())
}

pub fn search_weighted(
    chunks: &[KnowledgeChunk],
    query: &str,
    top_k: usize,
    weights: &Weights,
) -> Vec<ScoredMatch> {
    let query_lower = query.to_lowercase();
    // Words keep their accents but shed surrounding punctuation, so
    // "desconto?" still matches content and tags.
    let query_words: Vec<String> = query_lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.chars().count() > 2)
        .collect();

    let mut matches: Vec<ScoredMatch> = chunks
        .iter()
        .filter(|c| c.is_active)
        .filter_map(|chunk| {
            let (score, matched_on) = score_chunk(chunk, &query_lower, &query_words, weights);
            if score > 0 {
                Some(ScoredMatch { chunk: chunk.clone(), score, matched_on })
            } else {
                None
            }
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.chunk.priority.cmp(&a.chunk.priority))
            .then_with(|| b.chunk.updated_at.cmp(&a.chunk.updated_at))
    });
    matches.truncate(top_k);
    matches
}

/// Additive score for one chunk, plus the strongest class of evidence seen
/// (Title > Tag > TypeKeyword > Content — labeling only, ranking is by
/// score).
fn score_chunk(
    chunk: &KnowledgeChunk,
    query_lower: &str,
    query_words: &[String],
    weights: &Weights,
) -> (i32, MatchKind) {
    let title_lower = chunk.title.to_lowercase();
    let content_lower = chunk.content.to_lowercase();

    let mut title_points = 0;
    let mut tag_points = 0;
    let mut keyword_points = 0;
    let mut content_points = 0;

    // Whole-title containment, either direction.
    if !title_lower.is_empty()
        && (query_lower.contains(&title_lower) || title_lower.contains(query_lower))
    {
        title_points += weights.title_containment;
    }

    // Partial title overlap: title words vs. query words, substring either way.
    for title_word in title_lower.split_whitespace().filter(|w| w.chars().count() > 2) {
        let overlaps = query_words
            .iter()
            .any(|qw| title_word.contains(qw) || qw.contains(title_word));
        if overlaps {
            title_points += weights.title_word;
        }
    }

    for query_word in query_words {
        if content_lower.contains(query_word) {
            content_points += weights.content_word;
        }
    }

    if let Some(tags) = chunk.tags.as_deref() {
        let tags_lower = tags.to_lowercase();
        if !tags_lower.trim().is_empty() {
            for query_word in query_words {
                if tags_lower.contains(query_word) {
                    tag_points += weights.tag_word;
                }
            }
        }
    }

    for keyword in kind_keywords(chunk.kind) {
        let occurrences = query_lower.matches(keyword).count() as i32;
        keyword_points += occurrences * weights.kind_keyword;
    }

    let score = title_points
        + tag_points
        + keyword_points
        + content_points
        + chunk.priority * weights.priority_factor;

    let matched_on = if title_points > 0 {
        MatchKind::Title
    } else if tag_points > 0 {
        MatchKind::Tag
    } else if keyword_points > 0 {
        MatchKind::TypeKeyword
    } else {
        MatchKind::Content
    };

    (score, matched_on)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn chunk(id: &str, title: &str, content: &str, kind: ChunkKind, priority: i32) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            kind,
            priority,
            tags: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn exact_title_outranks_content_only_match() {
        let title_hit = chunk("a", "planos e preços", "Tabela completa.", ChunkKind::Faq, 0);
        let mut content_hit =
            chunk("b", "visão geral", "Nossos planos e preços estão no site.", ChunkKind::Faq, 0);
        // Up to ten points of priority advantage must not flip the ranking.
        content_hit.priority = 10;

        let results = search(&[content_hit, title_hit], "planos e preços", 5);
        assert_eq!(results[0].chunk.id, "a");
        assert_eq!(results[0].matched_on, MatchKind::Title);
    }

    #[test]
    fn disabled_chunks_never_surface() {
        let mut c = chunk("a", "olá", "Bem-vindo!", ChunkKind::Script, 5);
        c.is_active = false;
        assert!(search(&[c], "olá", 5).is_empty());
    }

    #[test]
    fn zero_score_is_excluded() {
        let c = chunk("a", "entrega", "Prazos de envio.", ChunkKind::Process, 0);
        assert!(search(&[c], "xyz", 5).is_empty());
    }

    #[test]
    fn title_containment_scores_at_least_one_hundred() {
        let c = chunk("a", "olá", "Bem-vindo!", ChunkKind::Script, 1);
        let results = search(&[c], "olá", 5);
        assert_eq!(results.len(), 1);
        // +100 containment +5×priority (short title has no words > 2 chars).
        assert!(results[0].score >= 105, "score was {}", results[0].score);
    }

    #[test]
    fn kind_keywords_add_per_occurrence() {
        let c = chunk("a", "objeções comuns", "Respostas prontas.", ChunkKind::Objection, 0);
        let results = search(&[c], "está muito caro, tem desconto?", 5);
        assert_eq!(results.len(), 1);
        // "caro" + "desconto" → 2 × 25.
        assert_eq!(results[0].score, 50);
        assert_eq!(results[0].matched_on, MatchKind::TypeKeyword);
    }

    #[test]
    fn tag_evidence_beats_keyword_and_content_labels() {
        let mut c = chunk("a", "frete", "Prazo de entrega por região.", ChunkKind::Process, 0);
        c.tags = Some("envio, entrega, correios".into());
        let results = search(&[c], "qual o prazo de entrega?", 5);
        assert_eq!(results[0].matched_on, MatchKind::Tag);
    }

    #[test]
    fn ties_break_by_priority_then_recency() {
        let older = KnowledgeChunk {
            updated_at: Utc::now() - Duration::days(3),
            ..chunk("old", "garantia", "Doze meses.", ChunkKind::Policy, 2)
        };
        let newer = KnowledgeChunk {
            updated_at: Utc::now(),
            ..chunk("new", "garantia", "Doze meses.", ChunkKind::Policy, 2)
        };
        let higher = chunk("pri", "garantia", "Doze meses.", ChunkKind::Policy, 3);

        let results = search(&[older.clone(), newer.clone(), higher.clone()], "garantia", 5);
        assert_eq!(results[0].chunk.id, "pri");
        assert_eq!(results[1].chunk.id, "new");
        assert_eq!(results[2].chunk.id, "old");
    }

    #[test]
    fn top_k_truncates() {
        let pool: Vec<KnowledgeChunk> = (0..10)
            .map(|i| chunk(&format!("c{}", i), "garantia", "Doze meses.", ChunkKind::Policy, i))
            .collect();
        assert_eq!(search(&pool, "garantia", 3).len(), 3);
    }
}
