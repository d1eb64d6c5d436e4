//! Merging per-file candidates into the final, de-duplicated agent list.

use std::collections::HashSet;

use crate::candidate::{AgentCandidate, Candidate};

/// What two candidates must share to count as the same agent.
///
/// Resolved prompts collapse on their leading characters across the whole
/// scan. Candidates without usable content only collapse within one file,
/// so two unrelated files never hide each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Content(String),
    File(String),
}

impl DedupKey {
    fn of(agent: &AgentCandidate, prefix_chars: usize) -> Self {
        match agent.raw_content.as_known() {
            Some(text) if !text.is_empty() => {
                DedupKey::Content(text.chars().take(prefix_chars).collect())
            }
            _ => DedupKey::File(agent.source_file.clone()),
        }
    }
}

/// Accumulates candidates in scan order. The first candidate with a given
/// key (or id) wins; later ones are counted and dropped.
#[derive(Debug)]
pub struct Aggregator {
    prefix_chars: usize,
    seen_keys: HashSet<DedupKey>,
    seen_ids: HashSet<String>,
    agents: Vec<AgentCandidate>,
    prompts: usize,
    framework: usize,
    dropped: usize,
}

impl Aggregator {
    pub fn new(prefix_chars: usize) -> Self {
        Self {
            prefix_chars,
            seen_keys: HashSet::new(),
            seen_ids: HashSet::new(),
            agents: Vec::new(),
            prompts: 0,
            framework: 0,
            dropped: 0,
        }
    }

    /// Returns `true` when the candidate was kept.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        match &candidate {
            Candidate::Prompt(_) => self.prompts += 1,
            Candidate::Agent(_) => self.framework += 1,
        }
        let agent = candidate.into_agent();
        let key = DedupKey::of(&agent, self.prefix_chars);
        if self.seen_keys.contains(&key) || self.seen_ids.contains(&agent.id) {
            self.dropped += 1;
            return false;
        }
        self.seen_keys.insert(key);
        self.seen_ids.insert(agent.id.clone());
        self.agents.push(agent);
        true
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    pub fn prompt_candidates(&self) -> usize {
        self.prompts
    }

    pub fn framework_candidates(&self) -> usize {
        self.framework
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.dropped
    }

    pub fn finish(self) -> Vec<AgentCandidate> {
        self.agents
    }
}

/// Convenience for callers that already hold every candidate in order.
pub fn dedup(candidates: impl IntoIterator<Item = Candidate>, prefix_chars: usize) -> Vec<AgentCandidate> {
    let mut agg = Aggregator::new(prefix_chars);
    agg.extend(candidates);
    agg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{FrameworkTag, Value, MessageShape, PromptCandidate, PromptOrigin};

    fn prompt(file: &str, content: Value, line: u32) -> Candidate {
        Candidate::Prompt(PromptCandidate {
            source_file: file.into(),
            raw_content: content,
            line,
            shape: MessageShape::Mapping,
            origin: PromptOrigin::SequenceLiteral,
        })
    }

    fn agent(file: &str, content: Value, tools: &[&str]) -> Candidate {
        Candidate::Agent(AgentCandidate::new(
            file,
            FrameworkTag::LangGraph,
            content,
            tools.iter().map(|t| t.to_string()).collect(),
            1,
        ))
    }

    #[test]
    fn first_seen_wins_across_files() {
        let out = dedup(
            vec![
                prompt("a.py", Value::known("Same prompt."), 4),
                prompt("b.py", Value::known("Same prompt."), 9),
            ],
            2000,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_file, "a.py");
        assert_eq!(out[0].line, 4);
    }

    #[test]
    fn framework_candidate_keeps_its_tools_when_first() {
        let out = dedup(
            vec![
                agent("a.py", Value::known("Plan trips."), &["search"]),
                prompt("a.py", Value::known("Plan trips."), 2),
            ],
            2000,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].framework_tag, FrameworkTag::LangGraph);
        assert_eq!(out[0].tool_name_hints, vec!["search"]);
    }

    #[test]
    fn shared_prefix_collapses() {
        let long_a = format!("{}A", "x".repeat(10));
        let long_b = format!("{}B", "x".repeat(10));
        let out = dedup(
            vec![
                prompt("a.py", Value::known(long_a.clone()), 1),
                prompt("a.py", Value::known(long_b.clone()), 2),
            ],
            10,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_content, Value::known(long_a.clone()));
        let wider = dedup(
            vec![
                prompt("a.py", Value::known(long_a), 1),
                prompt("a.py", Value::known(long_b), 2),
            ],
            11,
        );
        assert_eq!(wider.len(), 2);
    }

    #[test]
    fn prefix_counts_characters_not_bytes() {
        let pair = || {
            vec![
                prompt("a.py", Value::known("ééX"), 1),
                prompt("a.py", Value::known("ééY"), 2),
            ]
        };
        assert_eq!(dedup(pair(), 2).len(), 1);
        assert_eq!(dedup(pair(), 3).len(), 2);
    }

    #[test]
    fn unresolved_fallback_id_never_hides_a_prompt_named_like_the_file() {
        let out = dedup(
            vec![
                prompt("a.py", Value::Unresolved, 1),
                prompt("b.py", Value::known("a.py"), 1),
            ],
            2000,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].raw_content, Value::known("a.py"));
    }

    #[test]
    fn unresolved_collapses_per_file_only() {
        let mut agg = Aggregator::new(2000);
        assert!(agg.push(agent("a.py", Value::Unresolved, &[])));
        assert!(!agg.push(prompt("a.py", Value::Unresolved, 3)));
        assert!(agg.push(prompt("b.py", Value::Unresolved, 1)));
        assert_eq!(agg.duplicates_dropped(), 1);
        assert_eq!(agg.prompt_candidates(), 2);
        assert_eq!(agg.framework_candidates(), 1);
        let out = agg.finish();
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].id, out[1].id);
    }

    #[test]
    fn ids_are_unique_in_output() {
        let out = dedup(
            vec![
                prompt("a.py", Value::known("one"), 1),
                prompt("a.py", Value::known("two"), 2),
                prompt("b.py", Value::known("one"), 1),
            ],
            2000,
        );
        let ids: HashSet<_> = out.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), out.len());
    }
}
