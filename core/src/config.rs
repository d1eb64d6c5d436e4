//! Scan configuration. Every struct is `#[serde(default)]` so a YAML file
//! only needs the keys it wants to override.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidate::FrameworkTag;
use crate::error::{ScanError, ScanResult};

/// Top-level configuration for a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File extensions (without the dot, case-insensitive) to scan.
    pub extensions: Vec<String>,
    /// Glob patterns for paths to skip. Matching directories are pruned.
    pub ignore_globs: Vec<String>,
    pub follow_links: bool,
    /// Files larger than this are skipped without being parsed.
    pub max_file_bytes: u64,
    /// Number of leading characters of a prompt used as its dedup key.
    pub dedup_prefix_chars: usize,
    /// Keyword argument whose value is inspected as a message list.
    pub messages_keyword: String,
    /// Role literal that marks a system message.
    pub system_role: String,
    pub frameworks: Vec<FrameworkRule>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".into()],
            ignore_globs: vec![
                "**/.git/**".into(),
                "**/.hg/**".into(),
                "**/.venv/**".into(),
                "**/venv/**".into(),
                "**/.tox/**".into(),
                "**/node_modules/**".into(),
                "**/__pycache__/**".into(),
                "**/site-packages/**".into(),
                "**/build/**".into(),
                "**/dist/**".into(),
            ],
            follow_links: false,
            max_file_bytes: 2_000_000,
            dedup_prefix_chars: 2000,
            messages_keyword: "messages".into(),
            system_role: "system".into(),
            frameworks: vec![FrameworkRule::langchain(), FrameworkRule::langgraph()],
        }
    }
}

impl ScanConfig {
    pub fn from_yaml_str(text: &str) -> ScanResult<Self> {
        let cfg: ScanConfig = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> ScanResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Checks the invariants the scanner relies on.
    pub fn validate(&self) -> ScanResult<()> {
        if self.dedup_prefix_chars == 0 {
            return Err(ScanError::InvalidConfig(
                "dedup_prefix_chars must be greater than zero".into(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(ScanError::InvalidConfig(
                "at least one file extension is required".into(),
            ));
        }
        for rule in &self.frameworks {
            if rule.module_prefix.trim().is_empty() || rule.symbol.trim().is_empty() {
                return Err(ScanError::InvalidConfig(format!(
                    "framework rule for {} needs both module_prefix and symbol",
                    rule.tag
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive extension check used by the file enumerator.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// A known agent-constructor entry point, identified by where it is imported from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkRule {
    pub tag: FrameworkTag,
    /// Dotted module prefix, matched on whole segments.
    pub module_prefix: String,
    /// Name of the constructor inside that module.
    pub symbol: String,
    pub prompt: ArgSlot,
    pub tools: ArgSlot,
}

impl Default for FrameworkRule {
    fn default() -> Self {
        Self::langchain()
    }
}

impl FrameworkRule {
    /// `langchain.agents.create_react_agent(llm, tools, prompt)`
    pub fn langchain() -> Self {
        Self {
            tag: FrameworkTag::LangChain,
            module_prefix: "langchain.agents".into(),
            symbol: "create_react_agent".into(),
            prompt: ArgSlot::new(&["prompt"], Some(2)),
            tools: ArgSlot::new(&["tools"], Some(1)),
        }
    }

    /// `langgraph.prebuilt.create_react_agent(model, tools, *, prompt=...)`
    pub fn langgraph() -> Self {
        Self {
            tag: FrameworkTag::LangGraph,
            module_prefix: "langgraph.prebuilt".into(),
            symbol: "create_react_agent".into(),
            prompt: ArgSlot::new(&["prompt", "state_modifier", "messages_modifier"], None),
            tools: ArgSlot::new(&["tools"], Some(1)),
        }
    }

    /// Segment-aware prefix match: `langchain.agents` matches
    /// `langchain.agents.react` but not `langchain.agents_extra`.
    pub fn matches_module(&self, module: &str) -> bool {
        let prefix = self.module_prefix.trim_end_matches('.');
        module == prefix
            || module
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Where to find one argument of a constructor call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgSlot {
    /// Accepted keyword names, earlier entries win.
    pub keywords: Vec<String>,
    /// Zero-based positional index, used when no keyword matched.
    pub position: Option<usize>,
}

impl ArgSlot {
    pub fn new(keywords: &[&str], position: Option<usize>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            position,
        }
    }
}
