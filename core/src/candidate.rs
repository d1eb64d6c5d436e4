//! Values produced by the matchers and consumed by the aggregator.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Result of statically resolving an expression to text.
///
/// `Unresolved` means the value depends on something the analysis cannot
/// see. It is a legitimate outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "kebab-case")]
pub enum Value {
    Known(String),
    Unresolved,
}

impl Value {
    pub fn known(text: impl Into<String>) -> Self {
        Value::Known(text.into())
    }

    pub fn as_known(&self) -> Option<&str> {
        match self {
            Value::Known(text) => Some(text),
            Value::Unresolved => None,
        }
    }

    pub fn map(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Value::Known(text) => Value::Known(f(text)),
            Value::Unresolved => Value::Unresolved,
        }
    }

    /// Both sides must be known for the result to be known.
    pub fn concat(self, other: Value) -> Self {
        match (self, other) {
            (Value::Known(mut left), Value::Known(right)) => {
                left.push_str(&right);
                Value::Known(left)
            }
            _ => Value::Unresolved,
        }
    }
}

/// Which family of agent constructor produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkTag {
    /// Found through a role/content message literal.
    #[default]
    Generic,
    #[serde(rename = "langchain")]
    LangChain,
    #[serde(rename = "langgraph")]
    LangGraph,
}

impl fmt::Display for FrameworkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameworkTag::Generic => "generic",
            FrameworkTag::LangChain => "langchain",
            FrameworkTag::LangGraph => "langgraph",
        };
        f.write_str(name)
    }
}

/// Syntactic form of a matched system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageShape {
    /// `{"role": "system", "content": ...}`
    Mapping,
    /// `dict(role="system", content=...)` or any call with those keywords
    Call,
}

/// Where the generic matcher saw the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptOrigin {
    /// Value of a `messages=` keyword argument.
    MessagesArgument,
    /// Element of a list or tuple literal.
    SequenceLiteral,
    /// A mapping literal seen on its own.
    MappingLiteral,
}

/// A system prompt found by the generic message matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCandidate {
    pub source_file: String,
    pub raw_content: Value,
    pub line: u32,
    pub shape: MessageShape,
    pub origin: PromptOrigin,
}

/// A discovered agent. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCandidate {
    /// Hex SHA-256 of the resolved content, or of `source_file` when the
    /// content is unresolved or empty.
    pub id: String,
    pub source_file: String,
    pub framework_tag: FrameworkTag,
    /// Prompt text as a role classifier would read it (trimmed).
    pub role_text: Value,
    /// Prompt text exactly as extracted.
    pub raw_content: Value,
    pub tool_name_hints: Vec<String>,
    pub line: u32,
}

impl AgentCandidate {
    pub fn new(
        source_file: impl Into<String>,
        framework_tag: FrameworkTag,
        raw_content: Value,
        tool_name_hints: Vec<String>,
        line: u32,
    ) -> Self {
        let source_file = source_file.into();
        let id = candidate_id(&raw_content, &source_file);
        let role_text = raw_content.clone().map(|text| text.trim().to_string());
        Self {
            id,
            source_file,
            framework_tag,
            role_text,
            raw_content,
            tool_name_hints,
            line,
        }
    }

    /// Agent for a system prompt that carries no framework context.
    pub fn from_prompt(prompt: PromptCandidate) -> Self {
        Self::new(
            prompt.source_file,
            FrameworkTag::Generic,
            prompt.raw_content,
            Vec::new(),
            prompt.line,
        )
    }
}

/// Anything a matcher emits for one file, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Prompt(PromptCandidate),
    Agent(AgentCandidate),
}

impl Candidate {
    pub fn into_agent(self) -> AgentCandidate {
        match self {
            Candidate::Prompt(prompt) => AgentCandidate::from_prompt(prompt),
            Candidate::Agent(agent) => agent,
        }
    }
}

/// Stable identifier: a pure function of the content, falling back to the
/// file path when there is no usable content. The fallback is tagged so it
/// can never equal the hash of a prompt whose text happens to be a path.
pub fn candidate_id(content: &Value, source_file: &str) -> String {
    let digest = match content.as_known() {
        Some(text) if !text.is_empty() => Sha256::digest(text.as_bytes()),
        _ => Sha256::digest(format!("file:{source_file}").as_bytes()),
    };
    format!("{digest:x}")
}
