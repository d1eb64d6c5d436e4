//! Generic detection of chat-style system messages.
//!
//! Looks for `{"role": "system", "content": ...}` (or the keyword-call
//! equivalent) wherever a message list can appear: the `messages=` argument
//! of any call, any list or tuple literal, and any mapping literal on its
//! own. Nothing here knows about a particular framework.

use tracing::trace;

use crate::candidate::{Candidate, MessageShape, PromptCandidate, PromptOrigin, Value};
use crate::config::ScanConfig;
use crate::scope::{resolve, ScopeEnv};
use crate::syntax::{Call, DictLit, Expr};
use crate::visit::{MatchContext, Matcher};

/// Outcome of inspecting one element of a message sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMatch {
    System {
        content: Value,
        shape: MessageShape,
        line: u32,
    },
    /// Not a message, or a message with some other role.
    NotSystem,
    /// Looks like a message but its role cannot be read.
    Malformed { line: u32, reason: &'static str },
}

pub struct MessageMatcher {
    keyword: String,
    role: String,
}

impl MessageMatcher {
    pub fn new(keyword: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            role: role.into(),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(&config.messages_keyword, &config.system_role)
    }

    /// Classifies a single message-shaped expression.
    pub fn inspect(&self, element: &Expr, env: &ScopeEnv) -> ElementMatch {
        match element {
            Expr::Dict(dict) => self.inspect_mapping(dict, env),
            Expr::Call(call) => self.inspect_call(call, env),
            _ => ElementMatch::NotSystem,
        }
    }

    /// Duplicate keys: the last one wins. `**spread` entries and keys that
    /// do not resolve to text are ignored.
    fn inspect_mapping(&self, dict: &DictLit, env: &ScopeEnv) -> ElementMatch {
        let fields: Vec<(String, &Expr)> = dict
            .entries
            .iter()
            .filter_map(|entry| {
                let key = resolve(entry.key.as_ref()?, env);
                Some((key.as_known()?.to_string(), &entry.value))
            })
            .collect();
        self.classify(&fields, MessageShape::Mapping, dict.line, env)
    }

    fn inspect_call(&self, call: &Call, env: &ScopeEnv) -> ElementMatch {
        let fields: Vec<(String, &Expr)> = call
            .keywords
            .iter()
            .filter_map(|kw| Some((kw.name.clone()?, &kw.value)))
            .collect();
        self.classify(&fields, MessageShape::Call, call.line, env)
    }

    fn classify(
        &self,
        fields: &[(String, &Expr)],
        shape: MessageShape,
        line: u32,
        env: &ScopeEnv,
    ) -> ElementMatch {
        let field = |name: &str| {
            fields
                .iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| *value)
        };
        let Some(role) = field("role") else {
            return ElementMatch::NotSystem;
        };
        match resolve(role, env) {
            Value::Known(role) if role == self.role => ElementMatch::System {
                content: field("content")
                    .map(|content| resolve(content, env))
                    .unwrap_or(Value::Unresolved),
                shape,
                line,
            },
            Value::Known(_) => ElementMatch::NotSystem,
            Value::Unresolved => ElementMatch::Malformed {
                line,
                reason: "role is not a literal",
            },
        }
    }

    fn collect(
        &self,
        element: &Expr,
        origin: PromptOrigin,
        cx: &mut MatchContext<'_>,
    ) {
        match self.inspect(element, cx.env) {
            ElementMatch::System {
                content,
                shape,
                line,
            } => {
                trace!(file = cx.source_file, line, ?origin, "system message");
                cx.emit(Candidate::Prompt(PromptCandidate {
                    source_file: cx.source_file.to_string(),
                    raw_content: content,
                    line,
                    shape,
                    origin,
                }));
            }
            ElementMatch::NotSystem => {}
            ElementMatch::Malformed { line, reason } => {
                trace!(file = cx.source_file, line, reason, "skipping message element");
            }
        }
    }
}

impl Matcher for MessageMatcher {
    fn on_call(&mut self, call: &Call, cx: &mut MatchContext<'_>) {
        if let Some(value) = call.keyword(&self.keyword) {
            match value {
                Expr::List(items) | Expr::Tuple(items) => {
                    for item in items {
                        self.collect(item, PromptOrigin::MessagesArgument, cx);
                    }
                }
                Expr::Dict(_) | Expr::Call(_) => {
                    self.collect(value, PromptOrigin::MessagesArgument, cx)
                }
                _ => {}
            }
        }
        // `dict(role=..., content=...)` standing on its own
        if matches!(call.func.as_ref(), Expr::Name(name) if name == "dict") {
            self.collect(&Expr::Call(call.clone()), PromptOrigin::MappingLiteral, cx);
        }
    }

    fn on_sequence(&mut self, items: &[Expr], cx: &mut MatchContext<'_>) {
        for item in items {
            self.collect(item, PromptOrigin::SequenceLiteral, cx);
        }
    }

    fn on_mapping(&mut self, dict: &DictLit, cx: &mut MatchContext<'_>) {
        self.collect(&Expr::Dict(dict.clone()), PromptOrigin::MappingLiteral, cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceUnit;
    use crate::visit::Walker;

    fn prompts(src: &str) -> Vec<PromptCandidate> {
        let unit = SourceUnit::parse("m.py", src).unwrap();
        let mut matcher = MessageMatcher::new("messages", "system");
        let matchers: Vec<&mut dyn Matcher> = vec![&mut matcher];
        Walker::new("m.py", matchers)
            .walk_module(&unit.module)
            .into_iter()
            .filter_map(|c| match c {
                Candidate::Prompt(p) => Some(p),
                Candidate::Agent(_) => None,
            })
            .collect()
    }

    fn contents(src: &str) -> Vec<Value> {
        prompts(src).into_iter().map(|p| p.raw_content).collect()
    }

    #[test]
    fn literal_message_in_messages_argument() {
        let found = prompts(
            "client.chat(messages=[{'role': 'system', 'content': 'Be brief.'}, {'role': 'user', 'content': q}])\n",
        );
        // The dict is seen as an argument element, a list element and a mapping.
        assert!(found
            .iter()
            .any(|p| p.origin == PromptOrigin::MessagesArgument
                && p.raw_content == Value::known("Be brief.")
                && p.line == 1));
        assert!(found.iter().all(|p| p.raw_content == Value::known("Be brief.")));
    }

    #[test]
    fn propagated_constant_content() {
        let found = contents(
            "SYS = 'You are a planner.'\nmsgs = [{'role': 'system', 'content': SYS}]\n",
        );
        assert!(found.contains(&Value::known("You are a planner.")));
    }

    #[test]
    fn non_system_and_unresolved_roles_are_skipped() {
        assert!(contents("m = [{'role': 'user', 'content': 'hi'}]\n").is_empty());
        assert!(contents("m = [{'role': r, 'content': 'hi'}]\n").is_empty());
        assert!(contents("m = [{'content': 'hi'}, 'plain', 3]\n").is_empty());
    }

    #[test]
    fn last_duplicate_key_wins() {
        let found = contents("m = {'role': 'user', 'role': 'system', 'content': 'x'}\n");
        assert_eq!(found, vec![Value::known("x")]);
        let found = contents("m = {'role': 'system', 'role': 'user', 'content': 'x'}\n");
        assert!(found.is_empty());
    }

    #[test]
    fn keyword_call_shape() {
        let found = prompts("m = [ChatMessage(role='system', content='Keyword form.')]\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].shape, MessageShape::Call);
        assert_eq!(found[0].raw_content, Value::known("Keyword form."));

        let found = prompts("m = dict(role='system', content='Dict call.')\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].origin, PromptOrigin::MappingLiteral);
    }

    #[test]
    fn missing_or_dynamic_content_is_unresolved() {
        assert_eq!(
            contents("m = {'role': 'system'}\n"),
            vec![Value::Unresolved]
        );
        assert_eq!(
            contents("m = {'role': 'system', 'content': load()}\n"),
            vec![Value::Unresolved]
        );
    }

    #[test]
    fn content_resolved_against_enclosing_function() {
        let found = contents(
            "P = 'outer'\ndef f(P):\n    return {'role': 'system', 'content': P}\ndef g():\n    return {'role': 'system', 'content': P}\n",
        );
        assert_eq!(found, vec![Value::Unresolved, Value::known("outer")]);
    }

    #[test]
    fn interpolated_content_keeps_placeholders() {
        assert_eq!(
            contents("m = {'role': 'system', 'content': f'{persona}'}\n"),
            vec![Value::known("{...}")]
        );
        assert_eq!(
            contents("m = {'role': 'system', 'content': f'You are {name}.'}\n"),
            vec![Value::known("You are {...}.")]
        );
        assert_eq!(
            contents("m = {'role': 'system', 'content': f''}\n"),
            vec![Value::Unresolved]
        );
    }

    #[test]
    fn comprehension_target_shadows_module_constant() {
        let found = contents(
            "p = 'stale'\nm = [{'role': 'system', 'content': p} for p in prompts]\n",
        );
        assert!(!found.is_empty());
        assert!(found.iter().all(|v| *v == Value::Unresolved), "{found:?}");

        let found = contents(
            "p = 'kept'\nm = [{'role': 'system', 'content': p} for _ in range(3)]\n",
        );
        assert!(found.contains(&Value::known("kept")));
    }
}
