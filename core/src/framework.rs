//! Framework-specific agent constructors.
//!
//! A call is only recognised when its callee can be traced back to an import
//! of a configured module. The local name, not the symbol, is what the
//! matcher remembers, so `from langgraph.prebuilt import create_react_agent
//! as make` followed by `make(...)` is found while an unrelated function that
//! happens to be called `create_react_agent` is not.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::candidate::{AgentCandidate, Candidate, Value};
use crate::config::{ArgSlot, FrameworkRule, ScanConfig};
use crate::scope::{resolve, ScopeEnv};
use crate::syntax::{Call, Expr, ImportAlias, ImportFrom};
use crate::visit::{MatchContext, Matcher};

/// Bound on how many variable definitions are followed for a tools list.
const MAX_TOOL_INDIRECTION: usize = 8;

pub struct FrameworkMatcher {
    rules: Vec<FrameworkRule>,
    /// Local name -> index of the rule whose constructor it refers to.
    constructors: HashMap<String, usize>,
    /// Local name -> full dotted module it refers to.
    modules: HashMap<String, String>,
}

impl FrameworkMatcher {
    pub fn new(rules: Vec<FrameworkRule>) -> Self {
        Self {
            rules,
            constructors: HashMap::new(),
            modules: HashMap::new(),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.frameworks.clone())
    }

    fn rule_for_symbol(&self, module: &str, symbol: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|rule| rule.symbol == symbol && rule.matches_module(module))
    }

    /// Which rule, if any, the callee of a call refers to.
    fn rule_for_callee(&self, func: &Expr) -> Option<usize> {
        match func {
            Expr::Name(name) => self.constructors.get(name).copied(),
            Expr::Attribute { object, attr } => {
                let base = object.dotted_name()?;
                let (head, rest) = match base.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (base.as_str(), None),
                };
                let root = self.modules.get(head)?;
                let module = match rest {
                    Some(rest) => format!("{root}.{rest}"),
                    None => root.clone(),
                };
                self.rule_for_symbol(&module, attr)
            }
            _ => None,
        }
    }
}

impl Matcher for FrameworkMatcher {
    fn on_import(&mut self, names: &[ImportAlias]) {
        for alias in names {
            let local = alias.module_binding().to_string();
            let module = match &alias.alias {
                Some(_) => alias.name.clone(),
                None => local.clone(),
            };
            self.constructors.remove(&local);
            self.modules.insert(local, module);
        }
    }

    fn on_import_from(&mut self, import: &ImportFrom) {
        // Relative imports cannot name a third-party framework.
        if import.module.starts_with('.') {
            for alias in &import.names {
                self.constructors.remove(alias.local_name());
                self.modules.remove(alias.local_name());
            }
            return;
        }
        if import.wildcard {
            for (idx, rule) in self.rules.iter().enumerate() {
                if rule.matches_module(&import.module) {
                    self.constructors.insert(rule.symbol.clone(), idx);
                }
            }
            return;
        }
        for alias in &import.names {
            let local = alias.local_name().to_string();
            match self.rule_for_symbol(&import.module, &alias.name) {
                Some(idx) => {
                    trace!(module = %import.module, local = %local, "tracking agent constructor");
                    self.constructors.insert(local.clone(), idx);
                }
                None => {
                    self.constructors.remove(&local);
                }
            }
            // `from langchain import agents` makes `agents.create_react_agent` reachable.
            self.modules
                .insert(local, format!("{}.{}", import.module, alias.name));
        }
    }

    fn on_call(&mut self, call: &Call, cx: &mut MatchContext<'_>) {
        let Some(idx) = self.rule_for_callee(&call.func) else {
            return;
        };
        let rule = &self.rules[idx];
        let prompt = slot_argument(call, &rule.prompt)
            .map(|expr| resolve(expr, cx.env))
            .unwrap_or(Value::Unresolved);
        let tools = slot_argument(call, &rule.tools)
            .map(|expr| tool_names(expr, cx.env, 0))
            .unwrap_or_default();
        debug!(
            file = cx.source_file,
            line = call.line,
            framework = %rule.tag,
            tools = tools.len(),
            "agent constructor call"
        );
        cx.emit(Candidate::Agent(AgentCandidate::new(
            cx.source_file,
            rule.tag,
            prompt,
            tools,
            call.line,
        )));
    }
}

/// Keyword names are tried in order before the positional index.
fn slot_argument<'c>(call: &'c Call, slot: &ArgSlot) -> Option<&'c Expr> {
    slot.keywords
        .iter()
        .find_map(|name| call.keyword(name))
        .or_else(|| slot.position.and_then(|idx| call.positional(idx)))
}

/// Tool names from a tools argument.
///
/// Bare names give their identifier, string literals their text, `*spread`
/// and `+` are followed, and a variable is replaced by the expression it was
/// last assigned from. Anything else contributes nothing.
pub fn tool_names(expr: &Expr, env: &ScopeEnv, depth: usize) -> Vec<String> {
    if depth > MAX_TOOL_INDIRECTION {
        return Vec::new();
    }
    match expr {
        Expr::List(items) | Expr::Tuple(items) => items
            .iter()
            .flat_map(|item| match item {
                Expr::Name(name) => vec![name.clone()],
                Expr::Str(_) => resolve(item, env)
                    .as_known()
                    .map(|text| vec![text.to_string()])
                    .unwrap_or_default(),
                Expr::Starred(inner) => tool_names(inner, env, depth + 1),
                _ => Vec::new(),
            })
            .collect(),
        Expr::Name(name) => env
            .definition_of(name)
            .map(|definition| tool_names(definition, env, depth + 1))
            .unwrap_or_default(),
        Expr::Concat(left, right) => {
            let mut names = tool_names(left, env, depth + 1);
            names.extend(tool_names(right, env, depth + 1));
            names
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::FrameworkTag;
    use crate::source::SourceUnit;
    use crate::visit::Walker;

    fn agents(src: &str) -> Vec<AgentCandidate> {
        let unit = SourceUnit::parse("agent.py", src).unwrap();
        let mut matcher = FrameworkMatcher::from_config(&ScanConfig::default());
        let matchers: Vec<&mut dyn Matcher> = vec![&mut matcher];
        Walker::new("agent.py", matchers)
            .walk_module(&unit.module)
            .into_iter()
            .map(Candidate::into_agent)
            .collect()
    }

    #[test]
    fn aliased_import_with_tools_list() {
        let found = agents(
            "from langgraph.prebuilt import create_react_agent as make\n\
             SYS = 'You book meetings.'\n\
             agent = make(model, tools=[search, calendar], prompt=SYS)\n",
        );
        assert_eq!(found.len(), 1);
        let agent = &found[0];
        assert_eq!(agent.framework_tag, FrameworkTag::LangGraph);
        assert_eq!(agent.raw_content, Value::known("You book meetings."));
        assert_eq!(agent.tool_name_hints, vec!["search", "calendar"]);
        assert_eq!(agent.line, 3);
    }

    #[test]
    fn unimported_constructor_is_ignored() {
        let found = agents(
            "def create_react_agent(*a, **k):\n    pass\n\
             create_react_agent(llm, tools=[x], prompt='nope')\n",
        );
        assert!(found.is_empty());
    }

    #[test]
    fn module_alias_attribute_call() {
        let found = agents(
            "import langchain.agents as lca\n\
             lca.create_react_agent(llm, [web], 'Use the web.')\n\
             import langchain.agents\n\
             langchain.agents.create_react_agent(llm, tools=['calc'], prompt='Math.')\n",
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].framework_tag, FrameworkTag::LangChain);
        assert_eq!(found[0].raw_content, Value::known("Use the web."));
        assert_eq!(found[0].tool_name_hints, vec!["web"]);
        assert_eq!(found[1].tool_name_hints, vec!["calc"]);
    }

    #[test]
    fn submodule_imported_by_name() {
        let found = agents(
            "from langgraph import prebuilt\nprebuilt.create_react_agent(m, [], prompt='Hi')\n",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].framework_tag, FrameworkTag::LangGraph);
    }

    #[test]
    fn tools_followed_through_variables() {
        let found = agents(
            "from langgraph.prebuilt import create_react_agent\n\
             base = [search]\n\
             extra = base + [calendar]\n\
             extra += ['mail']\n\
             create_react_agent(m, tools=[*extra, notes])\n",
        );
        assert_eq!(
            found[0].tool_name_hints,
            vec!["search", "calendar", "mail", "notes"]
        );
        assert_eq!(found[0].raw_content, Value::Unresolved);
    }

    #[test]
    fn self_referencing_tools_do_not_repeat() {
        let found = agents(
            "from langgraph.prebuilt import create_react_agent\n\
             tools = [a]\n\
             tools = tools + [b]\n\
             create_react_agent(m, tools)\n",
        );
        assert_eq!(found[0].tool_name_hints, vec!["a", "b"]);
    }

    #[test]
    fn langgraph_accepts_legacy_prompt_keywords() {
        let found = agents(
            "from langgraph.prebuilt import create_react_agent\n\
             create_react_agent(m, [], state_modifier='Legacy prompt.')\n",
        );
        assert_eq!(found[0].raw_content, Value::known("Legacy prompt."));
    }

    #[test]
    fn rebinding_import_drops_tracking() {
        let found = agents(
            "from langgraph.prebuilt import create_react_agent\n\
             from mytools import create_react_agent\n\
             create_react_agent(m, [], prompt='x')\n",
        );
        assert!(found.is_empty());
    }
}
