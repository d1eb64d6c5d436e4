//! Scope-aware constant resolution.
//!
//! A [`ScopeEnv`] is a stack of symbol tables (module at the bottom, one per
//! enclosing function above it). Each binding keeps the resolved text value
//! and the expression it was assigned from, so callers that need the shape
//! of a value (a tool list) can look past its text.
//!
//! Resolution is order-sensitive: a name reflects only the assignments the
//! walker has already seen. Nothing is propagated backwards.

use std::collections::HashMap;

use crate::candidate::Value;
use crate::syntax::{Call, Expr, StrLit, StrPart};

/// Stand-in text for an interpolated expression inside an f-string.
pub const PLACEHOLDER: &str = "{...}";

/// Zero-argument string methods applied to an already resolved value.
const STRING_METHODS: &[&str] = &["strip", "lstrip", "rstrip", "lower", "upper"];

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub value: Value,
    /// Expression the name was assigned from, when there was one.
    pub definition: Option<Expr>,
}

impl Binding {
    pub fn unresolved() -> Self {
        Self {
            value: Value::Unresolved,
            definition: None,
        }
    }
}

type Frame = HashMap<String, Binding>;

/// Stack of lexical scopes for one file scan. The first frame is the module.
#[derive(Debug, Clone)]
pub struct ScopeEnv {
    frames: Vec<Frame>,
}

impl Default for ScopeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeEnv {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new()],
        }
    }

    /// Opens a function scope with every parameter bound to unresolved.
    pub fn push_function<'p>(&mut self, params: impl IntoIterator<Item = &'p str>) {
        let frame = params
            .into_iter()
            .map(|name| (name.to_string(), Binding::unresolved()))
            .collect();
        self.frames.push(frame);
    }

    /// Closes the innermost function scope. The module scope is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Writes into the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), binding);
        }
    }

    pub fn bind_unresolved(&mut self, name: impl Into<String>) {
        self.bind(name, Binding::unresolved());
    }

    /// Innermost binding of `name`, if any scope has one.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
    }

    pub fn value_of(&self, name: &str) -> Value {
        self.lookup(name)
            .map(|b| b.value.clone())
            .unwrap_or(Value::Unresolved)
    }

    pub fn definition_of(&self, name: &str) -> Option<&Expr> {
        self.lookup(name).and_then(|b| b.definition.as_ref())
    }
}

/// Captures the defining expression of an assignment as of now.
///
/// Names standing where a sequence is expected (the whole value, operands
/// of `+`, `*spread` elements) are replaced by their own current
/// definitions, or by an empty opaque node when they have none. A stored
/// definition therefore never refers back to a later rebinding of the same
/// name, so `tools = tools + [x]` cannot loop.
pub fn snapshot_definition(expr: &Expr, env: &ScopeEnv) -> Expr {
    match expr {
        Expr::Name(name) => env
            .definition_of(name)
            .cloned()
            .unwrap_or(Expr::Opaque(Vec::new())),
        Expr::Concat(left, right) => Expr::Concat(
            Box::new(snapshot_definition(left, env)),
            Box::new(snapshot_definition(right, env)),
        ),
        Expr::List(items) => Expr::List(items.iter().map(|i| snapshot_element(i, env)).collect()),
        Expr::Tuple(items) => {
            Expr::Tuple(items.iter().map(|i| snapshot_element(i, env)).collect())
        }
        other => other.clone(),
    }
}

fn snapshot_element(item: &Expr, env: &ScopeEnv) -> Expr {
    match item {
        Expr::Starred(inner) => Expr::Starred(Box::new(snapshot_definition(inner, env))),
        other => other.clone(),
    }
}

/// Resolves an expression to text, or `Unresolved` when it depends on
/// anything other than literals and names already bound to literals.
pub fn resolve(expr: &Expr, env: &ScopeEnv) -> Value {
    match expr {
        Expr::Str(lit) => resolve_str(lit),
        Expr::Name(name) => env.value_of(name),
        Expr::Concat(left, right) => resolve(left, env).concat(resolve(right, env)),
        Expr::Call(call) => resolve_call(call, env),
        Expr::Attribute { .. }
        | Expr::List(_)
        | Expr::Tuple(_)
        | Expr::Dict(_)
        | Expr::Starred(_)
        | Expr::Lambda(_)
        | Expr::Walrus { .. }
        | Expr::Comprehension(_)
        | Expr::Opaque(_) => Value::Unresolved,
    }
}

/// Literal text is kept verbatim; each interpolation becomes [`PLACEHOLDER`].
/// An f-string whose substituted text is blank is unresolved.
fn resolve_str(lit: &StrLit) -> Value {
    let mut text = String::new();
    for part in &lit.parts {
        match part {
            StrPart::Text(t) => text.push_str(t),
            StrPart::Interpolation(_) => text.push_str(PLACEHOLDER),
        }
    }
    if lit.templated && text.trim().is_empty() {
        Value::Unresolved
    } else {
        Value::Known(text)
    }
}

fn resolve_call(call: &Call, env: &ScopeEnv) -> Value {
    let no_keywords = call.keywords.is_empty();
    match call.func.as_ref() {
        Expr::Attribute { object, attr } => {
            if STRING_METHODS.contains(&attr.as_str()) && call.args.is_empty() && no_keywords {
                return resolve(object, env).map(|base| apply_method(attr, base));
            }
            if attr == "format" {
                // Best effort: the template text with its fields left in place.
                return resolve(object, env);
            }
            if attr == "dedent"
                && object.dotted_name().as_deref() == Some("textwrap")
                && call.args.len() == 1
                && no_keywords
            {
                return resolve(&call.args[0], env).map(|text| dedent(&text));
            }
            Value::Unresolved
        }
        Expr::Name(name) if call.args.len() == 1 && no_keywords => match name.as_str() {
            "str" => resolve(&call.args[0], env),
            "dedent" => resolve(&call.args[0], env).map(|text| dedent(&text)),
            _ => Value::Unresolved,
        },
        _ => Value::Unresolved,
    }
}

fn apply_method(method: &str, base: String) -> String {
    match method {
        "strip" => base.trim().to_string(),
        "lstrip" => base.trim_start().to_string(),
        "rstrip" => base.trim_end().to_string(),
        "lower" => base.to_lowercase(),
        "upper" => base.to_uppercase(),
        _ => base,
    }
}

/// `textwrap.dedent`: removes the longest common leading whitespace of all
/// non-blank lines; blank lines are normalised to empty.
pub fn dedent(text: &str) -> String {
    let margin = text
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| &line[..line.len() - line.trim_start_matches([' ', '\t']).len()])
        .reduce(common_prefix)
        .unwrap_or("");

    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.strip_prefix(margin).unwrap_or(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn common_prefix<'a>(a: &'a str, b: &'a str) -> &'a str {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceUnit;
    use crate::syntax::Stmt;

    /// Binds every top-level `name = value` of `src` in order, then resolves `name`.
    fn resolve_name(src: &str, name: &str) -> Value {
        let unit = SourceUnit::parse("t.py", src).unwrap();
        let mut env = ScopeEnv::new();
        for stmt in &unit.module.body {
            if let Stmt::Assign { targets, value, .. } = stmt {
                let resolved = resolve(value, &env);
                for target in targets {
                    for n in target.names() {
                        env.bind(
                            n,
                            Binding {
                                value: resolved.clone(),
                                definition: Some(value.clone()),
                            },
                        );
                    }
                }
            }
        }
        env.value_of(name)
    }

    #[test]
    fn literal_and_simple_propagation() {
        assert_eq!(resolve_name("p = 'hello'\n", "p"), Value::known("hello"));
        assert_eq!(resolve_name("p = 'hello'\nq = p\n", "q"), Value::known("hello"));
        assert_eq!(resolve_name("q = p\np = 'late'\n", "q"), Value::Unresolved);
    }

    #[test]
    fn concatenation() {
        assert_eq!(resolve_name("p = 'a' + 'b'\n", "p"), Value::known("ab"));
        assert_eq!(
            resolve_name("p = 'a' + external_call()\n", "p"),
            Value::Unresolved
        );
        assert_eq!(
            resolve_name("base = 'You are '\np = base + 'kind.'\n", "p"),
            Value::known("You are kind.")
        );
    }

    #[test]
    fn templated_strings_use_placeholders() {
        assert_eq!(
            resolve_name("p = f'Hello {user}, today is {day}.'\n", "p"),
            Value::known("Hello {...}, today is {...}.")
        );
        assert_eq!(resolve_name("p = f'{prompt}'\n", "p"), Value::known("{...}"));
        assert_eq!(resolve_name("p = f''\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = f'   '\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = ''\n", "p"), Value::known(""));
    }

    #[test]
    fn overly_long_concatenation_is_unresolved() {
        let short = vec!["'a'"; 20].join(" + ");
        assert_eq!(
            resolve_name(&format!("p = {short}\n"), "p"),
            Value::known("a".repeat(20))
        );
        let long = vec!["'a'"; 300].join(" + ");
        assert_eq!(resolve_name(&format!("p = {long}\n"), "p"), Value::Unresolved);
    }

    #[test]
    fn string_methods_and_wrappers() {
        assert_eq!(resolve_name("p = '  hi  '.strip()\n", "p"), Value::known("hi"));
        assert_eq!(resolve_name("p = 'Hi'.upper()\n", "p"), Value::known("HI"));
        assert_eq!(resolve_name("p = str('x')\n", "p"), Value::known("x"));
        assert_eq!(
            resolve_name("p = 'Hi {name}'.format(name=n)\n", "p"),
            Value::known("Hi {name}")
        );
        assert_eq!(resolve_name("p = 'a'.replace('a', 'b')\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = 'x'.strip('x')\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = str(a, b)\n", "p"), Value::Unresolved);
    }

    #[test]
    fn dedent_wrappers() {
        let src = "import textwrap\np = textwrap.dedent('''\n    You are terse.\n      Indented.\n    ''')\n";
        assert_eq!(
            resolve_name(src, "p"),
            Value::known("\nYou are terse.\n  Indented.\n")
        );
    }

    #[test]
    fn other_expressions_are_unresolved() {
        assert_eq!(resolve_name("p = cfg['prompt']\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = settings.prompt\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = 'ab' * 2\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = b'bytes'\n", "p"), Value::Unresolved);
        assert_eq!(resolve_name("p = 'x'\n", "missing"), Value::Unresolved);
    }

    #[test]
    fn innermost_binding_wins_even_when_unresolved() {
        let mut env = ScopeEnv::new();
        env.bind(
            "p",
            Binding {
                value: Value::known("outer"),
                definition: None,
            },
        );
        env.push_function(["p"]);
        assert_eq!(env.value_of("p"), Value::Unresolved);
        env.pop();
        assert_eq!(env.value_of("p"), Value::known("outer"));
    }

    #[test]
    fn module_scope_is_never_popped() {
        let mut env = ScopeEnv::new();
        env.pop();
        env.pop();
        env.bind(
            "p",
            Binding {
                value: Value::known("module"),
                definition: None,
            },
        );
        env.pop();
        assert_eq!(env.value_of("p"), Value::known("module"));
    }

    #[test]
    fn dedent_matches_textwrap() {
        assert_eq!(dedent("  a\n    b\n  c"), "a\n  b\nc");
        assert_eq!(dedent("\ta\n\tb"), "a\nb");
        assert_eq!(dedent("  a\n\n  b"), "a\n\nb");
        assert_eq!(dedent("no indent\n  here"), "no indent\n  here");
    }
}
