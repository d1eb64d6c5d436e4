//! Single-pass traversal of a lowered module.
//!
//! The [`Walker`] owns the scope stack and performs the assignment side
//! effects (constant propagation). Matchers plug in through [`Matcher`] and
//! only ever see the environment as it stands at the node being visited.

use crate::candidate::{Candidate, Value};
use crate::scope::{resolve, snapshot_definition, Binding, ScopeEnv};
use crate::syntax::{
    AugOp, Call, ClassDef, Comprehension, DictLit, Expr, ForClause, FunctionDef, ImportAlias,
    ImportFrom, Module, StrPart, Stmt, Target,
};

/// What a matcher gets to see while the walker is at a node.
pub struct MatchContext<'a> {
    pub env: &'a ScopeEnv,
    pub source_file: &'a str,
    out: &'a mut Vec<Candidate>,
}

impl<'a> MatchContext<'a> {
    pub fn emit(&mut self, candidate: Candidate) {
        self.out.push(candidate);
    }
}

/// Hooks called by the walker. Every hook defaults to doing nothing.
pub trait Matcher {
    fn on_import(&mut self, _names: &[ImportAlias]) {}

    fn on_import_from(&mut self, _import: &ImportFrom) {}

    fn on_call(&mut self, _call: &Call, _cx: &mut MatchContext<'_>) {}

    /// A list or tuple literal.
    fn on_sequence(&mut self, _items: &[Expr], _cx: &mut MatchContext<'_>) {}

    /// A `{...}` literal.
    fn on_mapping(&mut self, _dict: &DictLit, _cx: &mut MatchContext<'_>) {}
}

pub struct Walker<'m> {
    env: ScopeEnv,
    source_file: String,
    matchers: Vec<&'m mut dyn Matcher>,
    out: Vec<Candidate>,
}

impl<'m> Walker<'m> {
    pub fn new(source_file: impl Into<String>, matchers: Vec<&'m mut dyn Matcher>) -> Self {
        Self {
            env: ScopeEnv::new(),
            source_file: source_file.into(),
            matchers,
            out: Vec::new(),
        }
    }

    /// Walks the module and returns everything the matchers emitted, in
    /// traversal order.
    pub fn walk_module(mut self, module: &Module) -> Vec<Candidate> {
        self.walk_body(&module.body);
        self.out
    }

    fn walk_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { targets, value, .. } => {
                self.walk_expr(value);
                for target in targets {
                    self.walk_target(target);
                }
                let resolved = resolve(value, &self.env);
                let definition = snapshot_definition(value, &self.env);
                for target in targets {
                    self.bind_target(target, &definition, &resolved);
                }
            }
            Stmt::AugAssign {
                target, op, value, ..
            } => {
                self.walk_expr(value);
                self.walk_target(target);
                match (target, op) {
                    (Target::Name(name), AugOp::Add) => {
                        let combined = Expr::Concat(
                            Box::new(Expr::Name(name.clone())),
                            Box::new(value.clone()),
                        );
                        let binding = Binding {
                            value: resolve(&combined, &self.env),
                            definition: Some(snapshot_definition(&combined, &self.env)),
                        };
                        self.env.bind(name.clone(), binding);
                    }
                    _ => {
                        for name in target.names() {
                            self.env.bind_unresolved(name);
                        }
                    }
                }
            }
            Stmt::FunctionDef(def) => self.walk_function(def),
            Stmt::ClassDef(def) => self.walk_class(def),
            Stmt::Import(names) => {
                for matcher in self.matchers.iter_mut() {
                    matcher.on_import(names);
                }
                for alias in names {
                    self.env.bind_unresolved(alias.module_binding());
                }
            }
            Stmt::ImportFrom(import) => {
                for matcher in self.matchers.iter_mut() {
                    matcher.on_import_from(import);
                }
                for alias in &import.names {
                    self.env.bind_unresolved(alias.local_name());
                }
            }
            Stmt::Bind(names) => {
                for name in names {
                    self.env.bind_unresolved(name.clone());
                }
            }
            Stmt::Expr(expr) => self.walk_expr(expr),
            Stmt::Block(stmts) => self.walk_body(stmts),
        }
    }

    fn walk_function(&mut self, def: &FunctionDef) {
        for decorator in &def.decorators {
            self.walk_expr(decorator);
        }
        for default in def.params.iter().filter_map(|p| p.default.as_ref()) {
            self.walk_expr(default);
        }
        self.env.bind_unresolved(def.name.clone());
        self.env
            .push_function(def.params.iter().map(|p| p.name.as_str()));
        self.walk_body(&def.body);
        self.env.pop();
    }

    /// Class bodies share the enclosing scope.
    fn walk_class(&mut self, def: &ClassDef) {
        for expr in def.decorators.iter().chain(&def.bases) {
            self.walk_expr(expr);
        }
        self.walk_body(&def.body);
        self.env.bind_unresolved(def.name.clone());
    }

    /// Store targets such as `obj[key()] = ...` can still contain calls.
    fn walk_target(&mut self, target: &Target) {
        match target {
            Target::Name(_) => {}
            Target::Unpack(items) => {
                for item in items {
                    self.walk_target(item);
                }
            }
            Target::Starred(inner) => self.walk_target(inner),
            Target::Other(expr) => self.walk_expr(expr),
        }
    }

    fn bind_target(&mut self, target: &Target, definition: &Expr, resolved: &Value) {
        match target {
            Target::Name(name) => self.env.bind(
                name.clone(),
                Binding {
                    value: resolved.clone(),
                    definition: Some(definition.clone()),
                },
            ),
            Target::Unpack(items) => {
                let elements = match definition {
                    Expr::List(elems) | Expr::Tuple(elems)
                        if elems.len() == items.len()
                            && !elems.iter().any(|e| matches!(e, Expr::Starred(_)))
                            && !items.iter().any(|t| matches!(t, Target::Starred(_))) =>
                    {
                        Some(elems)
                    }
                    _ => None,
                };
                match elements {
                    Some(elems) => {
                        let values: Vec<_> = elems.iter().map(|e| resolve(e, &self.env)).collect();
                        for ((item, elem), value) in items.iter().zip(elems).zip(&values) {
                            self.bind_target(item, elem, value);
                        }
                    }
                    None => {
                        for name in target.names() {
                            self.env.bind_unresolved(name);
                        }
                    }
                }
            }
            Target::Starred(inner) => {
                for name in inner.names() {
                    self.env.bind_unresolved(name);
                }
            }
            Target::Other(_) => {}
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Str(lit) => {
                for part in &lit.parts {
                    if let StrPart::Interpolation(inner) = part {
                        self.walk_expr(inner);
                    }
                }
            }
            Expr::Name(_) => {}
            Expr::Concat(left, right) => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::Call(call) => {
                for matcher in self.matchers.iter_mut() {
                    let mut cx = MatchContext {
                        env: &self.env,
                        source_file: &self.source_file,
                        out: &mut self.out,
                    };
                    matcher.on_call(call, &mut cx);
                }
                self.walk_expr(&call.func);
                for arg in &call.args {
                    self.walk_expr(arg);
                }
                for keyword in &call.keywords {
                    self.walk_expr(&keyword.value);
                }
            }
            Expr::Attribute { object, .. } => self.walk_expr(object),
            Expr::List(items) | Expr::Tuple(items) => {
                for matcher in self.matchers.iter_mut() {
                    let mut cx = MatchContext {
                        env: &self.env,
                        source_file: &self.source_file,
                        out: &mut self.out,
                    };
                    matcher.on_sequence(items, &mut cx);
                }
                for item in items {
                    self.walk_expr(item);
                }
            }
            Expr::Dict(dict) => {
                for matcher in self.matchers.iter_mut() {
                    let mut cx = MatchContext {
                        env: &self.env,
                        source_file: &self.source_file,
                        out: &mut self.out,
                    };
                    matcher.on_mapping(dict, &mut cx);
                }
                for entry in &dict.entries {
                    if let Some(key) = &entry.key {
                        self.walk_expr(key);
                    }
                    self.walk_expr(&entry.value);
                }
            }
            Expr::Starred(inner) => self.walk_expr(inner),
            Expr::Lambda(lambda) => {
                for default in lambda.params.iter().filter_map(|p| p.default.as_ref()) {
                    self.walk_expr(default);
                }
                self.env
                    .push_function(lambda.params.iter().map(|p| p.name.as_str()));
                self.walk_expr(&lambda.body);
                self.env.pop();
            }
            Expr::Walrus { name, value } => {
                self.walk_expr(value);
                let binding = Binding {
                    value: resolve(value, &self.env),
                    definition: Some(snapshot_definition(value, &self.env)),
                };
                self.env.bind(name.clone(), binding);
            }
            Expr::Comprehension(comp) => self.walk_comprehension(comp),
            Expr::Opaque(children) => {
                for child in children {
                    self.walk_expr(child);
                }
            }
        }
    }

    /// The first iterable is evaluated in the enclosing scope; everything
    /// else runs in a scope of its own where the loop targets are unknown.
    fn walk_comprehension(&mut self, comp: &Comprehension) {
        let mut clauses = comp.clauses.iter();
        let first = clauses.next();
        if let Some(clause) = first {
            self.walk_expr(&clause.iter);
        }
        self.env.push_function(std::iter::empty());
        if let Some(clause) = first {
            self.bind_clause(clause);
        }
        for clause in clauses {
            self.walk_expr(&clause.iter);
            self.bind_clause(clause);
        }
        self.walk_expr(&comp.element);
        self.env.pop();
    }

    fn bind_clause(&mut self, clause: &ForClause) {
        self.walk_target(&clause.target);
        for name in clause.target.names() {
            self.env.bind_unresolved(name);
        }
        for condition in &clause.conditions {
            self.walk_expr(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceUnit;

    /// Records the resolved value of every `observe(x)` argument.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Value>,
    }

    impl Matcher for Recorder {
        fn on_call(&mut self, call: &Call, cx: &mut MatchContext<'_>) {
            if call.func.dotted_name().as_deref() == Some("observe") {
                if let Some(arg) = call.args.first() {
                    self.seen.push(resolve(arg, cx.env));
                }
            }
        }
    }

    fn observed(src: &str) -> Vec<Value> {
        let unit = SourceUnit::parse("t.py", src).unwrap();
        let mut recorder = Recorder::default();
        let matchers: Vec<&mut dyn Matcher> = vec![&mut recorder];
        Walker::new("t.py", matchers).walk_module(&unit.module);
        recorder.seen
    }

    #[test]
    fn function_parameters_shadow_module_constants() {
        let seen = observed(
            "p = 'module'\ndef f(p):\n    observe(p)\ndef g():\n    observe(p)\nobserve(p)\n",
        );
        assert_eq!(
            seen,
            vec![Value::Unresolved, Value::known("module"), Value::known("module")]
        );
    }

    #[test]
    fn function_locals_do_not_leak() {
        let seen = observed("def f():\n    q = 'inner'\n    observe(q)\nobserve(q)\n");
        assert_eq!(seen, vec![Value::known("inner"), Value::Unresolved]);
    }

    #[test]
    fn assignments_are_order_sensitive() {
        let seen = observed("observe(p)\np = 'a'\nobserve(p)\np = p + 'b'\nobserve(p)\n");
        assert_eq!(
            seen,
            vec![Value::Unresolved, Value::known("a"), Value::known("ab")]
        );
    }

    #[test]
    fn augmented_and_unpacking_assignment() {
        let seen = observed(
            "p = 'a'\np += 'b'\nobserve(p)\nx, y = 'one', 'two'\nobserve(y)\nx, y = pair()\nobserve(x)\nn = 'z'\nn *= 2\nobserve(n)\n",
        );
        assert_eq!(
            seen,
            vec![
                Value::known("ab"),
                Value::known("two"),
                Value::Unresolved,
                Value::Unresolved
            ]
        );
    }

    #[test]
    fn loop_and_with_targets_become_unresolved() {
        let seen = observed(
            "p = 'stale'\nfor p in prompts:\n    observe(p)\nq = 'stale'\nwith open(f) as q:\n    observe(q)\n",
        );
        assert_eq!(seen, vec![Value::Unresolved, Value::Unresolved]);
    }

    #[test]
    fn class_body_shares_enclosing_scope() {
        let seen = observed("class A:\n    P = 'cls'\n    observe(P)\n");
        assert_eq!(seen, vec![Value::known("cls")]);
    }

    #[test]
    fn walrus_binds_in_current_scope() {
        let seen = observed("if (p := 'w'):\n    observe(p)\n");
        assert_eq!(seen, vec![Value::known("w")]);
    }

    #[test]
    fn comprehension_targets_are_scoped_to_the_comprehension() {
        let seen = observed(
            "p = 'stale'\nxs = [observe(p) for p in prompts]\nobserve(p)\n",
        );
        assert_eq!(seen, vec![Value::Unresolved, Value::known("stale")]);
    }

    #[test]
    fn comprehension_iterable_and_conditions_see_the_right_scope() {
        let seen = observed(
            "q = 'outer'\nys = {k: observe(q) for q in observe(q) if observe(q)}\n",
        );
        assert_eq!(
            seen,
            vec![Value::known("outer"), Value::Unresolved, Value::Unresolved]
        );
    }
}
