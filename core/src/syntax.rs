//! Python syntax lowered from tree-sitter into a closed set of node kinds.
//!
//! The resolver and the matchers only ever see these types, so every
//! decision about a construct is an exhaustive `match` instead of a string
//! comparison on tree-sitter kinds. Constructs the analysis does not model
//! become [`Expr::Opaque`], which keeps their sub-expressions around so the
//! walker can still find message lists and calls nested inside them.

use tracing::trace;
use tree_sitter::Node;

/// Deepest nesting lowered before a subtree is replaced by an empty opaque node.
pub const MAX_NESTING: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `a = b = value`
    Assign { targets: Vec<Target>, value: Expr },
    /// `target op= value`
    AugAssign {
        target: Target,
        op: AugOp,
        value: Expr,
    },
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    /// `import a.b [as c], ...`
    Import(Vec<ImportAlias>),
    ImportFrom(ImportFrom),
    /// Names bound to something the analysis cannot see (loop targets,
    /// `with ... as`, `except ... as`).
    Bind(Vec<String>),
    Expr(Expr),
    /// A compound statement flattened into its parts in source order.
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugOp {
    Add,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Unpack(Vec<Target>),
    Starred(Box<Target>),
    /// Attribute or subscript store; binds nothing.
    Other(Expr),
}

impl Target {
    /// Every plain name this target would bind.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            Target::Name(name) => out.push(name.clone()),
            Target::Unpack(items) => items.iter().for_each(|t| t.collect_names(out)),
            Target::Starred(inner) => inner.collect_names(out),
            Target::Other(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportAlias {
    /// Dotted name as written.
    pub name: String,
    pub alias: Option<String>,
}

impl ImportAlias {
    /// Name bound by `from m import name [as alias]`.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Name bound by `import name [as alias]`: the alias, or the first segment.
    pub fn module_binding(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFrom {
    /// Module path, with leading dots for relative imports.
    pub module: String,
    pub names: Vec<ImportAlias>,
    pub wildcard: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(StrLit),
    Name(String),
    /// Binary `+`.
    Concat(Box<Expr>, Box<Expr>),
    Call(Call),
    Attribute { object: Box<Expr>, attr: String },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(DictLit),
    /// `*x` inside a call or a sequence.
    Starred(Box<Expr>),
    Lambda(Lambda),
    /// `name := value`
    Walrus { name: String, value: Box<Expr> },
    /// List, set, dict and generator comprehensions.
    Comprehension(Comprehension),
    /// Anything else; children kept for traversal.
    Opaque(Vec<Expr>),
}

impl Expr {
    /// `a.b.c` for a chain of names and attributes.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Name(name) => Some(name.clone()),
            Expr::Attribute { object, attr } => {
                let base = object.dotted_name()?;
                Some(format!("{base}.{attr}"))
            }
            _ => None,
        }
    }
}

/// A string literal. Plain strings hold a single text part; f-strings
/// interleave text with interpolations.
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit {
    pub parts: Vec<StrPart>,
    pub templated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Text(String),
    Interpolation(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub line: u32,
}

impl Call {
    pub fn keyword(&self, name: &str) -> Option<&Expr> {
        self.keywords
            .iter()
            .find(|kw| kw.name.as_deref() == Some(name))
            .map(|kw| &kw.value)
    }

    /// Positional argument `index`, unless a `*spread` comes before it.
    pub fn positional(&self, index: usize) -> Option<&Expr> {
        for (i, arg) in self.args.iter().enumerate() {
            if matches!(arg, Expr::Starred(_)) {
                return None;
            }
            if i == index {
                return Some(arg);
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// `None` for `**spread`.
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictLit {
    pub entries: Vec<DictEntry>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    /// `None` for `**spread`.
    pub key: Option<Expr>,
    pub value: Expr,
}

/// `element for target in iter if cond ...`. The element of a dict
/// comprehension is an opaque `key: value` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub element: Box<Expr>,
    pub clauses: Vec<ForClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForClause {
    pub target: Target,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: Box<Expr>,
}

const STATEMENT_KINDS: &[&str] = &[
    "expression_statement",
    "function_definition",
    "decorated_definition",
    "class_definition",
    "import_statement",
    "import_from_statement",
    "future_import_statement",
    "if_statement",
    "for_statement",
    "while_statement",
    "try_statement",
    "with_statement",
    "match_statement",
    "return_statement",
    "delete_statement",
    "raise_statement",
    "assert_statement",
    "pass_statement",
    "break_statement",
    "continue_statement",
    "global_statement",
    "nonlocal_statement",
    "print_statement",
    "exec_statement",
    "type_alias_statement",
];

const CLAUSE_KINDS: &[&str] = &[
    "elif_clause",
    "else_clause",
    "except_clause",
    "except_group_clause",
    "finally_clause",
    "with_clause",
    "with_item",
    "case_clause",
];

/// Lowers tree-sitter Python nodes into [`Module`], [`Stmt`] and [`Expr`].
pub struct Lowerer<'a> {
    source: &'a [u8],
}

impl<'a> Lowerer<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self { source }
    }

    pub fn module(&self, root: Node) -> Module {
        Module {
            body: self.block(root, 0),
        }
    }

    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source).unwrap_or("").to_string()
    }

    /// Dotted names may contain stray whitespace (`a . b`); drop it.
    fn dotted(&self, node: Node) -> String {
        self.text(node).split_whitespace().collect()
    }

    /// Past [`MAX_NESTING`] a subtree is dropped (statements) or left as an
    /// empty opaque node (expressions), so anything inside it is unresolved.
    fn too_deep(&self, node: Node, depth: usize) -> bool {
        if depth <= MAX_NESTING {
            return false;
        }
        trace!(
            line = line_of(node),
            kind = node.kind(),
            "nesting limit reached; subtree left opaque"
        );
        true
    }

    fn block(&self, node: Node, depth: usize) -> Vec<Stmt> {
        let mut out = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.stmt(child, depth + 1, &mut out);
        }
        out
    }

    fn stmt(&self, node: Node, depth: usize, out: &mut Vec<Stmt>) {
        if self.too_deep(node, depth) {
            return;
        }
        match node.kind() {
            "comment" => {}
            "expression_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "comment" => {}
                        "assignment" => {
                            if let Some(stmt) = self.assignment(child, depth) {
                                out.push(stmt);
                            }
                        }
                        "augmented_assignment" => out.push(self.augmented(child, depth)),
                        _ => out.push(Stmt::Expr(self.expr(child, depth + 1))),
                    }
                }
            }
            "function_definition" => {
                if let Some(def) = self.function(node, Vec::new(), depth) {
                    out.push(Stmt::FunctionDef(def));
                }
            }
            "class_definition" => {
                if let Some(def) = self.class(node, Vec::new(), depth) {
                    out.push(Stmt::ClassDef(def));
                }
            }
            "decorated_definition" => self.decorated(node, depth, out),
            "import_statement" => {
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .filter_map(|n| self.import_alias(n))
                    .collect();
                out.push(Stmt::Import(names));
            }
            "import_from_statement" => out.push(Stmt::ImportFrom(self.import_from(node))),
            "future_import_statement" | "pass_statement" | "break_statement"
            | "continue_statement" => {}
            "for_statement" => {
                let mut parts = Vec::new();
                if let Some(iter) = node.child_by_field_name("right") {
                    parts.push(Stmt::Expr(self.expr(iter, depth + 1)));
                }
                if let Some(left) = node.child_by_field_name("left") {
                    parts.push(Stmt::Bind(self.target(left, depth + 1).names()));
                }
                if let Some(body) = node.child_by_field_name("body") {
                    parts.extend(self.block(body, depth));
                }
                if let Some(alt) = node.child_by_field_name("alternative") {
                    self.compound_part(alt, depth + 1, &mut parts);
                }
                out.push(Stmt::Block(parts));
            }
            _ => {
                let mut parts = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.compound_part(child, depth + 1, &mut parts);
                }
                if !parts.is_empty() {
                    out.push(Stmt::Block(parts));
                }
            }
        }
    }

    fn compound_part(&self, node: Node, depth: usize, parts: &mut Vec<Stmt>) {
        if self.too_deep(node, depth) {
            return;
        }
        let kind = node.kind();
        if kind == "comment" {
            return;
        }
        if kind == "block" {
            parts.extend(self.block(node, depth));
        } else if kind == "as_pattern" {
            if let Some(value) = node.named_child(0) {
                parts.push(Stmt::Expr(self.expr(value, depth + 1)));
            }
            if let Some(alias) = node.child_by_field_name("alias") {
                parts.push(Stmt::Bind(self.identifiers(alias)));
            }
        } else if STATEMENT_KINDS.contains(&kind) {
            self.stmt(node, depth, parts);
        } else if CLAUSE_KINDS.contains(&kind) {
            let alias = node.child_by_field_name("alias");
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if alias.is_some_and(|a| a.id() == child.id()) {
                    parts.push(Stmt::Bind(self.identifiers(child)));
                } else {
                    self.compound_part(child, depth + 1, parts);
                }
            }
        } else {
            parts.push(Stmt::Expr(self.expr(node, depth + 1)));
        }
    }

    fn decorated(&self, node: Node, depth: usize, out: &mut Vec<Stmt>) {
        let mut decorators = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "decorator" {
                if let Some(inner) = child.named_child(0) {
                    decorators.push(self.expr(inner, depth + 1));
                }
            }
        }
        let Some(def) = node.child_by_field_name("definition") else {
            out.extend(decorators.into_iter().map(Stmt::Expr));
            return;
        };
        match def.kind() {
            "function_definition" => {
                if let Some(f) = self.function(def, decorators, depth) {
                    out.push(Stmt::FunctionDef(f));
                }
            }
            "class_definition" => {
                if let Some(c) = self.class(def, decorators, depth) {
                    out.push(Stmt::ClassDef(c));
                }
            }
            _ => {
                out.extend(decorators.into_iter().map(Stmt::Expr));
                self.stmt(def, depth, out);
            }
        }
    }

    fn function(&self, node: Node, decorators: Vec<Expr>, depth: usize) -> Option<FunctionDef> {
        let name = self.text(node.child_by_field_name("name")?);
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.params(p, depth))
            .unwrap_or_default();
        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b, depth))
            .unwrap_or_default();
        Some(FunctionDef {
            name,
            params,
            decorators,
            body,
        })
    }

    fn class(&self, node: Node, decorators: Vec<Expr>, depth: usize) -> Option<ClassDef> {
        let name = self.text(node.child_by_field_name("name")?);
        let bases = node
            .child_by_field_name("superclasses")
            .map(|args| {
                let (mut positional, keywords) = self.arguments(args, depth);
                positional.extend(keywords.into_iter().map(|kw| kw.value));
                positional
            })
            .unwrap_or_default();
        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b, depth))
            .unwrap_or_default();
        Some(ClassDef {
            name,
            bases,
            decorators,
            body,
        })
    }

    fn params(&self, node: Node, depth: usize) -> Vec<Param> {
        let mut params = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let param = match child.kind() {
                "identifier" => Some(Param {
                    name: self.text(child),
                    default: None,
                }),
                "default_parameter" | "typed_default_parameter" => {
                    child.child_by_field_name("name").map(|name| Param {
                        name: self.identifiers(name).into_iter().next().unwrap_or_default(),
                        default: child
                            .child_by_field_name("value")
                            .map(|v| self.expr(v, depth + 1)),
                    })
                }
                "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern"
                | "tuple_pattern" => self
                    .identifiers(child)
                    .into_iter()
                    .next()
                    .map(|name| Param {
                        name,
                        default: None,
                    }),
                _ => None,
            };
            if let Some(param) = param.filter(|p| !p.name.is_empty()) {
                params.push(param);
            }
        }
        params
    }

    fn import_alias(&self, node: Node) -> Option<ImportAlias> {
        match node.kind() {
            "dotted_name" => Some(ImportAlias {
                name: self.dotted(node),
                alias: None,
            }),
            "aliased_import" => Some(ImportAlias {
                name: self.dotted(node.child_by_field_name("name")?),
                alias: node.child_by_field_name("alias").map(|a| self.text(a)),
            }),
            _ => None,
        }
    }

    fn import_from(&self, node: Node) -> ImportFrom {
        let module = node
            .child_by_field_name("module_name")
            .map(|m| self.dotted(m))
            .unwrap_or_default();
        let mut cursor = node.walk();
        let names = node
            .children_by_field_name("name", &mut cursor)
            .filter_map(|n| self.import_alias(n))
            .collect();
        let mut cursor = node.walk();
        let wildcard = node
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import");
        ImportFrom {
            module,
            names,
            wildcard,
        }
    }

    fn assignment(&self, node: Node, depth: usize) -> Option<Stmt> {
        let mut targets = Vec::new();
        let mut current = node;
        loop {
            if let Some(left) = current.child_by_field_name("left") {
                targets.push(self.target(left, depth + 1));
            }
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    return Some(Stmt::Assign {
                        targets,
                        value: self.expr(right, depth + 1),
                    })
                }
                // `x: int` declares without binding.
                None => return None,
            }
        }
    }

    fn augmented(&self, node: Node, depth: usize) -> Stmt {
        let target = node
            .child_by_field_name("left")
            .map(|l| self.target(l, depth + 1))
            .unwrap_or(Target::Other(Expr::Opaque(Vec::new())));
        let op = match node.child_by_field_name("operator").map(|o| o.kind()) {
            Some("+=") => AugOp::Add,
            _ => AugOp::Other,
        };
        let value = node
            .child_by_field_name("right")
            .map(|r| self.expr(r, depth + 1))
            .unwrap_or(Expr::Opaque(Vec::new()));
        Stmt::AugAssign { target, op, value }
    }

    fn target(&self, node: Node, depth: usize) -> Target {
        if self.too_deep(node, depth) {
            return Target::Other(Expr::Opaque(Vec::new()));
        }
        match node.kind() {
            "identifier" => Target::Name(self.text(node)),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "expression_list" => {
                let mut cursor = node.walk();
                Target::Unpack(
                    node.named_children(&mut cursor)
                        .filter(|c| c.kind() != "comment")
                        .map(|c| self.target(c, depth + 1))
                        .collect(),
                )
            }
            "list_splat_pattern" | "list_splat" => match node.named_child(0) {
                Some(inner) => Target::Starred(Box::new(self.target(inner, depth + 1))),
                None => Target::Other(Expr::Opaque(Vec::new())),
            },
            "parenthesized_expression" => match node.named_child(0) {
                Some(inner) => self.target(inner, depth + 1),
                None => Target::Other(Expr::Opaque(Vec::new())),
            },
            _ => Target::Other(self.expr(node, depth + 1)),
        }
    }

    fn identifiers(&self, node: Node) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.kind() == "identifier" {
                out.push(self.text(current));
                continue;
            }
            let mut cursor = current.walk();
            let children: Vec<Node> = current.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn expr(&self, node: Node, depth: usize) -> Expr {
        if self.too_deep(node, depth) {
            return Expr::Opaque(Vec::new());
        }
        match node.kind() {
            "identifier" => Expr::Name(self.text(node)),
            "string" => match self.string(node, depth) {
                Some(lit) => Expr::Str(lit),
                None => self.opaque(node, depth),
            },
            "concatenated_string" => self.concatenated(node, depth),
            "parenthesized_expression" => {
                let mut cursor = node.walk();
                let inner: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() != "comment")
                    .collect();
                match inner.as_slice() {
                    [single] => self.expr(*single, depth + 1),
                    _ => self.opaque(node, depth),
                }
            }
            "binary_operator" => {
                let left = node.child_by_field_name("left");
                let right = node.child_by_field_name("right");
                let op = node.child_by_field_name("operator").map(|o| o.kind());
                match (left, right, op) {
                    (Some(l), Some(r), Some("+")) => Expr::Concat(
                        Box::new(self.expr(l, depth + 1)),
                        Box::new(self.expr(r, depth + 1)),
                    ),
                    _ => self.opaque(node, depth),
                }
            }
            "call" => self.call(node, depth),
            "attribute" => {
                match (
                    node.child_by_field_name("object"),
                    node.child_by_field_name("attribute"),
                ) {
                    (Some(object), Some(attr)) => Expr::Attribute {
                        object: Box::new(self.expr(object, depth + 1)),
                        attr: self.text(attr),
                    },
                    _ => self.opaque(node, depth),
                }
            }
            "list" => Expr::List(self.items(node, depth)),
            "tuple" | "expression_list" => Expr::Tuple(self.items(node, depth)),
            "dictionary" => self.dict(node, depth),
            "list_splat" | "dictionary_splat" => match node.named_child(0) {
                Some(inner) => Expr::Starred(Box::new(self.expr(inner, depth + 1))),
                None => Expr::Opaque(Vec::new()),
            },
            "lambda" => {
                let params = node
                    .child_by_field_name("parameters")
                    .map(|p| self.params(p, depth))
                    .unwrap_or_default();
                match node.child_by_field_name("body") {
                    Some(body) => Expr::Lambda(Lambda {
                        params,
                        body: Box::new(self.expr(body, depth + 1)),
                    }),
                    None => self.opaque(node, depth),
                }
            }
            "named_expression" => {
                match (
                    node.child_by_field_name("name"),
                    node.child_by_field_name("value"),
                ) {
                    (Some(name), Some(value)) => Expr::Walrus {
                        name: self.text(name),
                        value: Box::new(self.expr(value, depth + 1)),
                    },
                    _ => self.opaque(node, depth),
                }
            }
            "list_comprehension"
            | "set_comprehension"
            | "dictionary_comprehension"
            | "generator_expression" => self.comprehension(node, depth),
            _ => self.opaque(node, depth),
        }
    }

    fn comprehension(&self, node: Node, depth: usize) -> Expr {
        let element = match node.child_by_field_name("body") {
            Some(pair) if pair.kind() == "pair" => self.opaque(pair, depth + 1),
            Some(body) => self.expr(body, depth + 1),
            None => Expr::Opaque(Vec::new()),
        };
        let mut clauses: Vec<ForClause> = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "for_in_clause" => {
                    let target = child
                        .child_by_field_name("left")
                        .map(|left| self.target(left, depth + 1))
                        .unwrap_or(Target::Other(Expr::Opaque(Vec::new())));
                    let mut right = child.walk();
                    let mut iters: Vec<Expr> = child
                        .children_by_field_name("right", &mut right)
                        .filter(|n| n.is_named() && n.kind() != "comment")
                        .map(|n| self.expr(n, depth + 1))
                        .collect();
                    let iter = if iters.len() == 1 {
                        iters.remove(0)
                    } else {
                        Expr::Tuple(iters)
                    };
                    clauses.push(ForClause {
                        target,
                        iter,
                        conditions: Vec::new(),
                    });
                }
                "if_clause" => {
                    if let (Some(clause), Some(cond)) = (clauses.last_mut(), child.named_child(0)) {
                        clause.conditions.push(self.expr(cond, depth + 1));
                    }
                }
                _ => {}
            }
        }
        Expr::Comprehension(Comprehension {
            element: Box::new(element),
            clauses,
        })
    }

    fn opaque(&self, node: Node, depth: usize) -> Expr {
        let mut cursor = node.walk();
        let children = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() != "comment")
            .map(|c| self.expr(c, depth + 1))
            .collect();
        Expr::Opaque(children)
    }

    fn items(&self, node: Node, depth: usize) -> Vec<Expr> {
        let mut cursor = node.walk();
        node.named_children(&mut cursor)
            .filter(|c| c.kind() != "comment")
            .map(|c| self.expr(c, depth + 1))
            .collect()
    }

    fn dict(&self, node: Node, depth: usize) -> Expr {
        let mut entries = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "pair" => {
                    let key = child.child_by_field_name("key");
                    let value = child.child_by_field_name("value");
                    if let (Some(key), Some(value)) = (key, value) {
                        entries.push(DictEntry {
                            key: Some(self.expr(key, depth + 1)),
                            value: self.expr(value, depth + 1),
                        });
                    }
                }
                "dictionary_splat" => {
                    if let Some(inner) = child.named_child(0) {
                        entries.push(DictEntry {
                            key: None,
                            value: self.expr(inner, depth + 1),
                        });
                    }
                }
                "comment" => {}
                // Anything else nested in the braces.
                _ => entries.push(DictEntry {
                    key: None,
                    value: self.expr(child, depth + 1),
                }),
            }
        }
        Expr::Dict(DictLit {
            entries,
            line: line_of(node),
        })
    }

    fn call(&self, node: Node, depth: usize) -> Expr {
        let Some(func) = node.child_by_field_name("function") else {
            return self.opaque(node, depth);
        };
        let (args, keywords) = match node.child_by_field_name("arguments") {
            Some(args) if args.kind() == "argument_list" => self.arguments(args, depth),
            Some(other) => (vec![self.expr(other, depth + 1)], Vec::new()),
            None => (Vec::new(), Vec::new()),
        };
        Expr::Call(Call {
            func: Box::new(self.expr(func, depth + 1)),
            args,
            keywords,
            line: line_of(node),
        })
    }

    fn arguments(&self, node: Node, depth: usize) -> (Vec<Expr>, Vec<Keyword>) {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "comment" => {}
                "keyword_argument" => {
                    let name = child.child_by_field_name("name").map(|n| self.text(n));
                    if let Some(value) = child.child_by_field_name("value") {
                        keywords.push(Keyword {
                            name,
                            value: self.expr(value, depth + 1),
                        });
                    }
                }
                "dictionary_splat" => {
                    if let Some(inner) = child.named_child(0) {
                        keywords.push(Keyword {
                            name: None,
                            value: self.expr(inner, depth + 1),
                        });
                    }
                }
                _ => args.push(self.expr(child, depth + 1)),
            }
        }
        (args, keywords)
    }

    fn concatenated(&self, node: Node, depth: usize) -> Expr {
        let mut parts = Vec::new();
        let mut templated = false;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "string" {
                continue;
            }
            match self.string(child, depth) {
                Some(lit) => {
                    templated |= lit.templated;
                    parts.extend(lit.parts);
                }
                // Mixing bytes and text is a SyntaxError in Python anyway.
                None => return self.opaque(node, depth),
            }
        }
        Expr::Str(StrLit { parts, templated })
    }

    /// `None` for byte strings, which are not text.
    fn string(&self, node: Node, depth: usize) -> Option<StrLit> {
        let mut start = None;
        let mut end = None;
        let mut interpolations = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "string_start" => start = Some(child),
                "string_end" => end = Some(child),
                "interpolation" => interpolations.push(child),
                _ => {}
            }
        }
        let start = start?;
        let prefix = StringPrefix::parse(&self.text(start));
        if prefix.bytes {
            return None;
        }

        let body_end = end.map(|e| e.start_byte()).unwrap_or_else(|| node.end_byte());
        let mut parts = Vec::new();
        let mut offset = start.end_byte();
        for interp in interpolations {
            self.push_text(&mut parts, offset, interp.start_byte(), prefix);
            let inner = interp
                .child_by_field_name("expression")
                .or_else(|| interp.named_child(0))
                .map(|e| self.expr(e, depth + 1))
                .unwrap_or(Expr::Opaque(Vec::new()));
            parts.push(StrPart::Interpolation(inner));
            offset = interp.end_byte();
        }
        self.push_text(&mut parts, offset, body_end, prefix);

        Some(StrLit {
            parts,
            templated: prefix.templated,
        })
    }

    fn push_text(&self, parts: &mut Vec<StrPart>, from: usize, to: usize, prefix: StringPrefix) {
        if from >= to || to > self.source.len() {
            return;
        }
        let raw = String::from_utf8_lossy(&self.source[from..to]);
        let mut text = if prefix.templated {
            raw.replace("{{", "{").replace("}}", "}")
        } else {
            raw.into_owned()
        };
        if !prefix.raw {
            text = decode_escapes(&text);
        }
        if !text.is_empty() {
            parts.push(StrPart::Text(text));
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StringPrefix {
    raw: bool,
    bytes: bool,
    templated: bool,
}

impl StringPrefix {
    /// Parses the letters before the opening quote of `string_start`.
    fn parse(start: &str) -> Self {
        let mut prefix = StringPrefix::default();
        for c in start.chars().take_while(|c| *c != '"' && *c != '\'') {
            match c.to_ascii_lowercase() {
                'r' => prefix.raw = true,
                'b' => prefix.bytes = true,
                'f' | 't' => prefix.templated = true,
                _ => {}
            }
        }
        prefix
    }
}

fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Decodes Python escape sequences in a non-raw string body.
/// Unknown escapes keep their backslash, as Python does.
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let mut digits = String::from(next);
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push_str(&digits);
                    }
                }
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut digits = String::new();
                while digits.len() < width {
                    match chars.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                let decoded = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                match decoded {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}
