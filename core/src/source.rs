//! Parsing a file into a [`SourceUnit`].

use tree_sitter::{Node, Parser};

use crate::error::{ScanError, ScanResult};
use crate::syntax::{Lowerer, Module};

/// A parsed file. Built once, read by the walker, dropped with the file scan.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: String,
    pub module: Module,
}

impl SourceUnit {
    /// Parses Python source text. A tree containing any error or missing
    /// node counts as a parse failure.
    pub fn parse(path: impl Into<String>, text: &str) -> ScanResult<Self> {
        let path = path.into();
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into())?;

        let Some(tree) = parser.parse(text, None) else {
            return Err(ScanError::NoTree { path });
        };
        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root);
            return Err(ScanError::Syntax { path, line });
        }

        let module = Lowerer::new(text.as_bytes()).module(root);
        Ok(Self { path, module })
    }
}

fn first_error_line(root: Node) -> u32 {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return node.start_position().row as u32 + 1;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node
            .children(&mut cursor)
            .filter(|c| c.has_error() || c.is_missing())
            .collect();
        stack.extend(children.into_iter().rev());
    }
    root.start_position().row as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_python() {
        let unit = SourceUnit::parse("ok.py", "x = 1\n\ndef f():\n    return x\n").unwrap();
        assert_eq!(unit.path, "ok.py");
        assert_eq!(unit.module.body.len(), 2);
    }

    #[test]
    fn rejects_syntax_errors_with_line() {
        let err = SourceUnit::parse("bad.py", "x = 1\ndef broken(:\n    pass\n").unwrap_err();
        match err {
            ScanError::Syntax { path, line } => {
                assert_eq!(path, "bad.py");
                assert!(line >= 2, "error line {line} should point at the broken def");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn empty_file_is_an_empty_module() {
        let unit = SourceUnit::parse("empty.py", "").unwrap();
        assert!(unit.module.body.is_empty());
    }
}
