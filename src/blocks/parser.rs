//! Tree-sitter based parser for JavaScript/TypeScript test files
//!
//! Tree-sitter types stay inside this module. The rest of the crate sees a
//! [`SourceTree`] and the [`CallSite`]s it yields.

use super::Language;
use crate::error::ParseError;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Tree-sitter parsers are expensive to create but can be reused for multiple
// files of the same language. A grammar that fails to load leaves the parser
// without a language; that surfaces as a `ParseError::Language` at parse time.

thread_local! {
    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });
}

fn parse_with_pooled_parser(content: &str, language: Language) -> Result<Option<Tree>, ParseError> {
    let pool = match language {
        Language::JavaScript => &JS_PARSER,
        Language::TypeScript => &TS_PARSER,
        Language::Tsx => &TSX_PARSER,
    };

    pool.with(|p| {
        let mut parser = p.borrow_mut();
        if parser.language().is_none() {
            return Err(ParseError::Language {
                language: language.name(),
                message: "grammar is not compatible with this tree-sitter version".to_string(),
            });
        }
        Ok(parser.parse(content, None))
    })
}

/// Position-annotated syntax tree of one source file
pub struct SourceTree {
    path: PathBuf,
    language: Language,
    tree: Tree,
}

impl std::fmt::Debug for SourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTree")
            .field("path", &self.path)
            .field("language", &self.language)
            .finish()
    }
}

/// One argument of a call, reduced to what test detection needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// A quoted string literal, already unescaped
    StringLiteral(String),
    /// Arrow function, function expression, or generator function expression
    Function,
    Other,
}

/// A call expression and its byte range in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Callee name when the callee is a bare identifier
    pub callee: Option<String>,
    pub arguments: Vec<Argument>,
    pub start: usize,
    pub end: usize,
}

/// Parse a test file into a [`SourceTree`].
///
/// The language is picked from the file extension. Any error or missing node
/// in the resulting tree rejects the whole file.
pub fn parse(path: &Path, content: &str) -> Result<SourceTree, ParseError> {
    let language = Language::from_path(path);
    let tree = parse_with_pooled_parser(content, language)?.ok_or_else(|| ParseError::NoTree {
        path: path.to_path_buf(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        let bad = first_error_node(root).unwrap_or(root);
        let position = bad.start_position();
        return Err(ParseError::Syntax {
            path: path.to_path_buf(),
            line: position.row + 1,
            column: position.column + 1,
        });
    }

    Ok(SourceTree {
        path: path.to_path_buf(),
        language,
        tree,
    })
}

impl SourceTree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// All call expressions in depth-first, source order.
    pub fn call_sites(&self, content: &str) -> Vec<CallSite> {
        let mut calls = Vec::new();
        let mut cursor = self.tree.walk();

        loop {
            let node = cursor.node();
            if node.kind() == "call_expression" {
                calls.push(call_site(&node, content));
            }

            if cursor.goto_first_child() {
                continue;
            }

            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    return calls;
                }
            }
        }
    }
}

fn call_site(node: &Node, content: &str) -> CallSite {
    let callee = node
        .child_by_field_name("function")
        .filter(|f| f.kind() == "identifier")
        .map(|f| get_node_text(&f, content).to_string());

    let arguments = match node.child_by_field_name("arguments") {
        // Tagged templates put a template_string here instead
        Some(args) if args.kind() == "arguments" => {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .filter(|arg| arg.kind() != "comment")
                .map(|arg| classify_argument(&arg, content))
                .collect()
        }
        _ => Vec::new(),
    };

    CallSite {
        callee,
        arguments,
        start: node.start_byte(),
        end: node.end_byte(),
    }
}

fn classify_argument(node: &Node, content: &str) -> Argument {
    match node.kind() {
        "string" => Argument::StringLiteral(string_value(node, content)),
        "arrow_function" | "function_expression" | "function" | "generator_function" => {
            Argument::Function
        }
        _ => Argument::Other,
    }
}

fn string_value(node: &Node, content: &str) -> String {
    let mut value = String::new();
    let mut cursor = node.walk();
    for part in node.named_children(&mut cursor) {
        let text = get_node_text(&part, content);
        match part.kind() {
            "escape_sequence" => value.push_str(&unescape(text)),
            _ => value.push_str(text),
        }
    }
    value
}

/// Decode one escape sequence (including its leading backslash).
fn unescape(seq: &str) -> String {
    let body = match seq.strip_prefix('\\') {
        Some(body) => body,
        None => return seq.to_string(),
    };

    let mut chars = body.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    match first {
        'n' => "\n".to_string(),
        't' => "\t".to_string(),
        'r' => "\r".to_string(),
        'b' => "\u{8}".to_string(),
        'f' => "\u{c}".to_string(),
        'v' => "\u{b}".to_string(),
        '0' if body.len() == 1 => "\0".to_string(),
        // Line continuation
        '\n' | '\r' | '\u{2028}' | '\u{2029}' => String::new(),
        'x' => decode_hex(&body[1..]).unwrap_or_else(|| body.to_string()),
        'u' => {
            let hex = body[1..].trim_start_matches('{').trim_end_matches('}');
            decode_hex(hex).unwrap_or_else(|| body.to_string())
        }
        other => other.to_string(),
    }
}

fn decode_hex(hex: &str) -> Option<String> {
    u32::from_str_radix(hex, 16)
        .ok()
        .and_then(char::from_u32)
        .map(String::from)
}

fn first_error_node(root: Node) -> Option<Node> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }

        // Only descend where an error can still be found
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

fn get_node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    &content[node.start_byte()..node.end_byte()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typescript_call_sites() {
        let content = r#"
            import { expect } from "chai";

            describe("math", () => {
                it("adds", () => {
                    expect(1 + 1).to.equal(2);
                });
            });
        "#;

        let tree = parse(Path::new("math.test.ts"), content).unwrap();
        let calls = tree.call_sites(content);
        let callees: Vec<_> = calls.iter().filter_map(|c| c.callee.as_deref()).collect();
        assert_eq!(callees, vec!["describe", "it", "expect"]);

        let it_call = &calls[1];
        assert_eq!(
            it_call.arguments,
            vec![Argument::StringLiteral("adds".to_string()), Argument::Function]
        );
        assert!(content[it_call.start..it_call.end].starts_with("it(\"adds\""));
        assert!(content[it_call.start..it_call.end].ends_with("})"));
    }

    #[test]
    fn test_function_expression_and_comments_in_arguments() {
        let content = "test(/* name */ 'works', async function () {\n  await run();\n});\n";
        let tree = parse(Path::new("works.test.js"), content).unwrap();
        let calls = tree.call_sites(content);
        assert_eq!(calls[0].callee.as_deref(), Some("test"));
        assert_eq!(
            calls[0].arguments,
            vec![Argument::StringLiteral("works".to_string()), Argument::Function]
        );
    }

    #[test]
    fn test_member_callee_is_not_an_identifier() {
        let content = "it.only('focused', () => {});\n";
        let tree = parse(Path::new("focus.test.ts"), content).unwrap();
        let calls = tree.call_sites(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].callee, None);
    }

    #[test]
    fn test_string_escapes_are_decoded() {
        let content = r#"it('it\'s \x41 \u{1F600} tab\there', () => {});"#;
        let tree = parse(Path::new("esc.test.ts"), content).unwrap();
        let calls = tree.call_sites(content);
        assert_eq!(
            calls[0].arguments[0],
            Argument::StringLiteral("it's A 😀 tab\there".to_string())
        );
    }

    #[test]
    fn test_template_literal_is_not_a_string() {
        let content = "it(`templated`, () => {});\n";
        let tree = parse(Path::new("tpl.test.ts"), content).unwrap();
        let calls = tree.call_sites(content);
        assert_eq!(calls[0].arguments[0], Argument::Other);
    }

    #[test]
    fn test_tsx_parsing_uses_tsx_grammar() {
        let content = r#"
            it("renders", () => {
                render(<Widget label="x" />);
            });
        "#;
        let tree = parse(Path::new("widget.test.tsx"), content).unwrap();
        assert_eq!(tree.language(), Language::Tsx);
        assert_eq!(tree.path(), Path::new("widget.test.tsx"));
        assert!(tree.call_sites(content).len() >= 2);
    }

    #[test]
    fn test_malformed_source_is_rejected() {
        let content = "describe('broken', () => {\n  it('x', () => {\n";
        let err = parse(Path::new("broken.test.ts"), content).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_unescape_line_continuation() {
        assert_eq!(unescape("\\\n"), "");
        assert_eq!(unescape("\\0"), "\0");
        assert_eq!(unescape("\\u0041"), "A");
        assert_eq!(unescape("\\q"), "q");
    }
}
