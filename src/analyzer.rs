//! Heuristic chunk classification and symbol extraction
//!
//! Regex-based, per language family. The extractor never fails: unknown
//! languages and pathological content fall back to `ChunkKind::Code`
//! with empty symbol lists. Precision is intentionally approximate; the
//! results feed storage enrichment and BM25 term weighting, not
//! refactoring tools.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::{Language, LanguageFamily};

/// Classification of a chunk's dominant content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Import,
    Comment,
    Code,
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Import => "import",
            ChunkKind::Comment => "comment",
            ChunkKind::Code => "code",
        };
        f.write_str(s)
    }
}

/// Structural metadata attached to a chunk before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: Option<Language>,
    pub kind: ChunkKind,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub imports: Vec<String>,
    /// Lines immediately before the chunk, oldest first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<Vec<String>>,
    /// Lines immediately after the chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ChunkMetadata {
    fn plain(language: Option<Language>) -> Self {
        Self {
            language,
            kind: ChunkKind::Code,
            function_name: None,
            class_name: None,
            imports: Vec::new(),
            context_before: None,
            context_after: None,
            signature: None,
        }
    }
}

/// Default number of surrounding-context lines captured on each side.
pub const DEFAULT_CONTEXT_LINES: usize = 2;

/// Cap on extracted import entries per chunk.
const MAX_IMPORTS: usize = 16;

// ─── Braces family ──────────────────────────────────────────────────────

static BRACES_FUNCTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Rust
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        // Go (plain and method receivers)
        Regex::new(r"(?m)^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap(),
        // JS/TS function keyword
        Regex::new(r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)").unwrap(),
        // JS/TS arrow bound to const/let
        Regex::new(r"(?m)^\s*(?:export\s+)?(?:const|let)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>").unwrap(),
        // C-like/Java/C# methods: type name(args) {
        Regex::new(r"(?m)^\s*(?:(?:public|private|protected|internal|static|final|abstract|virtual|override|async|inline|extern)\s+)*[A-Za-z_][\w<>\[\],\s\*&:]*?\s+([A-Za-z_]\w*)\s*\([^;{]*\)\s*(?:const\s*)?\{").unwrap(),
    ]
});

static BRACES_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+|export\s+|public\s+|abstract\s+|final\s+|sealed\s+|partial\s+)*(?:class|struct|trait|interface|enum|record)\s+([A-Za-z_]\w*)").unwrap()
});

static BRACES_IMPORT: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*use\s+([\w:]+)").unwrap(),
        Regex::new(r#"(?m)^\s*import\s+(?:[\w{}*,\s]+\s+from\s+)?["']([^"']+)["']"#).unwrap(),
        Regex::new(r"(?m)^\s*import\s+([\w.]+)").unwrap(),
        Regex::new(r#"(?m)^\s*#include\s*[<"]([^>"]+)[>"]"#).unwrap(),
        Regex::new(r#"(?m)\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap(),
    ]
});

static BRACES_COMMENT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(//|/\*|\*|\*/)").unwrap());

// ─── Indentation family ─────────────────────────────────────────────────

static INDENT_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap());

static INDENT_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*class\s+([A-Za-z_]\w*)").unwrap());

static INDENT_IMPORT: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import").unwrap(),
        Regex::new(r"(?m)^\s*import\s+([\w.]+)").unwrap(),
        Regex::new(r#"(?m)^\s*require(?:_relative)?\s+["']([^"']+)["']"#).unwrap(),
    ]
});

static INDENT_COMMENT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*#"#).unwrap());

// ─── Flow family ────────────────────────────────────────────────────────

static FLOW_IMPORT: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Shell source/dot includes
        Regex::new(r#"(?m)^\s*(?:source|\.)\s+([\w./~-]+)"#).unwrap(),
        // Dockerfile base images
        Regex::new(r"(?mi)^FROM\s+([\w./:@-]+)").unwrap(),
        // Makefile includes
        Regex::new(r"(?m)^-?include\s+([\w./-]+)").unwrap(),
    ]
});

/// Analyze a chunk's content. Always returns well-formed metadata.
///
/// The relative path backstops language detection when the caller has
/// no language (extension-less callers, tests).
pub fn analyze(content: &str, language: Option<Language>, relative_path: &str) -> ChunkMetadata {
    let language =
        language.or_else(|| Language::from_path(std::path::Path::new(relative_path)));
    let Some(lang) = language else {
        return ChunkMetadata::plain(None);
    };

    match lang.family() {
        LanguageFamily::Braces => analyze_braces(content, lang),
        LanguageFamily::Indentation => analyze_indentation(content, lang),
        // Markup and declarative-flow content stays `code` even when
        // imports or comments are present
        LanguageFamily::Markup => ChunkMetadata::plain(Some(lang)),
        LanguageFamily::Flow => {
            let mut meta = ChunkMetadata::plain(Some(lang));
            meta.imports = collect_imports(content, &FLOW_IMPORT);
            meta
        }
    }
}

/// Capture up to `context_lines` lines on each side of the chunk from
/// the full buffer. `None` when the chunk touches the buffer edge.
pub fn surrounding_context(
    full_text: &str,
    start_line: u32,
    end_line: u32,
    context_lines: usize,
) -> (Option<Vec<String>>, Option<Vec<String>>) {
    let lines: Vec<&str> = full_text.lines().collect();
    let start = start_line.saturating_sub(1) as usize;
    let end = end_line as usize;

    let before_from = start.saturating_sub(context_lines);
    let before: Vec<String> = lines
        .get(before_from..start)
        .unwrap_or(&[])
        .iter()
        .map(|s| s.to_string())
        .collect();

    let after_to = (end + context_lines).min(lines.len());
    let after: Vec<String> = lines
        .get(end.min(lines.len())..after_to)
        .unwrap_or(&[])
        .iter()
        .map(|s| s.to_string())
        .collect();

    (
        (!before.is_empty()).then_some(before),
        (!after.is_empty()).then_some(after),
    )
}

fn analyze_braces(content: &str, lang: Language) -> ChunkMetadata {
    let function_caps = BRACES_FUNCTION.iter().find_map(|re| re.captures(content));
    let function = function_caps
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let function_start = function_caps
        .as_ref()
        .and_then(|c| c.get(0))
        .map(|m| m.start());
    let class_caps = BRACES_CLASS.captures(content);
    let class = class_caps
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let class_start = class_caps.as_ref().and_then(|c| c.get(0)).map(|m| m.start());
    let imports = collect_imports(content, &BRACES_IMPORT);
    let comment = comment_ratio(content, &BRACES_COMMENT_LINE) > 0.6;

    // The matched function is a method of the matched class only when
    // it falls inside the class's brace span; a sibling top-level
    // function keeps its own priority
    let function_in_class = match (function_start, class_start) {
        (Some(f), Some(c)) => {
            class_body_span(content, c).is_some_and(|span| span.contains(&f))
        }
        _ => false,
    };

    let kind = pick_kind(
        function.is_some(),
        class.is_some(),
        !imports.is_empty(),
        comment,
        lang,
        function_in_class,
    );
    let signature = match kind {
        ChunkKind::Function => function
            .as_deref()
            .and_then(|name| signature_for(content, name, '{')),
        ChunkKind::Class => class
            .as_deref()
            .and_then(|name| signature_for(content, name, '{')),
        _ => None,
    };

    ChunkMetadata {
        language: Some(lang),
        kind,
        function_name: function,
        class_name: class,
        imports,
        context_before: None,
        context_after: None,
        signature,
    }
}

fn analyze_indentation(content: &str, lang: Language) -> ChunkMetadata {
    // Only a top-level def counts as a standalone function; an indented
    // def inside a class-bearing chunk is a method of that class
    let mut top_level_def = None;
    let mut any_def = None;
    for caps in INDENT_FUNCTION.captures_iter(content) {
        let indent = caps.get(1).map(|m| m.as_str().len()).unwrap_or(0);
        let name = caps.get(2).map(|m| m.as_str().to_string());
        if any_def.is_none() {
            any_def = name.clone();
        }
        if indent == 0 && top_level_def.is_none() {
            top_level_def = name;
        }
    }
    let class = INDENT_CLASS
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let imports = collect_imports(content, &INDENT_IMPORT);
    let comment = comment_ratio(content, &INDENT_COMMENT_LINE) > 0.6;

    let standalone = if class.is_some() {
        top_level_def.clone()
    } else {
        top_level_def.clone().or_else(|| any_def.clone())
    };
    let kind = pick_kind(
        standalone.is_some(),
        class.is_some(),
        !imports.is_empty(),
        comment,
        lang,
        false,
    );
    let function_name = standalone.or(any_def);
    let signature = match kind {
        ChunkKind::Function => function_name
            .as_deref()
            .and_then(|name| signature_for(content, name, ':')),
        ChunkKind::Class => class
            .as_deref()
            .and_then(|name| signature_for(content, name, ':')),
        _ => None,
    };

    ChunkMetadata {
        language: Some(lang),
        kind,
        function_name,
        class_name: class,
        imports,
        context_before: None,
        context_after: None,
        signature,
    }
}

/// Which-wins rule over the detected signal set, as a total function:
/// standalone function > class > import > comment > code. In
/// class-oriented languages the class wins over its own methods
/// (`function_in_class`), never over a sibling top-level function.
fn pick_kind(
    has_function: bool,
    has_class: bool,
    has_imports: bool,
    is_comment: bool,
    lang: Language,
    function_in_class: bool,
) -> ChunkKind {
    if has_class && lang.class_oriented() && function_in_class {
        return ChunkKind::Class;
    }
    if has_function {
        ChunkKind::Function
    } else if has_class {
        ChunkKind::Class
    } else if has_imports {
        ChunkKind::Import
    } else if is_comment {
        ChunkKind::Comment
    } else {
        ChunkKind::Code
    }
}

/// Byte span of a class body: from the first opening brace after the
/// class keyword to its balancing close, or the chunk end when the
/// body is truncated by a chunk boundary.
fn class_body_span(content: &str, class_start: usize) -> Option<std::ops::Range<usize>> {
    let open = content[class_start..].find('{')? + class_start;
    let mut depth = 0usize;
    for (i, c) in content[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open..open + i + 1);
                }
            }
            _ => {}
        }
    }
    Some(open..content.len())
}

fn collect_imports(content: &str, patterns: &[Regex]) -> Vec<String> {
    let mut imports = Vec::new();
    for re in patterns {
        for caps in re.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                let import = m.as_str().trim().to_string();
                if !import.is_empty() && !imports.contains(&import) {
                    imports.push(import);
                }
                if imports.len() >= MAX_IMPORTS {
                    return imports;
                }
            }
        }
    }
    imports
}

/// Fraction of non-blank lines that look like comments.
fn comment_ratio(content: &str, line_pattern: &Regex) -> f32 {
    let mut total = 0usize;
    let mut comments = 0usize;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        if line_pattern.is_match(line) {
            comments += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        comments as f32 / total as f32
    }
}

/// Declaration line for a named symbol, cut at the body delimiter and
/// whitespace-normalized.
fn signature_for(content: &str, name: &str, terminator: char) -> Option<String> {
    let line = content.lines().find(|l| l.contains(name))?;
    let cut = line.find(terminator).unwrap_or(line.len());
    let sig = line[..cut].split_whitespace().collect::<Vec<_>>().join(" ");
    (!sig.is_empty()).then_some(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_function() {
        let meta = analyze(
            "/// Adds two numbers\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
            Some(Language::Rust),
            "src/math.rs",
        );
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("add"));
        assert_eq!(
            meta.signature.as_deref(),
            Some("pub fn add(a: i32, b: i32) -> i32")
        );
    }

    #[test]
    fn test_rust_struct_without_functions() {
        let meta = analyze(
            "pub struct Config {\n    pub limit: usize,\n}\n",
            Some(Language::Rust),
            "src/config.rs",
        );
        assert_eq!(meta.kind, ChunkKind::Class);
        assert_eq!(meta.class_name.as_deref(), Some("Config"));
    }

    #[test]
    fn test_function_beats_class_in_braces_family() {
        let content = "struct Helper {}\n\nfn run(h: Helper) {}\n";
        let meta = analyze(content, Some(Language::Rust), "src/run.rs");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("run"));
        assert_eq!(meta.class_name.as_deref(), Some("Helper"));
    }

    #[test]
    fn test_class_wins_for_class_oriented_language() {
        let content =
            "public class Calculator {\n    public int add(int a, int b) {\n        return a + b;\n    }\n}\n";
        let meta = analyze(content, Some(Language::Java), "Calculator.java");
        assert_eq!(meta.kind, ChunkKind::Class);
        assert_eq!(meta.class_name.as_deref(), Some("Calculator"));
    }

    #[test]
    fn test_top_level_function_beside_class_stays_function() {
        // Kotlin permits free functions; a sibling class must not
        // steal the classification
        let content = "fun topLevelHelper() { return 1 }\n\nclass Foo {}\n";
        let meta = analyze(content, Some(Language::Kotlin), "Helper.kt");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("topLevelHelper"));
        assert_eq!(meta.class_name.as_deref(), Some("Foo"));
    }

    #[test]
    fn test_method_inside_class_body_yields_class() {
        let content = "class Repo {\n    fun save(item: Item) {\n        db.put(item)\n    }\n}\n";
        let meta = analyze(content, Some(Language::Kotlin), "Repo.kt");
        assert_eq!(meta.kind, ChunkKind::Class);
        assert_eq!(meta.class_name.as_deref(), Some("Repo"));
    }

    #[test]
    fn test_function_after_class_body_stays_function() {
        let content = "class Point {}\n\nfunc distance(a: Point, b: Point) -> Double {\n    return 0\n}\n";
        let meta = analyze(content, Some(Language::Swift), "geometry.swift");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("distance"));
    }

    #[test]
    fn test_python_method_inside_class() {
        let content = "class Calculator:\n    def add(self, a, b):\n        return a + b\n";
        let meta = analyze(content, Some(Language::Python), "calc.py");
        // No top-level def: the class is the unit
        assert_eq!(meta.kind, ChunkKind::Class);
        assert_eq!(meta.class_name.as_deref(), Some("Calculator"));
    }

    #[test]
    fn test_python_top_level_function() {
        let content = "def main():\n    run()\n";
        let meta = analyze(content, Some(Language::Python), "main.py");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("main"));
        assert_eq!(meta.signature.as_deref(), Some("def main()"));
    }

    #[test]
    fn test_import_block() {
        let content = "use std::path::PathBuf;\nuse serde::Deserialize;\n";
        let meta = analyze(content, Some(Language::Rust), "src/lib.rs");
        assert_eq!(meta.kind, ChunkKind::Import);
        assert_eq!(meta.imports, vec!["std::path::PathBuf", "serde::Deserialize"]);
    }

    #[test]
    fn test_js_imports_and_arrow_function() {
        let content = "import { parse } from './parser';\nconst run = async (x) => parse(x);\n";
        let meta = analyze(content, Some(Language::JavaScript), "run.js");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("run"));
        assert_eq!(meta.imports, vec!["./parser"]);
    }

    #[test]
    fn test_comment_block() {
        let content = "// Licensed under MIT\n// Derived constants below\n// tuned by hand\n";
        let meta = analyze(content, Some(Language::Rust), "src/consts.rs");
        assert_eq!(meta.kind, ChunkKind::Comment);
    }

    #[test]
    fn test_markup_is_always_code() {
        let content = "name: deploy\non: push\njobs:\n  build:\n    runs-on: ubuntu\n";
        let meta = analyze(content, Some(Language::Yaml), ".github/workflows/ci.yml");
        assert_eq!(meta.kind, ChunkKind::Code);
        assert!(meta.imports.is_empty());
    }

    #[test]
    fn test_flow_stays_code_with_imports() {
        let content = "FROM rust:1.85\nRUN cargo build --release\n";
        let meta = analyze(content, Some(Language::Dockerfile), "Dockerfile");
        assert_eq!(meta.kind, ChunkKind::Code);
        assert_eq!(meta.imports, vec!["rust:1.85"]);
    }

    #[test]
    fn test_unknown_language() {
        let meta = analyze("whatever content", None, "file.xyz");
        assert_eq!(meta.kind, ChunkKind::Code);
        assert!(meta.function_name.is_none());
        assert!(meta.imports.is_empty());
    }

    #[test]
    fn test_surrounding_context_middle() {
        let text = "one\ntwo\nthree\nfour\nfive\nsix\n";
        let (before, after) = surrounding_context(text, 3, 4, 2);
        assert_eq!(before.unwrap(), vec!["one", "two"]);
        assert_eq!(after.unwrap(), vec!["five", "six"]);
    }

    #[test]
    fn test_surrounding_context_at_edges() {
        let text = "one\ntwo\nthree\n";
        let (before, after) = surrounding_context(text, 1, 3, 2);
        assert!(before.is_none());
        assert!(after.is_none());
    }

    #[test]
    fn test_surrounding_context_partial() {
        let text = "one\ntwo\nthree\nfour\n";
        let (before, after) = surrounding_context(text, 2, 3, 2);
        assert_eq!(before.unwrap(), vec!["one"]);
        assert_eq!(after.unwrap(), vec!["four"]);
    }

    #[test]
    fn test_go_method_receiver() {
        let content = "func (s *Server) Handle(w http.ResponseWriter) {\n}\n";
        let meta = analyze(content, Some(Language::Go), "server.go");
        assert_eq!(meta.kind, ChunkKind::Function);
        assert_eq!(meta.function_name.as_deref(), Some("Handle"));
    }
}
