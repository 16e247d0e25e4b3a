//! Language registry for heuristic analysis
//!
//! Maps file extensions to languages and groups languages into the
//! analysis families the metadata extractor understands. Detection is
//! extension-based only; content sniffing is deliberately out of scope.

use serde::{Deserialize, Serialize};

/// Languages recognized by the extension registry.
///
/// Files with other extensions still index (as plain code chunks);
/// this enum only drives heuristic metadata extraction and per-family
/// stop-word selection in the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Scala,
    Dart,
    Shell,
    Sql,
    Html,
    Css,
    Xml,
    Json,
    Yaml,
    Toml,
    Markdown,
    Dockerfile,
    Makefile,
}

/// Analysis family a language belongs to.
///
/// The extractor applies one regex set per family rather than one per
/// language; the family also selects the ranker's stop-word list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    /// Block structure delimited by braces (Rust, C, JS, Go, Java...)
    Braces,
    /// Block structure by indentation (Python, Ruby)
    Indentation,
    /// Markup and data formats (HTML, XML, YAML, JSON, TOML, Markdown)
    Markup,
    /// Declarative flow definitions (shell, SQL, Dockerfile, Makefile)
    Flow,
}

/// Extension table. First match wins; extensions are matched lowercase
/// without the leading dot.
const EXTENSIONS: &[(&str, Language)] = &[
    ("rs", Language::Rust),
    ("py", Language::Python),
    ("pyi", Language::Python),
    ("js", Language::JavaScript),
    ("jsx", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("ts", Language::TypeScript),
    ("tsx", Language::TypeScript),
    ("go", Language::Go),
    ("java", Language::Java),
    ("c", Language::C),
    ("h", Language::C),
    ("cc", Language::Cpp),
    ("cpp", Language::Cpp),
    ("cxx", Language::Cpp),
    ("hpp", Language::Cpp),
    ("cs", Language::CSharp),
    ("rb", Language::Ruby),
    ("php", Language::Php),
    ("swift", Language::Swift),
    ("kt", Language::Kotlin),
    ("kts", Language::Kotlin),
    ("scala", Language::Scala),
    ("dart", Language::Dart),
    ("sh", Language::Shell),
    ("bash", Language::Shell),
    ("zsh", Language::Shell),
    ("sql", Language::Sql),
    ("html", Language::Html),
    ("htm", Language::Html),
    ("css", Language::Css),
    ("scss", Language::Css),
    ("xml", Language::Xml),
    ("json", Language::Json),
    ("yml", Language::Yaml),
    ("yaml", Language::Yaml),
    ("toml", Language::Toml),
    ("md", Language::Markdown),
    ("markdown", Language::Markdown),
];

impl Language {
    /// Detect a language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Language> {
        let lower = ext.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(e, _)| *e == lower)
            .map(|(_, lang)| *lang)
    }

    /// Detect a language from a path, handling extension-less well-known
    /// file names (Dockerfile, Makefile).
    pub fn from_path(path: &std::path::Path) -> Option<Language> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if let Some(lang) = Language::from_extension(ext) {
                return Some(lang);
            }
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some("Dockerfile") => Some(Language::Dockerfile),
            Some("Makefile") | Some("makefile") => Some(Language::Makefile),
            _ => None,
        }
    }

    /// The analysis family this language belongs to.
    pub fn family(&self) -> LanguageFamily {
        match self {
            Language::Rust
            | Language::JavaScript
            | Language::TypeScript
            | Language::Go
            | Language::Java
            | Language::C
            | Language::Cpp
            | Language::CSharp
            | Language::Php
            | Language::Swift
            | Language::Kotlin
            | Language::Scala
            | Language::Dart => LanguageFamily::Braces,
            Language::Python | Language::Ruby => LanguageFamily::Indentation,
            Language::Html
            | Language::Css
            | Language::Xml
            | Language::Json
            | Language::Yaml
            | Language::Toml
            | Language::Markdown => LanguageFamily::Markup,
            Language::Shell | Language::Sql | Language::Dockerfile | Language::Makefile => {
                LanguageFamily::Flow
            }
        }
    }

    /// Whether classes are the primary structural unit for this
    /// language. Used by the which-wins rule: class beats class-methods.
    pub fn class_oriented(&self) -> bool {
        matches!(
            self,
            Language::Java
                | Language::CSharp
                | Language::Kotlin
                | Language::Swift
                | Language::Scala
                | Language::Dart
                | Language::Php
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Scala => "scala",
            Language::Dart => "dart",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Html => "html",
            Language::Css => "css",
            Language::Xml => "xml",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Markdown => "markdown",
            Language::Dockerfile => "dockerfile",
            Language::Makefile => "makefile",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EXTENSIONS
            .iter()
            .map(|(_, l)| *l)
            .chain([Language::Dockerfile, Language::Makefile])
            .find(|l| l.as_str() == s)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// Error returned when parsing an unrecognized language name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl std::fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown language: '{}'", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_extension() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("TSX"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("exe"), None);
    }

    #[test]
    fn test_from_path_well_known_names() {
        assert_eq!(
            Language::from_path(Path::new("docker/Dockerfile")),
            Some(Language::Dockerfile)
        );
        assert_eq!(
            Language::from_path(Path::new("Makefile")),
            Some(Language::Makefile)
        );
        assert_eq!(Language::from_path(Path::new("src/lib.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("LICENSE")), None);
    }

    #[test]
    fn test_families() {
        assert_eq!(Language::Rust.family(), LanguageFamily::Braces);
        assert_eq!(Language::Python.family(), LanguageFamily::Indentation);
        assert_eq!(Language::Yaml.family(), LanguageFamily::Markup);
        assert_eq!(Language::Dockerfile.family(), LanguageFamily::Flow);
    }

    #[test]
    fn test_display_from_str_roundtrip() {
        for lang in [Language::Rust, Language::Python, Language::Makefile] {
            let parsed: Language = lang.as_str().parse().unwrap();
            assert_eq!(parsed, lang);
        }
        assert!("klingon".parse::<Language>().is_err());
    }
}
