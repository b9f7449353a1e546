//! Source tokenizing on top of syntect grammars.
//!
//! Every token stream is lossless: concatenating the token texts gives back the
//! input exactly. syntect reports dotted scope stacks such as
//! `string.quoted.double.python`; those are folded into the closed
//! [`TokenCategory`] hierarchy so the classifier can resolve colors by walking
//! parents.
//!
//! Languages without a bundled grammar get the plain-text syntax, which yields
//! a single `Text` token. That fallback is silent apart from a debug log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::Serialize;
use syntect::parsing::{ParseState, Scope, ScopeStack, SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use tracing::{debug, warn};

use crate::classifier::TokenCategory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub category: TokenCategory,
    pub text: String,
}

impl Token {
    pub fn new(category: TokenCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
    Python,
    JavaScript,
    Java,
    Go,
    Rust,
    Ruby,
    Php,
    Swift,
    Kotlin,
    GdScript,
    PlainText,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "c" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "h" => Self::Cpp,
            "py" | "pyw" => Self::Python,
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Self::JavaScript,
            "java" => Self::Java,
            "go" => Self::Go,
            "rs" => Self::Rust,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kt" | "kts" => Self::Kotlin,
            "gd" => Self::GdScript,
            _ => Self::PlainText,
        }
    }

    /// Extension used to pick the bundled grammar. Swift and Kotlin have none
    /// of their own and borrow the closest C-family one; GDScript reads as
    /// Python before [`fuse_dialect_tokens`] runs.
    pub fn grammar_extension(self) -> Option<&'static str> {
        match self {
            Self::C => Some("c"),
            Self::Cpp => Some("cpp"),
            Self::Python | Self::GdScript => Some("py"),
            Self::JavaScript => Some("js"),
            Self::Java | Self::Swift => Some("java"),
            Self::Go => Some("go"),
            Self::Rust => Some("rs"),
            Self::Ruby => Some("rb"),
            Self::Php => Some("php"),
            Self::Kotlin => Some("scala"),
            Self::PlainText => None,
        }
    }

    fn line_comment_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::Python | Self::Ruby | Self::GdScript => &["#"],
            Self::Php | Self::PlainText => &["//", "#"],
            _ => &["//"],
        }
    }

    /// True when the line holds nothing but a line comment.
    pub fn is_comment_only(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        self.line_comment_prefixes()
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
    }

    /// Whether the token stream needs [`fuse_dialect_tokens`].
    pub fn needs_token_fusion(self) -> bool {
        self == Self::GdScript
    }
}

/// Bundled syntect grammars, loaded once per process.
pub fn syntax_set() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

/// Grammar-driven tokenizer for one language.
pub struct SyntaxLexer {
    syntax: &'static SyntaxReference,
}

impl SyntaxLexer {
    /// Looks the grammar up by extension, then by the first line of `text`
    /// (shebangs, modelines), then settles for plain text.
    pub fn for_source(language: Language, text: &str) -> Self {
        let syntaxes = syntax_set();
        let first_line = text.lines().next().unwrap_or_default();
        let syntax = language
            .grammar_extension()
            .and_then(|ext| syntaxes.find_syntax_by_extension(ext))
            .or_else(|| syntaxes.find_syntax_by_first_line(first_line))
            .unwrap_or_else(|| {
                debug!(?language, "no grammar for language, falling back to plain text");
                syntaxes.find_syntax_plain_text()
            });
        Self { syntax }
    }

    pub fn syntax_name(&self) -> &str {
        &self.syntax.name
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let syntaxes = syntax_set();
        let mut state = ParseState::new(self.syntax);
        let mut stack = ScopeStack::new();
        let mut categories = ScopeCategories::default();
        let mut tokens: Vec<Token> = Vec::new();

        let mut consumed = 0;
        for line in LinesWithEndings::from(text) {
            let ops = match state.parse_line(line, syntaxes) {
                Ok(ops) => ops,
                Err(error) => {
                    warn!(%error, syntax = %self.syntax.name, "grammar failed, rest is plain text");
                    push_token(&mut tokens, TokenCategory::Text, &text[consumed..]);
                    return tokens;
                }
            };
            let mut cursor = 0;
            for (offset, op) in ops {
                if offset > cursor {
                    let category = categories.resolve(&stack, &line[cursor..offset]);
                    push_token(&mut tokens, category, &line[cursor..offset]);
                    cursor = offset;
                }
                if let Err(error) = stack.apply(&op) {
                    warn!(?error, syntax = %self.syntax.name, "scope stack out of sync");
                }
            }
            if cursor < line.len() {
                let category = categories.resolve(&stack, &line[cursor..]);
                push_token(&mut tokens, category, &line[cursor..]);
            }
            consumed += line.len();
        }
        tokens
    }
}

/// Tokenizes `text` and applies dialect fusion where the language needs it.
pub fn tokenize_source(language: Language, text: &str) -> Vec<Token> {
    let tokens = SyntaxLexer::for_source(language, text).tokenize(text);
    if language.needs_token_fusion() {
        fuse_dialect_tokens(tokens)
    } else {
        tokens
    }
}

/// Appends `text`, merging into the previous token when the category matches.
fn push_token(tokens: &mut Vec<Token>, category: TokenCategory, text: &str) {
    if text.is_empty() {
        return;
    }
    match tokens.last_mut() {
        Some(last) if last.category == category => last.text.push_str(text),
        _ => tokens.push(Token::new(category, text)),
    }
}

/// Memoised scope to category folding for one tokenize call.
#[derive(Default)]
struct ScopeCategories {
    names: HashMap<Scope, String>,
}

impl ScopeCategories {
    fn name(&mut self, scope: Scope) -> &str {
        self.names.entry(scope).or_insert_with(|| scope.build_string())
    }

    /// Comments and strings win over anything nested inside them. Otherwise
    /// the innermost scope with a meaning decides.
    fn resolve(&mut self, stack: &ScopeStack, text: &str) -> TokenCategory {
        let scopes = stack.as_slice();
        let names = scopes
            .iter()
            .map(|scope| self.name(*scope).to_owned())
            .collect::<Vec<_>>();

        if let Some(category) = names.iter().rev().find_map(|name| enclosing_category(name)) {
            return category;
        }

        let category = names.iter().rev().find_map(|name| scope_category(name));
        match category {
            Some(category)
                if category.is_within(TokenCategory::Keyword)
                    && names.iter().any(|name| name.starts_with("meta.preprocessor")) =>
            {
                TokenCategory::Preprocessor
            }
            Some(category) => category,
            None if text.chars().all(char::is_whitespace) => TokenCategory::Whitespace,
            None => TokenCategory::Text,
        }
    }
}

fn enclosing_category(scope: &str) -> Option<TokenCategory> {
    if scope.starts_with("comment.line") {
        return Some(TokenCategory::CommentSingle);
    }
    if scope.starts_with("comment.block") {
        return Some(TokenCategory::CommentMultiline);
    }
    if scope.starts_with("comment") {
        return Some(TokenCategory::Comment);
    }
    if !scope.starts_with("string") {
        return None;
    }
    let category = if scope.contains(".include") || scope.contains(".lt-gt") {
        TokenCategory::CommentPreprocFile
    } else if scope.contains(".block") || scope.contains(".docstring") {
        TokenCategory::StringDoc
    } else if scope.contains(".double") {
        TokenCategory::StringDouble
    } else if scope.contains(".single") {
        TokenCategory::StringSingle
    } else if scope.contains(".backtick") || scope.contains(".template") {
        TokenCategory::StringBacktick
    } else {
        TokenCategory::String
    };
    Some(category)
}

/// Storage words that declare something rather than name a type.
const DECLARATION_STORAGE: &[&str] = &[
    "function", "class", "struct", "enum", "trait", "impl", "union", "interface", "module",
    "namespace", "fn", "def", "type",
];

fn scope_category(scope: &str) -> Option<TokenCategory> {
    let mut parts = scope.split('.');
    let head = parts.next().unwrap_or_default();
    let kind = parts.next().unwrap_or_default();
    let detail = parts.next().unwrap_or_default();

    if scope.starts_with("meta.annotation")
        || scope.starts_with("variable.annotation")
        || scope.contains(".decorator")
    {
        return Some(TokenCategory::NameDecorator);
    }
    if scope.contains(".lifetime") || scope.starts_with("entity.name.label") {
        return Some(TokenCategory::NameLabel);
    }

    let category = match (head, kind) {
        ("keyword", "operator") => TokenCategory::Operator,
        ("keyword", _) if detail == "import" || kind == "import" => TokenCategory::KeywordNamespace,
        ("keyword", _) => TokenCategory::Keyword,
        ("storage", "type") if DECLARATION_STORAGE.contains(&detail) => TokenCategory::Keyword,
        ("storage", "type") => TokenCategory::KeywordType,
        ("storage", _) => TokenCategory::Keyword,
        ("constant", "numeric") => {
            if scope.contains("hex") {
                TokenCategory::NumberHex
            } else if scope.contains("float") {
                TokenCategory::NumberFloat
            } else if scope.contains("integer") {
                TokenCategory::NumberInteger
            } else {
                TokenCategory::Number
            }
        }
        ("constant", _) => TokenCategory::KeywordConstant,
        ("entity", "name") => match detail {
            "function" => TokenCategory::NameFunction,
            "class" | "struct" | "type" | "enum" | "trait" | "interface" | "namespace"
            | "module" | "union" | "tag" => TokenCategory::NameClass,
            _ => TokenCategory::Name,
        },
        ("entity", "other") if detail == "inherited-class" => TokenCategory::NameClass,
        ("entity", _) => TokenCategory::Name,
        ("support", "function" | "macro") => TokenCategory::NameBuiltin,
        ("support", "constant") => TokenCategory::KeywordConstant,
        ("support", _) => TokenCategory::NameBuiltin,
        ("variable", "function") => TokenCategory::NameFunction,
        ("variable", "language") => TokenCategory::KeywordConstant,
        ("variable", _) => TokenCategory::Name,
        ("punctuation", "definition") => return None,
        ("punctuation", _) => TokenCategory::Punctuation,
        _ => return None,
    };
    Some(category)
}

/// Fuses GDScript constructs a Python grammar splits apart: `@` + name becomes
/// one decorator token, and `$` + a `/`- or `.`-joined node path (or a quoted
/// path) becomes one variable-reference token.
pub fn fuse_dialect_tokens(tokens: Vec<Token>) -> Vec<Token> {
    let atoms = atomize(&tokens);
    let mut fused = FusedTokens::default();
    let mut index = 0;

    while index < atoms.len() {
        let atom = &atoms[index];
        let next = atoms.get(index + 1);

        if atom.text == "@" && next.is_some_and(is_word) {
            let text = format!("@{}", atoms[index + 1].text);
            fused.seal(Token::new(TokenCategory::NameDecorator, text));
            index += 2;
            continue;
        }

        if atom.text == "$" {
            if next.is_some_and(|next| next.category.is_within(TokenCategory::String)) {
                let mut text = "$".to_owned();
                let mut cursor = index + 1;
                while let Some(part) = atoms
                    .get(cursor)
                    .filter(|part| part.category.is_within(TokenCategory::String))
                {
                    text.push_str(&part.text);
                    cursor += 1;
                }
                fused.seal(Token::new(TokenCategory::NameVariable, text));
                index = cursor;
                continue;
            }
            if next.is_some_and(is_word) {
                let mut text = format!("${}", atoms[index + 1].text);
                let mut cursor = index + 2;
                while let (Some(separator), Some(segment)) =
                    (atoms.get(cursor), atoms.get(cursor + 1))
                {
                    if (separator.text == "/" || separator.text == ".") && is_word(segment) {
                        text.push_str(&separator.text);
                        text.push_str(&segment.text);
                        cursor += 2;
                    } else {
                        break;
                    }
                }
                fused.seal(Token::new(TokenCategory::NameVariable, text));
                index = cursor;
                continue;
            }
        }

        fused.push(atom.clone());
        index += 1;
    }

    fused.tokens
}

/// Output of [`fuse_dialect_tokens`]. Fused tokens never merge with their
/// neighbours; everything else is re-joined by category.
#[derive(Default)]
struct FusedTokens {
    tokens: Vec<Token>,
    last_sealed: bool,
}

impl FusedTokens {
    fn push(&mut self, token: Token) {
        match self.tokens.last_mut() {
            Some(last) if !self.last_sealed && last.category == token.category => {
                last.text.push_str(&token.text);
            }
            _ => self.tokens.push(token),
        }
        self.last_sealed = false;
    }

    fn seal(&mut self, token: Token) {
        self.tokens.push(token);
        self.last_sealed = true;
    }
}

/// Splits tokens into identifier runs, whitespace runs and single other
/// characters, each keeping its token's category.
fn atomize(tokens: &[Token]) -> Vec<Token> {
    let mut atoms = Vec::with_capacity(tokens.len() * 2);
    for token in tokens {
        let mut rest = token.text.as_str();
        while let Some(first) = rest.chars().next() {
            let len = if is_identifier_char(first) {
                prefix_len(rest, is_identifier_char)
            } else if first.is_whitespace() {
                prefix_len(rest, char::is_whitespace)
            } else {
                first.len_utf8()
            };
            atoms.push(Token::new(token.category, &rest[..len]));
            rest = &rest[len..];
        }
    }
    atoms
}

fn is_word(token: &Token) -> bool {
    token.text.chars().next().is_some_and(|ch| ch.is_alphabetic() || ch == '_')
        && token.text.chars().all(is_identifier_char)
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn prefix_len(text: &str, predicate: impl Fn(char) -> bool) -> usize {
    text.char_indices()
        .find(|(_, ch)| !predicate(*ch))
        .map_or(text.len(), |(offset, _)| offset)
}
