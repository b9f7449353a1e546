use std::collections::HashMap;

use serde::Serialize;

use crate::schema::{Rgb, SyntaxColors};

/// Closed lexical category hierarchy. Every category except `Text` has exactly
/// one parent, so color resolution can walk toward the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenCategory {
    Text,
    Whitespace,
    Keyword,
    KeywordConstant,
    KeywordNamespace,
    KeywordType,
    Preprocessor,
    Name,
    NameBuiltin,
    NameClass,
    NameFunction,
    NameDecorator,
    NameVariable,
    NameLabel,
    String,
    StringDouble,
    StringSingle,
    StringChar,
    StringDoc,
    StringBacktick,
    Number,
    NumberInteger,
    NumberFloat,
    NumberHex,
    Comment,
    CommentSingle,
    CommentMultiline,
    CommentPreprocFile,
    Operator,
    Punctuation,
}

impl TokenCategory {
    pub fn parent(self) -> Option<Self> {
        use TokenCategory::*;
        match self {
            Text => None,
            Whitespace | Keyword | Name | String | Number | Comment | Operator | Punctuation => {
                Some(Text)
            }
            KeywordConstant | KeywordNamespace | KeywordType | Preprocessor => Some(Keyword),
            NameBuiltin | NameClass | NameFunction | NameDecorator | NameVariable | NameLabel => {
                Some(Name)
            }
            StringDouble | StringSingle | StringChar | StringDoc | StringBacktick => Some(String),
            NumberInteger | NumberFloat | NumberHex => Some(Number),
            CommentSingle | CommentMultiline | CommentPreprocFile => Some(Comment),
        }
    }

    /// `self`, then each ancestor up to `Text`.
    pub fn lineage(self) -> impl Iterator<Item = TokenCategory> {
        std::iter::successors(Some(self), |category| category.parent())
    }

    pub fn is_within(self, ancestor: TokenCategory) -> bool {
        self.lineage().any(|category| category == ancestor)
    }
}

/// Display roles a category can be painted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRole {
    Keywords,
    Types,
    Functions,
    Strings,
    Numbers,
    Comments,
    Decorators,
    Default,
}

impl ColorRole {
    fn pick(self, colors: &SyntaxColors) -> Rgb {
        match self {
            Self::Keywords => colors.keywords,
            Self::Types => colors.types,
            Self::Functions => colors.functions,
            Self::Strings => colors.strings,
            Self::Numbers => colors.numbers,
            Self::Comments => colors.comments,
            Self::Decorators => colors.decorators,
            Self::Default => colors.default,
        }
    }
}

/// Registered categories. Anything not listed inherits from its nearest
/// registered ancestor.
const ROLE_TABLE: [(TokenCategory, ColorRole); 12] = [
    (TokenCategory::Text, ColorRole::Default),
    (TokenCategory::Keyword, ColorRole::Keywords),
    (TokenCategory::KeywordType, ColorRole::Types),
    (TokenCategory::KeywordNamespace, ColorRole::Types),
    (TokenCategory::NameBuiltin, ColorRole::Types),
    (TokenCategory::NameClass, ColorRole::Types),
    (TokenCategory::NameVariable, ColorRole::Types),
    (TokenCategory::NameFunction, ColorRole::Functions),
    (TokenCategory::NameDecorator, ColorRole::Decorators),
    (TokenCategory::String, ColorRole::Strings),
    (TokenCategory::Number, ColorRole::Numbers),
    (TokenCategory::Comment, ColorRole::Comments),
];

/// Render-scoped memo of resolved colors.
#[derive(Debug, Default)]
pub struct ClassifierCache {
    resolved: HashMap<TokenCategory, Rgb>,
    misses: usize,
}

impl ClassifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Number of lookups that had to walk the hierarchy.
    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[derive(Debug, Clone)]
pub struct TokenClassifier {
    table: HashMap<TokenCategory, Rgb>,
    default: Rgb,
}

impl TokenClassifier {
    pub fn new(colors: &SyntaxColors) -> Self {
        let table = ROLE_TABLE
            .iter()
            .map(|(category, role)| (*category, role.pick(colors)))
            .collect();
        Self {
            table,
            default: colors.default,
        }
    }

    pub fn default_color(&self) -> Rgb {
        self.default
    }

    /// Exact match first, otherwise the most specific registered ancestor.
    pub fn classify(&self, category: TokenCategory, cache: &mut ClassifierCache) -> Rgb {
        if let Some(color) = cache.resolved.get(&category) {
            return *color;
        }
        cache.misses += 1;
        let color = category
            .lineage()
            .find_map(|candidate| self.table.get(&candidate).copied())
            .unwrap_or(self.default);
        cache.resolved.insert(category, color);
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_beats_ancestor() {
        let colors = SyntaxColors::default();
        let classifier = TokenClassifier::new(&colors);
        let mut cache = ClassifierCache::new();
        assert_eq!(classifier.classify(TokenCategory::Keyword, &mut cache), colors.keywords);
        assert_eq!(classifier.classify(TokenCategory::KeywordType, &mut cache), colors.types);
    }

    #[test]
    fn unregistered_category_inherits_from_nearest_ancestor() {
        let colors = SyntaxColors::default();
        let classifier = TokenClassifier::new(&colors);
        let mut cache = ClassifierCache::new();
        assert_eq!(
            classifier.classify(TokenCategory::KeywordConstant, &mut cache),
            colors.keywords
        );
        assert_eq!(classifier.classify(TokenCategory::Preprocessor, &mut cache), colors.keywords);
        assert_eq!(classifier.classify(TokenCategory::StringDoc, &mut cache), colors.strings);
        assert_eq!(classifier.classify(TokenCategory::NumberHex, &mut cache), colors.numbers);
        assert_eq!(
            classifier.classify(TokenCategory::CommentPreprocFile, &mut cache),
            colors.comments
        );
        assert_eq!(classifier.classify(TokenCategory::Name, &mut cache), colors.default);
        assert_eq!(classifier.classify(TokenCategory::Punctuation, &mut cache), colors.default);
    }

    #[test]
    fn lookups_are_memoised_per_category() {
        let classifier = TokenClassifier::new(&SyntaxColors::default());
        let mut cache = ClassifierCache::new();
        for _ in 0..5 {
            classifier.classify(TokenCategory::StringDouble, &mut cache);
            classifier.classify(TokenCategory::NameFunction, &mut cache);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn caller_colors_flow_through() {
        let mut colors = SyntaxColors::default();
        colors.decorators = Rgb::new(1, 2, 3);
        let classifier = TokenClassifier::new(&colors);
        let mut cache = ClassifierCache::new();
        assert_eq!(
            classifier.classify(TokenCategory::NameDecorator, &mut cache),
            Rgb::new(1, 2, 3)
        );
    }

    #[test]
    fn lineage_ends_at_text() {
        let chain = TokenCategory::StringChar.lineage().collect::<Vec<_>>();
        assert_eq!(
            chain,
            vec![TokenCategory::StringChar, TokenCategory::String, TokenCategory::Text]
        );
        assert!(TokenCategory::NameFunction.is_within(TokenCategory::Name));
        assert!(!TokenCategory::NameFunction.is_within(TokenCategory::Keyword));
    }
}
