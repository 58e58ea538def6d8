//! Lexer and parser for module definition sources.
//!
//! A module definition is a file containing exactly one statement:
//!
//! ```text
//! dyn.register({
//!   name: 'a',
//!   loadDependencies: [ 'b' ],
//!   lazyDependencies: [ 'c' ],
//!   onLoad(err, loadDeps, onBackgroundLoad) { ... }
//! });
//! ```
//!
//! Only the declarative parts are interpreted. The body of `onLoad` is
//! skipped by bracket matching and stays opaque.

use logos::Logos;

use crate::error::DefinitionError;
use crate::types::EntryPoint;

#[derive(Logos, Debug, Clone, PartialEq)]
enum Token {
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    Whitespace,

    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    BlockComment,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(";")]
    Semicolon,

    #[token(".")]
    Dot,

    #[token("/")]
    Slash,

    #[regex(r"[-+*%=<>!&|^~?@#\\]+", |lex| lex.slice().to_string())]
    Operator(String),

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9][0-9A-Za-z_.]*")]
    Number,

    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"`([^`\\]|\\.)*`")]
    Template,
}

/// Strip the surrounding quotes and resolve simple escapes.
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn tokenize(source: &str) -> Result<Vec<Token>, DefinitionError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => {
                let offset = lexer.span().start;
                let line = source[..offset].matches('\n').count() + 1;
                return Err(not_a_module(format!(
                    "Unexpected input '{}' on line {line}",
                    lexer.slice()
                )));
            }
        }
    }
    Ok(tokens)
}

fn not_a_module(reason: impl Into<String>) -> DefinitionError {
    DefinitionError::NotAModule {
        reason: reason.into(),
    }
}

/// The declarative parts of a module definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModule {
    pub name: String,
    pub load_dependency_names: Vec<String>,
    pub lazy_dependency_names: Vec<String>,
    pub entry_point: EntryPoint,
}

/// Shape of a property value, as far as the parser cares.
#[derive(Debug)]
enum Value {
    Str(String),
    Array(Vec<Option<String>>),
    Path(String),
    Require(String),
    Function,
    Other,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, reason: &str) -> Result<(), DefinitionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(not_a_module(reason))
        }
    }

    fn callee(&mut self) -> Result<(), DefinitionError> {
        const REASON: &str = "Expected a single call to dyn.register()";
        match self.next() {
            Some(Token::Ident(ident)) if ident == "dyn" => {}
            _ => return Err(not_a_module(REASON)),
        }
        if self.eat(&Token::Dot) {
            match self.next() {
                Some(Token::Ident(ident)) if ident == "register" => {}
                _ => return Err(not_a_module(REASON)),
            }
        }
        Ok(())
    }

    /// Consume a balanced group starting at an opening token.
    fn skip_group(&mut self) -> Result<(), DefinitionError> {
        let mut depth = 0usize;
        loop {
            match self.next() {
                Some(Token::LParen | Token::LBrace | Token::LBracket) => depth += 1,
                Some(Token::RParen | Token::RBrace | Token::RBracket) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(not_a_module("Unbalanced brackets")),
            }
        }
    }

    /// Consume tokens up to (not including) the `,` or `}` that ends a
    /// property value.
    fn value_tokens(&mut self) -> Result<Vec<Token>, DefinitionError> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(not_a_module("Unterminated object literal")),
                Some(Token::Comma | Token::RBrace) if depth == 0 => break,
                Some(Token::LParen | Token::LBrace | Token::LBracket) => depth += 1,
                Some(Token::RParen | Token::RBracket) if depth == 0 => {
                    return Err(not_a_module("Unbalanced brackets"));
                }
                Some(Token::RParen | Token::RBrace | Token::RBracket) => depth -= 1,
                Some(_) => {}
            }
            self.pos += 1;
        }
        Ok(self.tokens[start..self.pos].to_vec())
    }

    fn property(&mut self) -> Result<(String, Value), DefinitionError> {
        let key = match self.next() {
            Some(Token::Ident(key)) | Some(Token::Str(key)) => key,
            _ => return Err(not_a_module("Expected a property name")),
        };

        // Method shorthand: `onLoad(...) { ... }`
        if self.peek() == Some(&Token::LParen) {
            self.skip_group()?;
            if self.peek() != Some(&Token::LBrace) {
                return Err(not_a_module(format!("Expected a body for method '{key}'")));
            }
            self.skip_group()?;
            return Ok((key, Value::Function));
        }

        self.expect(&Token::Colon, "Expected ':' after property name")?;
        let tokens = self.value_tokens()?;
        Ok((key, classify(&tokens)))
    }

    fn object(&mut self) -> Result<Vec<(String, Value)>, DefinitionError> {
        self.expect(
            &Token::LBrace,
            "Expected a single object argument to dyn.register()",
        )?;
        let mut properties = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            properties.push(self.property()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace, "Expected ',' or '}' in object literal")?;
                break;
            }
        }
        Ok(properties)
    }
}

fn classify(tokens: &[Token]) -> Value {
    match tokens {
        [Token::Str(s)] => Value::Str(s.clone()),
        [Token::Ident(f), Token::LParen, Token::Str(package), Token::RParen] if f == "require" => {
            Value::Require(package.clone())
        }
        [Token::LBracket, inner @ .., Token::RBracket] => Value::Array(array_elements(inner)),
        [Token::Ident(first), ..] if first == "function" => Value::Function,
        _ if tokens
            .iter()
            .any(|t| matches!(t, Token::Operator(op) if op == "=>")) =>
        {
            Value::Function
        }
        _ => match dotted_path(tokens) {
            Some(path) => Value::Path(path),
            None => Value::Other,
        },
    }
}

fn dotted_path(tokens: &[Token]) -> Option<String> {
    let mut path = String::new();
    for (index, token) in tokens.iter().enumerate() {
        match (index % 2, token) {
            (0, Token::Ident(ident)) => path.push_str(ident),
            (1, Token::Dot) => path.push('.'),
            _ => return None,
        }
    }
    (!path.is_empty() && tokens.len() % 2 == 1).then_some(path)
}

/// Split the inside of an array literal at top-level commas. Each element
/// is `Some(name)` if it is a single string literal.
fn array_elements(inner: &[Token]) -> Vec<Option<String>> {
    let mut elements = Vec::new();
    let mut current: Vec<&Token> = Vec::new();
    let mut depth = 0usize;
    for token in inner {
        match token {
            Token::Comma if depth == 0 => {
                elements.push(std::mem::take(&mut current));
                continue;
            }
            Token::LParen | Token::LBrace | Token::LBracket => depth += 1,
            Token::RParen | Token::RBrace | Token::RBracket => depth = depth.saturating_sub(1),
            _ => {}
        }
        current.push(token);
    }
    // trailing comma
    if !current.is_empty() {
        elements.push(current);
    }
    elements
        .into_iter()
        .map(|element| match element.as_slice() {
            [Token::Str(s)] => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// Find a property, accepting any of its aliases. A property given more
/// than once (under any alias) is an error.
fn take_property<'a>(
    properties: &'a [(String, Value)],
    aliases: &[&str],
) -> Result<Option<&'a Value>, DefinitionError> {
    let mut found = properties
        .iter()
        .filter(|(key, _)| aliases.contains(&key.as_str()));
    let first = found.next();
    if found.next().is_some() {
        return Err(DefinitionError::DuplicateProperty {
            property: aliases[0].to_string(),
        });
    }
    Ok(first.map(|(_, value)| value))
}

fn dependency_names(
    properties: &[(String, Value)],
    aliases: &[&str],
) -> Result<Vec<String>, DefinitionError> {
    let property = aliases[0].to_string();
    let Some(value) = take_property(properties, aliases)? else {
        return Ok(Vec::new());
    };
    let Value::Array(elements) = value else {
        return Err(DefinitionError::InvalidDependency {
            property,
            reason: "must be an array".to_string(),
        });
    };
    let mut names: Vec<String> = Vec::with_capacity(elements.len());
    for element in elements {
        let Some(name) = element else {
            return Err(DefinitionError::InvalidDependency {
                property,
                reason: "Dependency name must be a string literal".to_string(),
            });
        };
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    Ok(names)
}

/// Parse a module definition source.
pub fn parse_module_source(source: &str) -> Result<ParsedModule, DefinitionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(not_a_module("Expected a single call to dyn.register()"));
    }
    let mut parser = Parser { tokens, pos: 0 };

    parser.callee()?;
    parser.expect(&Token::LParen, "Expected a single call to dyn.register()")?;
    let properties = parser.object()?;
    parser.expect(
        &Token::RParen,
        "Expected a single object argument to dyn.register()",
    )?;
    parser.eat(&Token::Semicolon);
    if parser.peek().is_some() {
        return Err(not_a_module("Found more than one top-level statement"));
    }

    let name = match take_property(&properties, &["name"])? {
        Some(Value::Str(name)) if !name.is_empty() => name.clone(),
        Some(_) => {
            return Err(DefinitionError::MissingName {
                reason: "Module name must be a non-empty string literal".to_string(),
            });
        }
        None => {
            return Err(DefinitionError::MissingName {
                reason: "no \"name\" property".to_string(),
            });
        }
    };

    let load_dependency_names = dependency_names(&properties, &["loadDependencies", "loadDeps"])?;
    let lazy_dependency_names = dependency_names(
        &properties,
        &["lazyDependencies", "backgroundDependencies", "backgroundDeps"],
    )?;

    let entry_point = match take_property(&properties, &["onLoad"])? {
        None => return Err(DefinitionError::MissingEntryPoint),
        Some(Value::Function) => EntryPoint::Inline,
        Some(Value::Str(symbol)) | Some(Value::Path(symbol)) => EntryPoint::Named(symbol.clone()),
        Some(Value::Require(package)) => EntryPoint::External(package.clone()),
        Some(Value::Array(_) | Value::Other) => {
            return Err(not_a_module(
                "onLoad must be a function, a symbol or a require() call",
            ));
        }
    };

    Ok(ParsedModule {
        name,
        load_dependency_names,
        lazy_dependency_names,
        entry_point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_shorthand_definition() {
        let source = r#"
            // greeting module
            dyn.register({
              name: 'b',
              loadDependencies: [ 'd', "e" ],
              lazyDependencies: [ 'g' ],
              onLoad(err, loadDeps, onBackgroundLoad) {
                console.log(`b load with deps: ${Object.keys(loadDeps)}`);
                onBackgroundLoad((err, backgroundDeps) => {});
                return { getName() { return 'Phillip J. Fry' } };
              }
            });
        "#;
        let parsed = parse_module_source(source).unwrap();
        assert_eq!(parsed.name, "b");
        assert_eq!(parsed.load_dependency_names, vec!["d", "e"]);
        assert_eq!(parsed.lazy_dependency_names, vec!["g"]);
        assert_eq!(parsed.entry_point, EntryPoint::Inline);
    }

    #[test]
    fn accepts_legacy_property_names_and_bare_call() {
        let source = "dyn({ name: 'c', loadDeps: ['e'], backgroundDeps: ['f', 'g'], onLoad: start })";
        let parsed = parse_module_source(source).unwrap();
        assert_eq!(parsed.load_dependency_names, vec!["e"]);
        assert_eq!(parsed.lazy_dependency_names, vec!["f", "g"]);
        assert_eq!(parsed.entry_point, EntryPoint::Named("start".to_string()));
    }

    #[test]
    fn require_entry_point_is_external() {
        let parsed =
            parse_module_source("dyn.register({ name: 'left-pad', onLoad: require('left-pad') });")
                .unwrap();
        assert_eq!(
            parsed.entry_point,
            EntryPoint::External("left-pad".to_string())
        );
    }

    #[test]
    fn arrow_function_entry_point_is_inline() {
        let parsed =
            parse_module_source("dyn.register({ name: 'x', onLoad: (err, deps) => ({}) })")
                .unwrap();
        assert_eq!(parsed.entry_point, EntryPoint::Inline);
    }

    #[test]
    fn duplicate_name_property_is_rejected() {
        let err = parse_module_source("dyn.register({ name: 'a', name: 'b', onLoad() {} })")
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DuplicateProperty {
                property: "name".to_string()
            }
        );
    }

    #[test]
    fn aliases_count_as_the_same_property() {
        let err = parse_module_source(
            "dyn.register({ name: 'a', loadDeps: [], loadDependencies: [], onLoad() {} })",
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateProperty { .. }));
    }

    #[test]
    fn non_literal_dependency_is_rejected() {
        let err = parse_module_source(
            "dyn.register({ name: 'a', loadDependencies: [ 'b', other ], onLoad() {} })",
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidDependency { .. }));
    }

    #[test]
    fn dependency_property_must_be_an_array() {
        let err =
            parse_module_source("dyn.register({ name: 'a', lazyDependencies: 'b', onLoad() {} })")
                .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidDependency { .. }));
    }

    #[test]
    fn missing_name_and_entry_point() {
        assert!(matches!(
            parse_module_source("dyn.register({ onLoad() {} })").unwrap_err(),
            DefinitionError::MissingName { .. }
        ));
        assert!(matches!(
            parse_module_source("dyn.register({ name: 42, onLoad() {} })").unwrap_err(),
            DefinitionError::MissingName { .. }
        ));
        assert_eq!(
            parse_module_source("dyn.register({ name: 'a' })").unwrap_err(),
            DefinitionError::MissingEntryPoint
        );
    }

    #[test]
    fn rejects_other_shapes() {
        for source in [
            "",
            "const x = 1;",
            "console.log({ name: 'a', onLoad() {} })",
            "dyn.register({ name: 'a', onLoad() {} }); dyn.register({ name: 'b', onLoad() {} });",
            "dyn.register('a')",
        ] {
            assert!(
                matches!(
                    parse_module_source(source),
                    Err(DefinitionError::NotAModule { .. })
                ),
                "accepted: {source}"
            );
        }
    }

    #[test]
    fn duplicate_dependency_names_collapse() {
        let parsed =
            parse_module_source("dyn.register({ name: 'a', loadDeps: ['b', 'b'], onLoad() {} })")
                .unwrap();
        assert_eq!(parsed.load_dependency_names, vec!["b"]);
    }
}
