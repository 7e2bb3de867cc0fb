use logos::Logos;
use smol_str::SmolStr;

/// Source span as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"--[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token(",")]
    Comma,
    #[token("=")]
    Eq,
    #[token("\\")]
    Backslash,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("::")]
    ColonColon,

    #[token("let")]
    Let,
    #[token("rec")]
    Rec,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("then")]
    Then,
    #[token("else")]
    Else,
    #[token("match")]
    Match,
    #[token("type")]
    Type,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"-?[0-9]+", priority = 2, callback = |lex| lex.slice().parse::<i32>().ok())]
    Int(i32),

    /// Lowercase identifier: variables, type parameters.
    #[regex(r"[a-z_][a-zA-Z0-9_]*", callback = |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    /// Uppercase identifier: type and constructor names.
    #[regex(r"[A-Z][a-zA-Z0-9_]*", callback = |lex| SmolStr::new(lex.slice()))]
    Upper(SmolStr),
}

/// Lex source code into a list of (token, span) pairs.
///
/// Spans of unlexable input are returned separately.
pub fn lex(source: &str) -> (Vec<(Token, Span)>, Vec<Span>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start as u32, range.end as u32);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => errors.push(span),
        }
    }

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_tokens(source: &str) -> Vec<Token> {
        let (tokens, errors) = lex(source);
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_delimiters() {
        assert_eq!(
            lex_tokens("( ) { } < >"),
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::Lt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(lex_tokens("42"), vec![Token::Int(42)]);
        assert_eq!(lex_tokens("0"), vec![Token::Int(0)]);
        assert_eq!(lex_tokens("-7"), vec![Token::Int(-7)]);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex_tokens("let rec in if then else match type"),
            vec![
                Token::Let,
                Token::Rec,
                Token::In,
                Token::If,
                Token::Then,
                Token::Else,
                Token::Match,
                Token::Type,
            ]
        );
    }

    #[test]
    fn test_booleans() {
        assert_eq!(lex_tokens("true false"), vec![Token::True, Token::False]);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            lex_tokens("foo bar_baz x1"),
            vec![
                Token::Ident("foo".into()),
                Token::Ident("bar_baz".into()),
                Token::Ident("x1".into()),
            ]
        );
    }

    #[test]
    fn test_upper_identifiers() {
        assert_eq!(
            lex_tokens("Maybe Just Nil"),
            vec![
                Token::Upper("Maybe".into()),
                Token::Upper("Just".into()),
                Token::Upper("Nil".into()),
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_ident() {
        // `lets` must lex as an identifier, not `let` + `s`
        assert_eq!(lex_tokens("lets recs"), vec![
            Token::Ident("lets".into()),
            Token::Ident("recs".into()),
        ]);
    }

    #[test]
    fn test_lambda() {
        assert_eq!(
            lex_tokens(r"\x. x"),
            vec![
                Token::Backslash,
                Token::Ident("x".into()),
                Token::Dot,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_arrow_vs_negative_int() {
        assert_eq!(
            lex_tokens("-> -1"),
            vec![Token::Arrow, Token::Int(-1)]
        );
    }

    #[test]
    fn test_qualified_constructor() {
        assert_eq!(
            lex_tokens("Maybe::Just(x)"),
            vec![
                Token::Upper("Maybe".into()),
                Token::ColonColon,
                Token::Upper("Just".into()),
                Token::LParen,
                Token::Ident("x".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(lex_tokens("-- a comment\n42"), vec![Token::Int(42)]);
    }

    #[test]
    fn test_type_declaration() {
        let tokens = lex_tokens("type Maybe<a> { Nothing(), Just(a) }");
        assert_eq!(tokens[0], Token::Type);
        assert_eq!(tokens[1], Token::Upper("Maybe".into()));
        assert_eq!(tokens[2], Token::Lt);
        assert_eq!(tokens[tokens.len() - 1], Token::RBrace);
    }

    #[test]
    fn test_spans() {
        let (tokens, _) = lex("if x then");
        assert_eq!(tokens[0], (Token::If, Span::new(0, 2)));
        assert_eq!(tokens[1], (Token::Ident("x".into()), Span::new(3, 4)));
        assert_eq!(tokens[2], (Token::Then, Span::new(5, 9)));
    }
}
