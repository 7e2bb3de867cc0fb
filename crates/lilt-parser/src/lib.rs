use la_arena::Arena;
use smol_str::SmolStr;
use lilt_ast::*;
use lilt_lexer::{lex, Span, Token};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.start, self.span.end, self.message)
    }
}

/// Parse a source string into a program: type declarations followed by
/// one expression. The first error aborts the parse.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let (tokens, lex_errors) = lex(source);
    if let Some(&span) = lex_errors.first() {
        return Err(ParseError {
            message: "unexpected character".into(),
            span,
        });
    }
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    exprs: Arena<Expr>,
    patterns: Arena<Pattern>,
    type_exprs: Arena<TypeExpr>,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self {
            tokens,
            pos: 0,
            exprs: Arena::new(),
            patterns: Arena::new(),
            type_exprs: Arena::new(),
        }
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or_else(|| {
            self.tokens
                .last()
                .map(|(_, s)| Span::new(s.end, s.end))
                .unwrap_or(Span::new(0, 0))
        })
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, ParseError> {
        if self.check(expected) {
            let (_, span) = self.advance();
            Ok(span)
        } else {
            Err(self.error(format!(
                "expected {:?}, found {}",
                expected,
                self.describe_next()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<(SmolStr, Span), ParseError> {
        if let Some(Token::Ident(_)) = self.peek() {
            if let (Token::Ident(name), span) = self.advance() {
                return Ok((name, span));
            }
            unreachable!()
        }
        Err(self.error(format!("expected identifier, found {}", self.describe_next())))
    }

    fn expect_upper(&mut self) -> Result<(SmolStr, Span), ParseError> {
        if let Some(Token::Upper(_)) = self.peek() {
            if let (Token::Upper(name), span) = self.advance() {
                return Ok((name, span));
            }
            unreachable!()
        }
        Err(self.error(format!(
            "expected type or constructor name, found {}",
            self.describe_next()
        )))
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(t) => format!("{:?}", t),
            None => "end of input".into(),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            span: self.peek_span(),
        }
    }

    // ── Allocators ────────────────────────────────────────────────

    fn alloc_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.exprs.alloc(Expr { kind, span })
    }

    fn alloc_pattern(&mut self, kind: PatternKind, span: Span) -> PatternId {
        self.patterns.alloc(Pattern { kind, span })
    }

    fn alloc_type(&mut self, kind: TypeExprKind, span: Span) -> TypeExprId {
        self.type_exprs.alloc(TypeExpr { kind, span })
    }

    fn expr_span(&self, id: ExprId) -> Span {
        self.exprs[id].span
    }

    // ── Program ───────────────────────────────────────────────────

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut decls = Vec::new();
        while self.check(&Token::Type) {
            decls.push(self.parse_type_decl()?);
        }
        let root = self.parse_expr()?;
        if !self.at_end() {
            return Err(self.error(format!(
                "expected end of input, found {}",
                self.describe_next()
            )));
        }
        Ok(Program {
            decls,
            root,
            exprs: std::mem::take(&mut self.exprs),
            patterns: std::mem::take(&mut self.patterns),
            type_exprs: std::mem::take(&mut self.type_exprs),
        })
    }

    // ── Type declarations ─────────────────────────────────────────

    fn parse_type_decl(&mut self) -> Result<TypeDecl, ParseError> {
        let start = self.expect(&Token::Type)?;
        let (name, _) = self.expect_upper()?;

        let mut params = Vec::new();
        if self.eat(&Token::Lt) {
            loop {
                let (param, _) = self.expect_ident()?;
                params.push(param);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::Gt)?;
        }

        self.expect(&Token::LBrace)?;
        let mut constructors = Vec::new();
        loop {
            constructors.push(self.parse_constructor()?);
            if !self.eat(&Token::Comma) {
                break;
            }
            // trailing comma before `}`
            if self.check(&Token::RBrace) {
                break;
            }
        }
        let end = self.expect(&Token::RBrace)?;

        Ok(TypeDecl {
            name,
            params,
            constructors,
            span: start.merge(end),
        })
    }

    fn parse_constructor(&mut self) -> Result<Constructor, ParseError> {
        let (name, start) = self.expect_upper()?;
        self.expect(&Token::LParen)?;
        let mut fields = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                fields.push(self.parse_type_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::RParen)?;
        Ok(Constructor {
            name,
            fields,
            span: start.merge(end),
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExprId, ParseError> {
        let arg = self.parse_type_atom()?;
        if self.eat(&Token::Arrow) {
            let result = self.parse_type_expr()?;
            let span = self.type_exprs[arg].span.merge(self.type_exprs[result].span);
            return Ok(self.alloc_type(TypeExprKind::Fn { arg, result }, span));
        }
        Ok(arg)
    }

    fn parse_type_atom(&mut self) -> Result<TypeExprId, ParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => {
                let (name, span) = self.expect_ident()?;
                Ok(self.alloc_type(TypeExprKind::Param(name), span))
            }
            Some(Token::Upper(_)) => {
                let (name, start) = self.expect_upper()?;
                let mut args = Vec::new();
                let mut span = start;
                if self.eat(&Token::Lt) {
                    loop {
                        args.push(self.parse_type_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    span = start.merge(self.expect(&Token::Gt)?);
                }
                Ok(self.alloc_type(TypeExprKind::Named { name, args }, span))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_type_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error(format!("expected type, found {}", self.describe_next()))),
        }
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<ExprId, ParseError> {
        match self.peek() {
            Some(Token::Backslash) => self.parse_lambda(),
            Some(Token::Let) => self.parse_let(),
            Some(Token::If) => self.parse_if(),
            Some(Token::Match) => self.parse_match(),
            _ => self.parse_application(),
        }
    }

    fn parse_lambda(&mut self) -> Result<ExprId, ParseError> {
        let start = self.expect(&Token::Backslash)?;
        let (param, _) = self.expect_ident()?;
        self.expect(&Token::Dot)?;
        let body = self.parse_expr()?;
        let span = start.merge(self.expr_span(body));
        Ok(self.alloc_expr(ExprKind::Lambda { param, body }, span))
    }

    fn parse_let(&mut self) -> Result<ExprId, ParseError> {
        let start = self.expect(&Token::Let)?;
        let recursive = self.eat(&Token::Rec);
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        let value = self.parse_expr()?;
        self.expect(&Token::In)?;
        let body = self.parse_expr()?;
        let span = start.merge(self.expr_span(body));
        Ok(self.alloc_expr(
            ExprKind::Let {
                name,
                recursive,
                value,
                body,
            },
            span,
        ))
    }

    fn parse_if(&mut self) -> Result<ExprId, ParseError> {
        let start = self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        self.expect(&Token::Then)?;
        let then_branch = self.parse_expr()?;
        self.expect(&Token::Else)?;
        let else_branch = self.parse_expr()?;
        let span = start.merge(self.expr_span(else_branch));
        Ok(self.alloc_expr(
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    fn parse_match(&mut self) -> Result<ExprId, ParseError> {
        let start = self.expect(&Token::Match)?;
        let scrutinee = self.parse_expr()?;
        self.expect(&Token::LBrace)?;
        let mut arms = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                arms.push(self.parse_arm()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
                if self.check(&Token::RBrace) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(self.alloc_expr(
            ExprKind::Match { scrutinee, arms },
            start.merge(end),
        ))
    }

    fn parse_arm(&mut self) -> Result<MatchArm, ParseError> {
        let pattern = self.parse_pattern()?;
        self.expect(&Token::Arrow)?;
        let body = self.parse_expr()?;
        let span = self.patterns[pattern].span.merge(self.expr_span(body));
        Ok(MatchArm {
            pattern,
            body,
            span,
        })
    }

    fn parse_pattern(&mut self) -> Result<PatternId, ParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => {
                let (name, span) = self.expect_ident()?;
                Ok(self.alloc_pattern(PatternKind::Var(name), span))
            }
            Some(Token::Upper(_)) => {
                let (type_name, start) = self.expect_upper()?;
                self.expect(&Token::ColonColon)?;
                let (ctor, _) = self.expect_upper()?;
                self.expect(&Token::LParen)?;
                let mut fields = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        fields.push(self.parse_pattern()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&Token::RParen)?;
                Ok(self.alloc_pattern(
                    PatternKind::Constructor {
                        type_name,
                        ctor,
                        fields,
                    },
                    start.merge(end),
                ))
            }
            _ => Err(self.error(format!("expected pattern, found {}", self.describe_next()))),
        }
    }

    fn parse_application(&mut self) -> Result<ExprId, ParseError> {
        let mut expr = self.parse_atom()?;
        while self.starts_atom() {
            let arg = self.parse_atom()?;
            let span = self.expr_span(expr).merge(self.expr_span(arg));
            expr = self.alloc_expr(ExprKind::Apply { func: expr, arg }, span);
        }
        Ok(expr)
    }

    fn starts_atom(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Int(_)
                    | Token::True
                    | Token::False
                    | Token::Ident(_)
                    | Token::Upper(_)
                    | Token::LParen
            )
        )
    }

    fn parse_atom(&mut self) -> Result<ExprId, ParseError> {
        match self.peek() {
            Some(Token::Int(_)) => {
                if let (Token::Int(n), span) = self.advance() {
                    Ok(self.alloc_expr(ExprKind::Int(n), span))
                } else {
                    unreachable!()
                }
            }
            Some(Token::True) => {
                let (_, span) = self.advance();
                Ok(self.alloc_expr(ExprKind::Bool(true), span))
            }
            Some(Token::False) => {
                let (_, span) = self.advance();
                Ok(self.alloc_expr(ExprKind::Bool(false), span))
            }
            Some(Token::Ident(_)) => {
                let (name, span) = self.expect_ident()?;
                Ok(self.alloc_expr(ExprKind::Var(name), span))
            }
            Some(Token::Upper(_)) => self.parse_construction(),
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error(format!(
                "expected expression, found {}",
                self.describe_next()
            ))),
        }
    }

    fn parse_construction(&mut self) -> Result<ExprId, ParseError> {
        let (type_name, start) = self.expect_upper()?;
        self.expect(&Token::ColonColon)?;
        let (ctor, _) = self.expect_upper()?;
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::RParen)?;
        Ok(self.alloc_expr(
            ExprKind::Construct {
                type_name,
                ctor,
                args,
            },
            start.merge(end),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source).unwrap_or_else(|e| panic!("parse error: {}", e))
    }

    fn parse_err(source: &str) -> ParseError {
        match parse(source) {
            Ok(_) => panic!("expected parse error, got none"),
            Err(e) => e,
        }
    }

    #[test]
    fn literals() {
        let p = parse_ok("42");
        assert!(matches!(p.exprs[p.root].kind, ExprKind::Int(42)));
        let p = parse_ok("true");
        assert!(matches!(p.exprs[p.root].kind, ExprKind::Bool(true)));
    }

    #[test]
    fn lambda_and_application() {
        let p = parse_ok(r"(\x. x) 5");
        match &p.exprs[p.root].kind {
            ExprKind::Apply { func, arg } => {
                assert!(matches!(p.exprs[*func].kind, ExprKind::Lambda { .. }));
                assert!(matches!(p.exprs[*arg].kind, ExprKind::Int(5)));
            }
            other => panic!("expected application, got {:?}", other),
        }
    }

    #[test]
    fn application_is_left_associative() {
        let p = parse_ok("add 1 2");
        match &p.exprs[p.root].kind {
            ExprKind::Apply { func, arg } => {
                assert!(matches!(p.exprs[*arg].kind, ExprKind::Int(2)));
                match &p.exprs[*func].kind {
                    ExprKind::Apply { func, arg } => {
                        assert!(matches!(&p.exprs[*func].kind, ExprKind::Var(n) if n == "add"));
                        assert!(matches!(p.exprs[*arg].kind, ExprKind::Int(1)));
                    }
                    other => panic!("expected inner application, got {:?}", other),
                }
            }
            other => panic!("expected application, got {:?}", other),
        }
    }

    #[test]
    fn lambda_body_extends_right() {
        // `\x. add x 1` parses the whole application as the body
        let p = parse_ok(r"\x. add x 1");
        match &p.exprs[p.root].kind {
            ExprKind::Lambda { body, .. } => {
                assert!(matches!(p.exprs[*body].kind, ExprKind::Apply { .. }));
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn let_and_let_rec() {
        let p = parse_ok("let x = 1 in x");
        assert!(matches!(
            &p.exprs[p.root].kind,
            ExprKind::Let { recursive: false, .. }
        ));
        let p = parse_ok(r"let rec f = \x. f x in f");
        assert!(matches!(
            &p.exprs[p.root].kind,
            ExprKind::Let { recursive: true, .. }
        ));
    }

    #[test]
    fn if_expression() {
        let p = parse_ok("if true then 1 else 2");
        assert!(matches!(&p.exprs[p.root].kind, ExprKind::If { .. }));
    }

    #[test]
    fn if_condition_is_application() {
        let p = parse_ok("if eq_int x 1 then 1 else 2");
        match &p.exprs[p.root].kind {
            ExprKind::If { condition, .. } => {
                assert!(matches!(p.exprs[*condition].kind, ExprKind::Apply { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn type_declaration() {
        let p = parse_ok("type Maybe<a> { Nothing(), Just(a) } 0");
        assert_eq!(p.decls.len(), 1);
        let decl = &p.decls[0];
        assert_eq!(decl.name, "Maybe");
        assert_eq!(decl.params, vec![SmolStr::new("a")]);
        assert_eq!(decl.constructors.len(), 2);
        assert_eq!(decl.constructors[0].name, "Nothing");
        assert_eq!(decl.constructors[0].fields.len(), 0);
        assert_eq!(decl.constructors[1].name, "Just");
        assert_eq!(decl.constructors[1].fields.len(), 1);
    }

    #[test]
    fn recursive_type_declaration() {
        let p = parse_ok("type List<a> { Cons(a, List<a>), Nil() } 0");
        let cons = &p.decls[0].constructors[0];
        assert_eq!(cons.fields.len(), 2);
        match &p.type_exprs[cons.fields[1]].kind {
            TypeExprKind::Named { name, args } => {
                assert_eq!(name, "List");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected applied type, got {:?}", other),
        }
    }

    #[test]
    fn construction_and_match() {
        let p = parse_ok(
            r"\m. match m { Maybe::Just(x) -> x, Maybe::Nothing() -> 0 }",
        );
        match &p.exprs[p.root].kind {
            ExprKind::Lambda { body, .. } => match &p.exprs[*body].kind {
                ExprKind::Match { arms, .. } => {
                    assert_eq!(arms.len(), 2);
                    match &p.patterns[arms[0].pattern].kind {
                        PatternKind::Constructor {
                            type_name,
                            ctor,
                            fields,
                        } => {
                            assert_eq!(type_name, "Maybe");
                            assert_eq!(ctor, "Just");
                            assert_eq!(fields.len(), 1);
                        }
                        other => panic!("expected constructor pattern, got {:?}", other),
                    }
                }
                other => panic!("expected match, got {:?}", other),
            },
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn nested_construction() {
        let p = parse_ok("List::Cons(1, List::Cons(2, List::Nil()))");
        match &p.exprs[p.root].kind {
            ExprKind::Construct { type_name, ctor, args } => {
                assert_eq!(type_name, "List");
                assert_eq!(ctor, "Cons");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected construction, got {:?}", other),
        }
    }

    #[test]
    fn function_type_in_declaration() {
        let p = parse_ok("type Box<a> { MkBox(a -> a) } 0");
        let field = p.decls[0].constructors[0].fields[0];
        assert!(matches!(
            p.type_exprs[field].kind,
            TypeExprKind::Fn { .. }
        ));
    }

    #[test]
    fn unqualified_constructor_is_an_error() {
        let err = parse_err("Just(1)");
        assert!(err.message.contains("expected"), "message: {}", err.message);
    }

    #[test]
    fn trailing_tokens_are_an_error() {
        let err = parse_err("1 in");
        assert!(err.message.contains("end of input"), "message: {}", err.message);
    }

    #[test]
    fn missing_else_is_an_error() {
        let err = parse_err("if true then 1");
        assert!(err.message.contains("Else"), "message: {}", err.message);
    }
}
