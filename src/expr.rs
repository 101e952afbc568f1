//! Syntax trees for macro expressions
use crate::error::ParseError;
use crate::lex::lex;
use crate::SyntaxKind;
use crate::SyntaxKind::*;
use rowan::ast::AstNode;

/// Implementing the `Language` trait teaches rowan to convert between our
/// `SyntaxKind` and its raw `u16` kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lang {}
impl rowan::Language for Lang {
    type Kind = SyntaxKind;
    fn kind_from_raw(raw: rowan::SyntaxKind) -> Self::Kind {
        unsafe { std::mem::transmute::<u16, SyntaxKind>(raw.0) }
    }
    fn kind_to_raw(kind: Self::Kind) -> rowan::SyntaxKind {
        kind.into()
    }
}

use rowan::GreenNode;
use rowan::GreenNodeBuilder;

pub(crate) type SyntaxNode = rowan::SyntaxNode<Lang>;
pub(crate) type SyntaxElement = rowan::NodeOrToken<SyntaxNode, rowan::SyntaxToken<Lang>>;

#[derive(Debug)]
struct Parse {
    green_node: GreenNode,
    errors: Vec<String>,
}

fn parse(text: &str) -> Parse {
    struct Parser {
        /// input tokens, including whitespace,
        /// in *reverse* order.
        tokens: Vec<(SyntaxKind, String)>,
        /// the in-progress tree.
        builder: GreenNodeBuilder<'static>,
        /// the list of syntax errors we've accumulated
        /// so far.
        errors: Vec<String>,
    }

    impl Parser {
        /// A `$` either escapes another `$`, starts a reference, or is literal.
        fn parse_dollar(&mut self) {
            match self.nth(1) {
                Some(DOLLAR) => {
                    self.builder.start_node(ESCAPE.into());
                    self.bump();
                    self.bump();
                    self.builder.finish_node();
                }
                Some(TEXT) => {
                    self.builder.start_node(REFERENCE.into());
                    self.bump();
                    self.builder.start_node(NAME.into());
                    self.bump();
                    self.builder.finish_node();
                    self.builder.finish_node();
                }
                Some(LPAREN) => self.parse_reference(LPAREN, RPAREN),
                Some(LBRACE) => self.parse_reference(LBRACE, RBRACE),
                _ => self.bump(),
            }
        }

        fn parse_reference(&mut self, open: SyntaxKind, close: SyntaxKind) {
            self.builder.start_node(REFERENCE.into());
            self.bump();
            self.bump();

            self.builder.start_node(NAME.into());
            self.parse_until(open, close, true);
            self.builder.finish_node();

            if self.current() == Some(WHITESPACE) {
                self.bump();
                self.builder.start_node(ARGS.into());
                self.parse_until(open, close, false);
                self.builder.finish_node();
            }

            if self.current() == Some(close) {
                self.bump();
            } else {
                self.errors
                    .push("Unterminated variable reference".to_string());
            }
            self.builder.finish_node();
        }

        /// Consume tokens up to the `close` that ends the current reference.
        /// Bare `open`/`close` pairs in between are balanced.
        fn parse_until(&mut self, open: SyntaxKind, close: SyntaxKind, stop_at_whitespace: bool) {
            let mut depth = 0usize;
            loop {
                match self.current() {
                    None => return,
                    Some(DOLLAR) => self.parse_dollar(),
                    Some(k) if k == close => {
                        if depth == 0 {
                            return;
                        }
                        depth -= 1;
                        self.bump();
                    }
                    Some(k) if k == open => {
                        depth += 1;
                        self.bump();
                    }
                    Some(WHITESPACE) if stop_at_whitespace && depth == 0 => return,
                    Some(_) => self.bump(),
                }
            }
        }

        fn parse(mut self) -> Parse {
            self.builder.start_node(ROOT.into());
            while let Some(kind) = self.current() {
                if kind == DOLLAR {
                    self.parse_dollar();
                } else {
                    self.bump();
                }
            }
            self.builder.finish_node();

            Parse {
                green_node: self.builder.finish(),
                errors: self.errors,
            }
        }

        /// Advance one token, adding it to the current branch of the tree builder.
        fn bump(&mut self) {
            if let Some((kind, text)) = self.tokens.pop() {
                self.builder.token(kind.into(), text.as_str());
            }
        }

        /// Peek at the first unprocessed token
        fn current(&self) -> Option<SyntaxKind> {
            self.nth(0)
        }

        fn nth(&self, n: usize) -> Option<SyntaxKind> {
            self.tokens
                .len()
                .checked_sub(n + 1)
                .map(|i| self.tokens[i].0)
        }
    }

    let mut tokens = lex(text);
    tokens.reverse();
    Parser {
        tokens,
        builder: GreenNodeBuilder::new(),
        errors: Vec::new(),
    }
    .parse()
}

macro_rules! ast_node {
    ($ast:ident, $kind:ident) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        /// An AST node for $ast
        pub struct $ast(SyntaxNode);

        impl AstNode for $ast {
            type Language = Lang;

            fn can_cast(kind: SyntaxKind) -> bool {
                kind == $kind
            }

            fn cast(syntax: SyntaxNode) -> Option<Self> {
                if Self::can_cast(syntax.kind()) {
                    Some(Self(syntax))
                } else {
                    None
                }
            }

            fn syntax(&self) -> &SyntaxNode {
                &self.0
            }
        }

        impl core::fmt::Debug for $ast {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({:?})", stringify!($ast), self.0.text().to_string())
            }
        }

        impl core::fmt::Display for $ast {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
                write!(f, "{}", self.0.text())
            }
        }
    };
}

ast_node!(Expression, ROOT);
ast_node!(Reference, REFERENCE);
ast_node!(Name, NAME);
ast_node!(Args, ARGS);

impl Expression {
    /// Parse macro expression text.
    ///
    /// Fails only on a reference whose closing bracket is missing.
    pub fn parse(text: &str) -> Result<Expression, ParseError> {
        let parsed = parse(text);
        if let Some(message) = parsed.errors.into_iter().next() {
            return Err(ParseError::new(message, text));
        }
        Ok(Expression(SyntaxNode::new_root(parsed.green_node)))
    }

    /// The top-level references and function calls, in order
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.0.children().filter_map(Reference::cast)
    }
}

impl Reference {
    /// The name part of the reference
    pub fn name(&self) -> Option<Name> {
        self.0.children().find_map(Name::cast)
    }

    /// The argument text of a function call, if the name was followed by whitespace
    pub(crate) fn args(&self) -> Option<Args> {
        self.0.children().find_map(Args::cast)
    }

    /// The function this reference would call: a name made only of literal
    /// text and followed by arguments
    pub fn function_name(&self) -> Option<String> {
        self.args()?;
        let name = self.name()?;
        if name.is_literal() {
            Some(name.to_string())
        } else {
            None
        }
    }

    /// Everything between the brackets (or the single character after `$`)
    pub(crate) fn inner(&self) -> impl Iterator<Item = SyntaxElement> {
        self.0.children_with_tokens().filter(|element| match element {
            rowan::NodeOrToken::Token(token) => !matches!(
                token.kind(),
                DOLLAR | LPAREN | RPAREN | LBRACE | RBRACE
            ),
            rowan::NodeOrToken::Node(_) => true,
        })
    }

    /// The raw text of the arguments, split at top-level commas.
    ///
    /// With `max` set, splitting stops once `max` arguments exist, so later
    /// commas remain part of the last argument.
    pub fn arguments(&self, max: Option<usize>) -> Vec<String> {
        match self.args() {
            Some(args) => split_arguments(&args, max),
            None => Vec::new(),
        }
    }
}

impl Name {
    /// Whether the name contains no nested references
    pub fn is_literal(&self) -> bool {
        self.0.children().next().is_none()
    }
}

fn split_arguments(args: &Args, max: Option<usize>) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut parens = 0usize;
    let mut braces = 0usize;

    for element in args.syntax().children_with_tokens() {
        match element {
            rowan::NodeOrToken::Node(node) => current.push_str(&node.text().to_string()),
            rowan::NodeOrToken::Token(token) => {
                match token.kind() {
                    LPAREN => parens += 1,
                    RPAREN => parens = parens.saturating_sub(1),
                    LBRACE => braces += 1,
                    RBRACE => braces = braces.saturating_sub(1),
                    COMMA
                        if parens == 0
                            && braces == 0
                            && max.map_or(true, |max| result.len() + 1 < max) =>
                    {
                        result.push(std::mem::take(&mut current));
                        continue;
                    }
                    _ => {}
                }
                current.push_str(token.text());
            }
        }
    }
    result.push(current);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_reference(text: &str) -> Reference {
        Expression::parse(text)
            .unwrap()
            .references()
            .next()
            .unwrap()
    }

    #[test]
    fn test_parse_keeps_text() {
        let text = "gcc $(CFLAGS) -o $@ ${SRC} $$HOME";
        let expr = Expression::parse(text).unwrap();
        assert_eq!(expr.to_string(), text);
        assert_eq!(expr.references().count(), 3);
    }

    #[test]
    fn test_short_reference() {
        let reference = first_reference("$<.o");
        assert_eq!(reference.name().unwrap().to_string(), "<");
        assert_eq!(reference.function_name(), None);
    }

    #[test]
    fn test_escape_is_not_a_reference() {
        let expr = Expression::parse("$$(X)").unwrap();
        assert_eq!(expr.references().count(), 0);
        assert!(expr.syntax().children().any(|n| n.kind() == ESCAPE));
    }

    #[test]
    fn test_literal_dollar() {
        for text in ["a $ b", "cost: $", "$)", "$,"] {
            let expr = Expression::parse(text).unwrap();
            assert_eq!(expr.references().count(), 0, "{}", text);
        }
    }

    #[test]
    fn test_function_name() {
        let reference = first_reference("$(subst a,b,c)");
        assert_eq!(reference.function_name(), Some("subst".to_string()));
        assert_eq!(reference.arguments(None), vec!["a", "b", "c"]);

        let reference = first_reference("$($(F) x)");
        assert_eq!(reference.function_name(), None);
    }

    #[test]
    fn test_nested_arguments() {
        let reference = first_reference("$(if $(filter a,$(X)),yes,(no,really))");
        assert_eq!(
            reference.arguments(None),
            vec!["$(filter a,$(X))", "yes", "(no,really)"]
        );
    }

    #[test]
    fn test_arguments_limit() {
        let reference = first_reference("$(subst a,b,c,d,e)");
        assert_eq!(reference.arguments(Some(3)), vec!["a", "b", "c,d,e"]);
        assert_eq!(reference.arguments(Some(1)), vec!["a,b,c,d,e"]);
    }

    #[test]
    fn test_empty_arguments() {
        let reference = first_reference("$(subst , ,a b)");
        assert_eq!(reference.arguments(Some(3)), vec!["", " ", "a b"]);
    }

    #[test]
    fn test_balanced_brackets() {
        let reference = first_reference("${X{a}b}");
        assert_eq!(reference.name().unwrap().to_string(), "X{a}b");
        let expr = Expression::parse("$(X (a)) tail").unwrap();
        assert_eq!(expr.references().next().unwrap().to_string(), "$(X (a))");
    }

    #[test]
    fn test_unterminated() {
        let err = Expression::parse("$(foo").unwrap_err();
        assert_eq!(err.message, "Unterminated variable reference");
        assert_eq!(err.context, "$(foo");
        assert!(Expression::parse("$(a $(b)").is_err());
        assert!(Expression::parse("${a)").is_err());
    }
}
