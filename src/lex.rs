use crate::SyntaxKind;
use std::iter::Peekable;
use std::str::Chars;

/// Splits macro expression text into tokens.
///
/// The only state is whether the previous token was a `$`: the character
/// after a `$` that does not open a bracket is emitted on its own as the
/// one-character name of a short reference.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    after_dollar: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
            after_dollar: false,
        }
    }

    fn is_whitespace(c: char) -> bool {
        c == ' ' || c == '\t' || c == '\n' || c == '\r'
    }

    fn is_text_char(c: char) -> bool {
        !Self::is_whitespace(c) && !matches!(c, '$' | '(' | ')' | '{' | '}' | ',')
    }

    fn read_while<F>(&mut self, predicate: F) -> String
    where
        F: Fn(char) -> bool,
    {
        let mut result = String::new();
        while let Some(&c) = self.input.peek() {
            if predicate(c) {
                result.push(c);
                self.input.next();
            } else {
                break;
            }
        }
        result
    }

    fn single(&mut self, kind: SyntaxKind) -> Option<(SyntaxKind, String)> {
        Some((kind, self.input.next()?.to_string()))
    }

    fn next_token(&mut self) -> Option<(SyntaxKind, String)> {
        let c = *self.input.peek()?;

        if std::mem::take(&mut self.after_dollar) && Self::is_text_char(c) {
            return self.single(SyntaxKind::TEXT);
        }

        match c {
            '$' => {
                self.after_dollar = true;
                self.single(SyntaxKind::DOLLAR)
            }
            '(' => self.single(SyntaxKind::LPAREN),
            ')' => self.single(SyntaxKind::RPAREN),
            '{' => self.single(SyntaxKind::LBRACE),
            '}' => self.single(SyntaxKind::RBRACE),
            ',' => self.single(SyntaxKind::COMMA),
            c if Self::is_whitespace(c) => {
                Some((SyntaxKind::WHITESPACE, self.read_while(Self::is_whitespace)))
            }
            _ => Some((SyntaxKind::TEXT, self.read_while(Self::is_text_char))),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = (crate::SyntaxKind, String);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

pub(crate) fn lex(input: &str) -> Vec<(SyntaxKind, String)> {
    let mut lexer = Lexer::new(input);
    lexer.by_ref().collect::<Vec<_>>()
}
