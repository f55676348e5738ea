//! Selector DSL (spec.md §4.2).
//!
//! A small boolean-algebra language over group/entity names:
//! `not`-right-assoc, `and`-left-assoc binding tighter than `or`-left-assoc,
//! parenthesization, and three atom forms (`Block NUM`, a quoted string, or a
//! bareword). Grounded on `original_source/schedulomicon/parser.py`'s
//! pyparsing `infix_notation` grammar; this module replaces the
//! parser-combinator grammar with a hand-written recursive-descent
//! tokenizer/parser, in keeping with `bin/prover.rs`'s own hand-rolled
//! `parse_flag`/`parse_bool` style for small fixed grammars rather than
//! pulling in a combinator crate for one expression language.

use thiserror::Error;

use crate::registry::{EntityRegistry, Mask3, RegistryError};

/// Failure parsing or evaluating a selector expression.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// The tokenizer/parser could not make sense of the input.
    #[error("selector parse error at `{context}`: {reason}")]
    Parse {
        /// The text being parsed when the error happened.
        context: String,
        /// Human-readable reason.
        reason: String,
    },
    /// An operand name did not resolve in the registry.
    #[error(transparent)]
    Name(#[from] RegistryError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Block(u32),
    Word(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>, SelectorError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0usize;

    let is_op_boundary = |s: &str| matches!(s, "and" | "or" | "not" | "(" | ")");

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(SelectorError::Parse {
                        context: src.to_string(),
                        reason: "unterminated quoted literal".to_string(),
                    });
                }
                let word: String = chars[start..j].iter().collect();
                tokens.push(Token::Word(word));
                i = j + 1;
            }
            _ => {
                // Bareword run: accept word chars, spaces, dashes, dots, commas,
                // apostrophes; stop at a DSL operator word or a delimiter.
                let start = i;
                let mut j = i;
                while j < chars.len()
                    && (chars[j].is_alphanumeric()
                        || " -.',".contains(chars[j]))
                    && !"&|!()\"".contains(chars[j])
                {
                    j += 1;
                }
                let raw: String = chars[start..j].iter().collect();
                let trimmed = raw.trim_end();
                if trimmed.is_empty() {
                    return Err(SelectorError::Parse {
                        context: src.to_string(),
                        reason: format!("unexpected character `{c}`"),
                    });
                }
                i = start + trimmed.chars().count();

                // Split the word run on DSL keywords so `"X and Y"` tokenizes
                // as Word("X") And Word("Y") rather than one bareword.
                let mut cur = String::new();
                for word in trimmed.split_whitespace() {
                    let lower = word.to_lowercase();
                    if lower == "and" || lower == "or" || lower == "not" {
                        if !cur.trim().is_empty() {
                            tokens.push(Token::Word(cur.trim().to_string()));
                            cur.clear();
                        }
                        tokens.push(match lower.as_str() {
                            "and" => Token::And,
                            "or" => Token::Or,
                            _ => Token::Not,
                        });
                    } else if word.eq_ignore_ascii_case("Block")
                        && !is_op_boundary(&word.to_lowercase())
                    {
                        if !cur.trim().is_empty() {
                            tokens.push(Token::Word(cur.trim().to_string()));
                            cur.clear();
                        }
                        cur.push_str(word);
                        cur.push(' ');
                    } else {
                        cur.push_str(word);
                        cur.push(' ');
                    }
                }
                let cur_trim = cur.trim();
                if !cur_trim.is_empty() {
                    if let Some(rest) = cur_trim.strip_prefix("Block ").or_else(|| cur_trim.strip_prefix("block ")) {
                        if let Ok(n) = rest.trim().parse::<u32>() {
                            tokens.push(Token::Block(n));
                        } else {
                            tokens.push(Token::Word(cur_trim.to_string()));
                        }
                    } else {
                        tokens.push(Token::Word(cur_trim.to_string()));
                    }
                }
            }
        }
    }
    Ok(tokens)
}

/// Parsed selector expression tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// A single named operand: a quoted string or a bareword (group or
    /// single-entity name).
    Name(String),
    /// A `Block NUM` atom: the block at 1-based position `NUM` in schedule
    /// order, addressed positionally rather than by name.
    BlockIndex(u32),
    /// `not expr`.
    Not(Box<Expr>),
    /// `lhs and rhs`.
    And(Box<Expr>, Box<Expr>),
    /// `lhs or rhs`.
    Or(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    src: String,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn err(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::Parse { context: self.src.clone(), reason: reason.into() }
    }

    fn parse_expr(&mut self) -> Result<Expr, SelectorError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, SelectorError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, SelectorError> {
        match self.bump() {
            Some(Token::Block(n)) => Ok(Expr::BlockIndex(n)),
            Some(Token::Word(w)) => Ok(Expr::Name(w)),
            Some(Token::LParen) => {
                if matches!(self.peek(), Some(Token::RParen)) {
                    return Err(self.err("empty parenthesized expression"));
                }
                let inner = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.err("expected `)`")),
                }
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }
}

/// Parse a selector string into an [`Expr`] tree.
pub fn parse(src: &str) -> Result<Expr, SelectorError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(SelectorError::Parse {
            context: src.to_string(),
            reason: "empty selector".to_string(),
        });
    }
    let mut parser = Parser { tokens, pos: 0, src: src.to_string() };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.err("trailing tokens after expression"));
    }
    Ok(expr)
}

/// Evaluate `expr` against `registry`, folding names into 3-D masks via
/// elementwise `and`/`or`/`not`.
pub fn eval(expr: &Expr, registry: &EntityRegistry) -> Result<Mask3, SelectorError> {
    match expr {
        Expr::Name(n) => Ok(registry.resolve(n)?),
        Expr::BlockIndex(n) => Ok(registry.resolve_block_position(*n)?),
        Expr::Not(inner) => Ok(eval(inner, registry)?.not()),
        Expr::And(a, b) => Ok(eval(a, registry)?.and(&eval(b, registry)?)),
        Expr::Or(a, b) => Ok(eval(a, registry)?.or(&eval(b, registry)?)),
    }
}

/// Parse and evaluate `src` in one call.
pub fn mask(src: &str, registry: &EntityRegistry) -> Result<Mask3, SelectorError> {
    eval(&parse(src)?, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Axis;

    fn registry() -> EntityRegistry {
        let mut reg = EntityRegistry::new(
            vec!["R1".into(), "R2".into()],
            vec!["Bl1".into(), "Bl2".into()],
            vec!["Ro1".into(), "Ro2".into()],
        );
        reg.define_group("clinic", Axis::Rotation, vec![true, false]);
        reg
    }

    #[test]
    fn and_or_not_precedence() {
        // `not Ro1 or Ro2 and R1` == `(not Ro1) or (Ro2 and R1)`
        let reg = registry();
        let m = mask("not Ro1 or Ro2 and R1", &reg).unwrap();
        // cell (R2, Bl1, Ro1): Ro1 true -> not Ro1 false; Ro2 false -> whole false
        assert!(!m.get(1, 0, 0));
        // cell (R1, Bl1, Ro2): not Ro1 true -> whole true regardless
        assert!(m.get(0, 0, 1));
    }

    #[test]
    fn block_atom_and_parens() {
        let reg = registry();
        let m = mask("(Block 1 or Block 2) and clinic", &reg).unwrap();
        assert!(m.get(0, 0, 0));
        assert!(!m.get(0, 0, 1));
    }

    #[test]
    fn unresolved_name_errors() {
        let reg = registry();
        assert!(mask("nope", &reg).is_err());
    }

    #[test]
    fn empty_parens_error() {
        let reg = registry();
        assert!(mask("()", &reg).is_err());
    }
}
