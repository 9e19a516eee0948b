//! Module `scanner` implements a one‑pass, streaming lexer for the Lox language.
//!
//! It transforms source text into a sequence of `Token<'a>`s, skipping whitespace
//! and comments, and emitting exactly one `EOF` token at the end. Designed as a `FusedIterator`,
//! it can be chained safely with other iterator adapters.
//!
//! Errors (unexpected characters, unterminated strings) are yielded in‑band as
//! `Err(LoxError::Lex)` and scanning resumes with the next byte, so a caller can
//! report every lexical problem in one sweep.
//!
//! # Example
//!
//! ```rust
//! use rox::scanner::Scanner;
//!
//! let scanner = Scanner::new("print 123; // example");
//! for result in scanner {
//!     match result {
//!         Ok(token) => println!("{}", token),
//!         Err(err) => eprintln!("Lex error: {}", err),
//!     }
//! }
//! ```

use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};
use log::{debug, info};
use memchr::memchr;
use phf::phf_map;
use std::iter::FusedIterator;

// ─────────────────────────────────────────────────────────────────────────────
// Static keyword map (compile‑time perfect hash)
// ─────────────────────────────────────────────────────────────────────────────

static KEYWORDS: phf::Map<&'static [u8], TokenType> = phf_map! {
    b"and"    => TokenType::AND,
    b"class"  => TokenType::CLASS,
    b"else"   => TokenType::ELSE,
    b"false"  => TokenType::FALSE,
    b"fun"    => TokenType::FUN,
    b"for"    => TokenType::FOR,
    b"if"     => TokenType::IF,
    b"nil"    => TokenType::NIL,
    b"or"     => TokenType::OR,
    b"print"  => TokenType::PRINT,
    b"return" => TokenType::RETURN,
    b"super"  => TokenType::SUPER,
    b"this"   => TokenType::THIS,
    b"true"   => TokenType::TRUE,
    b"var"    => TokenType::VAR,
    b"while"  => TokenType::WHILE,
};

/// Single‑pass lexer.  Every emitted token's `lexeme` is a slice of the
/// source text, so tokens live exactly as long as the source.
pub struct Scanner<'a> {
    text: &'a str,  // whole source
    src: &'a [u8],  // byte view of `text` for dispatch
    start: usize,   // first byte of the lexeme being scanned
    curr: usize,    // one past the last byte consumed
    line: usize,    // 1‑based
    finished: bool, // EOF already yielded
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        info!("Scanner created over {} bytes", text.len());

        Self {
            text,
            src: text.as_bytes(),
            start: 0,
            curr: 0,
            line: 1,
            finished: false,
        }
    }

    // ───────────────────────────── byte cursor ─────────────────────────────

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        self.curr >= self.src.len()
    }

    /// Consume one byte.  Callers check [`is_at_end`](Self::is_at_end) first.
    #[inline(always)]
    fn advance(&mut self) -> u8 {
        let b = self.src[self.curr];
        self.curr += 1;
        b
    }

    /// Byte at `curr + offset`, or `0` past the end.
    #[inline(always)]
    fn peek_at(&self, offset: usize) -> u8 {
        self.src.get(self.curr + offset).copied().unwrap_or(0)
    }

    #[inline(always)]
    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    #[inline(always)]
    fn match_byte(&mut self, expected: u8) -> bool {
        let hit = self.peek() == expected && !self.is_at_end();
        if hit {
            self.curr += 1;
        }
        hit
    }

    /// `long` if the next byte is `=`, otherwise `short`.
    fn with_equal(&mut self, long: TokenType, short: TokenType) -> TokenType {
        if self.match_byte(b'=') {
            long
        } else {
            short
        }
    }

    // ───────────────────────────── core lexing ─────────────────────────────

    /// Scan the lexeme starting at `self.start`.  `Ok(None)` means it was
    /// whitespace or a comment.
    fn scan_token(&mut self) -> Result<Option<TokenType>> {
        let token_type = match self.advance() {
            b'(' => TokenType::LEFT_PAREN,
            b')' => TokenType::RIGHT_PAREN,
            b'{' => TokenType::LEFT_BRACE,
            b'}' => TokenType::RIGHT_BRACE,
            b',' => TokenType::COMMA,
            b'.' => TokenType::DOT,
            b'-' => TokenType::MINUS,
            b'+' => TokenType::PLUS,
            b';' => TokenType::SEMICOLON,
            b'*' => TokenType::STAR,

            b'!' => self.with_equal(TokenType::BANG_EQUAL, TokenType::BANG),
            b'=' => self.with_equal(TokenType::EQUAL_EQUAL, TokenType::EQUAL),
            b'<' => self.with_equal(TokenType::LESS_EQUAL, TokenType::LESS),
            b'>' => self.with_equal(TokenType::GREATER_EQUAL, TokenType::GREATER),

            b'/' if self.match_byte(b'/') => {
                // Line comment: jump to the newline, which is scanned normally.
                self.curr = match memchr(b'\n', &self.src[self.curr..]) {
                    Some(pos) => self.curr + pos,
                    None => self.src.len(),
                };
                return Ok(None);
            }
            b'/' => TokenType::SLASH,

            b' ' | b'\r' | b'\t' => return Ok(None),

            b'\n' => {
                self.line += 1;
                return Ok(None);
            }

            b'"' => self.string()?,

            b'0'..=b'9' => self.number(),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(),

            _ => {
                // Keep the cursor on a char boundary for multi‑byte input.
                while self.peek() & 0xC0 == 0x80 {
                    self.curr += 1;
                }

                return Err(LoxError::lex(
                    self.line,
                    format!("Unexpected character: {}", &self.text[self.start..self.curr]),
                ));
            }
        };

        Ok(Some(token_type))
    }

    /// String literal; may span lines.  The opening quote is already consumed.
    fn string(&mut self) -> Result<TokenType> {
        while !self.is_at_end() && self.peek() != b'"' {
            if self.advance() == b'\n' {
                self.line += 1;
            }
        }

        if self.is_at_end() {
            return Err(LoxError::lex(self.line, "Unterminated string."));
        }

        self.curr += 1; // closing quote

        let content = &self.text[self.start + 1..self.curr - 1];
        Ok(TokenType::STRING(content.to_owned()))
    }

    /// `123` or `3.14`.  A trailing `.` is not part of the number.
    fn number(&mut self) -> TokenType {
        while self.peek().is_ascii_digit() {
            self.curr += 1;
        }

        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            self.curr += 1;

            while self.peek().is_ascii_digit() {
                self.curr += 1;
            }
        }

        // Only ASCII digits and at most one interior dot were consumed.
        let value = self.text[self.start..self.curr].parse::<f64>().unwrap_or(0.0);
        TokenType::NUMBER(value)
    }

    fn identifier(&mut self) -> TokenType {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.curr += 1;
        }

        KEYWORDS
            .get(&self.src[self.start..self.curr])
            .cloned()
            .unwrap_or(TokenType::IDENTIFIER)
    }
}

// ───────────────────────── Iterator implementation ─────────────────────────

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while !self.is_at_end() {
            self.start = self.curr;

            match self.scan_token() {
                Ok(Some(token_type)) => {
                    let lexeme = &self.text[self.start..self.curr];
                    debug!("Scanned {:?} on line {}", token_type, self.line);

                    return Some(Ok(Token::new(token_type, lexeme, self.line)));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }

        self.finished = true;
        Some(Ok(Token::new(TokenType::EOF, "", self.line)))
    }
}

impl<'a> FusedIterator for Scanner<'a> {}
