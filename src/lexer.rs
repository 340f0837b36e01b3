//! PDF tokenizer.
//!
//! Low-level tokenization of the PDF byte stream. The [`Lexer`] owns an
//! immutable byte buffer and a position cursor, so every error and every
//! recovery can name an exact byte offset. The token grammar itself (numbers,
//! names, hex runs, keywords) is built from nom combinators; literal strings
//! need paren-depth tracking and escape resolution and are scanned by hand.
//!
//! # PDF syntax overview
//!
//! - Numbers: integers (42, -123) and reals (3.14, -2.5, .25, 10.)
//! - Strings: literal ((Hello)) and hexadecimal (<48656C6C6F>)
//! - Names: /Type, /A#20B (with #xx escapes resolved to bytes)
//! - Keywords: true, false, null, obj, endobj, stream, endstream, R, ...
//! - Delimiters: `[`, `]`, `<<`, `>>`
//!
//! Whitespace (`\0 \t \n \f \r` space) and comments (% to EOL) separate
//! tokens and are skipped.

use crate::error::{Error, Result};
use crate::object::Name;
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::one_of,
    combinator::opt,
    sequence::preceded,
    IResult,
};

/// Whether a byte is PDF whitespace.
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | 0x0C | b'\r' | b' ')
}

/// Whether a byte is a PDF delimiter.
pub fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Whether a byte is a regular character (neither whitespace nor delimiter).
pub fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// Tokens recognized by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal string content after escape resolution
    LiteralString(Vec<u8>),
    /// Hex string content after hex decoding
    HexString(Vec<u8>),
    /// Name after `#xx` resolution
    Name(Name),
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `obj`
    Obj,
    /// `endobj`
    EndObj,
    /// `stream`
    Stream,
    /// `endstream`
    EndStream,
    /// `R`
    R,
    /// Any other keyword (`xref`, `trailer`, content operators, ...)
    Keyword(Vec<u8>),
}

/// Parse an integer or real number. Returns an error if no digits are present
/// (`.` or `-` alone are not numbers).
fn number(input: &[u8]) -> IResult<&[u8], Token> {
    let (rest, sign) = opt(one_of::<_, _, nom::error::Error<&[u8]>>("+-"))(input)?;
    let (rest, int_part) = take_while(|b: u8| b.is_ascii_digit())(rest)?;
    let (rest, frac) = opt(preceded(
        tag::<_, _, nom::error::Error<&[u8]>>(b"."),
        take_while(|b: u8| b.is_ascii_digit()),
    ))(rest)?;

    if int_part.is_empty() && frac.map_or(true, |f: &[u8]| f.is_empty()) {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)));
    }

    let negative = sign == Some('-');
    match frac {
        None => {
            // Integer. Overflow falls back to a real, matching viewer behavior.
            let text = std::str::from_utf8(int_part).unwrap_or("0");
            match text.parse::<i64>() {
                Ok(v) => Ok((rest, Token::Integer(if negative { -v } else { v }))),
                Err(_) => {
                    let v: f64 = text.parse().unwrap_or(0.0);
                    Ok((rest, Token::Real(if negative { -v } else { v })))
                }
            }
        }
        Some(frac) => {
            let mut text = String::with_capacity(int_part.len() + frac.len() + 2);
            if negative {
                text.push('-');
            }
            text.push('0');
            text.push_str(std::str::from_utf8(int_part).unwrap_or(""));
            text.push('.');
            text.push_str(std::str::from_utf8(frac).unwrap_or(""));
            text.push('0');
            let v: f64 = text.parse().unwrap_or(0.0);
            Ok((rest, Token::Real(v)))
        }
    }
}

/// Parse a name: `/` followed by regular characters, `#xx` escapes resolved.
fn name(input: &[u8]) -> IResult<&[u8], Token> {
    let (rest, raw) = preceded(tag(b"/"), take_while(is_regular))(input)?;
    Ok((rest, Token::Name(Name(decode_name_escapes(raw)))))
}

/// Parse a run of regular characters and map known keywords.
fn keyword(input: &[u8]) -> IResult<&[u8], Token> {
    let (rest, word) = take_while1(is_regular)(input)?;
    let tok = match word {
        b"true" => Token::True,
        b"false" => Token::False,
        b"null" => Token::Null,
        b"obj" => Token::Obj,
        b"endobj" => Token::EndObj,
        b"stream" => Token::Stream,
        b"endstream" => Token::EndStream,
        b"R" => Token::R,
        other => Token::Keyword(other.to_vec()),
    };
    Ok((rest, tok))
}

/// Resolve `#xx` escapes in raw name bytes.
///
/// Both hex digits are required; malformed sequences are kept literally so a
/// sloppy producer's names still round-trip.
pub fn decode_name_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' {
            let hi = raw.get(i + 1).copied().and_then(hex_value);
            let lo = raw.get(i + 2).copied().and_then(hex_value);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Byte-level tokenizer with a position cursor.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `buf` starting at offset 0.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a lexer over `buf` starting at `pos`.
    pub fn new_at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute offset.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    /// Whether the cursor is at the end of the buffer.
    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// The unread remainder of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Look at the next byte without advancing.
    pub fn peek_byte(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Look at up to `n` bytes without advancing.
    pub fn peek(&self, n: usize) -> &'a [u8] {
        let end = (self.pos + n).min(self.buf.len());
        &self.buf[self.pos..end]
    }

    /// Advance the cursor by `n` bytes.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Skip whitespace bytes only.
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if is_whitespace(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Skip whitespace and `%` comments.
    pub fn skip_ws_and_comments(&mut self) {
        loop {
            self.skip_whitespace();
            if self.peek_byte() == Some(b'%') {
                while let Some(b) = self.peek_byte() {
                    if b == b'\r' || b == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Consume a single EOL: `\r\n`, `\r`, or `\n`. Returns whether one was
    /// present.
    pub fn skip_eol(&mut self) -> bool {
        match self.peek_byte() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
                true
            }
            Some(b'\n') => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// Look at the rest of the current line without advancing.
    pub fn peek_line(&self) -> &'a [u8] {
        let rest = self.remaining();
        let end = rest
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(rest.len());
        &rest[..end]
    }

    /// Read up to the next EOL, consuming the EOL. Handles CR, LF, and CRLF.
    pub fn read_line(&mut self) -> &'a [u8] {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if b == b'\r' || b == b'\n' {
                break;
            }
            self.pos += 1;
        }
        let line = &self.buf[start..self.pos];
        self.skip_eol();
        line
    }

    /// Match a literal keyword at the cursor (after skipping whitespace and
    /// comments), requiring a non-regular byte or EOF after it. Advances only
    /// on success.
    pub fn match_keyword(&mut self, word: &[u8]) -> bool {
        let mut probe = self.clone();
        probe.skip_ws_and_comments();
        if probe.remaining().starts_with(word) {
            let after = probe.buf.get(probe.pos + word.len()).copied();
            if after.map_or(true, |b| !is_regular(b)) {
                self.pos = probe.pos + word.len();
                return true;
            }
        }
        false
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        Error::MalformedToken {
            offset: self.pos,
            expected,
        }
    }

    /// Read the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_ws_and_comments();
        let Some(b) = self.peek_byte() else {
            return Err(self.unexpected("token"));
        };
        match b {
            b'/' => self.run_nom(name, "name"),
            b'(' => self.read_literal_string().map(Token::LiteralString),
            b'<' => {
                if self.peek(2) == b"<<" {
                    self.advance(2);
                    Ok(Token::DictStart)
                } else {
                    self.read_hex_string().map(Token::HexString)
                }
            }
            b'>' => {
                if self.peek(2) == b">>" {
                    self.advance(2);
                    Ok(Token::DictEnd)
                } else {
                    Err(self.unexpected(">>"))
                }
            }
            b'[' => {
                self.advance(1);
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.advance(1);
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.run_nom(number, "number"),
            _ if is_regular(b) => self.run_nom(keyword, "keyword"),
            _ => Err(self.unexpected("token")),
        }
    }

    /// Peek the next token without advancing.
    pub fn peek_token(&self) -> Result<Token> {
        self.clone().next_token()
    }

    /// Run a nom parser at the cursor, translating slice arithmetic back into
    /// a byte offset.
    fn run_nom(
        &mut self,
        parser: fn(&[u8]) -> IResult<&[u8], Token>,
        expected: &'static str,
    ) -> Result<Token> {
        let input = self.remaining();
        match parser(input) {
            Ok((rest, tok)) => {
                self.pos += input.len() - rest.len();
                Ok(tok)
            }
            Err(_) => Err(self.unexpected(expected)),
        }
    }

    /// Read a required integer token.
    pub fn read_integer(&mut self) -> Result<i64> {
        match self.next_token()? {
            Token::Integer(v) => Ok(v),
            _ => Err(self.unexpected("integer")),
        }
    }

    /// Read a required numeric token as a real; integers coerce.
    pub fn read_real(&mut self) -> Result<f64> {
        match self.next_token()? {
            Token::Real(v) => Ok(v),
            Token::Integer(v) => Ok(v as f64),
            _ => Err(self.unexpected("number")),
        }
    }

    /// Read a required name token.
    pub fn read_name(&mut self) -> Result<Name> {
        match self.next_token()? {
            Token::Name(name) => Ok(name),
            _ => Err(self.unexpected("name")),
        }
    }

    /// Read a literal string starting at `(`: balanced parens, escapes
    /// resolved, EOLs inside normalized to `\n`.
    pub fn read_literal_string(&mut self) -> Result<Vec<u8>> {
        if self.peek_byte() != Some(b'(') {
            return Err(self.unexpected("literal string"));
        }
        let start = self.pos;
        self.advance(1);
        let mut out = Vec::new();
        let mut depth = 1usize;
        while let Some(b) = self.peek_byte() {
            self.pos += 1;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b'(');
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push(b')');
                }
                b'\\' => self.read_string_escape(&mut out),
                b'\r' => {
                    // Raw EOL inside a string is recorded as a single \n
                    if self.peek_byte() == Some(b'\n') {
                        self.pos += 1;
                    }
                    out.push(b'\n');
                }
                other => out.push(other),
            }
        }
        self.pos = start;
        Err(self.unexpected("closing parenthesis"))
    }

    /// One escape sequence after a consumed backslash.
    fn read_string_escape(&mut self, out: &mut Vec<u8>) {
        let Some(b) = self.peek_byte() else {
            return;
        };
        match b {
            b'n' => {
                out.push(b'\n');
                self.pos += 1;
            }
            b'r' => {
                out.push(b'\r');
                self.pos += 1;
            }
            b't' => {
                out.push(b'\t');
                self.pos += 1;
            }
            b'b' => {
                out.push(0x08);
                self.pos += 1;
            }
            b'f' => {
                out.push(0x0C);
                self.pos += 1;
            }
            b'(' | b')' | b'\\' => {
                out.push(b);
                self.pos += 1;
            }
            b'\r' => {
                // Line continuation consumes the EOL and yields nothing
                self.pos += 1;
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {
                self.pos += 1;
            }
            b'0'..=b'7' => {
                // One to three octal digits, exactly one byte out
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match self.peek_byte() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            }
            other => {
                // Unknown escape: the backslash is dropped, the byte kept
                out.push(other);
                self.pos += 1;
            }
        }
    }

    /// Read a hex string starting at `<`: whitespace ignored, odd digit count
    /// padded with a trailing zero.
    pub fn read_hex_string(&mut self) -> Result<Vec<u8>> {
        if self.peek_byte() != Some(b'<') {
            return Err(self.unexpected("hex string"));
        }
        self.advance(1);
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        loop {
            let Some(b) = self.peek_byte() else {
                return Err(self.unexpected("closing angle bracket"));
            };
            self.pos += 1;
            match b {
                b'>' => {
                    if let Some(hi) = pending {
                        out.push(hi << 4);
                    }
                    return Ok(out);
                }
                _ if is_whitespace(b) => {}
                _ => match hex_value(b) {
                    Some(v) => match pending.take() {
                        Some(hi) => out.push(hi << 4 | v),
                        None => pending = Some(v),
                    },
                    None => {
                        self.pos -= 1;
                        return Err(self.unexpected("hex digit"));
                    }
                },
            }
        }
    }

    /// Scan forward for the next occurrence of `needle`, returning its
    /// absolute offset without moving the cursor.
    pub fn find_forward(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(self.pos);
        }
        self.remaining()
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| self.pos + i)
    }
}
