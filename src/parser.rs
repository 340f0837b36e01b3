//! COS object parser.
//!
//! Recursive-descent assembly of [`Object`]s from lexer tokens. The parser
//! leaves the cursor at the first byte after whatever it parsed, so callers
//! (the xref engine, the document loader) can interleave their own reads.
//!
//! Streams are parsed in two phases because `Length` may be an indirect
//! reference that only the document can resolve: [`Parser::parse_indirect`]
//! stops at the first payload byte and returns
//! [`IndirectPayload::PendingStream`]; the caller resolves `Length` and
//! finishes with [`Parser::read_stream_payload`].

use crate::error::{Error, Result, Warning, WarningKind};
use crate::lexer::{Lexer, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use bytes::Bytes;

/// Nesting ceiling for arrays and dictionaries.
const MAX_NESTING: usize = 100;

/// Result of parsing an indirect object definition.
#[derive(Debug)]
pub enum IndirectPayload {
    /// A complete object; `endobj` has been consumed.
    Object(Object),
    /// A stream dictionary whose payload has not been read yet.
    PendingStream {
        /// The stream dictionary
        dict: Dictionary,
        /// Absolute offset of the first payload byte
        data_start: usize,
    },
}

/// Recursive-descent parser over a byte buffer.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    strict: bool,
    content_stream: bool,
    warnings: Vec<Warning>,
}

impl<'a> Parser<'a> {
    /// Create a parser at offset 0.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::new_at(buf, 0, false)
    }

    /// Create a parser at an absolute offset.
    pub fn new_at(buf: &'a [u8], pos: usize, strict: bool) -> Self {
        Self {
            lexer: Lexer::new_at(buf, pos),
            strict,
            content_stream: false,
            warnings: Vec::new(),
        }
    }

    /// Content-stream mode disables indirect-reference recognition, so that
    /// `1 0 0 RG` stays three numbers and an operator.
    pub fn set_content_stream_mode(&mut self, on: bool) {
        self.content_stream = on;
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.lexer.pos()
    }

    /// Warnings recorded so far, draining the internal list.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Access the underlying lexer.
    pub fn lexer_mut(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    fn recover(&mut self, kind: WarningKind, detail: String, err: Error) -> Result<()> {
        if self.strict {
            return Err(err);
        }
        log::warn!("{}", detail);
        self.warnings
            .push(Warning::new(self.lexer.pos() as u64, kind, detail));
        Ok(())
    }

    /// Parse one object and leave the cursor just past it.
    pub fn parse_object(&mut self) -> Result<Object> {
        self.parse_value(0)
    }

    fn parse_value(&mut self, depth: usize) -> Result<Object> {
        if depth > MAX_NESTING {
            return Err(Error::MalformedToken {
                offset: self.lexer.pos(),
                expected: "object nested no deeper than the implementation limit",
            });
        }
        let offset = self.lexer.pos();
        match self.lexer.next_token()? {
            Token::Null => Ok(Object::Null),
            Token::True => Ok(Object::Boolean(true)),
            Token::False => Ok(Object::Boolean(false)),
            Token::Real(r) => Ok(Object::Real(r)),
            Token::LiteralString(s) => Ok(Object::LiteralString(s)),
            Token::HexString(s) => Ok(Object::HexString(s)),
            Token::Name(n) => Ok(Object::Name(n)),
            Token::Integer(i) => self.maybe_reference(i),
            Token::ArrayStart => self.parse_array(depth + 1),
            Token::DictStart => self.parse_dictionary(depth + 1).map(Object::Dictionary),
            _ => Err(Error::MalformedToken {
                offset,
                expected: "object",
            }),
        }
    }

    /// An integer may begin an `N G R` reference. Probe two tokens ahead and
    /// roll back unless both integers are in range and `R` follows.
    fn maybe_reference(&mut self, first: i64) -> Result<Object> {
        if self.content_stream || first < 0 || first > u32::MAX as i64 {
            return Ok(Object::Integer(first));
        }
        let mut probe = self.lexer.clone();
        if let Ok(Token::Integer(generation)) = probe.next_token() {
            if (0..=u16::MAX as i64).contains(&generation) {
                if let Ok(Token::R) = probe.next_token() {
                    self.lexer = probe;
                    return Ok(Object::Reference(ObjectRef::new(
                        first as u32,
                        generation as u16,
                    )));
                }
            }
        }
        Ok(Object::Integer(first))
    }

    fn parse_array(&mut self, depth: usize) -> Result<Object> {
        let mut items = Vec::new();
        loop {
            self.lexer.skip_ws_and_comments();
            if self.lexer.peek_byte() == Some(b']') {
                self.lexer.advance(1);
                return Ok(Object::Array(items));
            }
            if self.lexer.at_end() {
                return Err(Error::MalformedToken {
                    offset: self.lexer.pos(),
                    expected: "closing bracket",
                });
            }
            items.push(self.parse_value(depth)?);
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> Result<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            let key_offset = self.lexer.pos();
            match self.lexer.next_token()? {
                Token::DictEnd => return Ok(dict),
                Token::Name(key) => {
                    self.lexer.skip_ws_and_comments();
                    if self.lexer.peek(2) == b">>" {
                        return Err(Error::MalformedDictionary {
                            offset: self.lexer.pos(),
                            reason: format!("key /{} has no value", key),
                        });
                    }
                    let value = self.parse_value(depth)?;
                    if dict.insert(key.clone(), value).is_some() {
                        self.recover(
                            WarningKind::MalformedDictionary,
                            format!("duplicate dictionary key /{} at byte {}; last value wins", key, key_offset),
                            Error::MalformedDictionary {
                                offset: key_offset,
                                reason: format!("duplicate key /{}", key),
                            },
                        )?;
                    }
                }
                _ => {
                    return Err(Error::MalformedDictionary {
                        offset: key_offset,
                        reason: "dictionary key is not a name".to_string(),
                    });
                }
            }
        }
    }

    /// Parse an indirect object definition `N G obj ... endobj`.
    ///
    /// For streams, parsing stops at the first payload byte (see
    /// [`IndirectPayload::PendingStream`]); otherwise `endobj` is consumed,
    /// tolerantly in lenient mode.
    pub fn parse_indirect(&mut self) -> Result<(ObjectRef, IndirectPayload)> {
        self.lexer.skip_ws_and_comments();
        let header_offset = self.lexer.pos();
        let number = self.lexer.read_integer()?;
        let generation = self.lexer.read_integer()?;
        if number < 0 || number > u32::MAX as i64 || !(0..=u16::MAX as i64).contains(&generation) {
            return Err(Error::MalformedToken {
                offset: header_offset,
                expected: "object number and generation in range",
            });
        }
        if !matches!(self.lexer.next_token()?, Token::Obj) {
            return Err(Error::MalformedToken {
                offset: header_offset,
                expected: "obj keyword",
            });
        }
        let reference = ObjectRef::new(number as u32, generation as u16);

        let body = self.parse_value(0)?;

        match body {
            Object::Dictionary(dict) => {
                let mut probe = self.lexer.clone();
                if probe.match_keyword(b"stream") {
                    self.lexer = probe;
                    self.consume_stream_eol()?;
                    return Ok((
                        reference,
                        IndirectPayload::PendingStream {
                            dict,
                            data_start: self.lexer.pos(),
                        },
                    ));
                }
                self.expect_endobj()?;
                Ok((reference, IndirectPayload::Object(Object::Dictionary(dict))))
            }
            other => {
                self.expect_endobj()?;
                Ok((reference, IndirectPayload::Object(other)))
            }
        }
    }

    /// The `stream` keyword must be followed by exactly one EOL, CRLF or LF.
    /// A lone CR or nothing at all is tolerated with a warning.
    fn consume_stream_eol(&mut self) -> Result<()> {
        let rest = self.lexer.remaining();
        if rest.starts_with(b"\r\n") {
            self.lexer.advance(2);
        } else if rest.starts_with(b"\n") {
            self.lexer.advance(1);
        } else if rest.starts_with(b"\r") {
            self.recover(
                WarningKind::MalformedStream,
                format!("stream keyword followed by CR alone at byte {}", self.lexer.pos()),
                Error::MalformedStream {
                    offset: self.lexer.pos(),
                    reason: "stream keyword followed by CR alone".to_string(),
                },
            )?;
            self.lexer.advance(1);
        } else {
            self.recover(
                WarningKind::MalformedStream,
                format!("no EOL after stream keyword at byte {}", self.lexer.pos()),
                Error::MalformedStream {
                    offset: self.lexer.pos(),
                    reason: "no EOL after stream keyword".to_string(),
                },
            )?;
        }
        Ok(())
    }

    fn expect_endobj(&mut self) -> Result<()> {
        if self.lexer.match_keyword(b"endobj") {
            return Ok(());
        }
        self.recover(
            WarningKind::MalformedToken,
            format!("missing endobj at byte {}", self.lexer.pos()),
            Error::MalformedToken {
                offset: self.lexer.pos(),
                expected: "endobj",
            },
        )
    }

    /// Read a stream payload of `length` bytes starting at `data_start`, then
    /// require `endstream` and `endobj`.
    ///
    /// When `length` is unknown (unresolvable `Length`) or does not land on
    /// `endstream`, the payload is recovered by scanning for the `endstream`
    /// sentinel, with a warning.
    pub fn read_stream_payload(
        &mut self,
        data_start: usize,
        length: Option<usize>,
    ) -> Result<(Bytes, PayloadEnd)> {
        if let Some(len) = length {
            let end = data_start.checked_add(len);
            if let Some(end) = end {
                if end <= data_start + self.buf_len_from(data_start) {
                    self.lexer.seek(end);
                    let mut probe = self.lexer.clone();
                    if probe.match_keyword(b"endstream") {
                        self.lexer = probe;
                        let payload = Bytes::copy_from_slice(self.slice(data_start, end));
                        self.expect_endobj()?;
                        return Ok((payload, PayloadEnd::ByLength));
                    }
                }
            }
            self.recover(
                WarningKind::MalformedStream,
                format!(
                    "stream Length {} does not end at endstream (payload at byte {}); scanning",
                    len, data_start
                ),
                Error::MalformedStream {
                    offset: data_start,
                    reason: format!("Length {} does not end at endstream", len),
                },
            )?;
        } else {
            self.recover(
                WarningKind::MalformedStream,
                format!("stream at byte {} has unresolvable Length; scanning for endstream", data_start),
                Error::MalformedStream {
                    offset: data_start,
                    reason: "unresolvable Length".to_string(),
                },
            )?;
        }

        // Sentinel scan: payload runs up to the EOL preceding endstream.
        self.lexer.seek(data_start);
        let Some(found) = self.lexer.find_forward(b"endstream") else {
            return Err(Error::MalformedStream {
                offset: data_start,
                reason: "no endstream keyword found".to_string(),
            });
        };
        let mut end = found;
        if end > data_start && self.byte(end - 1) == Some(b'\n') {
            end -= 1;
            if end > data_start && self.byte(end - 1) == Some(b'\r') {
                end -= 1;
            }
        } else if end > data_start && self.byte(end - 1) == Some(b'\r') {
            end -= 1;
        }
        let payload = Bytes::copy_from_slice(self.slice(data_start, end));
        self.lexer.seek(found + b"endstream".len());
        self.expect_endobj()?;
        Ok((payload, PayloadEnd::ByScan))
    }

    fn byte(&self, pos: usize) -> Option<u8> {
        let mut probe = self.lexer.clone();
        probe.seek(pos);
        probe.peek_byte()
    }

    fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        let mut probe = self.lexer.clone();
        probe.seek(start);
        &probe.remaining()[..end - start]
    }

    fn buf_len_from(&self, pos: usize) -> usize {
        let mut probe = self.lexer.clone();
        probe.seek(pos);
        probe.remaining().len()
    }
}

/// How a stream payload's end was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEnd {
    /// Length matched and `endstream` followed
    ByLength,
    /// Recovered by scanning for the `endstream` sentinel
    ByScan,
}
