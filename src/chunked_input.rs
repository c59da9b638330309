//! Input adapter that keeps `quick-xml` text events small.
//!
//! `quick-xml` buffers a whole text node before reporting it, so one huge
//! paragraph would sit in memory at once. [`ChunkedInput`] follows the
//! lexical state of the byte stream and, once a run of character data
//! reaches [`TEXT_CHUNK_BYTES`], splices in an empty processing instruction.
//! The tokenizer then reports the node as several text events. Only plain
//! character data is split; tags, comments, CDATA sections and declarations
//! pass through untouched.

use std::io::{self, BufRead, Read};

/// Longest run of character data delivered before a split marker.
const TEXT_CHUNK_BYTES: usize = 1024;

/// Spliced between two halves of a long text node. Parsed as a processing
/// instruction, which the markup driver ignores.
const SPLIT_MARKER: &[u8] = b"<?_?>";

/// Upper bound on bytes scanned per `fill_buf`, so slice-backed inputs are
/// not rescanned end to end on every call.
const SCAN_WINDOW: usize = 4 * TEXT_CHUNK_BYTES;

const CDATA_OPEN: &[u8] = b"CDATA[";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lex {
    Text { run: usize, in_ref: bool },
    Open,
    Bang,
    CommentOpen,
    CDataOpen { matched: usize },
    Comment { dashes: u8 },
    CData { brackets: u8 },
    Pi { question: bool },
    Tag { quote: Option<u8> },
    Decl { depth: u8, quote: Option<u8> },
}

const TEXT: Lex = Lex::Text {
    run: 0,
    in_ref: false,
};

impl Lex {
    fn step(self, byte: u8) -> Lex {
        match self {
            Lex::Text { run, in_ref } => match byte {
                b'<' => Lex::Open,
                b'&' => Lex::Text {
                    run: run.saturating_add(1),
                    in_ref: true,
                },
                b';' | b' ' | b'\t' | b'\r' | b'\n' => Lex::Text {
                    run: run.saturating_add(1),
                    in_ref: false,
                },
                _ => Lex::Text {
                    run: run.saturating_add(1),
                    in_ref,
                },
            },
            Lex::Open => match byte {
                b'!' => Lex::Bang,
                b'?' => Lex::Pi { question: false },
                _ => Lex::Tag { quote: None }.step(byte),
            },
            Lex::Bang => match byte {
                b'-' => Lex::CommentOpen,
                b'[' => Lex::CDataOpen { matched: 0 },
                _ => Lex::Decl {
                    depth: 0,
                    quote: None,
                }
                .step(byte),
            },
            Lex::CommentOpen => match byte {
                b'-' => Lex::Comment { dashes: 0 },
                _ => Lex::Decl {
                    depth: 0,
                    quote: None,
                }
                .step(byte),
            },
            Lex::CDataOpen { matched } => {
                if CDATA_OPEN.get(matched) == Some(&byte) {
                    if matched + 1 == CDATA_OPEN.len() {
                        Lex::CData { brackets: 0 }
                    } else {
                        Lex::CDataOpen {
                            matched: matched + 1,
                        }
                    }
                } else {
                    Lex::Decl {
                        depth: 1,
                        quote: None,
                    }
                    .step(byte)
                }
            }
            Lex::Comment { dashes } => match byte {
                b'-' => Lex::Comment {
                    dashes: dashes.saturating_add(1).min(2),
                },
                b'>' if dashes >= 2 => TEXT,
                _ => Lex::Comment { dashes: 0 },
            },
            Lex::CData { brackets } => match byte {
                b']' => Lex::CData {
                    brackets: brackets.saturating_add(1).min(2),
                },
                b'>' if brackets >= 2 => TEXT,
                _ => Lex::CData { brackets: 0 },
            },
            Lex::Pi { question } => match byte {
                b'>' if question => TEXT,
                _ => Lex::Pi {
                    question: byte == b'?',
                },
            },
            Lex::Tag { quote: Some(q) } => Lex::Tag {
                quote: if byte == q { None } else { Some(q) },
            },
            Lex::Tag { quote: None } => match byte {
                b'"' | b'\'' => Lex::Tag { quote: Some(byte) },
                b'>' => TEXT,
                _ => Lex::Tag { quote: None },
            },
            Lex::Decl {
                depth,
                quote: Some(q),
            } => Lex::Decl {
                depth,
                quote: if byte == q { None } else { Some(q) },
            },
            Lex::Decl { depth, quote: None } => match byte {
                b'"' | b'\'' => Lex::Decl {
                    depth,
                    quote: Some(byte),
                },
                b'[' => Lex::Decl {
                    depth: depth.saturating_add(1),
                    quote: None,
                },
                b']' => Lex::Decl {
                    depth: depth.saturating_sub(1),
                    quote: None,
                },
                b'>' if depth == 0 => TEXT,
                _ => Lex::Decl { depth, quote: None },
            },
        }
    }

    /// Whether a split marker goes in front of `byte`.
    fn splits_before(self, byte: u8) -> bool {
        match self {
            Lex::Text { run, in_ref } => {
                run >= TEXT_CHUNK_BYTES && !in_ref && byte != b'<' && !is_continuation(byte)
            }
            _ => false,
        }
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// [`BufRead`] wrapper that splits long text nodes with [`SPLIT_MARKER`].
#[derive(Debug)]
pub(crate) struct ChunkedInput<R> {
    inner: R,
    lex: Lex,
    marker_pos: Option<usize>,
    consumed: u64,
    inserted: u64,
}

impl<R> ChunkedInput<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            lex: TEXT,
            marker_pos: None,
            consumed: 0,
            inserted: 0,
        }
    }

    /// Bytes taken from the wrapped input so far.
    pub(crate) fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Marker bytes delivered so far.
    pub(crate) fn inserted(&self) -> u64 {
        self.inserted
    }
}

impl<R: BufRead> BufRead for ChunkedInput<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if let Some(pos) = self.marker_pos {
            return Ok(&SPLIT_MARKER[pos..]);
        }
        let mut lex = self.lex;
        let available = self.inner.fill_buf()?;
        let window = available.len().min(SCAN_WINDOW);
        let mut limit = window;
        for (i, &byte) in available[..window].iter().enumerate() {
            if lex.splits_before(byte) {
                limit = i;
                break;
            }
            lex = lex.step(byte);
        }
        if limit == 0 && window > 0 {
            self.marker_pos = Some(0);
            return Ok(SPLIT_MARKER);
        }
        Ok(&available[..limit])
    }

    fn consume(&mut self, amt: usize) {
        if let Some(pos) = self.marker_pos {
            let next = pos + amt;
            self.inserted += amt as u64;
            if next >= SPLIT_MARKER.len() {
                self.marker_pos = None;
                self.lex = TEXT;
            } else {
                self.marker_pos = Some(next);
            }
            return;
        }
        if amt == 0 {
            return;
        }
        if let Ok(available) = self.inner.fill_buf() {
            let end = amt.min(available.len());
            self.lex = available[..end].iter().fold(self.lex, |lex, &b| lex.step(b));
        }
        self.inner.consume(amt);
        self.consumed += amt as u64;
    }
}

impl<R: BufRead> Read for ChunkedInput<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}
