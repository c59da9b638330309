//! Streaming markup driver.
//!
//! Tokenizes chapter XHTML with `quick-xml` and feeds the events into a
//! [`ChapterLayoutEngine`]. [`ChapterPages`] yields pages lazily as they
//! complete; [`paginate_chapter`] is the callback flavor. Long text nodes
//! reach the engine in slices of at most about one KiB.

use std::io::{self, BufRead};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use smallvec::SmallVec;

use crate::chapter::ChapterLayoutEngine;
use crate::chunked_input::ChunkedInput;
use crate::config::LayoutConfig;
use crate::error::{PageCacheError, PaginateError};
use crate::page::Page;

/// Fires a callback whenever consumed bytes cross into a new step bucket.
#[derive(Clone, Copy, Debug)]
struct ProgressTracker {
    total_bytes: u64,
    enabled: bool,
    step: u8,
    last_bucket: u8,
}

impl ProgressTracker {
    fn new(config: &LayoutConfig, total_bytes: u64) -> Self {
        Self {
            total_bytes,
            enabled: total_bytes > 0 && total_bytes >= config.progress_min_bytes,
            step: config.progress_step_percent.clamp(1, 100),
            last_bucket: 0,
        }
    }

    fn update(&mut self, consumed: u64) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        let percent = (consumed.min(self.total_bytes) * 100 / self.total_bytes) as u8;
        let bucket = percent / self.step;
        if bucket == self.last_bucket {
            return None;
        }
        self.last_bucket = bucket;
        Some(percent)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    Running,
    Finished,
}

/// Lazy, non-restartable sequence of a chapter's pages.
///
/// Each `next` call reads markup only until at least one page completes, so
/// at most the pages produced by one event are held. A
/// fatal error is yielded once and ends the sequence; pages already yielded
/// must then be discarded by the caller.
pub struct ChapterPages<'a, R> {
    reader: Reader<ChunkedInput<R>>,
    engine: ChapterLayoutEngine<'a>,
    buf: Vec<u8>,
    entity_buf: String,
    progress: ProgressTracker,
    on_progress: Option<Box<dyn FnMut(u8) + 'a>>,
    state: StreamState,
}

impl<'a, R: BufRead> ChapterPages<'a, R> {
    /// Paginate `input`; `total_bytes` is the chapter size used for
    /// progress reporting (0 disables it).
    pub fn new(engine: ChapterLayoutEngine<'a>, input: R, total_bytes: u64) -> Self {
        let mut reader = Reader::from_reader(ChunkedInput::new(input));
        reader.config_mut().trim_text(false);
        Self {
            progress: ProgressTracker::new(engine.config(), total_bytes),
            reader,
            engine,
            buf: Vec::with_capacity(1024),
            entity_buf: String::with_capacity(16),
            on_progress: None,
            state: StreamState::Running,
        }
    }

    /// Report progress as an integer percentage.
    pub fn with_progress(mut self, on_progress: impl FnMut(u8) + 'a) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    pub fn engine(&self) -> &ChapterLayoutEngine<'a> {
        &self.engine
    }

    /// Bytes of markup consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.reader.get_ref().consumed()
    }

    /// Read and dispatch one markup event.
    fn step(&mut self) -> Result<(), PaginateError> {
        self.buf.clear();
        let event = match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => event,
            Err(err) => {
                let offset = source_offset(&self.reader, self.reader.error_position());
                return Err(xml_error(err, offset));
            }
        };
        let offset = source_offset(&self.reader, self.reader.buffer_position());

        match event {
            Event::Start(e) => {
                let (name, attrs) = decode_start(&self.reader, &e, offset)?;
                let attrs: SmallVec<[(&str, &str); 8]> =
                    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                self.engine.start_element(&name, &attrs);
            }
            Event::Empty(e) => {
                let (name, attrs) = decode_start(&self.reader, &e, offset)?;
                let attrs: SmallVec<[(&str, &str); 8]> =
                    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                self.engine.start_element(&name, &attrs);
                self.engine.end_element(&name);
            }
            Event::End(e) => {
                let name = decode_name(&self.reader, e.local_name().as_ref(), offset)?;
                self.engine.end_element(&name);
            }
            Event::Text(e) => {
                let text = e
                    .decode()
                    .map_err(|err| markup_error(format!("text decode: {:?}", err), offset))?;
                self.engine.characters(&text);
            }
            Event::CData(e) => {
                let text = self
                    .reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| markup_error(format!("cdata decode: {:?}", err), offset))?;
                self.engine.characters(&text);
            }
            Event::GeneralRef(e) => {
                let entity = e
                    .decode()
                    .map_err(|err| markup_error(format!("entity decode: {:?}", err), offset))?;
                self.entity_buf.clear();
                self.entity_buf.push('&');
                self.entity_buf.push_str(&entity);
                self.entity_buf.push(';');
                match quick_xml::escape::unescape(&self.entity_buf) {
                    Ok(resolved) => self.engine.characters(&resolved),
                    Err(err) => {
                        log::warn!(
                            "unknown entity {} at byte {}: {:?}",
                            self.entity_buf,
                            offset,
                            err
                        );
                    }
                }
            }
            Event::Eof => {
                self.engine.finish();
                self.state = StreamState::Finished;
            }
            _ => {}
        }
        Ok(())
    }

    fn report_progress(&mut self) {
        let consumed = self.bytes_consumed();
        if let Some(percent) = self.progress.update(consumed) {
            if let Some(on_progress) = self.on_progress.as_mut() {
                on_progress(percent);
            }
        }
    }
}

impl<R: BufRead> Iterator for ChapterPages<'_, R> {
    type Item = Result<Page, PaginateError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(page) = self.engine.pop_page() {
                return Some(Ok(page));
            }
            if self.state == StreamState::Finished {
                return None;
            }
            if let Err(err) = self.step() {
                if let PaginateError::Markup { message, offset } = &err {
                    log::warn!("markup error at byte {}: {}", offset, message);
                }
                self.state = StreamState::Finished;
                while self.engine.pop_page().is_some() {}
                return Some(Err(err));
            }
            self.report_progress();
        }
    }
}

impl<R> core::fmt::Debug for ChapterPages<'_, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChapterPages")
            .field("engine", &self.engine)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Paginate a chapter, handing every completed page to `on_page`.
///
/// Returns the number of pages produced. A page sink error stops pagination
/// and is returned as [`PaginateError::Sink`]. On any error the pages
/// already delivered are not a valid chapter.
pub fn paginate_chapter<'a, R, F, P>(
    engine: ChapterLayoutEngine<'a>,
    input: R,
    total_bytes: u64,
    mut on_page: F,
    on_progress: P,
) -> Result<usize, PaginateError>
where
    R: BufRead,
    F: FnMut(Page) -> Result<(), PageCacheError>,
    P: FnMut(u8) + 'a,
{
    let mut count = 0usize;
    for page in ChapterPages::new(engine, input, total_bytes).with_progress(on_progress) {
        on_page(page?)?;
        count += 1;
    }
    Ok(count)
}

/// Map a tokenizer position back to a byte offset in the input.
fn source_offset<R>(reader: &Reader<ChunkedInput<R>>, position: u64) -> u64 {
    position.saturating_sub(reader.get_ref().inserted())
}

type DecodedAttrs = SmallVec<[(String, String); 4]>;

fn decode_start<R>(
    reader: &Reader<R>,
    e: &BytesStart<'_>,
    offset: u64,
) -> Result<(String, DecodedAttrs), PaginateError> {
    let name = decode_name(reader, e.local_name().as_ref(), offset)?;
    let mut attrs = DecodedAttrs::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| markup_error(format!("attribute: {}", err), offset))?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|err| markup_error(format!("attribute name: {:?}", err), offset))?
            .into_owned();
        let raw = reader
            .decoder()
            .decode(&attr.value)
            .map_err(|err| markup_error(format!("attribute value: {:?}", err), offset))?
            .into_owned();
        let value = if raw.contains('&') {
            match quick_xml::escape::unescape(&raw) {
                Ok(unescaped) => unescaped.into_owned(),
                Err(_) => raw,
            }
        } else {
            raw
        };
        attrs.push((key, value));
    }
    Ok((name, attrs))
}

fn decode_name<R>(reader: &Reader<R>, raw: &[u8], offset: u64) -> Result<String, PaginateError> {
    let decoded = reader
        .decoder()
        .decode(raw)
        .map_err(|err| markup_error(format!("tag name: {:?}", err), offset))?;
    Ok(decoded.to_ascii_lowercase())
}

fn markup_error(message: String, offset: u64) -> PaginateError {
    PaginateError::Markup { message, offset }
}

fn xml_error(err: quick_xml::Error, offset: u64) -> PaginateError {
    match err {
        quick_xml::Error::Io(io_err) => {
            PaginateError::Io(io::Error::new(io_err.kind(), io_err.to_string()))
        }
        other => markup_error(other.to_string(), offset),
    }
}
