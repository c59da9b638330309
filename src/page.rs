//! Laid-out pages and their compact on-device cache format.
//!
//! A page is serialized as a `u32` element count followed by tagged
//! elements. Every element starts with a one-byte tag and two `i16`
//! coordinates; the payload depends on the tag. All integers are
//! little-endian.
//!
//! ```text
//! Line:  tag=1 x y | u32 n | n * (u32 len, bytes) | n * u16 x | n * u8 style | u8 align
//! Image: tag=2 x y | u32 len, path bytes | u16 width | u16 height
//! ```

use std::io::{self, Read, Write};

use crate::error::PageCacheError;
use crate::image_cache::ImageAsset;
use crate::text_flow::{Alignment, Line, LineWord, WordStyle};

const TAG_LINE: u8 = 1;
const TAG_IMAGE: u8 = 2;

/// Upper bound on any stored string; larger values mean a corrupt file.
const MAX_STORED_STRING_BYTES: u32 = 4096;
/// Preallocation cap for counts read from storage.
const MAX_PREALLOC_ITEMS: usize = 64;

/// Something placed on a page at an absolute position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageElement {
    Line { line: Line, x: i16, y: i16 },
    Image { image: ImageAsset, x: i16, y: i16 },
}

impl PageElement {
    /// `(x, y)` of the element's top-left corner within the page.
    pub fn position(&self) -> (i16, i16) {
        match self {
            Self::Line { x, y, .. } | Self::Image { x, y, .. } => (*x, *y),
        }
    }

    /// Wire tag of this element.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Line { .. } => TAG_LINE,
            Self::Image { .. } => TAG_IMAGE,
        }
    }

    pub fn as_line(&self) -> Option<&Line> {
        match self {
            Self::Line { line, .. } => Some(line),
            Self::Image { .. } => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageAsset> {
        match self {
            Self::Image { image, .. } => Some(image),
            Self::Line { .. } => None,
        }
    }

    fn serialize<W: Write>(&self, out: &mut W) -> Result<(), PageCacheError> {
        let (x, y) = self.position();
        write_u8(out, self.tag())?;
        write_i16(out, x)?;
        write_i16(out, y)?;
        match self {
            Self::Line { line, .. } => serialize_line(out, line),
            Self::Image { image, .. } => {
                write_string(out, &image.cache_path)?;
                write_u16(out, image.width)?;
                write_u16(out, image.height)?;
                Ok(())
            }
        }
    }

    fn deserialize<R: Read>(input: &mut R) -> Result<Self, PageCacheError> {
        let tag = read_u8(input)?;
        let x = read_i16(input)?;
        let y = read_i16(input)?;
        match tag {
            TAG_LINE => Ok(Self::Line {
                line: deserialize_line(input)?,
                x,
                y,
            }),
            TAG_IMAGE => {
                let cache_path = read_string(input)?;
                let width = read_u16(input)?;
                let height = read_u16(input)?;
                Ok(Self::Image {
                    image: ImageAsset {
                        cache_path,
                        width,
                        height,
                    },
                    x,
                    y,
                })
            }
            other => Err(PageCacheError::UnknownElementTag(other)),
        }
    }
}

/// Ordered elements bounded by the viewport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub elements: Vec<PageElement>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            elements: Vec::with_capacity(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub(crate) fn push(&mut self, element: PageElement) {
        if self.elements.capacity() == 0 {
            self.elements.reserve(32);
        }
        self.elements.push(element);
    }

    /// True when any element is an image.
    ///
    /// Display code uses this to pick a full refresh for image pages.
    pub fn has_images(&self) -> bool {
        self.elements
            .iter()
            .any(|el| matches!(el, PageElement::Image { .. }))
    }

    /// Iterate the text lines on this page.
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.elements.iter().filter_map(PageElement::as_line)
    }

    /// Iterate the images on this page.
    pub fn images(&self) -> impl Iterator<Item = &ImageAsset> {
        self.elements.iter().filter_map(PageElement::as_image)
    }

    /// Write the page in the cache wire format.
    pub fn serialize<W: Write>(&self, out: &mut W) -> Result<(), PageCacheError> {
        let count = u32::try_from(self.elements.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many page elements"))?;
        write_u32(out, count)?;
        for element in &self.elements {
            element.serialize(out)?;
        }
        Ok(())
    }

    /// Read one page written by [`Page::serialize`].
    pub fn deserialize<R: Read>(input: &mut R) -> Result<Self, PageCacheError> {
        let count = read_u32(input)? as usize;
        let mut elements = Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS));
        for _ in 0..count {
            elements.push(PageElement::deserialize(input)?);
        }
        Ok(Self { elements })
    }
}

fn serialize_line<W: Write>(out: &mut W, line: &Line) -> Result<(), PageCacheError> {
    let words = line.words();
    let count = u32::try_from(words.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many words"))?;
    write_u32(out, count)?;
    for word in words {
        write_string(out, &word.text)?;
    }
    for word in words {
        write_u16(out, word.x)?;
    }
    for word in words {
        write_u8(out, word.style.to_byte())?;
    }
    write_u8(out, line.alignment().to_byte())?;
    Ok(())
}

fn deserialize_line<R: Read>(input: &mut R) -> Result<Line, PageCacheError> {
    let count = read_u32(input)? as usize;
    let mut texts = Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS));
    for _ in 0..count {
        texts.push(read_string(input)?);
    }
    let mut xs = Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS));
    for _ in 0..count {
        xs.push(read_u16(input)?);
    }
    let mut words = Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS));
    for (text, x) in texts.into_iter().zip(xs) {
        let raw = read_u8(input)?;
        let style = WordStyle::from_byte(raw).ok_or(PageCacheError::InvalidStyle(raw))?;
        words.push(LineWord { text, x, style });
    }
    let raw = read_u8(input)?;
    let alignment = Alignment::from_byte(raw).ok_or(PageCacheError::InvalidAlignment(raw))?;
    Ok(Line::new(words, alignment))
}

pub(crate) fn write_u8<W: Write>(out: &mut W, value: u8) -> io::Result<()> {
    out.write_all(&[value])
}

pub(crate) fn write_u16<W: Write>(out: &mut W, value: u16) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub(crate) fn write_i16<W: Write>(out: &mut W, value: i16) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub(crate) fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len())
        .ok()
        .filter(|len| *len <= MAX_STORED_STRING_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    write_u32(out, len)?;
    out.write_all(value.as_bytes())
}

pub(crate) fn read_u8<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_i16<R: Read>(input: &mut R) -> io::Result<i16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_string<R: Read>(input: &mut R) -> Result<String, PageCacheError> {
    let len = read_u32(input)?;
    if len > MAX_STORED_STRING_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "stored string too long").into());
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| PageCacheError::InvalidUtf8)
}
