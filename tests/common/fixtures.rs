use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use epub_pager::bitmap::{row_stride, write_grayscale_header};
use epub_pager::image_cache::fit_within;
use epub_pager::{CodecError, ImageFormat, RasterCodec};

static SCRATCH_NONCE: AtomicU64 = AtomicU64::new(0);

/// Fresh directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    let nonce = SCRATCH_NONCE.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "epub-pager-it-{label}-{}-{nonce}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("create {}: {}", dir.display(), e));
    dir
}

pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, bytes).unwrap_or_else(|e| panic!("write {}: {}", path.display(), e));
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// One `<p>` holding `words` words, split into `<span>` runs of
/// `run_words` so no single text node is large.
pub fn long_paragraph_chapter(words: usize, run_words: usize) -> String {
    let mut out = String::with_capacity(words * 8 + 64);
    out.push_str("<html><body><p>");
    let mut i = 0;
    while i < words {
        out.push_str("<span>");
        for n in i..(i + run_words).min(words) {
            out.push_str("word");
            out.push_str(&(n % 1000).to_string());
            out.push(' ');
        }
        out.push_str("</span>");
        i += run_words;
    }
    out.push_str("</p></body></html>");
    out
}

/// One `<p>` whose `words` words form a single text node.
pub fn single_text_node_chapter(words: usize) -> String {
    let mut out = String::with_capacity(words * 8 + 64);
    out.push_str("<html><body><p>");
    for n in 0..words {
        out.push_str("word");
        out.push_str(&(n % 1000).to_string());
        out.push(' ');
    }
    out.push_str("</p></body></html>");
    out
}

/// Chapter with `paragraphs` short paragraphs and images between them.
pub fn illustrated_chapter(paragraphs: usize, images: &[&str]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Ch</title></head><body>\n\
         <h1>Chapter Two</h1>\n",
    );
    for i in 0..paragraphs {
        out.push_str(&format!(
            "<p>Paragraph {i} runs on for a little while &amp; then stops.</p>\n"
        ));
        if let Some(src) = images.get(i) {
            out.push_str(&format!("<img src=\"{src}\" alt=\"figure {i}\"/>\n"));
        }
    }
    out.push_str("</body></html>\n");
    out
}

/// Test codec: sources are text files holding `WIDTHxHEIGHT`, output is a
/// blank 2-bit raster fitted to the bounds.
#[derive(Default)]
pub struct SizeTextCodec {
    pub calls: usize,
}

impl RasterCodec for SizeTextCodec {
    fn convert(
        &mut self,
        _format: ImageFormat,
        source: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), CodecError> {
        self.calls += 1;
        let mut text = String::new();
        source.read_to_string(&mut text)?;
        let (w, h): (u16, u16) = text
            .trim()
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .ok_or_else(|| CodecError::Decode(format!("bad size text {:?}", text)))?;
        let (w, h) = fit_within(w, h, max_width, max_height);
        let mut header = Vec::with_capacity(80);
        write_grayscale_header(&mut header, w, h, 2)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        out.write_all(&header)?;
        let row = vec![0xFFu8; row_stride(w, 2) as usize];
        for _ in 0..h {
            out.write_all(&row)?;
        }
        Ok(())
    }
}

/// Minimal ZIP writer for archive fixtures.
#[derive(Default)]
pub struct ZipBuilder {
    body: Vec<u8>,
    central: Vec<u8>,
    entries: u16,
}

impl ZipBuilder {
    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, 0, data.to_vec())
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        let payload = miniz_oxide::deflate::compress_to_vec(data, 6);
        self.entry(name, data, 8, payload)
    }

    fn entry(mut self, name: &str, data: &[u8], method: u16, payload: Vec<u8>) -> Self {
        let offset = self.body.len() as u32;
        let crc = crc32fast::hash(data);
        let sizes = [payload.len() as u32, data.len() as u32];

        self.body.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        self.body.extend_from_slice(&20u16.to_le_bytes());
        self.body.extend_from_slice(&0u16.to_le_bytes());
        self.body.extend_from_slice(&method.to_le_bytes());
        self.body.extend_from_slice(&[0u8; 4]);
        self.body.extend_from_slice(&crc.to_le_bytes());
        for size in sizes {
            self.body.extend_from_slice(&size.to_le_bytes());
        }
        self.body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        self.body.extend_from_slice(&0u16.to_le_bytes());
        self.body.extend_from_slice(name.as_bytes());
        self.body.extend_from_slice(&payload);

        self.central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        self.central.extend_from_slice(&20u16.to_le_bytes());
        self.central.extend_from_slice(&20u16.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&method.to_le_bytes());
        self.central.extend_from_slice(&[0u8; 4]);
        self.central.extend_from_slice(&crc.to_le_bytes());
        for size in sizes {
            self.central.extend_from_slice(&size.to_le_bytes());
        }
        self.central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        // extra, comment, disk, internal and external attributes
        self.central.extend_from_slice(&[0u8; 12]);
        self.central.extend_from_slice(&offset.to_le_bytes());
        self.central.extend_from_slice(name.as_bytes());
        self.entries += 1;
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cd_offset = self.body.len() as u32;
        let cd_size = self.central.len() as u32;
        self.body.append(&mut self.central);
        self.body.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        self.body.extend_from_slice(&[0u8; 4]);
        self.body.extend_from_slice(&self.entries.to_le_bytes());
        self.body.extend_from_slice(&self.entries.to_le_bytes());
        self.body.extend_from_slice(&cd_size.to_le_bytes());
        self.body.extend_from_slice(&cd_offset.to_le_bytes());
        self.body.extend_from_slice(&0u16.to_le_bytes());
        self.body
    }
}
