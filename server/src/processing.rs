//! Turning a stored document into text chunks.

use std::io::{Cursor, Read};

use quick_xml::{events::Event, Reader};
use zip::ZipArchive;

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];
/// Chunks with this many trimmed characters or fewer are dropped.
const MIN_CHUNK_CHARS: usize = 50;

pub const NO_TEXT: &str = "No text could be extracted from the document";
pub const NO_CHUNKS: &str = "No valid chunks could be created from the document";

pub fn extract_text(bytes: &[u8], file_type: &str) -> Result<String, String> {
    let file_type = file_type.to_ascii_lowercase();
    let text = match file_type.as_str() {
        "txt" => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
        "pdf" => pdf_text(bytes),
        "docx" => docx_text(bytes),
        other => return Err(format!("Unsupported file type: {other}")),
    };
    text.map_err(|e| format!("Error extracting text from {file_type} file: {e}"))
}

/// pdf-extract panics on some malformed fonts; those become errors too.
fn pdf_text(bytes: &[u8]) -> Result<String, String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(text) => text.map_err(|e| e.to_string()),
        Err(_) => Err("the PDF could not be parsed".to_string()),
    }
}

/// The text runs of `word/document.xml`, one line per paragraph.
fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let mut reader = Reader::from_str(&xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" => out.push('\n'),
                _ => {}
            },
            Event::Text(e) if in_text => out.push_str(&e.unescape().map_err(|e| e.to_string())?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Extracts and chunks a document; the error is what ends up on the record.
pub fn process_document(bytes: &[u8], file_type: &str) -> Result<Vec<String>, String> {
    let text = extract_text(bytes, file_type)?;
    if text.trim().is_empty() {
        return Err(NO_TEXT.to_string());
    }
    let chunks = chunk_text(&text);
    if chunks.is_empty() {
        return Err(NO_CHUNKS.to_string());
    }
    Ok(chunks)
}

pub fn chunk_text(text: &str) -> Vec<String> {
    Splitter {
        size: CHUNK_SIZE,
        overlap: CHUNK_OVERLAP,
    }
    .split(text, &SEPARATORS)
    .into_iter()
    .filter(|c| c.trim().chars().count() > MIN_CHUNK_CHARS)
    .collect()
}

fn len(s: &str) -> usize {
    s.chars().count()
}

/// Recursive splitter: tries the coarsest separator present in the text and
/// only falls back to finer ones for pieces that are still too long.
struct Splitter {
    size: usize,
    overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (i, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(**s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len(), ""));
        let finer = separators.get(i + 1..).unwrap_or(&[]);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for piece in pieces {
            if len(&piece) < self.size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split(&piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    /// Packs pieces into chunks of at most `size` characters, carrying up to
    /// `overlap` characters into the next chunk.
    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep = len(separator);
        let mut out = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0;
        for piece in pieces {
            let n = len(piece);
            let joined = |window: &Vec<&str>| if window.is_empty() { 0 } else { sep };
            if total + n + joined(&window) > self.size && !window.is_empty() {
                let chunk = window.join(separator);
                let chunk = chunk.trim();
                if !chunk.is_empty() {
                    out.push(chunk.to_string());
                }
                while total > self.overlap
                    || (total > 0 && total + n + joined(&window) > self.size)
                {
                    let first = window.remove(0);
                    total -= len(first) + if window.is_empty() { 0 } else { sep };
                }
            }
            total += n + joined(&window);
            window.push(piece);
        }
        let chunk = window.join(separator);
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            out.push(chunk.to_string());
        }
        out
    }
}
