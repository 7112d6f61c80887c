//! Generation metadata embedded in PNG images.
//!
//! The chunk walk collects every text chunk (`tEXt`, `iTXt`, `zTXt`) keyed by
//! its literal keyword. Classification runs once after the walk, since a
//! node-graph record is split over separate `prompt` and `workflow` chunks.
//!
//! Chunk layout: `[u32 BE length][4-byte type][data][u32 CRC]`. CRCs are not
//! checked. A truncated or overrunning chunk ends the walk and whatever was
//! collected so far is kept.

pub mod a1111;
pub mod node_graph;

use crate::asset::AssetFile;
use crate::config::ContainerLimits;
use crate::FieldMap;
use flate2::read::ZlibDecoder;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use tracing::debug;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Chunk type tags.
mod tag {
    pub const TEXT: &[u8; 4] = b"tEXt";
    pub const ITXT: &[u8; 4] = b"iTXt";
    pub const ZTXT: &[u8; 4] = b"zTXt";
    pub const IEND: &[u8; 4] = b"IEND";
}

const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_CRC_LEN: usize = 4;

/// Which generation-parameter grammar a record was parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMetadataSource {
    A1111Style,
    NodeGraphStyle,
    Unknown,
}

/// A decoded text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub keyword: String,
    pub text: String,
}

/// Metadata recovered from an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMetadataRecord {
    pub source: ImageMetadataSource,
    /// Unparsed text the classification was based on.
    pub raw_text: Option<String>,
    pub text_chunks: Vec<TextChunk>,
    /// Present iff `source != Unknown`.
    pub structured: Option<FieldMap>,
}

impl ImageMetadataRecord {
    pub fn unknown() -> Self {
        Self {
            source: ImageMetadataSource::Unknown,
            raw_text: None,
            text_chunks: Vec::new(),
            structured: None,
        }
    }

    /// First chunk stored under `keyword`.
    pub fn text(&self, keyword: &str) -> Option<&str> {
        self.text_chunks
            .iter()
            .find(|c| c.keyword == keyword)
            .map(|c| c.text.as_str())
    }

    /// Structured fields, or an empty map for unknown records.
    pub fn fields(&self) -> FieldMap {
        self.structured.clone().unwrap_or_default()
    }
}

/// Extract generation metadata from an image file. Never fails.
///
/// Only chunk headers and text chunk bodies are read; image data is skipped.
pub async fn extract_image_metadata(file: &dyn AssetFile) -> ImageMetadataRecord {
    let size = file.size();
    match file.read_range(0, PNG_SIGNATURE.len()).await {
        Ok(sig) if sig[..] == PNG_SIGNATURE => {}
        Ok(_) => return ImageMetadataRecord::unknown(),
        Err(e) => {
            debug!("Cannot read signature of {}: {}", file.name(), e);
            return ImageMetadataRecord::unknown();
        }
    }

    let mut chunks = Vec::new();
    let mut offset = PNG_SIGNATURE.len() as u64;

    while offset + CHUNK_HEADER_LEN as u64 <= size {
        let header = match file.read_range(offset, CHUNK_HEADER_LEN).await {
            Ok(h) => h,
            Err(e) => {
                debug!("Chunk walk of {} stopped at {}: {}", file.name(), offset, e);
                break;
            }
        };
        let (len, kind) = split_chunk_header(&header);
        if &kind == tag::IEND {
            break;
        }

        let data_start = offset + CHUNK_HEADER_LEN as u64;
        let remaining = size - data_start;
        if len as u64 > remaining {
            debug!("Chunk {:?} in {} overruns the file", kind, file.name());
            break;
        }

        if is_text_chunk(&kind) && len as usize <= ContainerLimits::PNG_MAX_TEXT_CHUNK {
            match file.read_range(data_start, len as usize).await {
                Ok(data) => chunks.extend(decode_text_chunk(&kind, &data)),
                Err(e) => {
                    debug!("Chunk walk of {} stopped at {}: {}", file.name(), offset, e);
                    break;
                }
            }
        }

        offset = data_start + len as u64 + CHUNK_CRC_LEN as u64;
    }

    classify(chunks)
}

/// Extract generation metadata from an in-memory PNG buffer. Never fails.
pub fn parse_png_metadata(buffer: &[u8]) -> ImageMetadataRecord {
    if !buffer.starts_with(&PNG_SIGNATURE) {
        return ImageMetadataRecord::unknown();
    }

    let mut chunks = Vec::new();
    let mut pos = PNG_SIGNATURE.len();

    while let Some(header) = buffer.get(pos..pos + CHUNK_HEADER_LEN) {
        let (len, kind) = split_chunk_header(header);
        if &kind == tag::IEND {
            break;
        }
        let data_start = pos + CHUNK_HEADER_LEN;
        let Some(data) = data_start
            .checked_add(len as usize)
            .and_then(|end| buffer.get(data_start..end))
        else {
            debug!("Chunk {:?} overruns the buffer", kind);
            break;
        };

        if is_text_chunk(&kind) && data.len() <= ContainerLimits::PNG_MAX_TEXT_CHUNK {
            chunks.extend(decode_text_chunk(&kind, data));
        }
        pos = data_start + data.len() + CHUNK_CRC_LEN;
    }

    classify(chunks)
}

fn split_chunk_header(header: &[u8]) -> (u32, [u8; 4]) {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let kind = [header[4], header[5], header[6], header[7]];
    (len, kind)
}

fn is_text_chunk(kind: &[u8; 4]) -> bool {
    kind == tag::TEXT || kind == tag::ITXT || kind == tag::ZTXT
}

/// Decode a text chunk body. Returns `None` for structurally invalid bodies.
fn decode_text_chunk(kind: &[u8; 4], data: &[u8]) -> Option<TextChunk> {
    let (keyword, rest) = split_nul(data)?;
    let keyword = latin1(keyword);

    let text = if kind == tag::TEXT {
        latin1(rest)
    } else if kind == tag::ZTXT {
        // compression method byte, then zlib stream
        let compressed = rest.get(1..)?;
        latin1(&inflate(compressed)?)
    } else {
        // iTXt: flag, method, language\0, translated keyword\0, text
        let compressed = *rest.first()? == 1;
        let rest = rest.get(2..)?;
        let (_language, rest) = split_nul(rest)?;
        let (_translated, text) = split_nul(rest)?;
        if compressed {
            String::from_utf8_lossy(&inflate(text)?).into_owned()
        } else {
            String::from_utf8_lossy(text).into_owned()
        }
    };

    Some(TextChunk { keyword, text })
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    Some((&data[..nul], &data[nul + 1..]))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn inflate(compressed: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let limit = ContainerLimits::PNG_MAX_TEXT_CHUNK as u64;
    match ZlibDecoder::new(compressed).take(limit).read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            debug!("Failed to inflate text chunk: {}", e);
            None
        }
    }
}

fn parse_json_object(text: Option<&str>) -> Option<Value> {
    let value: Value = serde_json::from_str(text?).ok()?;
    value.is_object().then_some(value)
}

/// Node-graph wins over A1111 when both are present.
fn classify(text_chunks: Vec<TextChunk>) -> ImageMetadataRecord {
    let mut record = ImageMetadataRecord {
        text_chunks,
        ..ImageMetadataRecord::unknown()
    };

    let prompt = parse_json_object(record.text("prompt"));
    let workflow = parse_json_object(record.text("workflow"));

    if prompt.is_some() || workflow.is_some() {
        let raw = if prompt.is_some() {
            record.text("prompt")
        } else {
            record.text("workflow")
        };
        record.raw_text = raw.map(str::to_string);
        record.structured = Some(node_graph::summarize(prompt.as_ref(), workflow.as_ref()));
        record.source = ImageMetadataSource::NodeGraphStyle;
    } else if let Some(parameters) = record.text("parameters").map(str::to_string) {
        record.structured = Some(a1111::parse_parameters(&parameters));
        record.raw_text = Some(parameters);
        record.source = ImageMetadataSource::A1111Style;
    } else {
        record.raw_text = record.text_chunks.first().map(|c| c.text.clone());
    }

    record
}
