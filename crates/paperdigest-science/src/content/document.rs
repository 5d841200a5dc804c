//! Last-resort figure extraction from a downloaded PDF.

use std::collections::HashSet;
use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use paperdigest_core::{Applicability, FigureLocator, FigureSet, Signature, Strategy, StrategyOutcome};

use super::figures::{FigureAssembler, FigureOptions};
use super::{ContentContext, classify, outcome_from_set};
use crate::error::{Result, ScienceError};

/// Form XObjects may nest; deeper nesting is ignored.
const MAX_FORM_DEPTH: usize = 3;

pub struct DocumentStrategy {
    options: FigureOptions,
}

impl DocumentStrategy {
    pub fn new(options: FigureOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Strategy<ContentContext, FigureSet> for DocumentStrategy {
    fn name(&self) -> &str {
        "document"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["document"], "figures")
    }

    fn applicability(&self, ctx: &ContentContext) -> Applicability {
        Applicability::when(ctx.document.is_some(), "no document downloaded")
    }

    async fn attempt(&self, ctx: &ContentContext) -> StrategyOutcome<FigureSet> {
        let Some(bytes) = ctx.document.clone() else {
            return StrategyOutcome::soft("no document downloaded");
        };
        let options = self.options;
        let name = self.name().to_string();
        let scanned =
            tokio::task::spawn_blocking(move || scan_document(&bytes, options, &name)).await;
        match scanned {
            Ok(Ok((set, found))) => outcome_from_set(set, found),
            Ok(Err(err)) => classify(err),
            Err(err) => StrategyOutcome::hard(format!("document scan panicked: {err}")),
        }
    }
}

/// Walk every page's image XObjects and keep the ones that qualify.
/// Returns the set and how many embedded images were seen.
fn scan_document(
    bytes: &[u8],
    options: FigureOptions,
    acquired_by: &str,
) -> Result<(FigureSet, usize)> {
    let document = Document::load_mem(bytes)
        .map_err(|err| ScienceError::PdfExtraction(format!("failed to open document: {err}")))?;

    let mut assembler = FigureAssembler::new(options, acquired_by);
    let mut seen_objects = HashSet::new();
    let mut found = 0;

    for (page_number, page_id) in document.get_pages() {
        if assembler.is_full() {
            break;
        }
        let mut images = Vec::new();
        if let Some(resources) = page_resources(&document, page_id) {
            collect_images(&document, resources, 0, &mut images);
        }

        let mut on_page = 0;
        for (object_id, stream) in images {
            if !seen_objects.insert(object_id) {
                continue;
            }
            found += 1;
            let width = dict_u32(&document, &stream.dict, b"Width");
            let height = dict_u32(&document, &stream.dict, b"Height");
            if !options.large_enough(width, height) {
                continue;
            }
            let Some(encoded) = encode_image(&document, stream) else {
                tracing::trace!(page = page_number, ?object_id, "unsupported image encoding");
                continue;
            };
            on_page += 1;
            assembler.push(
                encoded,
                FigureLocator::Page(page_number),
                Some(format!("Page {page_number} image {on_page}")),
                None,
            );
        }
    }

    Ok((assembler.finish(), found))
}

/// Full text of the document, or `None` when it has no extractable text.
pub fn extract_document_text(bytes: &[u8]) -> Option<String> {
    let document = match Document::load_mem(bytes) {
        Ok(document) => document,
        Err(err) => {
            tracing::debug!(%err, "document text unavailable");
            return None;
        }
    };
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return None;
    }
    match document.extract_text(&pages) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(%err, "text extraction failed");
            None
        }
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn dict_name<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match resolve(document, dict.get(key).ok()?)? {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(items) if items.len() == 1 => match resolve(document, &items[0])? {
            Object::Name(name) => Some(name.as_slice()),
            _ => None,
        },
        _ => None,
    }
}

fn dict_u32(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match resolve(document, dict.get(key).ok()?)? {
        Object::Integer(value) => u32::try_from(*value).ok(),
        _ => None,
    }
}

/// Page resources, inherited from ancestors in the page tree when absent.
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_object(page_id).ok().and_then(|o| resolve_dict(document, o))?;
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources")
            && let Some(dict) = resolve_dict(document, resources)
        {
            return Some(dict);
        }
        node = resolve_dict(document, node.get(b"Parent").ok()?)?;
    }
    None
}

fn collect_images<'a>(
    document: &'a Document,
    resources: &'a Dictionary,
    depth: usize,
    out: &mut Vec<(ObjectId, &'a Stream)>,
) {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(document, o))
    else {
        return;
    };
    for (_, value) in xobjects.iter() {
        let Object::Reference(id) = value else {
            continue;
        };
        let Ok(Object::Stream(stream)) = document.get_object(*id) else {
            continue;
        };
        match dict_name(document, &stream.dict, b"Subtype") {
            Some(b"Image") => out.push((*id, stream)),
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                if let Some(nested) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|o| resolve_dict(document, o))
                {
                    collect_images(document, nested, depth + 1, out);
                }
            }
            _ => {}
        }
    }
}

/// Turn an image XObject into bytes a browser can show. JPEG streams pass
/// through; 8-bit RGB and grayscale rasters are re-encoded as PNG.
fn encode_image(document: &Document, stream: &Stream) -> Option<Vec<u8>> {
    let filter = match stream.dict.get(b"Filter") {
        Ok(_) => Some(dict_name(document, &stream.dict, b"Filter")?),
        Err(_) => None,
    };
    let raw = match filter {
        Some(b"DCTDecode") => return Some(stream.content.clone()),
        Some(b"FlateDecode") => stream.decompressed_content().ok()?,
        None => stream.content.clone(),
        Some(_) => return None,
    };

    if dict_u32(document, &stream.dict, b"BitsPerComponent") != Some(8) {
        return None;
    }
    let width = dict_u32(document, &stream.dict, b"Width")?;
    let height = dict_u32(document, &stream.dict, b"Height")?;
    let image = match dict_name(document, &stream.dict, b"ColorSpace")? {
        b"DeviceRGB" => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, raw)?),
        b"DeviceGray" => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, raw)?),
        _ => return None,
    };

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .ok()?;
    Some(png)
}
