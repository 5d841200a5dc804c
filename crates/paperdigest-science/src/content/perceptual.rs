//! Image sniffing and 64-bit difference hashing for near-duplicate figures.

use image::DynamicImage;
use image::imageops::FilterType;

/// What a downloaded blob turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub hash: u64,
}

/// Identify an image format from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Sniff, decode and hash. Returns `None` when the bytes are not an image,
/// including blobs with a valid signature that fail to decode.
pub fn probe(bytes: &[u8]) -> Option<ImageProbe> {
    let mime = sniff_mime(bytes)?;
    match image::load_from_memory(bytes) {
        Ok(img) => Some(ImageProbe {
            mime,
            width: img.width(),
            height: img.height(),
            hash: dhash(&img),
        }),
        Err(err) => {
            tracing::debug!(%err, mime, "image signature present but decoding failed");
            None
        }
    }
}

/// Difference hash: shrink to 9x8 grayscale and record whether each pixel is
/// brighter than its right neighbour.
pub fn dhash(img: &DynamicImage) -> u64 {
    let small = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();
    let mut hash = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            hash = (hash << 1) | u64::from(left > right);
        }
    }
    hash
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Keeps the first of every group of perceptually equal images.
#[derive(Debug, Default)]
pub struct NearDuplicateFilter {
    threshold: u32,
    seen: Vec<u64>,
}

impl NearDuplicateFilter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            seen: Vec::new(),
        }
    }

    /// Returns `true` and remembers the hash if no kept image is within the threshold.
    pub fn admit(&mut self, hash: u64) -> bool {
        if self.seen.iter().any(|h| hamming(*h, hash) <= self.threshold) {
            return false;
        }
        self.seen.push(hash);
        true
    }
}
