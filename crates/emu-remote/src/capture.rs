//! PNG screenshots.
//!
//! Encoding happens on the request thread, never on the simulation thread;
//! the simulation thread only hands over a copy of the framebuffer.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use emu_core::Framebuffer;

use crate::error::RemoteError;

fn encode_into<W: Write>(fb: &Framebuffer, out: W) -> Result<(), png::EncodingError> {
    let mut encoder = png::Encoder::new(out, fb.width, fb.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&fb.to_rgba())?;
    Ok(())
}

/// Encode a framebuffer as PNG bytes.
///
/// # Errors
///
/// Returns an error if the pixel count does not match the dimensions.
pub fn encode_png(fb: &Framebuffer) -> Result<Vec<u8>, RemoteError> {
    let mut bytes = Vec::new();
    encode_into(fb, &mut bytes)?;
    Ok(bytes)
}

/// Encode a framebuffer as base64 PNG, for inline JSON responses.
///
/// # Errors
///
/// See [`encode_png`].
pub fn encode_png_base64(fb: &Framebuffer) -> Result<String, RemoteError> {
    Ok(STANDARD.encode(encode_png(fb)?))
}

/// Save a framebuffer as a PNG file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn save_png(fb: &Framebuffer, path: &Path) -> Result<(), RemoteError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    encode_into(fb, BufWriter::new(file))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Framebuffer {
        Framebuffer {
            width: 2,
            height: 2,
            pixels: vec![0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0x00FF_FFFF],
        }
    }

    #[test]
    fn png_signature() {
        let bytes = encode_png(&tiny()).expect("encode");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn base64_decodes_to_png() {
        let text = encode_png_base64(&tiny()).expect("encode");
        let bytes = STANDARD.decode(text).expect("decode");
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let fb = Framebuffer {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        };
        assert!(encode_png(&fb).is_err());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shots").join("a.png");
        save_png(&tiny(), &path).expect("save");
        assert!(path.exists());
    }
}
