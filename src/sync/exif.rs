use std::path::Path;

use anyhow::{Context, Result};

/// Read the raw `DateTimeOriginal` value (`YYYY:MM:DD HH:MM:SS`).
///
/// `Ok(None)` when the file has no EXIF block or the tag is absent; `Err`
/// only when the file cannot be opened.
pub fn get_datetime_original(path: &Path) -> Result<Option<String>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut reader = std::io::BufReader::new(&file);

    let exif_data = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    let Some(field) = exif_data.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) else {
        return Ok(None);
    };
    let value = match &field.value {
        exif::Value::Ascii(parts) => parts
            .first()
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').to_string()),
        other => Some(format!("{:?}", other)),
    };
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Whether kamadak-exif finds an EXIF block in the file at all.
fn has_exif_block(path: &Path) -> Result<bool> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut reader = std::io::BufReader::new(&file);
    Ok(exif::Reader::new().read_from_container(&mut reader).is_ok())
}

/// Write `DateTimeOriginal` into a JPEG in place.
///
/// Camera exports usually carry an EXIF block that only lacks the tag, but
/// edited or screenshot JPEGs often have none. Those get a fresh block
/// holding just this tag. A block that exists but cannot be parsed is an
/// error rather than being replaced.
pub fn set_datetime_original(path: &Path, value: &str) -> Result<()> {
    use little_exif::exif_tag::ExifTag;
    use little_exif::metadata::Metadata;

    let mut metadata = match Metadata::new_from_path(path) {
        Ok(metadata) => metadata,
        Err(_) if !has_exif_block(path)? => {
            tracing::debug!("{} has no EXIF block; creating one", path.display());
            Metadata::new()
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Reading EXIF metadata from {}", path.display()))
        }
    };
    metadata.set_tag(ExifTag::DateTimeOriginal(value.to_string()));
    metadata
        .write_to_file(path)
        .with_context(|| format!("Writing EXIF metadata to {}", path.display()))
}

/// A structurally valid 1x1 baseline JPEG with no EXIF block.
#[cfg(test)]
pub(crate) fn tiny_jpeg() -> Vec<u8> {
    let mut v = vec![0xFF, 0xD8];
    v.extend([0xFF, 0xDB, 0x00, 0x43, 0x00]);
    v.extend([1u8; 64]);
    v.extend([
        0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00,
    ]);
    for class in [0x00, 0x10] {
        v.extend([0xFF, 0xC4, 0x00, 0x14, class, 0x01]);
        v.extend([0u8; 15]);
        v.push(0x00);
    }
    v.extend([0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
    v.extend([0x00, 0x00]);
    v.extend([0xFF, 0xD9]);
    v
}
