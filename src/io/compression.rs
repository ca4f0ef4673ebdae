//! Pluggable compression for matrix inputs and outputs.
//!
//! Inputs are detected by file extension first and by magic bytes second, so a
//! gzip payload uploaded as `matrix.csv` is still recognised. Outputs are
//! detected by extension only.
//!
//! ## Built-in Codecs
//!
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`) - via `bzip2` (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) - via `xz2` (feature: `compression-xz`)
//!
//! A decompressed stream cannot seek, so the transpose engine reads such inputs
//! through [`crate::io::spool`].
//!
//! Output writers must be closed with [`FinishWrite::finish_stream`]; dropping
//! one leaves a compressed stream without its trailer.

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, BufWriter, IntoInnerError, Read, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

static CODECS: OnceLock<Vec<Arc<dyn CompressionCodec>>> = OnceLock::new();

fn codecs() -> &'static [Arc<dyn CompressionCodec>] {
    CODECS.get_or_init(|| {
        vec![
            #[cfg(feature = "compression-gzip")]
            Arc::new(GzipCodec),
            #[cfg(feature = "compression-zstd")]
            Arc::new(ZstdCodec),
            #[cfg(feature = "compression-bzip2")]
            Arc::new(Bzip2Codec),
            #[cfg(feature = "compression-xz")]
            Arc::new(XzCodec),
        ]
    })
}

/// A compression format that can wrap readers and writers.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g. "gzip").
    fn name(&self) -> &str;

    /// Lowercase extensions including the leading dot.
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a compressed stream, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>>;

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> io::Result<Box<dyn FinishWrite>>;
}

/// A writer whose stream must be completed explicitly.
pub trait FinishWrite: Write {
    /// Write any pending trailer, then flush the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while finalising or flushing.
    fn finish_stream(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> FinishWrite for BufWriter<W> {
    fn finish_stream(self: Box<Self>) -> io::Result<()> {
        let mut inner = (*self).into_inner().map_err(IntoInnerError::into_error)?;
        inner.flush()
    }
}

#[cfg(feature = "compression-gzip")]
impl<W: Write> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.flush()
    }
}

#[cfg(feature = "compression-zstd")]
impl<W: Write> FinishWrite for zstd::stream::write::Encoder<'static, W> {
    fn finish_stream(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.flush()
    }
}

#[cfg(feature = "compression-bzip2")]
impl<W: Write> FinishWrite for bzip2::write::BzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.flush()
    }
}

#[cfg(feature = "compression-xz")]
impl<W: Write> FinishWrite for xz2::write::XzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.flush()
    }
}

/// Codec registered for the extension of `path`, if any.
#[must_use]
pub fn codec_for_path(path: impl AsRef<Path>) -> Option<Arc<dyn CompressionCodec>> {
    let name = path.as_ref().to_string_lossy().to_lowercase();
    codecs()
        .iter()
        .find(|c| c.extensions().iter().any(|ext| name.ends_with(ext)))
        .cloned()
}

fn codec_for_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let head = reader.fill_buf().ok()?;
    codecs()
        .iter()
        .find(|c| c.magic_bytes().is_some_and(|m| head.starts_with(m)))
        .cloned()
}

/// `true` when `path` or its leading bytes identify a compressed stream.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn is_compressed(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if codec_for_path(path).is_some() {
        return Ok(true);
    }
    let f = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(codec_for_magic(&mut BufReader::new(f)).is_some())
}

/// Wrap `reader` with a decompressor chosen from `path_hint` or the stream's magic bytes.
///
/// Uncompressed input is returned buffered.
///
/// # Errors
///
/// Returns an error if the codec fails to initialise.
pub fn auto_detect_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Read>> {
    if let Some(codec) = codec_for_path(&path_hint) {
        return codec
            .wrap_reader_dyn(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = codec_for_magic(&mut buffered) {
        return codec
            .wrap_reader_dyn(Box::new(buffered))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }
    Ok(Box::new(buffered))
}

/// Wrap `writer` with a compressor chosen from the extension of `path_hint`.
///
/// Call [`FinishWrite::finish_stream`] once everything is written.
///
/// # Errors
///
/// Returns an error if the codec fails to initialise.
pub fn auto_detect_writer<W: Write + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn FinishWrite>> {
    if let Some(codec) = codec_for_path(&path_hint) {
        return codec
            .wrap_writer_dyn(Box::new(writer))
            .with_context(|| format!("wrap writer with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> io::Result<Box<dyn FinishWrite>> {
        Ok(Box::new(flate2::write::GzEncoder::new(
            writer,
            flate2::Compression::default(),
        )))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> io::Result<Box<dyn FinishWrite>> {
        zstd::stream::write::Encoder::new(writer, 3)
            .map(|e| Box::new(e) as Box<dyn FinishWrite>)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(b"BZh")
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> io::Result<Box<dyn FinishWrite>> {
        Ok(Box::new(bzip2::write::BzEncoder::new(
            writer,
            bzip2::Compression::default(),
        )))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(xz2::read::XzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> io::Result<Box<dyn FinishWrite>> {
        Ok(Box::new(xz2::write::XzEncoder::new(writer, 6)))
    }
}
