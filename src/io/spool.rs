//! Turn a forward-only stream into a seekable one.
//!
//! The transpose engine rewinds its input once after probing the column
//! count. Piped or decompressed inputs cannot do that, so they are copied into
//! an anonymous temp file first. The file has no name on disk and is released
//! when the returned handle is dropped.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Copy `reader` to an unnamed temp file in `dir` (or the system temp dir) and
/// return it positioned at the start.
///
/// # Errors
///
/// Returns any error raised while creating, filling or rewinding the file.
pub fn spool_to_tempfile<R: Read>(mut reader: R, dir: Option<&Path>) -> io::Result<File> {
    let mut file = match dir {
        Some(dir) => tempfile::tempfile_in(dir)?,
        None => tempfile::tempfile()?,
    };
    let bytes = io::copy(&mut reader, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    debug!(bytes, "spooled non-seekable input to a temp file");
    Ok(file)
}
