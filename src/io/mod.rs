pub mod compression;
pub mod csv;
pub mod spool;

pub use self::csv::{RowSink, RowSource, probe_width};
pub use self::spool::spool_to_tempfile;
