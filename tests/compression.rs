#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-zstd",
    feature = "compression-bzip2",
    feature = "compression-xz"
))]
mod compression_tests {
    use matrixbeam::io::compression::{
        FinishWrite, auto_detect_reader, auto_detect_writer, codec_for_path, is_compressed,
    };
    use matrixbeam::io::spool_to_tempfile;
    use matrixbeam::testing::{FailingWriter, assert_is_transpose, matrix_to_csv, numbered_matrix};
    use matrixbeam::{TransposeConfig, transpose};
    use std::io::{Read, Write};

    fn sample() -> Vec<u8> {
        matrix_to_csv(&numbered_matrix(12, 9), b',')
    }

    fn write_compressed(path: &std::path::Path, data: &[u8]) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = auto_detect_writer(file, path)?;
        writer.write_all(data)?;
        writer.finish_stream()?;
        Ok(())
    }

    fn read_back(path: &std::path::Path) -> anyhow::Result<Vec<u8>> {
        let file = std::fs::File::open(path)?;
        let mut reader = auto_detect_reader(file, path)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    fn round_trip(extension: &str) -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("matrix.csv{extension}"));
        write_compressed(&path, &sample())?;
        assert!(is_compressed(&path)?);
        assert_ne!(std::fs::read(&path)?, sample());
        assert_eq!(read_back(&path)?, sample());
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_round_trip() -> anyhow::Result<()> {
        round_trip(".gz")
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn zstd_round_trip() -> anyhow::Result<()> {
        round_trip(".zst")
    }

    #[cfg(feature = "compression-bzip2")]
    #[test]
    fn bzip2_round_trip() -> anyhow::Result<()> {
        round_trip(".bz2")
    }

    #[cfg(feature = "compression-xz")]
    #[test]
    fn xz_round_trip() -> anyhow::Result<()> {
        round_trip(".xz")
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn magic_bytes_detect_misnamed_input() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let gz = dir.path().join("matrix.csv.gz");
        write_compressed(&gz, &sample())?;
        let misnamed = dir.path().join("matrix.csv");
        std::fs::rename(&gz, &misnamed)?;

        assert!(codec_for_path(&misnamed).is_none());
        assert!(is_compressed(&misnamed)?);
        assert_eq!(read_back(&misnamed)?, sample());
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn compressed_input_transposes_after_spooling() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("matrix.csv.gz");
        write_compressed(&path, &sample())?;

        let reader = auto_detect_reader(std::fs::File::open(&path)?, &path)?;
        let seekable = spool_to_tempfile(reader, Some(dir.path()))?;
        let mut out = Vec::new();
        transpose(seekable, &mut out, &TransposeConfig::default())?;
        assert_is_transpose(&sample(), &out, b',');
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_trailer_failure_is_reported() {
        // room for the 10-byte header only
        let result = auto_detect_writer(FailingWriter::new(10), "out.csv.gz")
            .and_then(|mut writer| {
                writer.write_all(&sample())?;
                writer.finish_stream()?;
                Ok(())
            });
        assert!(result.is_err());
    }

    #[test]
    fn plain_output_is_flushed_on_finish() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("matrix.csv");
        let mut writer = auto_detect_writer(std::fs::File::create(&path)?, &path)?;
        writer.write_all(b"1,2\n")?;
        writer.finish_stream()?;
        assert_eq!(std::fs::read(&path)?, b"1,2\n");
        Ok(())
    }

    #[test]
    fn plain_input_passes_through() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("matrix.csv");
        std::fs::write(&path, sample())?;
        assert!(!is_compressed(&path)?);
        assert_eq!(read_back(&path)?, sample());
        Ok(())
    }
}
