use anyhow::Result;
use matrixbeam::testing::{
    CancelOnFlush, FailingStorage, FailingWriter, UnseekableReader, assert_is_transpose,
    generate_matrix, matrix_to_csv, numbered_matrix, parse_matrix,
};
use matrixbeam::{
    CancellationContext, ErrorClass, MatrixError, MemoryStorage, PartitionStrategy, Stage,
    TransposeConfig, Transposer, transpose,
};
use std::io::Cursor;
use std::time::Duration;

fn config(block_size: usize, shard_count: usize) -> TransposeConfig {
    TransposeConfig {
        block_size,
        shard_count,
        ..TransposeConfig::default()
    }
}

fn transpose_str(input: &str, config: TransposeConfig) -> Result<String> {
    let mut out = Vec::new();
    transpose(Cursor::new(input.as_bytes().to_vec()), &mut out, &config)?;
    Ok(String::from_utf8(out)?)
}

fn transpose_in_memory_storage(input: &[u8], config: TransposeConfig) -> Result<Vec<u8>> {
    let transposer = Transposer::new(config)?;
    let mut out = Vec::new();
    transposer.transpose_with_storage(
        Cursor::new(input.to_vec()),
        &mut out,
        &mut MemoryStorage::new(),
        &CancellationContext::unbounded(),
    )?;
    Ok(out)
}

#[test]
fn square_matrix_without_trailing_newline() -> Result<()> {
    assert_eq!(transpose_str("1,2\n3,4", TransposeConfig::default())?, "1,3\n2,4\n");
    Ok(())
}

#[test]
fn wide_matrix_becomes_tall() -> Result<()> {
    assert_eq!(
        transpose_str("1,2,3\n4,5,6\n", TransposeConfig::default())?,
        "1,4\n2,5\n3,6\n"
    );
    Ok(())
}

#[test]
fn single_cell_row_and_column() -> Result<()> {
    assert_eq!(transpose_str("7\n", TransposeConfig::default())?, "7\n");
    assert_eq!(transpose_str("1,2,3,4\n", TransposeConfig::default())?, "1\n2\n3\n4\n");
    assert_eq!(transpose_str("1\n2\n3\n4\n", TransposeConfig::default())?, "1,2,3,4\n");
    Ok(())
}

#[test]
fn round_trip_restores_the_input() -> Result<()> {
    let matrix = generate_matrix(37, 23, 7);
    let input = matrix_to_csv(&matrix, b',');

    let once = transpose_in_memory_storage(&input, config(5, 4))?;
    assert_is_transpose(&input, &once, b',');
    let twice = transpose_in_memory_storage(&once, config(3, 2))?;
    assert_eq!(parse_matrix(&twice, b',')?, matrix);
    Ok(())
}

#[test]
fn every_block_and_shard_combination_agrees() -> Result<()> {
    let matrix = numbered_matrix(9, 7);
    let input = matrix_to_csv(&matrix, b',');
    for block_size in 1..=10 {
        for shard_count in 1..=9 {
            for partition in [PartitionStrategy::Balanced, PartitionStrategy::Legacy] {
                let cfg = TransposeConfig {
                    block_size,
                    shard_count,
                    partition,
                    ..TransposeConfig::default()
                };
                let out = transpose_in_memory_storage(&input, cfg)?;
                assert_is_transpose(&input, &out, b',');
            }
        }
    }
    Ok(())
}

#[test]
fn more_shards_than_columns() -> Result<()> {
    assert_eq!(transpose_str("1,2\n3,4\n5,6\n", config(2, 5))?, "1,3,5\n2,4,6\n");
    Ok(())
}

#[test]
fn legacy_partition_pads_and_drops_placeholders() -> Result<()> {
    let legacy = TransposeConfig {
        partition: PartitionStrategy::Legacy,
        ..config(6, 3)
    };

    // C = 4, N = 3: ranges [0,2) [2,4) [4,6); the last shard only holds placeholders
    let input = matrix_to_csv(&numbered_matrix(3, 4), b',');
    let mut out = Vec::new();
    let report = transpose(Cursor::new(input.clone()), &mut out, &legacy)?;
    assert_is_transpose(&input, &out, b',');
    assert_eq!(report.placeholders, 2);
    assert_eq!(report.rows_emitted, 4);

    // C = 5, N = 3: ranges [0,2) [2,4) [4,6); one placeholder per block
    let input = matrix_to_csv(&numbered_matrix(8, 5), b',');
    let mut out = Vec::new();
    let report = transpose(Cursor::new(input.clone()), &mut out, &legacy)?;
    assert_is_transpose(&input, &out, b',');
    assert_eq!(report.blocks, 2);
    assert_eq!(report.placeholders, 2);
    Ok(())
}

#[test]
fn ragged_row_fails_before_any_output() {
    let mut out = Vec::new();
    let err = transpose(
        Cursor::new(b"1,2\n3,4,5\n".to_vec()),
        &mut out,
        &TransposeConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::InconsistentShape {
            row: 2,
            expected: 2,
            found: 3
        }
    ));
    assert_eq!(err.class(), ErrorClass::BadInput);
    assert!(out.is_empty());
}

#[test]
fn ragged_row_in_a_later_block_fails_before_any_output() {
    let mut input = matrix_to_csv(&numbered_matrix(20, 3), b',');
    input.extend_from_slice(b"1,2\n");
    let mut out = Vec::new();
    let err = transpose(Cursor::new(input), &mut out, &config(4, 2)).unwrap_err();
    assert!(matches!(err, MatrixError::InconsistentShape { row: 21, .. }));
    assert!(out.is_empty());
}

#[test]
fn empty_input_is_rejected() {
    let err = transpose_str("", TransposeConfig::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatrixError>(),
        Some(MatrixError::EmptyInput)
    ));
}

#[test]
fn zero_deadline_fails_without_output() -> Result<()> {
    let transposer = Transposer::new(TransposeConfig::default())?;
    let ctx = CancellationContext::with_timeout(Duration::ZERO);
    let mut out = Vec::new();
    let err = transposer
        .transpose(Cursor::new(b"1,2\n3,4\n".to_vec()), &mut out, &ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::DeadlineExceeded {
            stage: Stage::ReadBlock,
            rows_emitted: 0,
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn cancelled_context_is_reported_as_cancelled() -> Result<()> {
    let transposer = Transposer::new(TransposeConfig::default())?;
    let ctx = transposer.context();
    ctx.cancel();
    let err = transposer
        .transpose(Cursor::new(b"1\n".to_vec()), Vec::new(), &ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::DeadlineExceeded {
            cancelled: true,
            ..
        }
    ));
    Ok(())
}

#[test]
fn unseekable_input_is_rejected() {
    let input = UnseekableReader::new(&b"1,2\n3,4\n"[..]);
    let mut out = Vec::new();
    let err = transpose(input, &mut out, &TransposeConfig::default()).unwrap_err();
    assert!(matches!(err, MatrixError::UnseekableInput(_)));
    assert!(out.is_empty());
}

#[test]
fn custom_delimiter_and_quoted_fields() -> Result<()> {
    let cfg = TransposeConfig {
        delimiter: b'\t',
        ..TransposeConfig::default()
    };
    let out = transpose_str("a\t\"b\tc\"\nd\te\n", cfg)?;
    assert_eq!(out, "a\td\n\"b\tc\"\te\n");

    let out = transpose_str("\"x,y\",2\n3,\n", TransposeConfig::default())?;
    assert_eq!(out, "\"x,y\",3\n2,\n");
    Ok(())
}

#[test]
fn unterminated_quote_is_a_parse_error() {
    let mut out = Vec::new();
    let err = transpose(
        Cursor::new(b"1,2\n3,\"4\n".to_vec()),
        &mut out,
        &TransposeConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, MatrixError::Parse { row: 2, .. }), "{err}");
    assert_eq!(err.class(), ErrorClass::BadInput);
    assert!(out.is_empty());
}

#[test]
fn stray_quote_in_unquoted_field_is_a_parse_error() {
    for input in ["a\"b,c\n", "1,2\nx,y\"\n"] {
        let mut out = Vec::new();
        let err = transpose(
            Cursor::new(input.as_bytes().to_vec()),
            &mut out,
            &TransposeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MatrixError::Parse { .. }), "{input:?}: {err}");
        assert!(out.is_empty());
    }
}

#[test]
fn report_counts_rows_blocks_and_metrics() -> Result<()> {
    let input = matrix_to_csv(&numbered_matrix(13, 4), b',');
    let mut out = Vec::new();
    let report = transpose(Cursor::new(input), &mut out, &config(5, 3))?;
    assert_eq!(report.columns, 4);
    assert_eq!(report.rows_read, 13);
    assert_eq!(report.blocks, 3);
    assert_eq!(report.rows_emitted, 4);
    assert_eq!(report.placeholders, 0);
    assert_eq!(report.metrics.counter("rows_read"), Some(13));
    assert_eq!(report.metrics.counter("shard_records"), Some(12));
    assert!(report.metrics.stage("reassemble").is_some());
    Ok(())
}

#[test]
fn spill_directory_is_removed_after_success_and_failure() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let cfg = TransposeConfig {
        spill_dir: Some(parent.path().to_path_buf()),
        ..config(2, 3)
    };
    let transposer = Transposer::new(cfg)?;

    let mut out = Vec::new();
    transposer.transpose(
        Cursor::new(b"1,2,3\n4,5,6\n7,8,9\n".to_vec()),
        &mut out,
        &transposer.context(),
    )?;
    assert_eq!(out, b"1,4,7\n2,5,8\n3,6,9\n");
    assert_eq!(std::fs::read_dir(parent.path())?.count(), 0);

    let result = transposer.transpose(
        Cursor::new(b"1,2,3\n4,5,6\n7,8\n".to_vec()),
        Vec::new(),
        &transposer.context(),
    );
    assert!(result.is_err());
    assert_eq!(std::fs::read_dir(parent.path())?.count(), 0);
    Ok(())
}

#[test]
fn deadline_during_reassembly_keeps_whole_rows_and_removes_shards() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let transposer = Transposer::new(TransposeConfig {
        spill_dir: Some(parent.path().to_path_buf()),
        ..config(2, 3)
    })?;
    let ctx = CancellationContext::unbounded();
    // cancelled once the first shard's rows are flushed
    let mut out = CancelOnFlush::new(ctx.clone());

    let err = transposer
        .transpose(
            Cursor::new(b"1,2,3\n4,5,6\n7,8,9\n".to_vec()),
            &mut out,
            &ctx,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::DeadlineExceeded {
            stage: Stage::Reassemble,
            rows_emitted: 1,
            cancelled: true,
            ..
        }
    ));
    assert!(err.output_committed());
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert_eq!(out.written(), b"1,4,7\n");
    assert_eq!(std::fs::read_dir(parent.path())?.count(), 0);
    Ok(())
}

#[test]
fn zero_deadline_removes_spill_directory() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let transposer = Transposer::new(TransposeConfig {
        spill_dir: Some(parent.path().to_path_buf()),
        timeout: Some(Duration::ZERO),
        ..config(2, 3)
    })?;
    let err = transposer
        .transpose(
            Cursor::new(b"1,2,3\n4,5,6\n".to_vec()),
            Vec::new(),
            &transposer.context(),
        )
        .unwrap_err();
    assert!(matches!(err, MatrixError::DeadlineExceeded { .. }));
    assert_eq!(std::fs::read_dir(parent.path())?.count(), 0);
    Ok(())
}

#[test]
fn missing_spill_parent_is_an_allocation_error() -> Result<()> {
    let parent = tempfile::tempdir()?;
    let cfg = TransposeConfig {
        spill_dir: Some(parent.path().join("does-not-exist")),
        ..TransposeConfig::default()
    };
    let err = transpose(Cursor::new(b"1\n".to_vec()), Vec::new(), &cfg).unwrap_err();
    assert!(matches!(err, MatrixError::ShardAllocation { shard: 0, .. }));
    assert_eq!(err.class(), ErrorClass::Internal);
    Ok(())
}

#[test]
fn failed_shard_allocation_releases_earlier_shards() -> Result<()> {
    let transposer = Transposer::new(config(2, 3))?;
    let mut storage = FailingStorage::new(1);
    let err = transposer
        .transpose_with_storage(
            Cursor::new(b"1,2,3\n".to_vec()),
            Vec::new(),
            &mut storage,
            &CancellationContext::unbounded(),
        )
        .unwrap_err();
    assert!(matches!(err, MatrixError::ShardAllocation { shard: 1, .. }));
    assert_eq!(storage.live(), 0);
    Ok(())
}

#[test]
fn shards_are_released_after_success() -> Result<()> {
    let transposer = Transposer::new(config(2, 3))?;
    let mut storage = FailingStorage::new(usize::MAX);
    let mut out = Vec::new();
    transposer.transpose_with_storage(
        Cursor::new(b"1,2,3\n4,5,6\n".to_vec()),
        &mut out,
        &mut storage,
        &CancellationContext::unbounded(),
    )?;
    assert_eq!(storage.live(), 0);
    assert_eq!(out, b"1,4\n2,5\n3,6\n");
    Ok(())
}

#[test]
fn sink_failure_reports_output_error() -> Result<()> {
    let input = matrix_to_csv(&numbered_matrix(4, 600), b',');
    let transposer = Transposer::new(TransposeConfig {
        output_flush_rows: 10,
        ..config(2, 3)
    })?;
    let mut sink = FailingWriter::new(64);
    let err = transposer
        .transpose_with_storage(
            Cursor::new(input),
            &mut sink,
            &mut MemoryStorage::new(),
            &CancellationContext::unbounded(),
        )
        .unwrap_err();
    assert!(matches!(err, MatrixError::Output { .. }));
    assert_eq!(err.class(), ErrorClass::Internal);
    assert!(!sink.accepted().is_empty());
    Ok(())
}
