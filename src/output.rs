//! Filtering summary table

use crate::fdr::FilterStats;
use crate::utils::{ensure_parent_dirs, is_gzip_path};
use crate::{SomaFilterError, SomaFilterResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer)
}

fn write_rows<W: Write>(writer: &mut csv::Writer<W>, stats: &[FilterStats]) -> SomaFilterResult<()> {
    for row in stats {
        writer.serialize(row)?;
    }
    Ok(())
}

/// Write one tab-separated row per filter, gzip-compressed when the path ends in `.gz`
pub fn write_filter_stats<P: AsRef<Path>>(stats: &[FilterStats], path: P) -> SomaFilterResult<()> {
    let path = path.as_ref();
    ensure_parent_dirs(path)?;
    let file = File::create(path)?;

    if is_gzip_path(path) {
        let mut writer = tsv_writer(GzEncoder::new(file, Compression::default()));
        write_rows(&mut writer, stats)?;
        let encoder = writer
            .into_inner()
            .map_err(|e| SomaFilterError::Io(e.into_error()))?;
        encoder.finish()?;
    } else {
        let mut writer = tsv_writer(file);
        write_rows(&mut writer, stats)?;
        writer.flush()?;
    }

    log::info!("Wrote {} filter stats rows to {}", stats.len(), path.display());
    Ok(())
}

/// Read a table written by [`write_filter_stats`]
pub fn read_filter_stats<P: AsRef<Path>>(path: P) -> SomaFilterResult<Vec<FilterStats>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if is_gzip_path(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut csv_reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
    let mut stats = Vec::new();
    for row in csv_reader.deserialize() {
        stats.push(row?);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn stats() -> Vec<FilterStats> {
        vec![
            FilterStats::new("weak_evidence", 0.2, 1.5, 30, 0.05),
            FilterStats::new("combined", 0.1, 1.2, 30, 0.05),
        ]
    }

    #[test]
    fn test_write_plain_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.tsv");
        write_filter_stats(&stats(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "filter_name\tthreshold\texpected_fps\texpected_fdr\trequested_fdr\tnum_passing_variants"
        );
        assert_eq!(lines.next().unwrap(), "weak_evidence\t0.2\t1.5\t0.05\t0.05\t30");
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_write_gzip_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.tsv.gz");
        write_filter_stats(&stats(), &path).unwrap();

        let mut magic = [0u8; 2];
        File::open(&path).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(magic, [0x1f, 0x8b]);

        assert_eq!(read_filter_stats(&path).unwrap(), stats());
    }
}
