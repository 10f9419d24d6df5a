//! Source stage reading domain rows from a CSV file.

use crate::domain::RawRecord;
use crate::worker::Stage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Guess the delimiter from a sample of the file.
///
/// A candidate that occurs the same non-zero number of times on every
/// sampled line wins, the highest such count first. Otherwise the most
/// frequent candidate is used, and `,` when none occurs at all.
pub fn sniff_delimiter(sample: &str, truncated: bool) -> u8 {
    let mut lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();
    // The final line of a cut-off sample is probably partial.
    if truncated && lines.len() > 1 {
        lines.pop();
    }
    if lines.is_empty() {
        return b',';
    }

    let mut consistent: Option<(u8, usize)> = None;
    let mut frequent: Option<(u8, usize)> = None;

    for &delim in &CANDIDATE_DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delim).count())
            .collect();
        let first = counts[0];
        let total: usize = counts.iter().sum();

        if first > 0 && counts.iter().all(|&c| c == first) {
            if consistent.map_or(true, |(_, best)| first > best) {
                consistent = Some((delim, first));
            }
        }
        if total > 0 && frequent.map_or(true, |(_, best)| total > best) {
            frequent = Some((delim, total));
        }
    }

    consistent.or(frequent).map_or(b',', |(delim, _)| delim)
}

/// Rows read per blocking call.
const READ_BATCH: usize = 1024;

/// Reads `name,popularity` rows (after a header line) and forwards them as-is.
///
/// File access runs on the blocking pool. Rows are pulled in batches and
/// handed out one by one from a local buffer.
pub struct CsvReader {
    path: PathBuf,
    sniff_bytes: usize,
    reader: Option<csv::Reader<File>>,
    buffered: VecDeque<RawRecord>,
}

impl CsvReader {
    pub fn new(path: impl Into<PathBuf>, sniff_bytes: usize) -> Self {
        Self {
            path: path.into(),
            sniff_bytes,
            reader: None,
            buffered: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn fill_buffer(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        let (reader, rows) = tokio::task::spawn_blocking(move || read_batch(reader, READ_BATCH))
            .await
            .map_err(|e| anyhow::anyhow!("Read task panicked: {}", e))?
            .with_context(|| format!("Failed reading {}", self.path.display()))?;
        self.reader = reader;
        self.buffered.extend(rows);
        Ok(())
    }
}

fn read_sample(path: &Path, sniff_bytes: usize) -> Result<(String, bool)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut sample = Vec::with_capacity(sniff_bytes);
    file.take(sniff_bytes as u64).read_to_end(&mut sample)?;
    let truncated = sample.len() == sniff_bytes;
    Ok((String::from_utf8_lossy(&sample).into_owned(), truncated))
}

fn open_reader(path: &Path, sniff_bytes: usize) -> Result<csv::Reader<File>> {
    let (sample, truncated) = read_sample(path, sniff_bytes)?;
    let delimiter = sniff_delimiter(&sample, truncated);
    tracing::debug!("Detected delimiter: {:?}", delimiter as char);

    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// Up to `limit` decodable rows. The reader comes back unless the file is
/// exhausted.
fn read_batch(
    mut reader: csv::Reader<File>,
    limit: usize,
) -> Result<(Option<csv::Reader<File>>, Vec<RawRecord>)> {
    let mut record = csv::StringRecord::new();
    let mut rows = Vec::with_capacity(limit);
    while rows.len() < limit {
        match reader.read_record(&mut record) {
            Ok(true) => rows.push(record.iter().map(str::to_string).collect()),
            Ok(false) => return Ok((None, rows)),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => tracing::debug!("Skipping undecodable row: {}", e),
        }
    }
    Ok((Some(reader), rows))
}

#[async_trait]
impl Stage for CsvReader {
    type Input = RawRecord;
    type Output = RawRecord;

    fn name(&self) -> &str {
        "CSVReader"
    }

    fn entity(&self) -> String {
        self.path.display().to_string()
    }

    fn item_unit(&self) -> &str {
        "rows"
    }

    async fn setup(&mut self) -> Result<()> {
        let path = self.path.clone();
        let sniff_bytes = self.sniff_bytes;
        let reader = tokio::task::spawn_blocking(move || open_reader(&path, sniff_bytes))
            .await
            .map_err(|e| anyhow::anyhow!("Open task panicked: {}", e))??;
        self.reader = Some(reader);
        Ok(())
    }

    async fn produce(&mut self) -> Result<Option<RawRecord>> {
        if self.buffered.is_empty() {
            self.fill_buffer().await?;
        }
        Ok(self.buffered.pop_front())
    }

    async fn process(&mut self, item: RawRecord) -> Option<RawRecord> {
        Some(item)
    }

    async fn finish(&mut self) -> Result<()> {
        self.reader = None;
        self.buffered.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    async fn read_all(reader: &mut CsvReader) -> Vec<RawRecord> {
        let mut rows = Vec::new();
        while let Some(row) = reader.produce().await.unwrap() {
            rows.push(reader.process(row).await.unwrap());
        }
        rows
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("name,pop\na.com,1\nb.com,2\n", false), b',');
        assert_eq!(sniff_delimiter("name;pop\na.com;1\nb.com;2\n", false), b';');
        assert_eq!(sniff_delimiter("name\tpop\na.com\t1\n", false), b'\t');
        assert_eq!(sniff_delimiter("name|pop|rank\na.com|1|2\n", false), b'|');
        assert_eq!(sniff_delimiter("domain\na.com\n", false), b',');
        assert_eq!(sniff_delimiter("", false), b',');
    }

    #[test]
    fn test_sniff_prefers_consistent_delimiter() {
        // Commas appear more often, but only semicolons are consistent.
        let sample = "name;pop\na,b,c.com;1\nd.com;2\n";
        assert_eq!(sniff_delimiter(sample, false), b';');
    }

    #[test]
    fn test_sniff_ignores_partial_last_line() {
        let sample = "name;pop\na.com;1\nb.co";
        assert_eq!(sniff_delimiter(sample, true), b';');
    }

    #[tokio::test]
    async fn test_reads_rows_and_skips_header() {
        let file = csv_file(b"domain,popularity\nexample.com,1\nexample.org,2\n");
        let mut reader = CsvReader::new(file.path(), 2048);
        reader.setup().await.unwrap();

        let rows = read_all(&mut reader).await;
        assert_eq!(
            rows,
            vec![
                vec!["example.com".to_string(), "1".to_string()],
                vec!["example.org".to_string(), "2".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_semicolon_file_with_ragged_rows() {
        let file = csv_file(b"domain;popularity\nexample.com;1\nshort\nexample.net;3;extra\n");
        let mut reader = CsvReader::new(file.path(), 2048);
        reader.setup().await.unwrap();

        let rows = read_all(&mut reader).await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["short".to_string()]);
        assert_eq!(rows[2].len(), 3);
    }

    #[tokio::test]
    async fn test_header_only_file_is_empty() {
        let file = csv_file(b"domain,popularity\n");
        let mut reader = CsvReader::new(file.path(), 2048);
        reader.setup().await.unwrap();
        assert!(read_all(&mut reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_row_skipped() {
        let file = csv_file(b"domain,popularity\nexample.com,1\n\xff\xfe.com,2\nexample.org,3\n");
        let mut reader = CsvReader::new(file.path(), 2048);
        reader.setup().await.unwrap();

        let rows = read_all(&mut reader).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "example.org");
    }

    #[tokio::test]
    async fn test_missing_file_fails_setup() {
        let mut reader = CsvReader::new("/nonexistent/domains.csv", 2048);
        let err = reader.setup().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }

    #[tokio::test]
    async fn test_reads_past_one_batch_in_order() {
        let mut contents = String::from("domain,popularity\n");
        for i in 0..(READ_BATCH * 2 + 17) {
            contents.push_str(&format!("site{}.com,{}\n", i, i));
        }
        let file = csv_file(contents.as_bytes());
        let mut reader = CsvReader::new(file.path(), 2048);
        reader.setup().await.unwrap();

        let rows = read_all(&mut reader).await;
        assert_eq!(rows.len(), READ_BATCH * 2 + 17);
        assert_eq!(rows[0][0], "site0.com");
        assert_eq!(rows[READ_BATCH][0], format!("site{}.com", READ_BATCH));
        assert_eq!(rows.last().unwrap()[1], (READ_BATCH * 2 + 16).to_string());
        assert!(reader.produce().await.unwrap().is_none());
    }
}
