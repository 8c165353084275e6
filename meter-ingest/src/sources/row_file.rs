use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use futures::Stream;

use crate::pipeline::{Envelope, PipelineError, Source};

/// Delimited file source yielding raw rows.
///
/// Rows are not required to share a length: the device families keep
/// several historical layouts and the parser decides what a row is. A row
/// the reader cannot decode is yielded as an error and reading continues;
/// failing to open the file ends the stream after one error.
pub struct RowFileSource {
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
}

impl RowFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, delimiter: u8, has_headers: bool) -> Self {
        Self {
            path: path.into(),
            delimiter,
            has_headers,
        }
    }
}

#[async_trait::async_trait]
impl Source<StringRecord> for RowFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<StringRecord>, PipelineError>> + Send>> {
        // Blocking CSV reader driven from a single async task; input files
        // are read strictly sequentially.
        let path = self.path.clone();
        let delimiter = self.delimiter;
        let has_headers = self.has_headers;

        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Open(format!(
                        "{}: {e}",
                        path.display()
                    )));
                    return;
                }
            };
            let mut rdr = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .has_headers(has_headers)
                .flexible(true)
                .from_reader(file);

            let mut record = StringRecord::new();
            let mut line: u64 = if has_headers { 1 } else { 0 };
            loop {
                line += 1;
                match rdr.read_record(&mut record) {
                    Ok(true) => {
                        if let Some(pos) = record.position() {
                            line = pos.line();
                        }
                        yield Ok(Envelope::new(record.clone(), line));
                    }
                    Ok(false) => break,
                    Err(e) => {
                        if let Some(pos) = e.position() {
                            line = pos.line();
                        }
                        metrics::counter!("rows_unreadable_total").increment(1);
                        yield Err(PipelineError::Source(format!("line {line}: unreadable row: {e}")));
                        if e.is_io_error() {
                            break;
                        }
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    #[tokio::test]
    async fn yields_rows_of_mixed_length_with_line_numbers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,value").unwrap();
        writeln!(file, "2024-01-01 00:00:00,1,2,3,4").unwrap();
        writeln!(file, "a,b,c").unwrap();

        let source = RowFileSource::new(file.path(), b',', true);
        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.payload.len(), 5);
        assert_eq!(first.line, 2);
        assert_eq!(items[1].as_ref().unwrap().payload.len(), 3);
    }

    #[tokio::test]
    async fn missing_file_is_a_single_source_error() {
        let source = RowFileSource::new("/definitely/not/here.csv", b',', false);
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Open(_))));
    }
}
