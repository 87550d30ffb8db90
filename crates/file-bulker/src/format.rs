//! File formats and compression for object-storage destinations.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use bulk_core::{BulkError, Record, Value};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Ndjson,
    Csv,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Ndjson => "ndjson",
            FileFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Ndjson => "application/x-ndjson",
            FileFormat::Csv => "text/csv",
        }
    }
}

impl FromStr for FileFormat {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ndjson" | "jsonl" => Ok(FileFormat::Ndjson),
            "csv" => Ok(FileFormat::Csv),
            other => Err(BulkError::config(format!("unsupported file format: {other}"))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCompression {
    #[default]
    None,
    Gzip,
}

impl FileCompression {
    /// `Content-Encoding` value for uploads, if any.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            FileCompression::None => None,
            FileCompression::Gzip => Some("gzip"),
        }
    }
}

/// File name extension for a format/compression pair, e.g. `ndjson.gz`.
pub fn file_extension(format: FileFormat, compression: FileCompression) -> String {
    match compression {
        FileCompression::None => format.extension().to_string(),
        FileCompression::Gzip => format!("{}.gz", format.extension()),
    }
}

/// Serialize `records` into one file body.
pub fn encode(
    records: &[Record],
    format: FileFormat,
    compression: FileCompression,
) -> io::Result<Vec<u8>> {
    let body = match format {
        FileFormat::Ndjson => encode_ndjson(records)?,
        FileFormat::Csv => encode_csv(records)?,
    };
    match compression {
        FileCompression::None => Ok(body),
        FileCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            encoder.finish()
        }
    }
}

fn encode_ndjson(records: &[Record]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, &record.to_json())?;
        out.push(b'\n');
    }
    Ok(out)
}

/// CSV header is the union of all record keys in first-seen order; missing
/// and null values are written as empty cells.
fn encode_csv(records: &[Record]) -> io::Result<Vec<u8>> {
    let header: IndexSet<&str> = records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for record in records {
        let row: Vec<String> = header
            .iter()
            .map(|column| match record.get(*column) {
                None | Some(Value::Null) => String::new(),
                Some(value) => value.to_string(),
            })
            .collect();
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Read a file body back into records. CSV cells come back as strings,
/// empty cells as nulls.
pub fn decode(
    bytes: &[u8],
    format: FileFormat,
    compression: FileCompression,
) -> io::Result<Vec<Record>> {
    let body = match compression {
        FileCompression::None => bytes.to_vec(),
        FileCompression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut out)?;
            out
        }
    };

    match format {
        FileFormat::Ndjson => String::from_utf8_lossy(&body)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                Record::from_json_str(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
            })
            .collect(),
        FileFormat::Csv => {
            let mut reader = csv::Reader::from_reader(body.as_slice());
            let headers = reader.headers()?.clone();
            let mut records = Vec::new();
            for row in reader.records() {
                let row = row?;
                let record: Record = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(name, cell)| {
                        let value = if cell.is_empty() {
                            Value::Null
                        } else {
                            Value::from(cell)
                        };
                        (name, value)
                    })
                    .collect();
                records.push(record);
            }
            Ok(records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![
            Record::from_json_str(r#"{"id":1,"name":"test"}"#).unwrap(),
            Record::from_json_str(r#"{"id":2,"name":"test2","column1":"data"}"#).unwrap(),
        ]
    }

    #[test]
    fn test_content_types() {
        assert_eq!(FileFormat::Ndjson.content_type(), "application/x-ndjson");
        assert_eq!(FileFormat::Csv.content_type(), "text/csv");
        assert_eq!(FileCompression::Gzip.content_encoding(), Some("gzip"));
        assert_eq!(FileCompression::None.content_encoding(), None);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(FileFormat::Ndjson, FileCompression::None), "ndjson");
        assert_eq!(file_extension(FileFormat::Csv, FileCompression::Gzip), "csv.gz");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSONL".parse::<FileFormat>().unwrap(), FileFormat::Ndjson);
        assert_eq!("csv".parse::<FileFormat>().unwrap(), FileFormat::Csv);
        assert!("parquet".parse::<FileFormat>().is_err());
    }

    #[test]
    fn test_encode_ndjson() {
        let body = encode(&records(), FileFormat::Ndjson, FileCompression::None).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "{\"id\":1,\"name\":\"test\"}\n{\"id\":2,\"name\":\"test2\",\"column1\":\"data\"}\n"
        );
    }

    #[test]
    fn test_encode_csv_uses_union_header() {
        let body = encode(&records(), FileFormat::Csv, FileCompression::None).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "id,name,column1\n1,test,\n2,test2,data\n"
        );
    }

    #[test]
    fn test_gzip_body_decodes() {
        let body = encode(&records(), FileFormat::Ndjson, FileCompression::Gzip).unwrap();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
        let decoded = decode(&body, FileFormat::Ndjson, FileCompression::Gzip).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].get("column1"), Some(&Value::from("data")));
    }

    #[test]
    fn test_decode_csv_nulls() {
        let decoded = decode(
            b"id,name,column1\n1,test,\n",
            FileFormat::Csv,
            FileCompression::None,
        )
        .unwrap();
        assert_eq!(decoded[0].get("id"), Some(&Value::from("1")));
        assert_eq!(decoded[0].get("column1"), Some(&Value::Null));
    }
}
