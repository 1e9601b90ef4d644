#![forbid(unsafe_code)]

use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use sf_columnar::{Column, ColumnError};
use sf_frame::{DataFrame, FrameError};
use sf_index::{Index, IndexLabel};
use sf_types::{Scalar, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Treat the first record as column labels. Otherwise columns are `0..n`.
    pub has_headers: bool,
    /// Strip surrounding whitespace from headers and fields.
    pub trim: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
            trim: true,
        }
    }
}

pub fn read_csv_str(input: &str) -> Result<DataFrame, IoError> {
    read_csv_with_options(input, &CsvOptions::default())
}

pub fn read_csv_path(path: impl AsRef<Path>) -> Result<DataFrame, IoError> {
    read_csv_path_with_options(path, &CsvOptions::default())
}

pub fn read_csv_path_with_options(
    path: impl AsRef<Path>,
    options: &CsvOptions,
) -> Result<DataFrame, IoError> {
    let input = std::fs::read_to_string(path)?;
    read_csv_with_options(&input, options)
}

/// Parse delimited text into a frame with a default range index.
///
/// Short records are padded with nulls. Fields past the header width get
/// positional labels.
pub fn read_csv_with_options(input: &str, options: &CsvOptions) -> Result<DataFrame, IoError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.has_headers)
        .flexible(true)
        .trim(if options.trim { Trim::All } else { Trim::None })
        .from_reader(input.as_bytes());

    let mut labels: Vec<IndexLabel> = Vec::new();
    if options.has_headers {
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(IoError::MissingHeaders);
        }
        labels.extend(headers.iter().map(IndexLabel::from));
    }

    let row_hint = input.len() / (labels.len().max(1) * 8).max(1);
    let mut columns: Vec<Vec<Value>> = (0..labels.len())
        .map(|_| Vec::with_capacity(row_hint))
        .collect();

    let mut row_count = 0usize;
    for record in reader.records() {
        let record = record?;
        while columns.len() < record.len() {
            labels.push(IndexLabel::Int64(positional(columns.len())));
            columns.push(vec![Value::Null; row_count]);
        }
        for (idx, column) in columns.iter_mut().enumerate() {
            column.push(record.get(idx).map_or(Value::Null, parse_value));
        }
        row_count += 1;
    }

    let mut out = Vec::with_capacity(columns.len());
    for (label, values) in labels.into_iter().zip(columns) {
        out.push((label, Column::from_values(values)?));
    }
    Ok(DataFrame::from_columns(Index::range(row_count), out)?)
}

fn positional(idx: usize) -> i64 {
    i64::try_from(idx).unwrap_or(i64::MAX)
}

/// Cells are typed by shape: empty is null, then integer, float, bool, text.
fn parse_value(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = field.parse::<i64>() {
        return Value::Int(value);
    }
    if let Ok(value) = field.parse::<f64>() {
        return Value::Float(value);
    }
    if let Ok(value) = field.parse::<bool>() {
        return Value::Bool(value);
    }
    Value::Str(field.to_owned())
}

/// Header row of column labels, then one record per row. The index is not
/// written.
pub fn write_csv_string(frame: &DataFrame) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let labels = frame.columns();
    writer.write_record(labels.iter().map(ToString::to_string))?;

    let columns: Vec<&Column> = labels
        .iter()
        .filter_map(|label| frame.column(label))
        .collect();
    for row_idx in 0..frame.len() {
        let row = columns
            .iter()
            .map(|column| column.value(row_idx).map_or_else(String::new, scalar_to_csv));
        writer.write_record(row)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn scalar_to_csv(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Float64(v) if v.is_nan() => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use sf_frame::DataFrame;
    use sf_index::IndexLabel;
    use sf_types::{DType, Scalar, Value};

    use super::{
        CsvOptions, IoError, read_csv_path, read_csv_str, read_csv_with_options, write_csv_string,
    };

    fn cell(frame: &DataFrame, label: impl Into<IndexLabel>, row: usize) -> Scalar {
        frame
            .column(&label.into())
            .and_then(|column| column.value(row))
            .cloned()
            .unwrap()
    }

    #[test]
    fn header_order_and_shapes_are_kept() {
        let input = "zeta,alpha,mid\n1,2.5,x\n4,5,y\n";
        let frame = read_csv_str(input).expect("parse");
        let names: Vec<String> = frame.columns().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(cell(&frame, "zeta", 1), Scalar::Int64(4));
        assert_eq!(cell(&frame, "alpha", 1), Scalar::Float64(5.0));
        assert_eq!(frame.column(&"alpha".into()).unwrap().dtype(), DType::Float64);
        assert!(frame.index().is_default_range());
    }

    #[test]
    fn mixed_dtypes() {
        let input = "ints,floats,strings,bools,nulls\n\
                     1,1.5,hello,true,\n\
                     2,2.7,world,false,\n\
                     3,3.25,foo,true,\n";
        let frame = read_csv_str(input).expect("parse");
        let dtypes: Vec<DType> = frame
            .columns()
            .iter()
            .map(|label| frame.column(label).unwrap().dtype())
            .collect();
        assert_eq!(
            dtypes,
            vec![DType::Int64, DType::Float64, DType::Utf8, DType::Bool, DType::Utf8]
        );
        assert_eq!(cell(&frame, "nulls", 0), Scalar::Null);
        assert_eq!(cell(&frame, "floats", 2), Scalar::Float64(3.25));
    }

    #[test]
    fn kinds_that_disagree_make_an_object_column() {
        let frame = read_csv_str("v\n1\nabc\n").expect("parse");
        assert_eq!(frame.column(&"v".into()).unwrap().dtype(), DType::Object);
        assert_eq!(cell(&frame, "v", 0), Scalar::Int64(1));
    }

    #[test]
    fn headers_without_rows() {
        let frame = read_csv_str("x,y,z\n").expect("parse");
        assert_eq!(frame.len(), 0);
        assert_eq!(frame.num_columns(), 3);
        assert!(matches!(read_csv_str(""), Err(IoError::MissingHeaders)));
    }

    #[test]
    fn ragged_records_pad_with_nulls() {
        let input = "a,b,c\n1,2\n3,4,5,6\n";
        let frame = read_csv_str(input).expect("parse");
        assert_eq!(frame.size(), (2, 4));
        assert_eq!(cell(&frame, "c", 0), Scalar::Null);
        assert_eq!(cell(&frame, 3_i64, 0), Scalar::Null);
        assert_eq!(cell(&frame, 3_i64, 1), Scalar::Int64(6));
    }

    #[test]
    fn missing_fields_render_in_their_column() {
        let frame = read_csv_str("a,b\n10,x\n,y\n").expect("parse");
        assert_eq!(frame.to_string(), "      a  b\n0    10  x\n1        y\n");
    }

    #[test]
    fn headerless_input_gets_positional_labels() {
        let options = CsvOptions {
            has_headers: false,
            delimiter: b';',
            ..CsvOptions::default()
        };
        let frame = read_csv_with_options("1;x\n2;y\n", &options).expect("parse");
        assert_eq!(frame.columns(), &[IndexLabel::Int64(0), IndexLabel::Int64(1)]);
        assert_eq!(cell(&frame, 1_i64, 1), Scalar::Utf8("y".into()));

        let empty = read_csv_with_options("", &options).expect("empty");
        assert!(empty.is_empty());
    }

    #[test]
    fn trim_is_optional() {
        let trimmed = read_csv_str("a\n 7 \n").expect("parse");
        assert_eq!(cell(&trimmed, "a", 0), Scalar::Int64(7));

        let options = CsvOptions {
            trim: false,
            ..CsvOptions::default()
        };
        let raw = read_csv_with_options("a\n 7 \n", &options).expect("parse");
        assert_eq!(cell(&raw, "a", 0), Scalar::Utf8(" 7 ".into()));
    }

    #[test]
    fn write_skips_index_and_blanks_missing() {
        let frame = DataFrame::from_rows(
            vec![
                vec![1.into(), 10.5.into(), "x".into()],
                vec![2.into(), Value::Null, "y,z".into()],
            ],
            Some(vec!["id".into(), "value".into(), "tag".into()]),
            Some(vec!["r1".into(), "r2".into()]),
        )
        .expect("frame");
        let out = write_csv_string(&frame).expect("write");
        assert_eq!(out, "id,value,tag\n1,10.5,x\n2,,\"y,z\"\n");

        let back = read_csv_str(&out).expect("read back");
        assert_eq!(cell(&back, "value", 1), Scalar::Null);
        assert_eq!(cell(&back, "tag", 1), Scalar::Utf8("y,z".into()));
    }

    #[test]
    fn reads_from_disk() {
        let path = std::env::temp_dir().join(format!("sf-io-{}.csv", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"animal,sound\ncat,meow\ndog,woof\n").unwrap();
        drop(file);

        let frame = read_csv_path(&path).expect("read");
        std::fs::remove_file(&path).unwrap();
        assert_eq!(frame.size(), (2, 2));
        assert_eq!(cell(&frame, "sound", 1), Scalar::Utf8("woof".into()));

        assert!(matches!(
            read_csv_path("/nonexistent/sf-io.csv"),
            Err(IoError::Io(_))
        ));
    }

    #[test]
    fn large_input_parses() {
        let mut csv = String::from("a,b,c\n");
        let target_rows = 20_000;
        for i in 0..target_rows {
            csv.push_str(&format!("{},{},{}\n", i, i * 2, i * 3));
        }
        let frame = read_csv_str(&csv).expect("parse large CSV");
        assert_eq!(frame.len(), target_rows);
        assert_eq!(
            cell(&frame, "c", target_rows - 1),
            Scalar::Int64(3 * (target_rows as i64 - 1))
        );
    }
}
