use std::fmt::Write as _;

use sf_columnar::Column;
use sf_index::IndexLabel;
use sf_types::{DType, Scalar};

use crate::{DataFrame, Series};

/// Layout knobs for the plain-text table renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Upper bound on decimals shown for a float column.
    pub float_precision: usize,
    /// Spaces between the index and the first column.
    pub index_gap: usize,
    /// Spaces between adjacent columns.
    pub column_gap: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            float_precision: 1,
            index_gap: 4,
            column_gap: 2,
        }
    }
}

fn text_width(text: &str) -> usize {
    text.chars().count()
}

/// Digits after the decimal point in the shortest round-trip form of `v`.
fn shortest_decimals(v: f64) -> usize {
    let text = v.to_string();
    text.split_once('.').map_or(0, |(_, frac)| frac.len())
}

/// Decimals needed to reach the first significant digit of a fraction.
fn leading_fraction_digits(v: f64) -> usize {
    if v == 0.0 || v.abs() >= 1.0 {
        return 0;
    }
    let text = v.abs().to_string();
    text.split_once('.').map_or(0, |(_, frac)| {
        frac.chars().take_while(|&c| c == '0').count() + 1
    })
}

/// One precision for a whole float column, capped at `max_precision`.
///
/// The cap is lifted far enough that every non-zero value keeps one
/// significant digit, so `0.04` never renders as `0.0`.
#[must_use]
pub fn float_precision_for(values: &[Scalar], max_precision: usize) -> usize {
    let finite = || {
        values.iter().filter_map(|value| match value {
            Scalar::Float64(v) if v.is_finite() => Some(*v),
            _ => None,
        })
    };
    let widest = finite().map(shortest_decimals).max().unwrap_or(0);
    let floor = finite().map(leading_fraction_digits).max().unwrap_or(0);
    widest.max(1).min(max_precision).max(floor.min(widest))
}

fn format_float(v: f64, precision: usize) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v == f64::INFINITY {
        "inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else {
        format!("{v:.precision$}")
    }
}

fn column_cells(column: &Column, options: &DisplayOptions) -> Vec<String> {
    if column.dtype() == DType::Float64 {
        let precision = float_precision_for(column.values(), options.float_precision);
        column
            .values()
            .iter()
            .map(|value| match value {
                Scalar::Float64(v) => format_float(*v, precision),
                other => other.to_string(),
            })
            .collect()
    } else {
        column.values().iter().map(ToString::to_string).collect()
    }
}

fn push_right(out: &mut String, text: &str, width: usize) {
    let _ = write!(out, "{text:>width$}");
}

/// A column whose body is entirely blank collapses to no width in body rows.
fn body_widths(cells: &[Vec<String>], widths: &[usize]) -> Vec<usize> {
    cells
        .iter()
        .zip(widths)
        .map(|(column, &width)| {
            if column.iter().all(String::is_empty) {
                0
            } else {
                width
            }
        })
        .collect()
}

fn push_label(out: &mut String, label: &IndexLabel, width: usize, gap: usize) {
    let text = label.to_string();
    let _ = write!(out, "{text:<width$}{:gap$}", "");
}

fn index_width(labels: &[IndexLabel]) -> usize {
    labels
        .iter()
        .map(|label| text_width(&label.to_string()))
        .max()
        .unwrap_or(0)
}

fn join_labels(labels: &[IndexLabel]) -> String {
    labels
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn render_frame(frame: &DataFrame, options: &DisplayOptions) -> String {
    let labels = frame.index().labels();
    if frame.columns().is_empty() || labels.is_empty() {
        return format!(
            "Empty DataFrame\nColumns: [{}]\nIndex: [{}]\n",
            join_labels(frame.columns()),
            join_labels(labels)
        );
    }

    let headers: Vec<String> = frame.columns().iter().map(ToString::to_string).collect();
    let cells: Vec<Vec<String>> = frame
        .columns()
        .iter()
        .filter_map(|label| frame.column(label))
        .map(|column| column_cells(column, options))
        .collect();
    let widths: Vec<usize> = headers
        .iter()
        .zip(&cells)
        .map(|(header, column)| {
            column
                .iter()
                .map(|cell| text_width(cell))
                .chain(std::iter::once(text_width(header)))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let row_widths = body_widths(&cells, &widths);

    let idx_width = index_width(labels);
    let mut out = String::new();
    let _ = write!(out, "{:width$}", "", width = idx_width + options.index_gap);
    for (j, header) in headers.iter().enumerate() {
        if j > 0 {
            let _ = write!(out, "{:gap$}", "", gap = options.column_gap);
        }
        push_right(&mut out, header, widths[j]);
    }
    out.push('\n');

    for (row, label) in labels.iter().enumerate() {
        push_label(&mut out, label, idx_width, options.index_gap);
        for (j, column) in cells.iter().enumerate() {
            if j > 0 {
                let _ = write!(out, "{:gap$}", "", gap = options.column_gap);
            }
            push_right(&mut out, &column[row], row_widths[j]);
        }
        out.push('\n');
    }
    out
}

pub(crate) fn render_series(series: &Series, options: &DisplayOptions) -> String {
    let labels = series.index().labels();
    let cells = column_cells(series.column(), options);
    let width = cells.iter().map(|cell| text_width(cell)).max().unwrap_or(0);
    let idx_width = index_width(labels);

    let mut out = String::new();
    for (label, cell) in labels.iter().zip(&cells) {
        push_label(&mut out, label, idx_width, options.index_gap);
        push_right(&mut out, cell, width);
        out.push('\n');
    }
    match series.name() {
        Some(name) => {
            let _ = writeln!(out, "Name: {name}, dtype: {}", series.dtype());
        }
        None => {
            let _ = writeln!(out, "dtype: {}", series.dtype());
        }
    }
    out
}
