use crate::{Record, Rid};
use tabled::{Table, Tabled, builder::Builder, settings};

/// Predefined output styles that map to `tabled` styles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Modern,
    Ascii,
    Plain,
}

impl TableStyleKind {
    fn apply(self, table: &mut Table) {
        match self {
            Self::Modern => table.with(settings::Style::modern()),
            Self::Ascii => table.with(settings::Style::ascii()),
            Self::Plain => table.with(settings::Style::empty()),
        };
    }
}

/// Render a slice of materialized `Record`s into a human-friendly table.
pub fn render_records(headers: &[&str], records: &[Record], style: TableStyleKind) -> String {
    if records.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();
    if !headers.is_empty() {
        builder.push_record(headers.iter().copied());
    }

    for record in records {
        builder.push_record(record.columns.iter().map(i64::to_string));
    }

    let mut table = builder.build();
    style.apply(&mut table);
    table.to_string()
}

/// Render arbitrary string rows with the provided style.
pub fn render_string_table(
    headers: &[&str],
    rows: Vec<Vec<String>>,
    style: TableStyleKind,
) -> String {
    if headers.is_empty() && rows.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();

    if !headers.is_empty() {
        builder.push_record(headers.iter().copied());
    }

    for row in rows {
        builder.push_record(row);
    }

    let mut table = builder.build();
    style.apply(&mut table);
    table.to_string()
}

/// Render any `Tabled` rows with the provided style.
pub fn render_structured_rows<T>(rows: &[T], style: TableStyleKind) -> String
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        return "<empty>".into();
    }

    let mut table = Table::new(rows.to_vec());
    style.apply(&mut table);
    table.to_string()
}

/// Format a full column vector into a comma-separated string.
pub fn format_columns(columns: &[i64]) -> String {
    columns
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format a `Rid` as `(page_range, page, slot, kind)`.
pub fn format_rid(rid: &Rid) -> String {
    let kind = if rid.is_base() { "b" } else { "t" };
    format!("({}, {}, {}, {kind})", rid.page_range, rid.page, rid.slot)
}
