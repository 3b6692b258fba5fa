use tabled::{settings::Style, Table, Tabled};
use crate::storage::{ObjectRow, PropertyType, TypeSummary};

/// Longest blob excerpt shown in object listings
const BLOB_PREVIEW: usize = 60;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct ObjectLine {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "Blob")]
    blob: String,
}

#[derive(Tabled)]
struct TypeLine {
    #[tabled(rename = "Type")]
    name: String,
    #[tabled(rename = "Objects")]
    objects: usize,
    #[tabled(rename = "Indexed properties")]
    indexed: String,
}

#[derive(Tabled)]
struct PropertyLine {
    #[tabled(rename = "Property")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        render(&self.rows)
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

fn preview(blob: &str) -> String {
    if blob.chars().count() <= BLOB_PREVIEW {
        return blob.to_string();
    }
    let cut: String = blob.chars().take(BLOB_PREVIEW - 1).collect();
    format!("{}…", cut)
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn objects_table(rows: &[ObjectRow]) -> String {
    let lines: Vec<_> = rows
        .iter()
        .map(|row| ObjectLine {
            id: row.id.clone(),
            type_name: row.type_name.clone(),
            blob: preview(&row.blob),
        })
        .collect();
    render(&lines)
}

pub fn types_table(types: &[(TypeSummary, Vec<PropertyType>)]) -> String {
    let lines: Vec<_> = types
        .iter()
        .map(|(summary, props)| TypeLine {
            name: summary.name.clone(),
            objects: summary.objects,
            indexed: props
                .iter()
                .filter(|p| p.indexed)
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    render(&lines)
}

pub fn properties_table(props: &[(String, String)]) -> String {
    let lines: Vec<_> = props
        .iter()
        .map(|(name, value)| PropertyLine {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    render(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tables_render_nothing() {
        assert!(TableBuilder::new().build().is_empty());
        assert!(objects_table(&[]).is_empty());
    }

    #[test]
    fn test_objects_table_truncates_blob() {
        let row = ObjectRow {
            id: "wsid".into(),
            type_name: "workspace".into(),
            blob: "x".repeat(200),
        };
        let table = objects_table(&[row]);
        assert!(table.contains("wsid"));
        assert!(table.contains('…'));
        assert!(!table.contains(&"x".repeat(BLOB_PREVIEW)));
    }

    #[test]
    fn test_types_table_lists_indexed_only() {
        let summary = TypeSummary { name: "workspace".into(), objects: 2 };
        let props = vec![
            PropertyType { name: "name".into(), indexed: true },
            PropertyType { name: "isolated".into(), indexed: false },
        ];
        let table = types_table(&[(summary, props)]);
        assert!(table.contains("name"));
        assert!(!table.contains("isolated"));
    }
}
