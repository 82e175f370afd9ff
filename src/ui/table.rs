use crate::entity::Entity;
use crate::id::format_timestamp;
use crate::ui::theme;
use crate::value::Value;
use owo_colors::OwoColorize;
use std::collections::BTreeSet;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Render entities as one row each: `id`, every application field seen in
/// the listing (sorted), then the two timestamps.
pub fn entity_table(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return String::new();
    }

    let columns: BTreeSet<&str> = entities
        .iter()
        .flat_map(|e| e.fields.keys().map(String::as_str))
        .collect();

    let mut builder = Builder::default();
    let mut head = vec!["id".to_string()];
    head.extend(columns.iter().map(|c| c.to_string()));
    head.push("createdAt".to_string());
    head.push("updatedAt".to_string());
    builder.push_record(head);

    for entity in entities {
        let mut record = vec![entity.id.style(theme().id.clone()).to_string()];
        for column in &columns {
            record.push(cell(entity.fields.get(*column)));
        }
        record.push(format_timestamp(&entity.created_at));
        record.push(format_timestamp(&entity.updated_at));
        builder.push_record(record);
    }

    builder.build().with(Style::rounded()).to_string()
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".style(theme().null.clone()).to_string(),
        Some(v) => v.to_string(),
    }
}
