pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, entity_created, entity_deleted, entity_updated, error, header, info, muted, section,
    success, summary_row, timing, warn,
};
pub use table::{entity_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
