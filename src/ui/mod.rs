pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, muted, section, success, summary_row, warn};
pub use table::{objects_table, properties_table, stats_table, types_table, TableBuilder};
pub use theme::{theme, Theme};
