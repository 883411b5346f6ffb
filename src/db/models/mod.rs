//! SeaORM entity definitions

pub mod document;
pub mod document_table;
pub mod query_log;
pub mod rbi_update;

pub use document::Model as Document;
pub use document_table::Model as DocumentTable;
pub use query_log::Model as QueryLog;
pub use rbi_update::Model as RbiUpdate;
