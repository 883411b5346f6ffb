//! Structured table entity, one row per table extracted from a page

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_tables")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub document_id: i64,

    pub page_number: i32,

    /// Position of the table on its page (0-based)
    pub table_index: i32,

    /// Extraction output: `{"columns": [...], "rows": [{col: val, ...}]}`
    pub table_data: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
