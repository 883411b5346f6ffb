//! Document entity (one ingested RBI circular)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub filename: String,

    /// Public URL of the stored PDF
    #[sea_orm(column_type = "Text")]
    pub file_path: String,

    #[sea_orm(column_type = "Text")]
    pub category: String,

    pub upload_date: DateTimeWithTimeZone,

    pub total_pages: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document_table::Entity")]
    Tables,
}

impl Related<super::document_table::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tables.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
