use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "auto_creator_processed")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub source_url: Option<String>,
    #[sea_orm(unique)]
    pub article_url: String,
    pub article_title: String,
    pub post_id: Option<i32>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match *self {}
    }
}

impl ActiveModelBehavior for ActiveModel {}
