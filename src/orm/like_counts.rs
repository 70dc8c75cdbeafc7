use crate::like::LikeKind;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "like_counts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub like_type: LikeKind,
    #[sea_orm(primary_key, auto_increment = false)]
    pub target_id: i32,
    pub like_count: i32,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match *self {}
    }
}

impl ActiveModelBehavior for ActiveModel {}
