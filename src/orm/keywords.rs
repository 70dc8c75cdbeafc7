use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "keywords")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub keyword: String,
    pub slug: String,
    pub is_featured: bool,
    pub display_order: i32,
    pub post_count: i32,
    pub search_count: i32,
    pub view_count: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::post_keywords::Entity")]
    PostKeywords,
}

impl Related<super::post_keywords::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PostKeywords.def()
    }
}

impl Related<super::posts::Entity> for Entity {
    fn to() -> RelationDef {
        super::post_keywords::Relation::Posts.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::post_keywords::Relation::Keywords.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
