use crate::post::PostStatus;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "posts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: Option<i32>,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub status: PostStatus,
    pub category_id: Option<i32>,
    pub og_image: Option<String>,
    pub source_url: Option<String>,
    pub workid: Option<i32>,
    pub deadline_at: Option<DateTime>,
    pub total_votes: i32,
    pub view_count: i32,
    pub best_answer_id: Option<i32>,
    pub best_answer_selected_at: Option<DateTime>,
    pub auto_created: bool,
    pub ai_tagged: bool,
    pub ai_tagged_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Users,
    #[sea_orm(
        belongs_to = "super::categories::Entity",
        from = "Column::CategoryId",
        to = "super::categories::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Categories,
    #[sea_orm(has_many = "super::vote_choices::Entity")]
    VoteChoices,
    #[sea_orm(has_many = "super::comments::Entity")]
    Comments,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::categories::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Categories.def()
    }
}

impl Related<super::vote_choices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VoteChoices.def()
    }
}

impl Related<super::comments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl Related<super::keywords::Entity> for Entity {
    fn to() -> RelationDef {
        super::post_keywords::Relation::Keywords.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::post_keywords::Relation::Posts.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
