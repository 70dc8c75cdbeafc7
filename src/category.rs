use crate::orm::categories;
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr};
use serde::Serialize;

/// Used when an LLM suggests no category at all.
pub const FALLBACK_CATEGORY: &str = "その他";

#[derive(Clone, Debug, Serialize)]
pub struct CategoryForList {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

pub async fn get_categories<C: ConnectionTrait>(db: &C) -> Result<Vec<categories::Model>, DbErr> {
    categories::Entity::find()
        .order_by_asc(categories::Column::DisplayOrder)
        .order_by_asc(categories::Column::Id)
        .all(db)
        .await
}

pub async fn list_categories<C: ConnectionTrait>(db: &C) -> Result<Vec<CategoryForList>, DbErr> {
    Ok(get_categories(db)
        .await?
        .into_iter()
        .map(|c| CategoryForList {
            id: c.id,
            name: c.name,
            slug: c.slug,
        })
        .collect())
}

fn first_partial<'a>(needle: &str, list: &'a [categories::Model]) -> Option<&'a categories::Model> {
    let needle = needle.to_lowercase();
    list.iter().find(|c| c.name.to_lowercase().contains(&needle))
}

/// Resolves a free-form category name against the known categories.
/// Tries an exact name, then a partial match, then a partial match on the first word.
pub fn match_category_in<'a>(name: &str, list: &'a [categories::Model]) -> Option<&'a categories::Model> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    if let Some(exact) = list.iter().find(|c| c.name == name) {
        return Some(exact);
    }
    if let Some(partial) = first_partial(name, list) {
        return Some(partial);
    }

    let first_word = name
        .split(|c: char| c.is_whitespace() || c == '・' || c == '、' || c == ',')
        .find(|w| !w.is_empty())?;
    first_partial(first_word, list)
}

pub async fn match_category<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<categories::Model>, DbErr> {
    let list = get_categories(db).await?;
    let found = match_category_in(name, &list).cloned();

    match &found {
        Some(category) => log::debug!("match_category: {:?} -> {}", name, category.name),
        None => log::info!("match_category: no category for {:?}", name),
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: i32, name: &str) -> categories::Model {
        categories::Model {
            id,
            name: name.to_owned(),
            slug: format!("c{}", id),
            display_order: id,
        }
    }

    fn list() -> Vec<categories::Model> {
        vec![
            cat(1, "恋愛・結婚"),
            cat(2, "芸能"),
            cat(3, "芸能ニュース"),
            cat(4, "スポーツ"),
            cat(5, "Tech"),
        ]
    }

    #[test]
    fn test_exact_match_wins() {
        let list = list();
        assert_eq!(match_category_in("芸能ニュース", &list).map(|c| c.id), Some(3));
        assert_eq!(match_category_in("芸能", &list).map(|c| c.id), Some(2));
    }

    #[test]
    fn test_partial_match() {
        let list = list();
        assert_eq!(match_category_in("恋愛", &list).map(|c| c.id), Some(1));
        assert_eq!(match_category_in("tech", &list).map(|c| c.id), Some(5));
    }

    #[test]
    fn test_first_word_match() {
        let list = list();
        assert_eq!(match_category_in("スポーツ・野球", &list).map(|c| c.id), Some(4));
        assert_eq!(match_category_in("結婚、離婚", &list).map(|c| c.id), Some(1));
    }

    #[test]
    fn test_no_match() {
        let list = list();
        assert!(match_category_in("料理", &list).is_none());
        assert!(match_category_in("  ", &list).is_none());
    }
}
