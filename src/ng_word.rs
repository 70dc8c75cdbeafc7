use crate::orm::ng_words;
use once_cell::sync::Lazy;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Active words are re-read from the database at most this often.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Severity that rejects content outright instead of holding it for review.
pub const SEVERITY_HIGH: &str = "high";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The whole text must equal the word.
    #[sea_orm(string_value = "exact")]
    Exact,
    /// The text must contain the word.
    #[sea_orm(string_value = "partial")]
    Partial,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NgMatch {
    pub word: String,
    pub severity: String,
    pub category: Option<String>,
}

impl NgMatch {
    pub fn is_high(&self) -> bool {
        self.severity == SEVERITY_HIGH
    }
}

struct CachedWords {
    loaded_at: Instant,
    words: Arc<Vec<ng_words::Model>>,
}

static CACHE: Lazy<RwLock<Option<CachedWords>>> = Lazy::new(|| RwLock::new(None));

/// Returns the first word that matches `text`, case-insensitively.
pub fn check(text: &str, words: &[ng_words::Model]) -> Option<NgMatch> {
    if text.trim().is_empty() {
        return None;
    }

    let haystack = text.to_lowercase();
    words
        .iter()
        .find(|w| {
            let needle = w.word.to_lowercase();
            if needle.is_empty() {
                return false;
            }
            match w.word_type {
                MatchType::Exact => haystack == needle,
                MatchType::Partial => haystack.contains(&needle),
            }
        })
        .map(|w| NgMatch {
            word: w.word.to_owned(),
            severity: w.severity.to_owned(),
            category: w.category.to_owned(),
        })
}

/// Active words, served from the cache while it is fresh.
pub async fn active_words<C: ConnectionTrait>(db: &C) -> Result<Arc<Vec<ng_words::Model>>, DbErr> {
    if let Ok(cache) = CACHE.read() {
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < CACHE_TTL {
                return Ok(cached.words.clone());
            }
        }
    }

    let words = Arc::new(
        ng_words::Entity::find()
            .filter(ng_words::Column::IsActive.eq(true))
            .all(db)
            .await?,
    );

    match CACHE.write() {
        Ok(mut cache) => {
            *cache = Some(CachedWords {
                loaded_at: Instant::now(),
                words: words.clone(),
            });
        }
        Err(e) => log::error!("active_words: cache lock poisoned: {}", e),
    }

    Ok(words)
}

/// Checks text against the active word list.
pub async fn check_text<C: ConnectionTrait>(db: &C, text: &str) -> Result<Option<NgMatch>, DbErr> {
    let words = active_words(db).await?;
    Ok(check(text, &words))
}

/// Drops the cached list so the next check reloads it.
pub fn clear_cache() {
    match CACHE.write() {
        Ok(mut cache) => *cache = None,
        Err(e) => log::error!("clear_cache: cache lock poisoned: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(id: i32, word: &str, word_type: MatchType, severity: &str) -> ng_words::Model {
        ng_words::Model {
            id,
            word: word.to_owned(),
            word_type,
            severity: severity.to_owned(),
            category: Some("abuse".to_owned()),
            is_active: true,
        }
    }

    #[test]
    fn test_empty_text_never_matches() {
        let words = vec![word(1, "x", MatchType::Partial, "high")];
        assert_eq!(check("", &words), None);
        assert_eq!(check("   ", &words), None);
    }

    #[test]
    fn test_partial_match_is_case_insensitive() {
        let words = vec![word(1, "SPAM", MatchType::Partial, "high")];
        let hit = check("this is spam text", &words).expect("should match");
        assert_eq!(hit.word, "SPAM");
        assert!(hit.is_high());
        assert_eq!(hit.category.as_deref(), Some("abuse"));
    }

    #[test]
    fn test_exact_requires_whole_text() {
        let words = vec![word(1, "バカ", MatchType::Exact, "medium")];
        assert!(check("バカ", &words).is_some());
        assert!(check("バカなこと", &words).is_none());
    }

    #[test]
    fn test_first_hit_wins() {
        let words = vec![
            word(1, "foo", MatchType::Partial, "low"),
            word(2, "bar", MatchType::Partial, "high"),
        ];
        let hit = check("foo bar", &words).expect("should match");
        assert_eq!(hit.word, "foo");
        assert!(!hit.is_high());
    }

    #[test]
    fn test_clean_text_passes() {
        let words = vec![word(1, "foo", MatchType::Partial, "high")];
        assert_eq!(check("hello world", &words), None);
    }
}
