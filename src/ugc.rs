//! Shared handling for user generated text: trimming, required fields and NG word screening.

use crate::ng_word::{self, NgMatch};
use actix_web::{error, Error};
use sea_orm::ConnectionTrait;

/// Longest image reference kept on a post.
pub const MAX_IMAGE_URL_LEN: usize = 500;

/// Trims input and rejects it when nothing remains.
pub fn validate_ugc(content: &str, field: &str) -> Result<String, Error> {
    let clean_content = content.trim();

    if clean_content.is_empty() {
        return Err(error::ErrorUnprocessableEntity(format!(
            "{}を入力してください",
            field
        )));
    }

    Ok(clean_content.to_owned())
}

/// Inline `data:` images and oversized references are dropped.
pub fn clean_image_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty())
        .filter(|u| !u.starts_with("data:"))
        .filter(|u| u.chars().count() <= MAX_IMAGE_URL_LEN)
}

/// Returns the first NG word found in any of the texts.
pub async fn screen_ugc<C: ConnectionTrait>(db: &C, texts: &[&str]) -> Result<Option<NgMatch>, Error> {
    let words = ng_word::active_words(db)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(texts.iter().find_map(|text| ng_word::check(text, &words)))
}

/// Rejects text containing any NG word.
pub async fn reject_ng_words<C: ConnectionTrait>(db: &C, texts: &[&str]) -> Result<(), Error> {
    match screen_ugc(db, texts).await? {
        Some(hit) => {
            log::info!("reject_ng_words: blocked {:?}", hit.word);
            Err(error::ErrorBadRequest("不適切な表現が含まれています"))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ugc_trims() {
        assert_eq!(validate_ugc("  hello \n", "本文").ok().as_deref(), Some("hello"));
        assert!(validate_ugc(" \t ", "本文").is_err());
    }

    #[test]
    fn test_clean_image_url() {
        assert_eq!(
            clean_image_url(Some("https://example.com/a.png".to_owned())).as_deref(),
            Some("https://example.com/a.png")
        );
        assert_eq!(clean_image_url(Some("data:image/png;base64,AAAA".to_owned())), None);
        assert_eq!(clean_image_url(Some("x".repeat(501))), None);
        assert!(clean_image_url(Some("x".repeat(500))).is_some());
        assert_eq!(clean_image_url(Some("   ".to_owned())), None);
        assert_eq!(clean_image_url(None), None);
    }
}
