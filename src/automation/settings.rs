use super::Job;
use crate::global::get_openai_fallback_key;
use crate::orm::automation_settings;
use sea_orm::{entity::*, ConnectionTrait, DbBackend, DbErr, Statement};
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Key/value rows of `automation_settings`. Missing or malformed values read as defaults.
#[derive(Clone, Debug, Default)]
pub struct Settings(HashMap<String, String>);

impl From<HashMap<String, String>> for Settings {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("1"))
    }

    pub fn is_enabled(&self, job: Job) -> bool {
        self.flag(&enabled_key(job))
    }

    /// Base interval and variance in minutes.
    pub fn interval(&self, job: Job) -> (i64, i64) {
        let (base, variance) = match job {
            Job::AutoCreator => (60, 10),
            Job::AutoVoter => (120, 30),
            Job::AutoTagger => (30, 10),
            Job::PointsAggregate => (1440, 60),
        };
        (
            self.parse_or(&format!("{}_interval", job.key()), base),
            self.parse_or(&format!("{}_variance", job.key()), variance),
        )
    }

    /// The stored key, or the `OPENAI_API_KEY` environment fallback.
    pub fn openai_api_key(&self) -> Option<String> {
        self.get("openai_api_key")
            .map(str::to_owned)
            .or_else(|| get_openai_fallback_key().map(str::to_owned))
    }

    pub fn openai_model(&self) -> String {
        self.get("openai_model").unwrap_or(DEFAULT_MODEL).to_owned()
    }

    pub fn creator(&self) -> CreatorSettings {
        let d = CreatorSettings::default();
        CreatorSettings {
            blackout_start: self.parse_or("no_create_start_hour", d.blackout_start),
            blackout_end: self.parse_or("no_create_end_hour", d.blackout_end),
            ai_user_probability: self.parse_or("ai_user_probability", d.ai_user_probability),
            max_categories: self.parse_or("max_categories", d.max_categories),
            max_keywords: self.parse_or("max_keywords", d.max_keywords),
            title_prompt: self.get("title_prompt").map(str::to_owned),
            choices_prompt: self.get("choices_prompt").map(str::to_owned),
        }
    }

    pub fn voter(&self) -> VoterSettings {
        let d = VoterSettings::default();
        VoterSettings {
            posts_per_run: self.parse_or("posts_per_run", d.posts_per_run),
            votes_per_run: self.parse_or("votes_per_run", d.votes_per_run),
            votes_variance: self.parse_or("votes_variance", d.votes_variance),
            ai_member_probability: self.parse_or("ai_member_probability", d.ai_member_probability),
            post_like_probability: self.parse_or("post_like_probability", d.post_like_probability),
            like_probability: self.parse_or("like_probability", d.like_probability),
            comments_per_run: self.parse_or("comments_per_run", d.comments_per_run),
            max_comments_per_post: self.parse_or("max_comments_per_post", d.max_comments_per_post),
            max_comments_variance: self.parse_or("max_comments_variance", d.max_comments_variance),
            priority_days: self.parse_or("priority_days", d.priority_days),
            priority_weight: self.parse_or("priority_weight", d.priority_weight),
            comment_prompt: self.get("comment_prompt").map(str::to_owned),
            reply_prompt: self.get("reply_prompt").map(str::to_owned),
        }
    }

    pub fn tagger(&self) -> TaggerSettings {
        let d = TaggerSettings::default();
        TaggerSettings {
            posts_per_run: self.parse_or("auto_tagger_posts_per_run", d.posts_per_run),
        }
    }

    pub fn aggregate(&self) -> AggregateSettings {
        let d = AggregateSettings::default();
        AggregateSettings {
            ranked_users: self.parse_or("points_aggregate_ranked_users", d.ranked_users),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreatorSettings {
    /// Local hours during which no post is created. The window may wrap midnight.
    pub blackout_start: u32,
    pub blackout_end: u32,
    pub ai_user_probability: u32,
    pub max_categories: usize,
    pub max_keywords: usize,
    pub title_prompt: Option<String>,
    pub choices_prompt: Option<String>,
}

impl Default for CreatorSettings {
    fn default() -> Self {
        Self {
            blackout_start: 0,
            blackout_end: 6,
            ai_user_probability: 70,
            max_categories: 1,
            max_keywords: 3,
            title_prompt: None,
            choices_prompt: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoterSettings {
    pub posts_per_run: u64,
    pub votes_per_run: i64,
    pub votes_variance: i64,
    pub ai_member_probability: u32,
    /// Percent chance of a post like per processed post.
    pub post_like_probability: u32,
    /// Percent chance that a new comment gets a like from another persona.
    pub like_probability: u32,
    pub comments_per_run: u32,
    pub max_comments_per_post: i64,
    pub max_comments_variance: i64,
    pub priority_days: i64,
    pub priority_weight: f64,
    pub comment_prompt: Option<String>,
    /// Enables replies on posts that already have comments.
    pub reply_prompt: Option<String>,
}

impl Default for VoterSettings {
    fn default() -> Self {
        Self {
            posts_per_run: 1,
            votes_per_run: 3,
            votes_variance: 2,
            ai_member_probability: 70,
            post_like_probability: 50,
            like_probability: 40,
            comments_per_run: 1,
            max_comments_per_post: 20,
            max_comments_variance: 10,
            priority_days: 3,
            priority_weight: 5.0,
            comment_prompt: None,
            reply_prompt: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaggerSettings {
    pub posts_per_run: usize,
}

impl Default for TaggerSettings {
    fn default() -> Self {
        Self { posts_per_run: 5 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateSettings {
    /// Users past this position keep a null rank.
    pub ranked_users: u64,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self { ranked_users: 100 }
    }
}

pub fn enabled_key(job: Job) -> String {
    format!("{}_enabled", job.key())
}

pub async fn load_settings<C: ConnectionTrait>(db: &C) -> Result<Settings, DbErr> {
    Ok(Settings(
        automation_settings::Entity::find()
            .all(db)
            .await?
            .into_iter()
            .map(|s| (s.setting_key, s.setting_value))
            .collect(),
    ))
}

const UPSERT_SETTING: &str = r#"INSERT INTO automation_settings (setting_key, setting_value)
VALUES ($1, $2)
ON CONFLICT (setting_key) DO UPDATE SET setting_value = EXCLUDED.setting_value"#;

pub async fn set_setting<C: ConnectionTrait>(db: &C, key: &str, value: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        UPSERT_SETTING,
        vec![key.into(), value.into()],
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
            .into()
    }

    #[test]
    fn test_defaults_when_empty() {
        let s = Settings::default();
        assert_eq!(s.creator(), CreatorSettings::default());
        assert_eq!(s.voter(), VoterSettings::default());
        assert_eq!(s.tagger().posts_per_run, 5);
        assert_eq!(s.aggregate().ranked_users, 100);
        assert_eq!(s.interval(Job::AutoVoter), (120, 30));
        assert_eq!(s.interval(Job::PointsAggregate), (1440, 60));
        assert_eq!(s.openai_model(), DEFAULT_MODEL);
        assert!(!s.is_enabled(Job::AutoCreator));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let s = settings(&[
            ("max_keywords", "five"),
            ("ai_user_probability", "-3"),
            ("votes_per_run", " 7 "),
            ("auto_tagger_interval", ""),
        ]);
        let creator = s.creator();
        assert_eq!(creator.max_keywords, 3);
        assert_eq!(creator.ai_user_probability, 70);
        assert_eq!(s.voter().votes_per_run, 7);
        assert_eq!(s.interval(Job::AutoTagger), (30, 10));
    }

    #[test]
    fn test_enable_flags() {
        let s = settings(&[
            ("auto_creator_enabled", "true"),
            ("auto_voter_enabled", "1"),
            ("auto_tagger_enabled", "yes"),
        ]);
        assert!(s.is_enabled(Job::AutoCreator));
        assert!(s.is_enabled(Job::AutoVoter));
        assert!(!s.is_enabled(Job::AutoTagger));
        assert!(!s.is_enabled(Job::PointsAggregate));
    }

    #[test]
    fn test_prompt_overrides() {
        let s = settings(&[("title_prompt", "タイトルを考えて"), ("choices_prompt", "  ")]);
        let creator = s.creator();
        assert_eq!(creator.title_prompt.as_deref(), Some("タイトルを考えて"));
        assert_eq!(creator.choices_prompt, None);
    }

    #[test]
    fn test_voter_reply_settings() {
        let voter = Settings::default().voter();
        assert_eq!(voter.like_probability, 40);
        assert_eq!(voter.reply_prompt, None);

        let voter = settings(&[("like_probability", "15"), ("reply_prompt", "{$comment}に返信")]).voter();
        assert_eq!(voter.like_probability, 15);
        assert_eq!(voter.reply_prompt.as_deref(), Some("{$comment}に返信"));
    }
}
