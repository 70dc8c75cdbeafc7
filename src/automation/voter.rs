use super::job_log::{log_job, JobLog};
use super::llm::{Completer, CompletionRequest};
use super::schedule::roll_jitter;
use super::settings::VoterSettings;
use super::{Job, JobReport, JobStatus};
use crate::comment::{insert_comment, CommentStatus};
use crate::like::{add_like, LikeKind, Liker};
use crate::orm::{comments, posts};
use crate::post::PostStatus;
use crate::user::{display_name, find_automation_users, pick_automation_user, roll_automation_status, AutomationUser, UserStatus};
use crate::vote::{cast_vote, get_choices, ChoiceCount, VoteError, Voter};
use anyhow::{anyhow, bail, Result};
use chrono::prelude::Utc;
use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use rand::Rng;
use sea_orm::{entity::*, query::*, ConnectionTrait, TransactionTrait};
use serde::Serialize;
use std::collections::HashSet;

const RECENT_POSTS: u64 = 20;
const BATCH_CANDIDATES: u64 = 100;
const COMMENT_MAX_CHARS: usize = 60;
const SYSTEM_PROMPT: &str = "あなたはアンケートサイトのユーザーです。";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterAction {
    Vote,
    Comment,
    LikePost,
}

impl VoterAction {
    const ALL: [VoterAction; 3] = [Self::Vote, Self::Comment, Self::LikePost];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Comment => "comment",
            Self::LikePost => "like_post",
        }
    }
}

/// What a batch did to one post.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PostRunCounters {
    pub post_id: i32,
    pub priority: f64,
    pub votes_added: u32,
    pub votes_skipped: u32,
    pub likes_added: u32,
    pub comments_added: u32,
    pub comment_likes_added: u32,
    pub replies_added: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Recency weight of a post: ×2 within a day, ×1.5 within two days,
/// ×1 within `priority_days`, and 1 for anything older.
pub fn priority_weight(age_hours: f64, priority_days: i64, weight: f64) -> f64 {
    if age_hours <= 24.0 {
        weight * 2.0
    } else if age_hours <= 48.0 {
        weight * 1.5
    } else if age_hours <= (priority_days * 24) as f64 {
        weight
    } else {
        1.0
    }
}

/// Highest priority first. Ties keep their newest-first order.
pub fn rank_posts(posts: Vec<posts::Model>, now: NaiveDateTime, settings: &VoterSettings) -> Vec<(posts::Model, f64)> {
    let mut ranked: Vec<(posts::Model, f64)> = posts
        .into_iter()
        .map(|p| {
            let age_hours = (now - p.created_at).num_minutes() as f64 / 60.0;
            let priority = priority_weight(age_hours, settings.priority_days, settings.priority_weight);
            (p, priority)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// `base ± variance`, never below zero.
pub fn jittered_count<R: Rng>(rng: &mut R, base: i64, variance: i64) -> u32 {
    (base + roll_jitter(rng, variance)).max(0) as u32
}

/// Cleans a generated comment: strips quotes and caps its length.
pub fn clean_comment(text: &str) -> Option<String> {
    let text = text.trim().trim_matches(|c| c == '「' || c == '」' || c == '"').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.chars().take(COMMENT_MAX_CHARS).collect())
    }
}

/// The poll's choices as `「a」、「b」`.
pub fn choices_text(choices: &[ChoiceCount]) -> String {
    choices
        .iter()
        .map(|c| format!("「{}」", c.choice))
        .collect::<Vec<_>>()
        .join("、")
}

/// Fills `{$comment}`, `{$question}`, `{$content}` and `{$choices}` in an admin prompt.
pub fn fill_prompt(template: &str, post: &posts::Model, choices: &str, comment: Option<&str>) -> String {
    template
        .replace("{$comment}", comment.unwrap_or(""))
        .replace("{$question}", &post.title)
        .replace("{$content}", &post.content)
        .replace("{$choices}", choices)
}

pub async fn generate_comment(
    completer: &dyn Completer,
    post: &posts::Model,
    user: &AutomationUser,
    settings: &VoterSettings,
    choices: &str,
) -> Result<String> {
    let prompt = match settings.comment_prompt.as_deref() {
        Some(template) => fill_prompt(template, post, choices, None),
        None => format!(
            "アンケート「{}」に対するコメントを生成してください。\nユーザー名: {}\nプロフィール: {}\n\n要件:\n- 10〜60文字程度\n- 自然な口調\n- プロフィールを考慮した内容",
            post.title,
            display_name(user.name.as_deref()),
            user.profile.as_deref().unwrap_or("なし"),
        ),
    };

    let reply = completer
        .complete(
            CompletionRequest::new(prompt)
                .system(SYSTEM_PROMPT)
                .temperature(0.8)
                .max_tokens(100),
        )
        .await?;
    clean_comment(&reply).ok_or_else(|| anyhow!("コメント生成に失敗しました"))
}

/// A reply to `parent` from the admin's reply prompt.
pub async fn generate_reply(
    completer: &dyn Completer,
    post: &posts::Model,
    parent: &comments::Model,
    template: &str,
    choices: &str,
) -> Result<String> {
    let reply = completer
        .complete(
            CompletionRequest::new(fill_prompt(template, post, choices, Some(&parent.content)))
                .system(SYSTEM_PROMPT)
                .temperature(0.9)
                .max_tokens(100),
        )
        .await?;
    clean_comment(&reply).ok_or_else(|| anyhow!("返信の生成に失敗しました"))
}

async fn recent_posts<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<posts::Model>> {
    Ok(posts::Entity::find()
        .filter(posts::Column::Status.eq(PostStatus::Published))
        .order_by_desc(posts::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

/// Votes for a random choice. Returns false when the user already voted.
async fn vote_randomly<C, R>(db: &C, rng: &mut R, post_id: i32, user_id: i32) -> Result<bool>
where
    C: ConnectionTrait + TransactionTrait,
    R: Rng,
{
    let choices = get_choices(db, post_id).await?;
    let choice = match choices.choose(rng) {
        Some(choice) => choice.id,
        None => bail!("選択肢がありません"),
    };

    match cast_vote(db, post_id, &[choice], &Voter::user(user_id)).await {
        Ok(_) => Ok(true),
        Err(VoteError::AlreadyVoted) => Ok(false),
        Err(e) => Err(anyhow!("{}", e)),
    }
}

async fn comment_as<C, R>(
    db: &C,
    completer: &dyn Completer,
    rng: &mut R,
    post: &posts::Model,
    user: &AutomationUser,
    settings: &VoterSettings,
) -> Result<i32>
where
    C: ConnectionTrait + TransactionTrait,
    R: Rng,
{
    let choices = choices_text(&get_choices(db, post.id).await?);
    let text = generate_comment(completer, post, user, settings, &choices).await?;
    // Commenters have voted. Consultations have nothing to vote on.
    if let Err(e) = vote_randomly(db, rng, post.id, user.id).await {
        log::debug!("comment_as: no vote on post {}: {:#}", post.id, e);
    }
    let comment = insert_comment(db, post.id, Some(user.id), None, text, CommentStatus::Approved).await?;
    Ok(comment.id)
}

async fn reply_as<C: ConnectionTrait>(
    db: &C,
    completer: &dyn Completer,
    post: &posts::Model,
    parent: &comments::Model,
    user_id: i32,
    template: &str,
) -> Result<i32> {
    let choices = choices_text(&get_choices(db, post.id).await?);
    let text = generate_reply(completer, post, parent, template, &choices).await?;
    let reply = insert_comment(db, post.id, Some(user_id), Some(parent.id), text, CommentStatus::Approved).await?;
    Ok(reply.id)
}

/// One random action by one automation user on one of the newest posts.
pub async fn run_once<C, R>(db: &C, completer: &dyn Completer, settings: &VoterSettings, rng: &mut R) -> Result<JobReport>
where
    C: ConnectionTrait + TransactionTrait,
    R: Rng + Send,
{
    let post = match recent_posts(db, RECENT_POSTS).await?.choose(rng).cloned() {
        Some(post) => post,
        None => return Ok(JobReport::Skipped("対象の投稿がありません".to_owned())),
    };
    let user = pick_automation_user(db, settings.ai_member_probability).await?;
    let action = *VoterAction::ALL.choose(rng).unwrap_or(&VoterAction::Vote);

    let result: Result<serde_json::Value> = match action {
        VoterAction::Vote => match vote_randomly(db, rng, post.id, user.id).await {
            Ok(true) => Ok(serde_json::json!({})),
            Ok(false) => Err(anyhow!("{}", VoteError::AlreadyVoted)),
            Err(e) => Err(e),
        },
        VoterAction::Comment => comment_as(db, completer, rng, &post, &user, settings)
            .await
            .map(|id| serde_json::json!({ "comment_id": id })),
        VoterAction::LikePost => match add_like(db, LikeKind::Post, post.id, &Liker::User(user.id)).await? {
            Some(count) => Ok(serde_json::json!({ "like_count": count })),
            None => Err(anyhow!("既にいいね済みです")),
        },
    };

    let entry = |log: JobLog| log.post(post.id).user(user.id).action(action.as_str());
    match result {
        Ok(details) => {
            log_job(db, Job::AutoVoter, JobStatus::Success, entry(JobLog::message("実行しました"))).await;
            Ok(JobReport::Completed(serde_json::json!({
                "action": action,
                "post_id": post.id,
                "user_id": user.id,
                "result": details,
            })))
        }
        Err(e) => {
            log_job(db, Job::AutoVoter, JobStatus::Failed, entry(JobLog::error(format!("{:#}", e)))).await;
            Err(e)
        }
    }
}

/// Automation personas drawn once per batch.
struct Pools {
    ai: Vec<AutomationUser>,
    editors: Vec<AutomationUser>,
}

impl Pools {
    /// A random persona not in `used`. The roll picks the pool to try first;
    /// the other pool is used when the first has nobody left.
    fn pick<R: Rng>(&self, rng: &mut R, ai_probability: u32, used: &HashSet<i32>) -> Option<&AutomationUser> {
        let (first, second) = match roll_automation_status(rng, ai_probability) {
            UserStatus::AiMember => (&self.ai, &self.editors),
            _ => (&self.editors, &self.ai),
        };
        let mut fresh: Vec<&AutomationUser> = first.iter().filter(|u| !used.contains(&u.id)).collect();
        if fresh.is_empty() {
            fresh = second.iter().filter(|u| !used.contains(&u.id)).collect();
        }
        fresh.choose(rng).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommentAction {
    NewComment,
    UserReply,
    AuthorReply,
}

/// Choices on a post that already has comments. Replies need a reply prompt
/// and a top level comment; author replies also need a known author.
fn comment_actions(under_cap: bool, can_reply: bool, has_author: bool) -> Vec<CommentAction> {
    let mut actions = Vec::with_capacity(3);
    if under_cap {
        actions.push(CommentAction::NewComment);
    }
    if can_reply {
        actions.push(CommentAction::UserReply);
        if has_author {
            actions.push(CommentAction::AuthorReply);
        }
    }
    actions
}

async fn comment_count<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<u64> {
    let count = comments::Entity::find()
        .filter(comments::Column::PostId.eq(post_id))
        .count(db)
        .await?;
    Ok(count as u64)
}

async fn top_level_comments<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<Vec<comments::Model>> {
    Ok(comments::Entity::find()
        .filter(comments::Column::PostId.eq(post_id))
        .filter(comments::Column::ParentId.is_null())
        .filter(comments::Column::Status.eq(CommentStatus::Approved))
        .all(db)
        .await?)
}

/// Posts a new comment and, by `like_probability`, has another persona like it.
async fn new_comment<C, R>(
    db: &C,
    completer: &dyn Completer,
    rng: &mut R,
    pools: &Pools,
    post: &posts::Model,
    user: &AutomationUser,
    settings: &VoterSettings,
    counters: &mut PostRunCounters,
) -> bool
where
    C: ConnectionTrait + TransactionTrait,
    R: Rng,
{
    let comment_id = match comment_as(db, completer, rng, post, user, settings).await {
        Ok(id) => id,
        Err(e) => {
            counters.errors.push(format!("comment: {:#}", e));
            return false;
        }
    };
    counters.comments_added += 1;

    if rng.gen_range(0..100) < settings.like_probability {
        let author: HashSet<i32> = [user.id].into_iter().collect();
        if let Some(liker) = pools.pick(rng, settings.ai_member_probability, &author) {
            match add_like(db, LikeKind::Comment, comment_id, &Liker::User(liker.id)).await {
                Ok(Some(_)) => counters.comment_likes_added += 1,
                Ok(None) => {}
                Err(e) => counters.errors.push(format!("comment_like: {}", e)),
            }
        }
    }
    true
}

/// Votes, likes and comments on the highest priority posts.
pub async fn run_batch<C, R>(db: &C, completer: &dyn Completer, settings: &VoterSettings, rng: &mut R) -> Result<JobReport>
where
    C: ConnectionTrait + TransactionTrait,
    R: Rng + Send,
{
    let pools = Pools {
        ai: find_automation_users(db, UserStatus::AiMember, 100).await?,
        editors: find_automation_users(db, UserStatus::Editor, 100).await?,
    };
    if pools.ai.is_empty() && pools.editors.is_empty() {
        bail!("自動投票に使えるユーザーがいません");
    }

    let now = Utc::now().naive_utc();
    let ranked = rank_posts(recent_posts(db, BATCH_CANDIDATES).await?, now, settings);
    let mut report = Vec::new();

    for (post, priority) in ranked.into_iter().take(settings.posts_per_run as usize) {
        let mut counters = PostRunCounters {
            post_id: post.id,
            priority,
            ..Default::default()
        };

        let mut voted = HashSet::new();
        for _ in 0..jittered_count(rng, settings.votes_per_run, settings.votes_variance) {
            let user = match pools.pick(rng, settings.ai_member_probability, &voted) {
                Some(user) => user.id,
                None => break,
            };
            voted.insert(user);
            match vote_randomly(db, rng, post.id, user).await {
                Ok(true) => counters.votes_added += 1,
                Ok(false) => counters.votes_skipped += 1,
                Err(e) => {
                    counters.errors.push(format!("vote: {:#}", e));
                    break;
                }
            }
        }

        if rng.gen_range(0..100) < settings.post_like_probability {
            if let Some(user) = pools.pick(rng, settings.ai_member_probability, &HashSet::new()) {
                match add_like(db, LikeKind::Post, post.id, &Liker::User(user.id)).await {
                    Ok(Some(_)) => counters.likes_added += 1,
                    Ok(None) => {}
                    Err(e) => counters.errors.push(format!("like: {}", e)),
                }
            }
        }

        let max_comments = jittered_count(rng, settings.max_comments_per_post, settings.max_comments_variance) as u64;
        let mut existing = comment_count(db, post.id).await?;
        if existing == 0 {
            let mut commented = HashSet::new();
            for _ in 0..settings.comments_per_run {
                if existing >= max_comments {
                    break;
                }
                let user = match pools.pick(rng, settings.ai_member_probability, &commented) {
                    Some(user) => user.clone(),
                    None => break,
                };
                commented.insert(user.id);
                if new_comment(db, completer, rng, &pools, &post, &user, settings, &mut counters).await {
                    existing += 1;
                }
            }
        } else {
            // One action per run on threads that are already going.
            let parents = match settings.reply_prompt {
                Some(_) => top_level_comments(db, post.id).await?,
                None => Vec::new(),
            };
            let actions = comment_actions(existing < max_comments, !parents.is_empty(), post.user_id.is_some());
            let replier = match actions.choose(rng) {
                Some(CommentAction::NewComment) => {
                    if let Some(user) = pools.pick(rng, settings.ai_member_probability, &HashSet::new()).cloned() {
                        new_comment(db, completer, rng, &pools, &post, &user, settings, &mut counters).await;
                    }
                    None
                }
                Some(CommentAction::UserReply) => pools
                    .pick(rng, settings.ai_member_probability, &HashSet::new())
                    .map(|u| u.id),
                Some(CommentAction::AuthorReply) => post.user_id,
                None => None,
            };

            if let (Some(user_id), Some(template), Some(parent)) =
                (replier, settings.reply_prompt.as_deref(), parents.choose(rng))
            {
                match reply_as(db, completer, &post, parent, user_id, template).await {
                    Ok(_) => counters.replies_added += 1,
                    Err(e) => counters.errors.push(format!("reply: {:#}", e)),
                }
            }
        }

        report.push(counters);
    }

    let votes: u32 = report.iter().map(|c| c.votes_added).sum();
    let comments: u32 = report.iter().map(|c| c.comments_added).sum();
    let replies: u32 = report.iter().map(|c| c.replies_added).sum();
    let likes: u32 = report.iter().map(|c| c.likes_added + c.comment_likes_added).sum();
    let message = format!(
        "{}件の投稿を処理しました（投票{} / コメント{} / 返信{} / いいね{}）",
        report.len(),
        votes,
        comments,
        replies,
        likes
    );
    log::info!("auto_voter: {}", message);
    log_job(db, Job::AutoVoter, JobStatus::Success, JobLog::message(message.to_owned()).action("batch")).await;

    Ok(JobReport::Completed(serde_json::json!({
        "message": message,
        "posts": report,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::llm::ScriptedCompleter;
    use chrono::{Duration, NaiveDate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn post(id: i32, created_at: NaiveDateTime) -> posts::Model {
        posts::Model {
            id,
            user_id: Some(1),
            title: format!("post {}", id),
            content: String::new(),
            status: PostStatus::Published,
            category_id: None,
            og_image: None,
            source_url: None,
            workid: None,
            deadline_at: None,
            total_votes: 0,
            view_count: 0,
            best_answer_id: None,
            best_answer_selected_at: None,
            auto_created: false,
            ai_tagged: false,
            ai_tagged_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn user(id: i32) -> AutomationUser {
        AutomationUser {
            id,
            name: Some(format!("user{}", id)),
            profile: None,
        }
    }

    #[test]
    fn test_priority_weight_tiers() {
        assert_eq!(priority_weight(3.0, 3, 5.0), 10.0);
        assert_eq!(priority_weight(30.0, 3, 5.0), 7.5);
        assert_eq!(priority_weight(60.0, 3, 5.0), 5.0);
        assert_eq!(priority_weight(100.0, 3, 5.0), 1.0);
    }

    #[test]
    fn test_rank_posts_prefers_recent() {
        let now = NaiveDate::from_ymd(2024, 6, 10).and_hms(12, 0, 0);
        let posts = vec![
            post(1, now - Duration::days(10)),
            post(2, now - Duration::hours(2)),
            post(3, now - Duration::hours(36)),
        ];
        let ranked = rank_posts(posts, now, &VoterSettings::default());
        let ids: Vec<i32> = ranked.iter().map(|(p, _)| p.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_jittered_count_never_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let n = jittered_count(&mut rng, 1, 5);
            assert!(n <= 6);
        }
        assert_eq!(jittered_count(&mut rng, 4, 0), 4);
    }

    #[test]
    fn test_clean_comment() {
        assert_eq!(clean_comment("「いいですね」").as_deref(), Some("いいですね"));
        assert_eq!(clean_comment("   "), None);
        assert_eq!(clean_comment(&"あ".repeat(80)).map(|c| c.chars().count()), Some(60));
    }

    #[test]
    fn test_pools_skip_used_users() {
        let pools = Pools {
            ai: vec![user(1), user(2)],
            editors: vec![],
        };
        let mut rng = StdRng::seed_from_u64(11);
        let used: HashSet<i32> = [1].into_iter().collect();
        for _ in 0..20 {
            assert_eq!(pools.pick(&mut rng, 100, &used).map(|u| u.id), Some(2));
        }
        let all: HashSet<i32> = [1, 2].into_iter().collect();
        assert!(pools.pick(&mut rng, 100, &all).is_none());
    }

    #[test]
    fn test_pools_fall_back_to_the_other_pool() {
        let pools = Pools {
            ai: vec![],
            editors: vec![user(1), user(2), user(3)],
        };
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            assert!(pools.pick(&mut rng, 50, &HashSet::new()).is_some());
            assert!(pools.pick(&mut rng, 100, &HashSet::new()).is_some());
        }

        // An exhausted rolled pool also falls through.
        let pools = Pools {
            ai: vec![user(1)],
            editors: vec![user(2)],
        };
        let used: HashSet<i32> = [1].into_iter().collect();
        for _ in 0..20 {
            assert_eq!(pools.pick(&mut rng, 100, &used).map(|u| u.id), Some(2));
        }
    }

    #[test]
    fn test_comment_actions() {
        use CommentAction::*;
        assert_eq!(comment_actions(true, false, true), vec![NewComment]);
        assert_eq!(comment_actions(true, true, true), vec![NewComment, UserReply, AuthorReply]);
        assert_eq!(comment_actions(false, true, false), vec![UserReply]);
        assert!(comment_actions(false, false, true).is_empty());
    }

    #[test]
    fn test_fill_prompt() {
        let p = post(5, NaiveDate::from_ymd(2024, 1, 1).and_hms(0, 0, 0));
        let choices = choices_text(&[
            ChoiceCount {
                id: 1,
                choice: "春".to_owned(),
                vote_count: 0,
            },
            ChoiceCount {
                id: 2,
                choice: "秋".to_owned(),
                vote_count: 0,
            },
        ]);
        assert_eq!(choices, "「春」、「秋」");

        let prompt = fill_prompt("{$question}|{$choices}|{$comment}", &p, &choices, Some("いいね"));
        assert_eq!(prompt, "post 5|「春」、「秋」|いいね");
        assert_eq!(fill_prompt("{$comment}!", &p, "", None), "!");
    }

    #[actix_rt::test]
    async fn test_generate_reply_quotes_parent() {
        let completer = ScriptedCompleter::new(&["「そうですね」"]);
        let parent = comments::Model {
            id: 8,
            post_id: 5,
            user_id: Some(2),
            parent_id: None,
            content: "夏が一番".to_owned(),
            status: CommentStatus::Approved,
            created_at: NaiveDate::from_ymd(2024, 1, 2).and_hms(0, 0, 0),
        };
        let text = generate_reply(
            &completer,
            &post(5, NaiveDate::from_ymd(2024, 1, 1).and_hms(0, 0, 0)),
            &parent,
            "「{$comment}」への返信を書いてください",
            "",
        )
        .await
        .expect("reply");
        assert_eq!(text, "そうですね");

        let requests = completer.requests.lock().expect("lock");
        assert!(requests[0].prompt.contains("「夏が一番」への返信"));
    }

    #[actix_rt::test]
    async fn test_generate_comment_uses_persona() {
        let completer = ScriptedCompleter::new(&["  私も気になります  "]);
        let text = generate_comment(
            &completer,
            &post(5, NaiveDate::from_ymd(2024, 1, 1).and_hms(0, 0, 0)),
            &AutomationUser {
                id: 9,
                name: Some("はなこ".to_owned()),
                profile: Some("30代の会社員".to_owned()),
            },
            &VoterSettings::default(),
            "",
        )
        .await
        .expect("comment");
        assert_eq!(text, "私も気になります");

        let requests = completer.requests.lock().expect("lock");
        assert!(requests[0].prompt.contains("はなこ"));
        assert!(requests[0].prompt.contains("30代の会社員"));
        assert_eq!(requests[0].system.as_deref(), Some(SYSTEM_PROMPT));
    }
}
