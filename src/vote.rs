use crate::db::insert_or_skip;
use crate::middleware::ClientCtx;
use crate::orm::{posts, vote_choices, vote_history, vote_options, workers};
use crate::point::{self, PointType};
use crate::post::PostStatus;
use actix_web::http::StatusCode;
use actix_web::ResponseError;
use chrono::prelude::Utc;
use chrono::NaiveDateTime;
use derive_more::Display;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, Condition, ConnectionTrait, DbErr, FromQueryResult, TransactionTrait};
use serde::Serialize;

#[derive(Debug, Display)]
pub enum VoteError {
    #[display(fmt = "選択肢を選んでください")]
    EmptyChoices,
    #[display(fmt = "選択肢が見つかりません")]
    InvalidChoice,
    #[display(fmt = "このアンケートは複数選択できません")]
    MultipleNotAllowed,
    #[display(fmt = "このアンケートは締め切られました")]
    Closed,
    #[display(fmt = "既に投票済みです")]
    AlreadyVoted,
    #[display(fmt = "投稿が見つかりません")]
    PostNotFound,
    #[display(fmt = "投票者を識別できません")]
    Unidentified,
    #[display(fmt = "Database error")]
    Database(DbErr),
}

impl From<DbErr> for VoteError {
    fn from(err: DbErr) -> Self {
        Self::Database(err)
    }
}

impl ResponseError for VoteError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::PostNotFound => StatusCode::NOT_FOUND,
            Self::Database(e) => {
                log::error!("VoteError: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Who is casting a ballot. Users are identified by id, guests by their
/// hashed session token, and guests without a session by address.
#[derive(Clone, Debug, Default)]
pub struct Voter {
    pub user_id: Option<i32>,
    pub voter_hash: Option<String>,
    pub ip_address: Option<String>,
}

impl Voter {
    pub fn from_client(client: &ClientCtx) -> Self {
        match client.get_id() {
            Some(user_id) => Self {
                user_id: Some(user_id),
                voter_hash: None,
                ip_address: client.get_ip(),
            },
            None => Self {
                user_id: None,
                voter_hash: client.voter_hash(),
                ip_address: client.get_ip(),
            },
        }
    }

    pub fn user(user_id: i32) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    /// The condition that finds this voter's ballot on a post.
    fn ballot_condition(&self, post_id: i32) -> Option<Condition> {
        let on_post = Condition::all().add(vote_history::Column::PostId.eq(post_id));
        if let Some(user_id) = self.user_id {
            Some(on_post.add(vote_history::Column::UserId.eq(user_id)))
        } else if let Some(hash) = &self.voter_hash {
            Some(on_post.add(vote_history::Column::VoterHash.eq(hash.to_owned())))
        } else {
            self.ip_address.as_ref().map(|ip| {
                on_post
                    .add(vote_history::Column::IpAddress.eq(ip.to_owned()))
                    .add(vote_history::Column::UserId.is_null())
                    .add(vote_history::Column::VoterHash.is_null())
            })
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, FromQueryResult)]
pub struct ChoiceCount {
    pub id: i32,
    pub choice: String,
    pub vote_count: i32,
}

/// Collapses duplicate ids and checks them against the post's choices.
pub fn normalize_choices(requested: &[i32], valid: &[i32], multi: bool) -> Result<Vec<i32>, VoteError> {
    let mut ids: Vec<i32> = Vec::with_capacity(requested.len());
    for id in requested {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }

    if ids.is_empty() {
        return Err(VoteError::EmptyChoices);
    }
    if ids.iter().any(|id| !valid.contains(id)) {
        return Err(VoteError::InvalidChoice);
    }
    if ids.len() > 1 && !multi {
        return Err(VoteError::MultipleNotAllowed);
    }
    Ok(ids)
}

pub fn check_open(close_at: Option<NaiveDateTime>, now: NaiveDateTime) -> Result<(), VoteError> {
    match close_at {
        Some(close_at) if now >= close_at => Err(VoteError::Closed),
        _ => Ok(()),
    }
}

/// Work vote grants are withheld from guest ballots on campaigns that require a login.
pub fn work_vote_allowed(guest_check: bool, voter: &Voter) -> bool {
    guest_check || !voter.is_guest()
}

pub async fn get_choices<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<Vec<ChoiceCount>, DbErr> {
    vote_choices::Entity::find()
        .select_only()
        .column(vote_choices::Column::Id)
        .column(vote_choices::Column::Choice)
        .column(vote_choices::Column::VoteCount)
        .filter(vote_choices::Column::PostId.eq(post_id))
        .order_by_asc(vote_choices::Column::Id)
        .into_model::<ChoiceCount>()
        .all(db)
        .await
}

const INSERT_BALLOT: &str = r#"INSERT INTO vote_history (post_id, choice_ids, user_id, voter_hash, ip_address, created_at)
VALUES ($1, $2, $3, $4, $5, now())
ON CONFLICT DO NOTHING
RETURNING id"#;

/// Records one ballot and returns the post's updated tallies.
pub async fn cast_vote<C: TransactionTrait>(
    db: &C,
    post_id: i32,
    choice_ids: &[i32],
    voter: &Voter,
) -> Result<Vec<ChoiceCount>, VoteError> {
    if choice_ids.is_empty() {
        return Err(VoteError::EmptyChoices);
    }
    let ballot = voter
        .ballot_condition(post_id)
        .ok_or(VoteError::Unidentified)?;

    let txn = db.begin().await?;

    let post = posts::Entity::find_by_id(post_id)
        .one(&txn)
        .await?
        .filter(|p| p.status == PostStatus::Published)
        .ok_or(VoteError::PostNotFound)?;

    let options = vote_options::Entity::find()
        .filter(vote_options::Column::PostId.eq(post_id))
        .one(&txn)
        .await?;
    let valid: Vec<i32> = get_choices(&txn, post_id)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let ids = normalize_choices(
        choice_ids,
        &valid,
        options.as_ref().map(|o| o.multi).unwrap_or(false),
    )?;

    let close_at = options
        .as_ref()
        .and_then(|o| o.close_at)
        .or(post.deadline_at);
    check_open(close_at, Utc::now().naive_utc())?;

    if vote_history::Entity::find()
        .filter(ballot)
        .count(&txn)
        .await?
        > 0
    {
        return Err(VoteError::AlreadyVoted);
    }

    // Unique indexes on the ballot columns catch concurrent duplicates.
    let history_id: i32 = match insert_or_skip(
        &txn,
        INSERT_BALLOT,
        vec![
            post_id.into(),
            serde_json::json!(ids).into(),
            voter.user_id.into(),
            voter.voter_hash.to_owned().into(),
            voter.ip_address.to_owned().into(),
        ],
    )
    .await?
    {
        Some(row) => row.try_get("", "id")?,
        None => return Err(VoteError::AlreadyVoted),
    };

    vote_choices::Entity::update_many()
        .col_expr(vote_choices::Column::VoteCount, Expr::cust("vote_count + 1"))
        .filter(vote_choices::Column::Id.is_in(ids.clone()))
        .filter(vote_choices::Column::PostId.eq(post_id))
        .exec(&txn)
        .await?;

    posts::Entity::update_many()
        .col_expr(
            posts::Column::TotalVotes,
            Expr::cust(&format!(
                "(SELECT COALESCE(SUM(vote_count), 0) FROM vote_choices WHERE post_id = {})",
                post_id
            )),
        )
        .filter(posts::Column::Id.eq(post_id))
        .exec(&txn)
        .await?;

    if let Some(user_id) = voter.user_id {
        point::grant(&txn, user_id, PointType::Vote, Some(post_id)).await?;
    }

    if let (Some(workid), Some(author_id)) = (post.workid, post.user_id) {
        let worker = workers::Entity::find_by_id(workid).one(&txn).await?;
        match worker {
            Some(worker) if work_vote_allowed(worker.guest_check, voter) => {
                point::grant(&txn, author_id, PointType::WorkVote, Some(history_id)).await?;
            }
            Some(_) => {}
            None => log::warn!("cast_vote: post {} references missing worker {}", post_id, workid),
        }
    }

    let choices = get_choices(&txn, post_id).await?;
    txn.commit().await?;

    Ok(choices)
}

/// Returns the choice ids of this voter's ballot, if any.
pub async fn has_voted<C: ConnectionTrait>(
    db: &C,
    post_id: i32,
    voter: &Voter,
) -> Result<Option<Vec<i32>>, DbErr> {
    let ballot = match voter.ballot_condition(post_id) {
        Some(ballot) => ballot,
        None => return Ok(None),
    };

    let row = vote_history::Entity::find().filter(ballot).one(db).await?;
    Ok(row.map(|row| serde_json::from_value(row.choice_ids).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd(2024, 5, 1).and_hms(h, 0, 0)
    }

    #[test]
    fn test_empty_choices_rejected() {
        assert!(matches!(normalize_choices(&[], &[1, 2], true), Err(VoteError::EmptyChoices)));
    }

    #[test]
    fn test_foreign_choice_rejected() {
        assert!(matches!(normalize_choices(&[3], &[1, 2], false), Err(VoteError::InvalidChoice)));
        assert!(matches!(normalize_choices(&[1, 9], &[1, 2], true), Err(VoteError::InvalidChoice)));
    }

    #[test]
    fn test_multiple_requires_multi() {
        assert!(matches!(
            normalize_choices(&[1, 2], &[1, 2], false),
            Err(VoteError::MultipleNotAllowed)
        ));
        assert_eq!(normalize_choices(&[1, 2], &[1, 2], true).ok(), Some(vec![1, 2]));
    }

    #[test]
    fn test_duplicates_collapse() {
        // The same id twice is a single choice, so it is allowed on single-choice polls.
        assert_eq!(normalize_choices(&[2, 2], &[1, 2], false).ok(), Some(vec![2]));
        assert_eq!(normalize_choices(&[2, 1, 2], &[1, 2], true).ok(), Some(vec![2, 1]));
    }

    #[test]
    fn test_closed_polls() {
        assert!(check_open(None, at(12)).is_ok());
        assert!(check_open(Some(at(13)), at(12)).is_ok());
        assert!(matches!(check_open(Some(at(12)), at(12)), Err(VoteError::Closed)));
        assert!(matches!(check_open(Some(at(11)), at(12)), Err(VoteError::Closed)));
    }

    #[test]
    fn test_voter_identity_precedence() {
        let user = Voter {
            user_id: Some(5),
            voter_hash: Some("h".to_owned()),
            ip_address: Some("1.1.1.1".to_owned()),
        };
        assert!(user.ballot_condition(1).is_some());
        assert!(!user.is_guest());

        let nobody = Voter::default();
        assert!(nobody.ballot_condition(1).is_none());
        assert!(nobody.is_guest());
    }

    #[test]
    fn test_work_vote_guest_rules() {
        let guest = Voter {
            voter_hash: Some("h".to_owned()),
            ..Default::default()
        };
        assert!(work_vote_allowed(true, &guest));
        assert!(!work_vote_allowed(false, &guest));
        assert!(work_vote_allowed(false, &Voter::user(3)));
    }

    #[test]
    fn test_vote_error_statuses() {
        assert_eq!(VoteError::AlreadyVoted.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(VoteError::PostNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(VoteError::Closed.to_string(), "このアンケートは締め切られました");
    }

    fn poll(id: i32) -> posts::Model {
        posts::Model {
            id,
            user_id: Some(1),
            title: "好きな季節は？".to_owned(),
            content: String::new(),
            status: PostStatus::Published,
            category_id: None,
            og_image: None,
            source_url: None,
            workid: None,
            deadline_at: None,
            total_votes: 3,
            view_count: 0,
            best_answer_id: None,
            best_answer_selected_at: None,
            auto_created: false,
            ai_tagged: false,
            ai_tagged_at: None,
            created_at: at(9),
            updated_at: at(9),
        }
    }

    fn choice(id: i32, post_id: i32) -> vote_choices::Model {
        vote_choices::Model {
            id,
            post_id,
            choice: format!("choice {}", id),
            vote_count: 1,
        }
    }

    /// Query results for a ballot that passes every check before the duplicate lookup.
    fn open_poll_db(previous_ballots: i64) -> MockDatabase {
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![poll(7)]])
            .append_query_results(vec![Vec::<vote_options::Model>::new()])
            .append_query_results(vec![vec![choice(1, 7), choice(2, 7)]])
            .append_query_results(vec![vec![BTreeMap::from([(
                "num_items",
                Value::BigInt(Some(previous_ballots)),
            )])]])
    }

    #[actix_rt::test]
    async fn test_second_ballot_rejected() {
        let db = open_poll_db(1).into_connection();

        let result = cast_vote(&db, 7, &[2], &Voter::user(5)).await;
        assert!(matches!(result, Err(VoteError::AlreadyVoted)));

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("INSERT"));
        assert!(!log.contains("UPDATE"));
    }

    #[actix_rt::test]
    async fn test_concurrent_duplicate_ballot_rejected() {
        // The lookup races a parallel ballot and the unique index refuses the row.
        let db = open_poll_db(0)
            .append_query_results(vec![Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();

        let result = cast_vote(&db, 7, &[1], &Voter::user(5)).await;
        assert!(matches!(result, Err(VoteError::AlreadyVoted)));

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT DO NOTHING"));
        assert!(!log.contains("UPDATE"));
    }
}
