use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use crate::vote::{self, VoteError, Voter};
use actix_web::{post, web, Error, HttpResponse, Responder};
use serde::Deserialize;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(cast_vote);
}

#[derive(Deserialize)]
pub struct VoteFormData {
    #[serde(alias = "postId")]
    pub post_id: i32,
    /// A single choice as sent by single-answer polls.
    #[serde(alias = "choiceId")]
    pub choice_id: Option<i32>,
    #[serde(default, alias = "choiceIds")]
    pub choice_ids: Vec<i32>,
}

impl VoteFormData {
    fn choices(&self) -> Vec<i32> {
        let mut choices = self.choice_ids.to_owned();
        if let Some(id) = self.choice_id {
            choices.push(id);
        }
        choices
    }
}

#[post("/api/vote")]
pub async fn cast_vote(client: ClientCtx, form: web::Json<VoteFormData>) -> Result<impl Responder, Error> {
    let choices = form.choices();
    if choices.is_empty() {
        return Err(VoteError::EmptyChoices.into());
    }

    let voter = Voter::from_client(&client);
    let tallies = vote::cast_vote(get_db_pool(), form.post_id, &choices, &voter).await?;
    let total: i32 = tallies.iter().map(|c| c.vote_count).sum();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "choices": tallies,
        "total_votes": total,
    })))
}
