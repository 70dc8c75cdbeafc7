use crate::orm::users;
use rand::seq::SliceRandom;
use rand::Rng;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr, FromQueryResult};
use serde::Serialize;

/// Shown wherever an author has no name or no longer exists.
pub const ANONYMOUS_NAME: &str = "匿名さん";

/// Account state, stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Banned or withdrawn. Treated as a guest.
    #[sea_orm(num_value = 0)]
    Disabled = 0,
    #[sea_orm(num_value = 1)]
    Member = 1,
    /// Staff-operated account used by the automation jobs.
    #[sea_orm(num_value = 2)]
    Editor = 2,
    #[sea_orm(num_value = 3)]
    Admin = 3,
    /// Synthetic persona used by the automation jobs.
    #[sea_orm(num_value = 6)]
    AiMember = 6,
}

/// A mini struct for holding only what information we need about a client.
#[derive(Clone, Debug, FromQueryResult)]
pub struct ClientUser {
    pub id: i32,
    pub name: Option<String>,
    pub status: UserStatus,
}

/// Public author info attached to posts and comments.
#[derive(Clone, Debug, Serialize, FromQueryResult)]
pub struct Profile {
    pub id: i32,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Candidate persona for automated actions.
#[derive(Clone, Debug, FromQueryResult)]
pub struct AutomationUser {
    pub id: i32,
    pub name: Option<String>,
    pub profile: Option<String>,
}

pub fn display_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => ANONYMOUS_NAME.to_owned(),
    }
}

pub async fn get_client_user<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<ClientUser>, DbErr> {
    let user = users::Entity::find_by_id(id)
        .select_only()
        .column(users::Column::Id)
        .column(users::Column::Name)
        .column(users::Column::Status)
        .into_model::<ClientUser>()
        .one(db)
        .await?;

    Ok(user.filter(|u| u.status != UserStatus::Disabled))
}

/// Returns profiles for a list of user ids, keyed by id.
pub async fn get_profiles_by_ids<C: ConnectionTrait>(
    db: &C,
    ids: Vec<i32>,
) -> Result<std::collections::HashMap<i32, Profile>, DbErr> {
    if ids.is_empty() {
        return Ok(Default::default());
    }

    Ok(users::Entity::find()
        .select_only()
        .column(users::Column::Id)
        .column(users::Column::Name)
        .column(users::Column::AvatarUrl)
        .filter(users::Column::Id.is_in(ids))
        .into_model::<Profile>()
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

/// Decides which persona pool an automated action draws from.
/// `ai_probability` is a percentage.
pub fn roll_automation_status<R: Rng>(rng: &mut R, ai_probability: u32) -> UserStatus {
    if rng.gen_range(0..100) < ai_probability.min(100) {
        UserStatus::AiMember
    } else {
        UserStatus::Editor
    }
}

/// Picks a random AI member or editor to act as the author of an automated action.
/// Falls back to the other status when the rolled one has no users.
pub async fn pick_automation_user<C: ConnectionTrait>(
    db: &C,
    ai_probability: u32,
) -> anyhow::Result<AutomationUser> {
    let status = roll_automation_status(&mut rand::thread_rng(), ai_probability);
    let mut candidates = find_automation_users(db, status, 100).await?;
    if candidates.is_empty() {
        let other = match status {
            UserStatus::AiMember => UserStatus::Editor,
            _ => UserStatus::AiMember,
        };
        candidates = find_automation_users(db, other, 100).await?;
    }

    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no AI members or editors to act as"))
}

pub async fn find_automation_users<C: ConnectionTrait>(
    db: &C,
    status: UserStatus,
    limit: u64,
) -> Result<Vec<AutomationUser>, DbErr> {
    users::Entity::find()
        .select_only()
        .column(users::Column::Id)
        .column(users::Column::Name)
        .column(users::Column::Profile)
        .filter(users::Column::Status.eq(status))
        .limit(limit)
        .into_model::<AutomationUser>()
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;
    use rand::SeedableRng;

    #[test]
    fn test_display_name_falls_back_to_anonymous() {
        assert_eq!(display_name(Some("たろう")), "たろう");
        assert_eq!(display_name(Some("   ")), ANONYMOUS_NAME);
        assert_eq!(display_name(None), ANONYMOUS_NAME);
    }

    #[test]
    fn test_roll_automation_status_extremes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(roll_automation_status(&mut rng, 100), UserStatus::AiMember);
            assert_eq!(roll_automation_status(&mut rng, 0), UserStatus::Editor);
        }
    }

    #[test]
    fn test_roll_automation_status_mixes() {
        let mut rng = StdRng::seed_from_u64(42);
        let ai = (0..1000)
            .filter(|_| roll_automation_status(&mut rng, 70) == UserStatus::AiMember)
            .count();
        assert!(ai > 600 && ai < 800, "unexpected split: {}", ai);
    }

    #[actix_rt::test]
    async fn test_pick_automation_user_falls_back_to_editors() {
        let editor = BTreeMap::from([
            ("id", Value::Int(Some(2))),
            ("name", Value::String(Some(Box::new("editor".to_owned())))),
            ("profile", Value::String(None)),
        ]);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<BTreeMap<&str, Value>>::new()])
            .append_query_results(vec![vec![editor]])
            .into_connection();

        let user = pick_automation_user(&db, 100).await.expect("fallback user");
        assert_eq!(user.id, 2);
    }
}
