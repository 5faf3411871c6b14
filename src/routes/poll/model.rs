use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    #[sqlx(rename = "option_id")]
    pub id: String,
    pub label: String,
    pub votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub status: String,
    pub total_votes: i64,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetPollRequest {
    pub poll_id: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    PollNotFound,
    PollClosed,
    UnknownOption,
}

impl Poll {
    pub async fn fetch(pool: &PgPool, poll_id: &str) -> Result<Option<Self>, sqlx::Error> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM polls WHERE poll_id = $1")
                .bind(poll_id)
                .fetch_optional(pool)
                .await?;

        let Some(status) = status else {
            return Ok(None);
        };

        let options = sqlx::query_as::<_, PollOption>(
            r#"
            SELECT option_id, label, votes
            FROM poll_options
            WHERE poll_id = $1
            ORDER BY option_id
            "#,
        )
        .bind(poll_id)
        .fetch_all(pool)
        .await?;

        let total_votes = options.iter().map(|option| option.votes).sum();

        Ok(Some(Poll {
            id: poll_id.to_string(),
            status,
            total_votes,
            options,
        }))
    }

    /// One conditional statement; a zero-row update is classified afterwards.
    pub async fn record_vote(pool: &PgPool, req: &VoteRequest) -> Result<VoteOutcome, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE poll_options o
            SET votes = votes + 1
            FROM polls p
            WHERE o.poll_id = p.poll_id
              AND p.poll_id = $1
              AND o.option_id = $2
              AND p.status = 'open'
            "#,
        )
        .bind(&req.poll_id)
        .bind(&req.option_id)
        .execute(pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(VoteOutcome::Recorded);
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM polls WHERE poll_id = $1")
                .bind(&req.poll_id)
                .fetch_optional(pool)
                .await?;

        match status {
            None => Ok(VoteOutcome::PollNotFound),
            Some(status) if status != "open" => Ok(VoteOutcome::PollClosed),
            Some(_) => Ok(VoteOutcome::UnknownOption),
        }
    }
}
