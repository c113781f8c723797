use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            // A NULL expiry reads as already expired
            expires_at: session
                .expires_at
                .unwrap_or_else(|| chrono::DateTime::<Utc>::UNIX_EPOCH.naive_utc()),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}
