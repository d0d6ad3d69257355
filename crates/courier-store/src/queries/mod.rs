mod chats;
mod messages;
mod sessions;
mod users;

pub use users::normalize_email;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    use courier_types::models::{UserRole, UserStatus};

    use crate::Database;
    use crate::models::UserRow;

    pub fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    pub fn user(username: &str) -> UserRow {
        UserRow {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: "$argon2id$stub".into(),
            role: UserRole::User,
            status: UserStatus::Offline,
            created_at: Utc::now(),
        }
    }
}
