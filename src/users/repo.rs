use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::users::repo_types::{NewUser, User, UserChanges};

pub const DUPLICATE_USER: &str = "User with this username or email already exists";

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, status, last_login, created_at";

/// Keyed access to the `users` table.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<User>, AppError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;
    /// Match on username or email, lowest id first.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError>;
    async fn find_conflicting(&self, username: &str, email: &str)
        -> Result<Option<User>, AppError>;
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;
    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError>;
    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<Option<User>, AppError>;
    /// Returns false when no row had that id.
    async fn delete(&self, id: i64) -> Result<bool, AppError>;
}

pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unique_to_conflict(e: sqlx::Error) -> AppError {
    let err = AppError::Database(e);
    if err.is_unique_violation() {
        AppError::Conflict(DUPLICATE_USER.into())
    } else {
        err
    }
}

#[async_trait]
impl UserRepository for PgUserRepo {
    async fn list(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE username = $1 OR email = $1
            ORDER BY id ASC
            LIMIT 1
            "#
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_conflicting(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE username = $1 OR email = $2
            ORDER BY id ASC
            LIMIT 1
            "#
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, role, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(&user.status)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_to_conflict)
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET username      = COALESCE($2, username),
                   email         = COALESCE($3, email),
                   role          = COALESCE($4, role),
                   status        = COALESCE($5, status),
                   password_hash = COALESCE($6, password_hash)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.role)
        .bind(changes.status)
        .bind(changes.password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unique_to_conflict)
    }

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET last_login = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Table {
        rows: BTreeMap<i64, User>,
        next_id: i64,
    }

    impl Table {
        fn taken(&self, skip: Option<i64>, username: &str, email: &str) -> bool {
            self.rows
                .values()
                .filter(|u| Some(u.id) != skip)
                .any(|u| u.username == username || u.email == email)
        }
    }

    /// `UserRepository` over a map, enforcing the same unique columns as the table.
    #[derive(Default)]
    pub struct InMemoryUserRepo {
        table: Mutex<Table>,
    }

    impl InMemoryUserRepo {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUserRepo {
        async fn list(&self) -> Result<Vec<User>, AppError> {
            Ok(self.table.lock().unwrap().rows.values().cloned().collect())
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
            Ok(self.table.lock().unwrap().rows.get(&id).cloned())
        }

        async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError> {
            let table = self.table.lock().unwrap();
            Ok(table
                .rows
                .values()
                .find(|u| u.username == identifier || u.email == identifier)
                .cloned())
        }

        async fn find_conflicting(
            &self,
            username: &str,
            email: &str,
        ) -> Result<Option<User>, AppError> {
            let table = self.table.lock().unwrap();
            Ok(table
                .rows
                .values()
                .find(|u| u.username == username || u.email == email)
                .cloned())
        }

        async fn insert(&self, user: NewUser) -> Result<User, AppError> {
            let mut table = self.table.lock().unwrap();
            if table.taken(None, &user.username, &user.email) {
                return Err(AppError::Conflict(DUPLICATE_USER.into()));
            }
            table.next_id += 1;
            let row = User {
                id: table.next_id,
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                role: user.role,
                status: user.status,
                last_login: None,
                created_at: OffsetDateTime::now_utc(),
            };
            table.rows.insert(row.id, row.clone());
            Ok(row)
        }

        async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError> {
            let mut table = self.table.lock().unwrap();
            let Some(current) = table.rows.get(&id).cloned() else {
                return Ok(None);
            };
            let mut next = current;
            if let Some(v) = changes.username {
                next.username = v;
            }
            if let Some(v) = changes.email {
                next.email = v;
            }
            if let Some(v) = changes.role {
                next.role = v;
            }
            if let Some(v) = changes.status {
                next.status = v;
            }
            if let Some(v) = changes.password_hash {
                next.password_hash = v;
            }
            if table.taken(Some(id), &next.username, &next.email) {
                return Err(AppError::Conflict(DUPLICATE_USER.into()));
            }
            table.rows.insert(id, next.clone());
            Ok(Some(next))
        }

        async fn record_login(
            &self,
            id: i64,
            at: OffsetDateTime,
        ) -> Result<Option<User>, AppError> {
            let mut table = self.table.lock().unwrap();
            Ok(table.rows.get_mut(&id).map(|u| {
                u.last_login = Some(at);
                u.clone()
            }))
        }

        async fn delete(&self, id: i64) -> Result<bool, AppError> {
            Ok(self.table.lock().unwrap().rows.remove(&id).is_some())
        }
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let repo = InMemoryUserRepo::new();
        let first = repo
            .insert(NewUser {
                username: "a".into(),
                email: "a@example.com".into(),
                password_hash: "h".into(),
                role: "user".into(),
                status: "active".into(),
            })
            .await
            .unwrap();
        assert!(repo.delete(first.id).await.unwrap());
        let second = repo
            .insert(NewUser {
                username: "a".into(),
                email: "a@example.com".into(),
                password_hash: "h".into(),
                role: "user".into(),
                status: "active".into(),
            })
            .await
            .unwrap();
        assert!(second.id > first.id);
    }
}
