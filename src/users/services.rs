use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::users::{
    dto::{CreateUserRequest, LoginRequest, PublicUser, UpdateUserRequest},
    password::{hash_password, verify_decoy, verify_password},
    repo::{UserRepository, DUPLICATE_USER},
    repo_types::{NewUser, UserChanges, DEFAULT_ROLE, STATUS_ACTIVE},
};

/// Absent and `""` both count as missing; whitespace is a value.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

fn not_found(id: i64) -> AppError {
    warn!(user_id = id, "user not found");
    AppError::NotFound("User not found".into())
}

/// Verify credentials against a username or email. Every failure after input
/// validation collapses into `AppError::Authentication`.
pub async fn authenticate(
    repo: &dyn UserRepository,
    req: LoginRequest,
) -> Result<PublicUser, AppError> {
    let (Some(identifier), Some(secret)) = (present(req.username), present(req.password)) else {
        return Err(AppError::Validation(
            "Username and password are required".into(),
        ));
    };

    let Some(user) = repo.find_by_identifier(&identifier).await? else {
        verify_decoy(&secret);
        warn!("login for unknown identifier");
        return Err(AppError::Authentication);
    };

    let verified = match verify_password(&secret, &user.password_hash) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, user_id = user.id, "stored hash unusable");
            false
        }
    };
    if !verified {
        warn!(user_id = user.id, "login with bad password");
        return Err(AppError::Authentication);
    }
    if !user.is_active() {
        warn!(user_id = user.id, status = %user.status, "login for inactive account");
        return Err(AppError::Authentication);
    }

    let Some(user) = repo.record_login(user.id, OffsetDateTime::now_utc()).await? else {
        warn!(user_id = user.id, "user vanished during login");
        return Err(AppError::Authentication);
    };

    info!(user_id = user.id, "user logged in");
    Ok(user.into())
}

pub async fn list_users(repo: &dyn UserRepository) -> Result<Vec<PublicUser>, AppError> {
    let users = repo.list().await?;
    Ok(users.into_iter().map(PublicUser::from).collect())
}

pub async fn create_user(
    repo: &dyn UserRepository,
    req: CreateUserRequest,
) -> Result<PublicUser, AppError> {
    let (Some(username), Some(email), Some(password)) =
        (present(req.username), present(req.email), present(req.password))
    else {
        return Err(AppError::Validation(
            "Username, email, and password are required".into(),
        ));
    };

    if repo.find_conflicting(&username, &email).await?.is_some() {
        warn!(%username, %email, "duplicate user");
        return Err(AppError::Conflict(DUPLICATE_USER.into()));
    }

    let password_hash = hash_password(&password)?;
    let user = repo
        .insert(NewUser {
            username,
            email,
            password_hash,
            role: req.role.unwrap_or_else(|| DEFAULT_ROLE.into()),
            status: req.status.unwrap_or_else(|| STATUS_ACTIVE.into()),
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "user created");
    Ok(user.into())
}

pub async fn get_user(repo: &dyn UserRepository, id: i64) -> Result<PublicUser, AppError> {
    match repo.find_by_id(id).await? {
        Some(user) => Ok(user.into()),
        None => Err(not_found(id)),
    }
}

/// Overwrites whichever fields are supplied. Uniqueness is left to the
/// table's constraints.
pub async fn update_user(
    repo: &dyn UserRepository,
    id: i64,
    req: UpdateUserRequest,
) -> Result<PublicUser, AppError> {
    let password_hash = match req.password {
        Some(p) if p.is_empty() => {
            return Err(AppError::Validation("Password must not be empty".into()));
        }
        Some(p) => Some(hash_password(&p)?),
        None => None,
    };
    let changes = UserChanges {
        username: req.username,
        email: req.email,
        role: req.role,
        status: req.status,
        password_hash,
    };

    match repo.update(id, changes).await? {
        Some(user) => {
            info!(user_id = user.id, "user updated");
            Ok(user.into())
        }
        None => Err(not_found(id)),
    }
}

pub async fn delete_user(repo: &dyn UserRepository, id: i64) -> Result<(), AppError> {
    if !repo.delete(id).await? {
        return Err(not_found(id));
    }
    info!(user_id = id, "user deleted");
    Ok(())
}
