//! Authentication and user management service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult, ErrorCode},
    models::user::{
        CreateUser, RegisterUser, Role, UpdateProfile, User, UserClaims, UserQuery, UserShort,
    },
    repository::{users::NewUser, Repository},
};

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    config: AuthConfig,
}

impl UsersService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Authenticate user by email and return a JWT token
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<(String, User)> {
        let user = self
            .repository
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !self.verify_password(&user, password)? {
            return Err(AppError::Authentication("Invalid email or password".to_string()));
        }

        let token = self.create_token_for_user(&user)?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok((token, user))
    }

    /// Create JWT token for a user
    fn create_token_for_user(&self, user: &User) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let exp = now + (self.config.jwt_expiration_hours as i64 * 3600);

        let claims = UserClaims {
            sub: user.email.clone(),
            user_id: user.id,
            role: user.role,
            exp,
            iat: now,
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    fn verify_password(&self, user: &User, password: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Hash a password using Argon2
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Self-service sign-up; new accounts are plain members
    pub async fn register(&self, user: RegisterUser) -> AppResult<(String, User)> {
        user.validate()?;
        let created = self
            .insert(
                &user.email,
                &user.password,
                user.firstname.as_deref(),
                user.lastname.as_deref(),
                Role::User,
            )
            .await?;
        let token = self.create_token_for_user(&created)?;
        Ok((token, created))
    }

    async fn insert(
        &self,
        email: &str,
        password: &str,
        firstname: Option<&str>,
        lastname: Option<&str>,
        role: Role,
    ) -> AppResult<User> {
        if self.repository.users.email_exists(email, None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let password_hash = self.hash_password(password)?;
        let created = self
            .repository
            .users
            .create(&NewUser {
                email,
                password_hash: &password_hash,
                firstname,
                lastname,
                role,
            })
            .await?;
        tracing::info!(user_id = created.id, role = %created.role, "User created");
        Ok(created)
    }

    /// Create the configured admin account if there is no admin yet
    pub async fn ensure_admin(&self) -> AppResult<()> {
        let (Some(email), Some(password)) = (
            self.config.bootstrap_admin_email.clone(),
            self.config.bootstrap_admin_password.clone(),
        ) else {
            return Ok(());
        };
        if self.repository.users.admin_exists().await? {
            return Ok(());
        }
        self.insert(&email, &password, None, None, Role::Admin).await?;
        tracing::info!("Bootstrap admin {} created", email);
        Ok(())
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        self.repository.users.get_by_id(id).await
    }

    /// Search users
    pub async fn search_users(&self, query: &UserQuery) -> AppResult<(Vec<UserShort>, i64)> {
        self.repository.users.search(query).await
    }

    /// Create a new user (admin)
    pub async fn create_user(&self, user: CreateUser) -> AppResult<User> {
        user.validate()?;
        self.insert(
            &user.email,
            &user.password,
            user.firstname.as_deref(),
            user.lastname.as_deref(),
            user.role.unwrap_or(Role::User),
        )
        .await
    }

    /// Update own profile. Changing the password needs the current one.
    pub async fn update_profile(&self, user_id: i32, profile: UpdateProfile) -> AppResult<User> {
        profile.validate()?;
        let user = self.repository.users.get_by_id(user_id).await?;

        if let Some(ref email) = profile.email {
            if self.repository.users.email_exists(email, Some(user_id)).await? {
                return Err(AppError::Conflict("Email already exists".to_string()));
            }
        }

        let password_hash = match profile.new_password {
            Some(ref new_password) => {
                let current = profile.current_password.as_deref().ok_or_else(|| {
                    AppError::Validation("Current password is required to change password".to_string())
                })?;
                if !self.verify_password(&user, current)? {
                    return Err(AppError::Authentication("Current password is incorrect".to_string()));
                }
                Some(self.hash_password(new_password)?)
            }
            None => None,
        };

        self.repository
            .users
            .update_profile(
                user_id,
                profile.firstname.as_deref(),
                profile.lastname.as_deref(),
                profile.email.as_deref(),
                password_hash.as_deref(),
            )
            .await
    }

    pub async fn update_role(&self, id: i32, role: Role) -> AppResult<User> {
        let user = self.repository.users.update_role(id, role).await?;
        tracing::info!(user_id = id, role = %role, "User role changed");
        Ok(user)
    }

    /// Soft delete a user; users still holding books cannot be deleted
    pub async fn delete_user(&self, id: i32) -> AppResult<()> {
        if !self.repository.users.soft_delete(id).await? {
            return Err(AppError::BusinessRule(
                ErrorCode::UserHasActiveLoans,
                "User has books that have not been returned".to_string(),
            ));
        }
        tracing::info!(user_id = id, "User deleted");
        Ok(())
    }
}
