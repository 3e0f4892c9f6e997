use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::subject;
use crate::errors::ServiceError;

/// Persistence for subject records and the token bound to each of them
#[async_trait]
pub trait SubjectTokenRepository: Send + Sync {
    async fn insert_subject(&self, subject: subject::Model) -> Result<subject::Model, ServiceError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<subject::Model>, ServiceError>;

    async fn find_by_id(&self, subject_id: Uuid) -> Result<Option<subject::Model>, ServiceError>;

    /// Swaps the subject's token in place and returns the updated record.
    async fn replace_token(
        &self,
        subject_id: Uuid,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<subject::Model, ServiceError>;

    /// Subjects whose token is still valid at `now` but expires before `before`.
    async fn list_expiring_between(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<subject::Model>, ServiceError>;

    async fn count_all(&self) -> Result<u64, ServiceError>;

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;
}

/// `subjects` table access through SeaORM
#[derive(Clone)]
pub struct SeaOrmSubjectRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmSubjectRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubjectTokenRepository for SeaOrmSubjectRepository {
    async fn insert_subject(&self, subject: subject::Model) -> Result<subject::Model, ServiceError> {
        let active = subject::ActiveModel {
            id: Set(subject.id),
            event_id: Set(subject.event_id),
            name: Set(subject.name),
            access_token: Set(subject.access_token),
            token_expires_at: Set(subject.token_expires_at),
            created_at: Set(subject.created_at),
            updated_at: Set(subject.updated_at),
        };
        Ok(active.insert(&*self.db).await?)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<subject::Model>, ServiceError> {
        Ok(subject::Entity::find()
            .filter(subject::Column::AccessToken.eq(token))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_id(&self, subject_id: Uuid) -> Result<Option<subject::Model>, ServiceError> {
        Ok(subject::Entity::find_by_id(subject_id).one(&*self.db).await?)
    }

    async fn replace_token(
        &self,
        subject_id: Uuid,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<subject::Model, ServiceError> {
        let existing = subject::Entity::find_by_id(subject_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Subject {} not found", subject_id)))?;

        let mut update: subject::ActiveModel = existing.into();
        update.access_token = Set(new_token.to_string());
        update.token_expires_at = Set(expires_at);
        update.updated_at = Set(Utc::now());
        Ok(update.update(&*self.db).await?)
    }

    async fn list_expiring_between(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<subject::Model>, ServiceError> {
        Ok(subject::Entity::find()
            .filter(subject::Column::TokenExpiresAt.gt(now))
            .filter(subject::Column::TokenExpiresAt.lte(before))
            .order_by_asc(subject::Column::TokenExpiresAt)
            .all(&*self.db)
            .await?)
    }

    async fn count_all(&self) -> Result<u64, ServiceError> {
        Ok(subject::Entity::find().count(&*self.db).await?)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        Ok(subject::Entity::find()
            .filter(subject::Column::TokenExpiresAt.gt(now))
            .count(&*self.db)
            .await?)
    }
}
