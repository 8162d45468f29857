use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::debug;

use crate::{
    entity::prelude::*,
    ids::{FollowId, UserId},
};

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("author not found")]
    AuthorNotFound,

    #[error("not following this author")]
    NotFollowing,
}

/// Outcome of a follow request. The rejected variants are ordinary
/// results the caller branches on, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowing,
    SelfFollowRejected,
}

#[derive(Clone)]
pub struct FollowService {
    db: DatabaseConnection,
}

impl FollowService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn author_by_username(&self, username: &str) -> Result<UserModel, FollowError> {
        User::find()
            .filter(UserColumn::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or(FollowError::AuthorNotFound)
    }

    async fn edge(
        &self,
        follower: UserId,
        author_id: UserId,
    ) -> Result<Option<FollowModel>, DbErr> {
        Follow::find()
            .filter(FollowColumn::UserId.eq(follower))
            .filter(FollowColumn::AuthorId.eq(author_id))
            .one(&self.db)
            .await
    }

    pub async fn edge_exists(
        &self,
        follower: UserId,
        author_id: UserId,
    ) -> Result<bool, FollowError> {
        Ok(self.edge(follower, author_id).await?.is_some())
    }

    /// Follow an author. Idempotent: a second call reports the existing
    /// edge instead of creating a duplicate. A self-follow never creates
    /// an edge.
    pub async fn follow(
        &self,
        follower: UserId,
        target_username: &str,
    ) -> Result<FollowOutcome, FollowError> {
        let author = self.author_by_username(target_username).await?;

        if author.id == follower {
            return Ok(FollowOutcome::SelfFollowRejected);
        }

        if self.edge(follower, author.id).await?.is_some() {
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        // The unique index on (user_id, author_id) backstops this
        // find-then-insert against concurrent requests
        let edge = FollowActiveModel {
            id: Set(FollowId::new()),
            user_id: Set(follower),
            author_id: Set(author.id),
        };
        Follow::insert(edge).exec(&self.db).await?;

        debug!(%follower, author = %author.id, "follow edge created");
        Ok(FollowOutcome::Followed)
    }

    /// Remove a follow edge. Fails with `NotFollowing` when no edge
    /// exists; the presentation boundary may treat that permissively.
    pub async fn unfollow(
        &self,
        follower: UserId,
        target_username: &str,
    ) -> Result<(), FollowError> {
        let author = self.author_by_username(target_username).await?;

        let edge = self
            .edge(follower, author.id)
            .await?
            .ok_or(FollowError::NotFollowing)?;

        Follow::delete_by_id(edge.id).exec(&self.db).await?;

        debug!(%follower, author = %author.id, "follow edge removed");
        Ok(())
    }

    pub async fn is_following(
        &self,
        follower: UserId,
        target_username: &str,
    ) -> Result<bool, FollowError> {
        let author = User::find()
            .filter(UserColumn::Username.eq(target_username))
            .one(&self.db)
            .await?;

        match author {
            Some(author) => self.edge_exists(follower, author.id).await,
            None => Ok(false),
        }
    }

    /// The author-id set the following feed filters on.
    pub async fn followed_author_ids(&self, follower: UserId) -> Result<Vec<UserId>, FollowError> {
        let edges = Follow::find()
            .filter(FollowColumn::UserId.eq(follower))
            .all(&self.db)
            .await?;

        Ok(edges.into_iter().map(|edge| edge.author_id).collect())
    }
}
