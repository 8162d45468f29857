use chrono::Utc;
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::info;

use crate::{
    entity::prelude::*,
    error::ValidationError,
    ids::{CommentId, GroupId, PostId, UserId},
};

#[derive(Debug, Error)]
pub enum PostsError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("post not found")]
    PostNotFound,

    #[error("group not found")]
    GroupNotFound,

    #[error("forbidden: not the post author")]
    Forbidden,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(())
}

/// Input for creating a post. The author always comes from the caller's
/// authenticated identity, never from here.
#[derive(Debug, Clone, Default)]
pub struct CreatePostInput {
    pub text: String,
    pub group_id: Option<GroupId>,
    pub image: Option<String>,
}

impl CreatePostInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.text)
    }
}

/// Replacement values for a post's mutable fields. Author and created_at
/// are not represented here; nothing can change them.
#[derive(Debug, Clone, Default)]
pub struct EditPostInput {
    pub text: String,
    pub group_id: Option<GroupId>,
    pub image: Option<String>,
}

impl EditPostInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddCommentInput {
    pub text: String,
}

impl AddCommentInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.text)
    }
}

/// A post with its comments (newest first) and the author's total post
/// count, as shown on the detail page.
#[derive(Debug)]
pub struct PostDetail {
    pub post: PostModel,
    pub comments: Vec<CommentModel>,
    pub author_post_count: u64,
}

#[derive(Clone)]
pub struct PostsService {
    db: DatabaseConnection,
}

impl PostsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn group_must_exist(&self, group_id: GroupId) -> Result<(), PostsError> {
        let exists = Group::find_by_id(group_id).one(&self.db).await?.is_some();
        if !exists {
            return Err(PostsError::GroupNotFound);
        }
        Ok(())
    }

    /// Create a new post authored by the given user.
    pub async fn create_post(
        &self,
        author: UserId,
        input: CreatePostInput,
    ) -> Result<PostModel, PostsError> {
        input.validate()?;

        if let Some(group_id) = input.group_id {
            self.group_must_exist(group_id).await?;
        }

        let post = PostActiveModel {
            id: Set(PostId::new()),
            user_id: Set(author),
            group_id: Set(input.group_id),
            text: Set(input.text),
            image: Set(input.image),
            // Set exactly once, never touched again
            created_at: Set(Utc::now()),
        };

        let post = Post::insert(post).exec_with_returning(&self.db).await?;

        info!(post = %post.id, %author, "post created");
        Ok(post)
    }

    /// Edit a post's text, group, and image. Only the author may edit;
    /// that check runs before field validation.
    pub async fn edit_post(
        &self,
        post_id: PostId,
        editor: UserId,
        input: EditPostInput,
    ) -> Result<PostModel, PostsError> {
        let post = Post::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(PostsError::PostNotFound)?;

        if post.user_id != editor {
            return Err(PostsError::Forbidden);
        }

        input.validate()?;

        if let Some(group_id) = input.group_id {
            self.group_must_exist(group_id).await?;
        }

        let mut post: PostActiveModel = post.into();
        post.text = Set(input.text);
        post.group_id = Set(input.group_id);
        post.image = Set(input.image);

        let updated = post.update(&self.db).await?;
        Ok(updated)
    }

    /// Append a comment to an existing post. The post's own row is left
    /// untouched.
    pub async fn add_comment(
        &self,
        post_id: PostId,
        author: UserId,
        input: AddCommentInput,
    ) -> Result<CommentModel, PostsError> {
        let exists = Post::find_by_id(post_id).one(&self.db).await?.is_some();
        if !exists {
            return Err(PostsError::PostNotFound);
        }

        input.validate()?;

        let comment = CommentActiveModel {
            id: Set(CommentId::new()),
            post_id: Set(post_id),
            user_id: Set(author),
            text: Set(input.text),
            created_at: Set(Utc::now()),
        };

        let comment = Comment::insert(comment)
            .exec_with_returning(&self.db)
            .await?;

        Ok(comment)
    }

    /// Delete a post and its comments. Author-only. The comment sweep and
    /// the post delete commit together.
    pub async fn delete_post(&self, post_id: PostId, editor: UserId) -> Result<(), PostsError> {
        let post = Post::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(PostsError::PostNotFound)?;

        if post.user_id != editor {
            return Err(PostsError::Forbidden);
        }

        let txn = self.db.begin().await?;

        Comment::delete_many()
            .filter(CommentColumn::PostId.eq(post_id))
            .exec(&txn)
            .await?;
        Post::delete_by_id(post_id).exec(&txn).await?;

        txn.commit().await?;

        info!(post = %post_id, "post deleted");
        Ok(())
    }

    /// The post-detail view: the post, its comments newest first, and how
    /// many posts its author has in total.
    pub async fn get_post(&self, post_id: PostId) -> Result<PostDetail, PostsError> {
        let post = Post::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(PostsError::PostNotFound)?;

        let comments = Comment::find()
            .filter(CommentColumn::PostId.eq(post_id))
            .order_by_desc(CommentColumn::CreatedAt)
            .order_by_desc(CommentColumn::Id)
            .all(&self.db)
            .await?;

        let author_post_count = Post::find()
            .filter(PostColumn::UserId.eq(post.user_id))
            .count(&self.db)
            .await?;

        Ok(PostDetail {
            post,
            comments,
            author_post_count,
        })
    }
}
