use sea_orm::sea_query::Expr;
use sea_orm::{DatabaseConnection, Value};
use thiserror::Error;
use tracing::info;

use crate::{entity::prelude::*, ids::GroupId};

#[derive(Debug, Error)]
pub enum GroupsError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("slug already in use")]
    SlugTaken,
}

/// Administrative group management. Groups are created out-of-band and
/// referenced, never owned, by posts.
#[derive(Clone)]
pub struct GroupsService {
    db: DatabaseConnection,
}

impl GroupsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create_group(
        &self,
        title: String,
        slug: String,
        description: Option<String>,
    ) -> Result<GroupModel, GroupsError> {
        let taken = Group::find()
            .filter(GroupColumn::Slug.eq(&slug))
            .one(&self.db)
            .await?
            .is_some();
        if taken {
            return Err(GroupsError::SlugTaken);
        }

        let group = GroupActiveModel {
            id: Set(GroupId::new()),
            title: Set(title),
            slug: Set(slug),
            description: Set(description),
        };

        let group = Group::insert(group).exec_with_returning(&self.db).await?;

        info!(group = %group.id, slug = %group.slug, "group created");
        Ok(group)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<GroupModel, GroupsError> {
        Group::find()
            .filter(GroupColumn::Slug.eq(slug))
            .one(&self.db)
            .await?
            .ok_or(GroupsError::GroupNotFound)
    }

    /// Delete a group. Its posts survive with their group reference
    /// nulled; the nulling and the delete commit together.
    pub async fn delete_group(&self, group_id: GroupId) -> Result<(), GroupsError> {
        let exists = Group::find_by_id(group_id).one(&self.db).await?.is_some();
        if !exists {
            return Err(GroupsError::GroupNotFound);
        }

        let txn = self.db.begin().await?;

        Post::update_many()
            .col_expr(PostColumn::GroupId, Expr::value(Value::Uuid(None)))
            .filter(PostColumn::GroupId.eq(group_id))
            .exec(&txn)
            .await?;
        Group::delete_by_id(group_id).exec(&txn).await?;

        txn.commit().await?;

        info!(group = %group_id, "group deleted, post references nulled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[tokio::test]
    async fn slug_must_be_unique() {
        let db = test_utils::setup_test_db().await;
        let groups = GroupsService::new(db.clone());

        groups
            .create_group("First".into(), "shared-slug".into(), None)
            .await
            .unwrap();

        let result = groups
            .create_group("Second".into(), "shared-slug".into(), Some("desc".into()))
            .await;
        assert!(matches!(result, Err(GroupsError::SlugTaken)));
    }

    #[tokio::test]
    async fn get_by_slug_resolves_or_fails() {
        let db = test_utils::setup_test_db().await;
        let groups = GroupsService::new(db.clone());

        let created = groups
            .create_group("Findable".into(), "findable".into(), None)
            .await
            .unwrap();

        let found = groups.get_by_slug("findable").await.unwrap();
        assert_eq!(found.id, created.id);

        let missing = groups.get_by_slug("missing").await;
        assert!(matches!(missing, Err(GroupsError::GroupNotFound)));
    }

    #[tokio::test]
    async fn deleting_a_group_nulls_post_references() {
        let db = test_utils::setup_test_db().await;
        let groups = GroupsService::new(db.clone());

        let author = test_utils::create_user(&db, "author").await;
        let group = test_utils::create_group(&db, "Doomed", "doomed").await;
        let post = test_utils::create_post(&db, author.id, Some(group.id), "survives").await;

        groups.delete_group(group.id).await.unwrap();

        assert!(Group::find_by_id(group.id).one(&db).await.unwrap().is_none());

        // The post is orphaned from the group, not deleted
        let stored = Post::find_by_id(post.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.group_id, None);
        assert_eq!(stored.text, "survives");
    }
}
