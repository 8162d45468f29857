use chrono::Utc;
use sea_orm::{Database, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;

use crate::entity::{group, post, user};
use crate::ids::{GroupId, PostId, UserId};
use crate::migrator::Migrator;

/// Create a fresh in-memory SQLite database with all migrations applied.
/// Each call returns an isolated instance.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// Seed a user row directly, standing in for the external identity provider.
pub async fn create_user(db: &DatabaseConnection, username: &str) -> user::Model {
    let model = user::ActiveModel {
        id: Set(UserId::new()),
        username: Set(username.to_string()),
    };

    user::Entity::insert(model)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert user")
}

pub async fn create_group(db: &DatabaseConnection, title: &str, slug: &str) -> group::Model {
    let model = group::ActiveModel {
        id: Set(GroupId::new()),
        title: Set(title.to_string()),
        slug: Set(slug.to_string()),
        description: Set(None),
    };

    group::Entity::insert(model)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert group")
}

pub async fn create_post(
    db: &DatabaseConnection,
    author: UserId,
    group_id: Option<GroupId>,
    text: &str,
) -> post::Model {
    let model = post::ActiveModel {
        id: Set(PostId::new()),
        user_id: Set(author),
        group_id: Set(group_id),
        text: Set(text.to_string()),
        image: Set(None),
        created_at: Set(Utc::now()),
    };

    post::Entity::insert(model)
        .exec_with_returning(db)
        .await
        .expect("Failed to insert post")
}
