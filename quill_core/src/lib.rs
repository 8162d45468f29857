pub mod entity;
pub mod ids;
pub mod migrator;

use tokio::sync::OnceCell;

use std::{sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use tracing_subscriber::EnvFilter;

use crate::cache::ResponseCache;
use crate::service::{
    feed::FeedService, follows::FollowService, groups::GroupsService, posts::PostsService,
};

pub mod service;

pub mod error;

pub mod config;

pub mod cache;

pub mod db;

pub mod test_utils;

static QUILL_CORE: OnceCell<Arc<QuillCore>> = OnceCell::const_new();

pub async fn core() -> Arc<QuillCore> {
    QUILL_CORE
        .get_or_init(|| async move { Arc::new(QuillCore::start().await.expect("failed to init")) })
        .await
        .clone()
}

/// Main runtime handle for Quill.
///
/// The HTTP boundary, identity provider, and file storage live outside
/// this crate; they drive the services exposed here.
pub struct QuillCore {
    pub config: config::QuillConfig,

    pub db: DatabaseConnection,

    /// Process-wide snapshot store for the rendered home feed.
    pub cache: Arc<ResponseCache>,

    pub feeds: FeedService,
    pub posts: PostsService,
    pub follows: FollowService,
    pub groups: GroupsService,
}

impl QuillCore {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
            .ok();

        let config = config::get_or_init().await?;

        // DB + migrations
        let db = db::open_or_create_db(&config).await?;
        db::migrate_up(&db).await?;

        let cache = Arc::new(ResponseCache::new(Duration::from_secs(
            config.home_cache_ttl_secs,
        )));

        let feeds = FeedService::new(db.clone(), config.posts_per_page);
        let posts = PostsService::new(db.clone());
        let follows = FollowService::new(db.clone());
        let groups = GroupsService::new(db.clone());

        Ok(Self {
            config,
            db,
            cache,
            feeds,
            posts,
            follows,
            groups,
        })
    }

    pub async fn shutdown(self) -> Result<(), Box<dyn std::error::Error>> {
        self.db.close().await?;
        Ok(())
    }
}

pub mod prelude {
    pub use super::entity;
    pub use super::ids;

    pub use super::service;

    pub use super::error;

    pub use super::config;

    pub use super::cache;
}
