use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, FromQueryResult, JoinType, Select};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    cache::ResponseCache,
    entity::{post, prelude::*},
    ids::{GroupId, PostId, UserId},
    service::follows::{FollowError, FollowService},
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("author not found")]
    AuthorNotFound,

    #[error("page {page} is out of range (last page {last})")]
    PageOutOfRange { page: u64, last: u64 },

    #[error("failed to render feed snapshot")]
    Render(#[from] serde_json::Error),

    #[error(transparent)]
    Follows(#[from] FollowError),
}

/// A post joined with its author's username and, when grouped, the
/// group's slug and title.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult, Serialize)]
pub struct PostView {
    pub id: PostId,
    pub user_id: UserId,
    pub author_username: String,
    pub group_id: Option<GroupId>,
    pub group_slug: Option<String>,
    pub group_title: Option<String>,
    pub text: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One 1-based page of a feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

#[derive(Debug)]
pub struct GroupFeed {
    pub group: GroupModel,
    pub posts: FeedPage<PostView>,
}

#[derive(Debug)]
pub struct ProfileFeed {
    pub author: UserModel,
    /// Whether the requesting viewer already follows this author;
    /// false for anonymous viewers.
    pub following: bool,
    pub post_count: u64,
    pub posts: FeedPage<PostView>,
}

/// All feed listings share one total order: newest first, ties broken by
/// id descending (v7 ids embed creation time, so this is insertion order
/// reversed).
fn post_views() -> Select<Post> {
    Post::find()
        .column_as(UserColumn::Username, "author_username")
        .column_as(GroupColumn::Slug, "group_slug")
        .column_as(GroupColumn::Title, "group_title")
        .join(JoinType::InnerJoin, post::Relation::User.def())
        .join(JoinType::LeftJoin, post::Relation::Group.def())
        .order_by_desc(PostColumn::CreatedAt)
        .order_by_desc(PostColumn::Id)
}

#[derive(Clone)]
pub struct FeedService {
    db: DatabaseConnection,
    page_size: u64,
    follows: FollowService,
}

impl FeedService {
    pub fn new(db: DatabaseConnection, page_size: u64) -> Self {
        let follows = FollowService::new(db.clone());
        Self {
            db,
            page_size,
            follows,
        }
    }

    async fn page_of(
        &self,
        select: Select<Post>,
        page: u64,
    ) -> Result<FeedPage<PostView>, FeedError> {
        let paginator = select
            .into_model::<PostView>()
            .paginate(&self.db, self.page_size);

        let ItemsAndPagesNumber {
            number_of_items,
            number_of_pages,
        } = paginator.num_items_and_pages().await?;

        // Page 1 of an empty feed is an empty page; anything past the
        // last page is invalid for every filter
        if page == 0 || (page > 1 && page > number_of_pages) {
            return Err(FeedError::PageOutOfRange {
                page,
                last: number_of_pages,
            });
        }

        let items = paginator.fetch_page(page - 1).await?;

        Ok(FeedPage {
            items,
            page,
            total_pages: number_of_pages,
            total_items: number_of_items,
        })
    }

    /// The unfiltered home feed.
    pub async fn home(&self, page: u64) -> Result<FeedPage<PostView>, FeedError> {
        self.page_of(post_views(), page).await
    }

    /// The home feed as a serialized snapshot, memoized in the response
    /// cache. Within the TTL window the stored snapshot wins even when
    /// posts changed underneath; that staleness is deliberate.
    pub async fn home_rendered(
        &self,
        page: u64,
        cache: &ResponseCache,
    ) -> Result<String, FeedError> {
        let key = format!("home:p{page}");

        if let Some(hit) = cache.get(&key).await {
            debug!(%key, "home feed served from cache");
            return Ok(hit);
        }

        let feed = self.home(page).await?;
        let body = serde_json::to_string(&feed)?;
        cache.insert(key, body.clone()).await;

        Ok(body)
    }

    /// Posts assigned to the group with this slug.
    pub async fn group_feed(&self, slug: &str, page: u64) -> Result<GroupFeed, FeedError> {
        let group = Group::find()
            .filter(GroupColumn::Slug.eq(slug))
            .one(&self.db)
            .await?
            .ok_or(FeedError::GroupNotFound)?;

        let posts = self
            .page_of(post_views().filter(PostColumn::GroupId.eq(group.id)), page)
            .await?;

        Ok(GroupFeed { group, posts })
    }

    /// An author's posts, with the viewer's follow state.
    pub async fn profile_feed(
        &self,
        username: &str,
        viewer: Option<UserId>,
        page: u64,
    ) -> Result<ProfileFeed, FeedError> {
        let author = User::find()
            .filter(UserColumn::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or(FeedError::AuthorNotFound)?;

        let following = match viewer {
            Some(viewer) => self.follows.edge_exists(viewer, author.id).await?,
            None => false,
        };

        let posts = self
            .page_of(post_views().filter(PostColumn::UserId.eq(author.id)), page)
            .await?;

        Ok(ProfileFeed {
            post_count: posts.total_items,
            author,
            following,
            posts,
        })
    }

    /// Posts by the authors the viewer follows. Following nobody yields
    /// an empty feed, not an error.
    pub async fn following_feed(
        &self,
        viewer: UserId,
        page: u64,
    ) -> Result<FeedPage<PostView>, FeedError> {
        let authors = self.follows.followed_author_ids(viewer).await?;

        if authors.is_empty() {
            if page != 1 {
                return Err(FeedError::PageOutOfRange { page, last: 0 });
            }
            return Ok(FeedPage {
                items: Vec::new(),
                page: 1,
                total_pages: 0,
                total_items: 0,
            });
        }

        self.page_of(post_views().filter(PostColumn::UserId.is_in(authors)), page)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use std::time::Duration;

    #[tokio::test]
    async fn home_feed_orders_newest_first() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);

        let author = test_utils::create_user(&db, "testuser").await;
        test_utils::create_post(&db, author.id, None, "first").await;
        test_utils::create_post(&db, author.id, None, "second").await;
        test_utils::create_post(&db, author.id, None, "third").await;

        let page = feeds.home(1).await.unwrap();
        let texts: Vec<_> = page.items.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);

        for pair in page.items.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn group_feed_paginates_fourteen_posts() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);

        let author = test_utils::create_user(&db, "testuser").await;
        let group = test_utils::create_group(&db, "Test group", "test-slug").await;

        for i in 0..14 {
            test_utils::create_post(&db, author.id, Some(group.id), &format!("post {i}")).await;
        }

        let page1 = feeds.group_feed("test-slug", 1).await.unwrap();
        assert_eq!(page1.posts.items.len(), 10);
        assert_eq!(page1.posts.total_items, 14);
        assert_eq!(page1.posts.total_pages, 2);

        let page2 = feeds.group_feed("test-slug", 2).await.unwrap();
        assert_eq!(page2.posts.items.len(), 4);

        // Concatenating the pages reproduces the full feed, newest first,
        // without duplicates or omissions
        let mut all: Vec<PostView> = page1.posts.items;
        all.extend(page2.posts.items);
        assert_eq!(all.len(), 14);

        let expected: Vec<String> = (0..14).rev().map(|i| format!("post {i}")).collect();
        let got: Vec<String> = all.iter().map(|p| p.text.clone()).collect();
        assert_eq!(got, expected);

        let mut ids: Vec<_> = all.iter().map(|p| *p.id.as_uuid()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 14);
    }

    #[tokio::test]
    async fn out_of_range_pages_fail_for_every_filter() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);

        let author = test_utils::create_user(&db, "testuser").await;
        test_utils::create_group(&db, "Test group", "test-slug").await;
        test_utils::create_post(&db, author.id, None, "only post").await;

        assert!(matches!(
            feeds.home(0).await,
            Err(FeedError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            feeds.home(2).await,
            Err(FeedError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            feeds.group_feed("test-slug", 2).await,
            Err(FeedError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            feeds.profile_feed("testuser", None, 5).await,
            Err(FeedError::PageOutOfRange { .. })
        ));

        // Page 1 of an empty listing is fine
        let empty = feeds.group_feed("test-slug", 1).await.unwrap();
        assert!(empty.posts.items.is_empty());
    }

    #[tokio::test]
    async fn unknown_slug_and_username_fail() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);

        assert!(matches!(
            feeds.group_feed("missing", 1).await,
            Err(FeedError::GroupNotFound)
        ));
        assert!(matches!(
            feeds.profile_feed("missing", None, 1).await,
            Err(FeedError::AuthorNotFound)
        ));
    }

    #[tokio::test]
    async fn profile_feed_reports_follow_state() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);
        let follows = FollowService::new(db.clone());

        let author = test_utils::create_user(&db, "author").await;
        let viewer = test_utils::create_user(&db, "viewer").await;
        test_utils::create_post(&db, author.id, None, "hello").await;

        let anonymous = feeds.profile_feed("author", None, 1).await.unwrap();
        assert!(!anonymous.following);
        assert_eq!(anonymous.post_count, 1);

        let before = feeds.profile_feed("author", Some(viewer.id), 1).await.unwrap();
        assert!(!before.following);

        follows.follow(viewer.id, "author").await.unwrap();

        let after = feeds.profile_feed("author", Some(viewer.id), 1).await.unwrap();
        assert!(after.following);
        assert_eq!(after.author.id, author.id);
    }

    #[tokio::test]
    async fn following_feed_filters_to_followed_authors() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);
        let follows = FollowService::new(db.clone());

        let viewer = test_utils::create_user(&db, "viewer").await;
        let followed = test_utils::create_user(&db, "followed").await;
        let other = test_utils::create_user(&db, "other").await;

        test_utils::create_post(&db, followed.id, None, "from followed").await;
        test_utils::create_post(&db, other.id, None, "from other").await;

        // Following nobody: empty feed, not an error
        let empty = feeds.following_feed(viewer.id, 1).await.unwrap();
        assert!(empty.items.is_empty());

        follows.follow(viewer.id, "followed").await.unwrap();

        let page = feeds.following_feed(viewer.id, 1).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "from followed");
        assert_eq!(page.items[0].author_username, "followed");
    }

    #[tokio::test]
    async fn home_cache_serves_stale_snapshot_until_flushed() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);
        let cache = ResponseCache::new(Duration::from_secs(20));

        let author = test_utils::create_user(&db, "testuser").await;
        let post = test_utils::create_post(&db, author.id, None, "cache_test").await;

        let snapshot = feeds.home_rendered(1, &cache).await.unwrap();
        assert!(snapshot.contains("cache_test"));

        // Delete the post; within the TTL window the snapshot must not move
        Post::delete_by_id(post.id).exec(&db).await.unwrap();

        let cached = feeds.home_rendered(1, &cache).await.unwrap();
        assert_eq!(cached, snapshot);

        // After an explicit flush the feed reflects current data
        cache.flush().await;
        let fresh = feeds.home_rendered(1, &cache).await.unwrap();
        assert_ne!(fresh, snapshot);
        assert!(!fresh.contains("cache_test"));
    }

    #[tokio::test]
    async fn group_feed_excludes_other_groups_and_loose_posts() {
        let db = test_utils::setup_test_db().await;
        let feeds = FeedService::new(db.clone(), 10);

        let author = test_utils::create_user(&db, "testuser").await;
        let group = test_utils::create_group(&db, "One", "one").await;
        let group2 = test_utils::create_group(&db, "Two", "two").await;

        test_utils::create_post(&db, author.id, Some(group.id), "in one").await;
        test_utils::create_post(&db, author.id, Some(group2.id), "in two").await;
        test_utils::create_post(&db, author.id, None, "loose").await;

        let page = feeds.group_feed("one", 1).await.unwrap();
        assert_eq!(page.posts.items.len(), 1);
        assert_eq!(page.posts.items[0].text, "in one");
        assert_eq!(page.posts.items[0].group_slug.as_deref(), Some("one"));
        assert_eq!(page.posts.items[0].group_title.as_deref(), Some("One"));
    }
}
