// src/services/engagement.rs

//! Likes and comments.

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Comment, LessonId, LikeState, Viewer};
use crate::storage::EngagementStore;

/// Engagement operations on behalf of a (possibly anonymous) viewer.
#[derive(Debug, Clone)]
pub struct EngagementService<S> {
    store: S,
}

impl<S: EngagementStore> EngagementService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Like the lesson if the viewer has not, otherwise remove the like.
    pub async fn toggle_like(
        &self,
        lesson_id: &LessonId,
        viewer: Option<&Viewer>,
    ) -> Result<LikeState> {
        let viewer = viewer.ok_or(AppError::Unauthorized)?;

        let liked = !self.store.is_liked(lesson_id, &viewer.user_id).await?;
        self.store
            .set_like(lesson_id, &viewer.user_id, liked)
            .await?;
        let likes_count = self.store.like_count(lesson_id).await?;

        log::debug!(
            "User {} {} lesson {} ({} likes)",
            viewer.user_id,
            if liked { "liked" } else { "unliked" },
            lesson_id,
            likes_count
        );
        Ok(LikeState { liked, likes_count })
    }

    /// Current like state for the viewer; anonymous viewers never like.
    pub async fn like_state(&self, lesson_id: &LessonId, viewer: Option<&Viewer>) -> Result<LikeState> {
        let liked = match viewer {
            Some(v) => self.store.is_liked(lesson_id, &v.user_id).await?,
            None => false,
        };
        Ok(LikeState {
            liked,
            likes_count: self.store.like_count(lesson_id).await?,
        })
    }

    pub async fn add_comment(
        &self,
        lesson_id: &LessonId,
        viewer: Option<&Viewer>,
        content: &str,
    ) -> Result<Comment> {
        let viewer = viewer.ok_or(AppError::Unauthorized)?;
        let comment = Comment::new(lesson_id.clone(), viewer, content)?;
        self.store.add_comment(&comment).await?;
        log::info!("Comment {} added to lesson {}", comment.id, lesson_id);
        Ok(comment)
    }

    /// Comments oldest first.
    pub async fn comments(&self, lesson_id: &LessonId) -> Result<Vec<Comment>> {
        self.store.comments(lesson_id).await
    }

    /// Delete a comment written by the viewer. Returns `false` if it did not exist.
    pub async fn delete_comment(&self, comment_id: Uuid, viewer: Option<&Viewer>) -> Result<bool> {
        let viewer = viewer.ok_or(AppError::Unauthorized)?;
        let Some(comment) = self.store.comment(comment_id).await? else {
            return Ok(false);
        };
        if comment.user_id != viewer.user_id {
            return Err(AppError::Unauthorized);
        }
        self.store.delete_comment(comment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::MemoryStorage;

    fn service() -> EngagementService<MemoryStorage> {
        EngagementService::new(MemoryStorage::new())
    }

    fn lesson() -> LessonId {
        LessonId::parse("L1").unwrap()
    }

    #[tokio::test]
    async fn test_toggle_like_twice_restores_state() {
        let service = service();
        let alice = Viewer::new("alice");
        let bob = Viewer::new("bob");

        let state = service.toggle_like(&lesson(), Some(&alice)).await.unwrap();
        assert_eq!(state, LikeState { liked: true, likes_count: 1 });

        let state = service.toggle_like(&lesson(), Some(&bob)).await.unwrap();
        assert_eq!(state.likes_count, 2);

        let state = service.toggle_like(&lesson(), Some(&alice)).await.unwrap();
        assert_eq!(state, LikeState { liked: false, likes_count: 1 });

        let state = service.like_state(&lesson(), None).await.unwrap();
        assert!(!state.liked);
        assert_eq!(state.likes_count, 1);
    }

    #[tokio::test]
    async fn test_anonymous_cannot_engage() {
        let service = service();
        assert!(matches!(
            service.toggle_like(&lesson(), None).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            service.add_comment(&lesson(), None, "hi").await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_comments_oldest_first() {
        let service = service();
        let viewer = Viewer::new("alice");

        service.add_comment(&lesson(), Some(&viewer), "  first ").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        service.add_comment(&lesson(), Some(&viewer), "second").await.unwrap();

        let contents: Vec<_> = service
            .comments(&lesson())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_empty_comment_rejected() {
        let service = service();
        let err = service
            .add_comment(&lesson(), Some(&Viewer::new("alice")), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(service.comments(&lesson()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_author_deletes() {
        let service = service();
        let alice = Viewer::new("alice");
        let comment = service
            .add_comment(&lesson(), Some(&alice), "שלום")
            .await
            .unwrap();

        assert!(matches!(
            service.delete_comment(comment.id, Some(&Viewer::new("bob"))).await,
            Err(AppError::Unauthorized)
        ));
        assert!(service.delete_comment(comment.id, Some(&alice)).await.unwrap());
        assert!(!service.delete_comment(comment.id, Some(&alice)).await.unwrap());
    }
}
