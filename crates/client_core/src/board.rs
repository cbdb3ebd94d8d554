//! Per-room bulletin board.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use gateway::{decode_row, decode_rows, encode_record, Filter, Gateway, Order, Query, Table};
use serde_json::json;
use shared::{
    domain::{PostId, RoomId, UserId},
    records::{BoardPostRecord, NewBoardPost, SenderSummary},
};
use tracing::info;

use crate::error::{ClientError, Result};

/// Important posts first, newest first within each group.
pub fn compare_board_posts(a: &BoardPostRecord, b: &BoardPostRecord) -> Ordering {
    b.is_important
        .cmp(&a.is_important)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn sort_board_posts(posts: &mut [BoardPostRecord]) {
    posts.sort_by(compare_board_posts);
}

pub struct BoardService {
    gateway: Arc<dyn Gateway>,
    room_id: RoomId,
    user_id: UserId,
}

impl BoardService {
    pub fn new(gateway: Arc<dyn Gateway>, room_id: RoomId, user_id: UserId) -> Self {
        Self {
            gateway,
            room_id,
            user_id,
        }
    }

    pub async fn list(&self) -> Result<Vec<BoardPostRecord>> {
        let rows = self
            .gateway
            .query(
                Query::from(Table::BoardPosts)
                    .filter(Filter::eq("room_id", self.room_id))
                    .order_by(Order::desc("is_important"))
                    .order_by(Order::desc("created_at")),
            )
            .await?;
        let mut posts: Vec<BoardPostRecord> = decode_rows(rows)?;
        sort_board_posts(&mut posts);
        Ok(posts)
    }

    /// Posts with author names filled from `names` where missing.
    pub async fn list_with_authors(
        &self,
        names: &HashMap<UserId, String>,
    ) -> Result<Vec<BoardPostRecord>> {
        let mut posts = self.list().await?;
        for post in &mut posts {
            let known = post
                .author
                .as_ref()
                .is_some_and(|author| author.name.is_some());
            if !known {
                post.author = names.get(&post.author_id).map(|name| SenderSummary {
                    name: Some(name.clone()),
                });
            }
        }
        Ok(posts)
    }

    pub async fn create(&self, content: &str, is_important: bool) -> Result<BoardPostRecord> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::validation("post content must not be empty"));
        }
        let post = NewBoardPost {
            title: String::new(),
            content: content.to_owned(),
            author_id: self.user_id,
            room_id: self.room_id,
            is_important,
        };
        let row = self
            .gateway
            .insert(Table::BoardPosts, encode_record(&post)?)
            .await?;
        let created: BoardPostRecord = decode_row(row)?;
        info!(room_id = %self.room_id, post_id = %created.id, "board post created");
        Ok(created)
    }

    /// Flip the importance flag; returns the new value.
    pub async fn toggle_important(&self, post: &BoardPostRecord) -> Result<bool> {
        let important = !post.is_important;
        self.gateway
            .update(
                Table::BoardPosts,
                vec![Filter::eq("id", post.id)],
                json!({ "is_important": important }),
            )
            .await?;
        Ok(important)
    }

    pub async fn delete(&self, post_id: PostId) -> Result<()> {
        self.gateway
            .delete(Table::BoardPosts, vec![Filter::eq("id", post_id)])
            .await?;
        info!(room_id = %self.room_id, %post_id, "board post deleted");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
