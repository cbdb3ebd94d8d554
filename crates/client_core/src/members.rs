//! Member directory and presence.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use gateway::{decode_row, decode_rows, Filter, Gateway, Order, Query, Table};
use serde_json::json;
use shared::{
    domain::{RoomId, UserId},
    records::{MembershipRecord, ProfileRecord},
};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

pub struct MemberDirectory {
    gateway: Arc<dyn Gateway>,
    user_id: UserId,
}

impl MemberDirectory {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: UserId) -> Self {
        Self { gateway, user_id }
    }

    /// Best-effort presence ping; failures are logged and dropped.
    pub async fn set_online(&self, online: bool) {
        let patch = json!({ "is_online": online, "last_seen": Utc::now() });
        match self
            .gateway
            .update(Table::Profiles, vec![Filter::eq("id", self.user_id)], patch)
            .await
        {
            Ok(()) => debug!(user_id = %self.user_id, online, "presence updated"),
            Err(err) => warn!(user_id = %self.user_id, error = %err, "presence update skipped"),
        }
    }

    pub async fn own_profile(&self) -> Result<ProfileRecord> {
        self.profile(self.user_id)
            .await?
            .ok_or_else(|| ClientError::not_found(format!("profile {}", self.user_id)))
    }

    pub async fn profile(&self, user_id: UserId) -> Result<Option<ProfileRecord>> {
        let rows = self
            .gateway
            .query(Query::from(Table::Profiles).filter(Filter::eq("id", user_id)).limit(1))
            .await?;
        Ok(rows.into_iter().next().map(decode_row).transpose()?)
    }

    pub async fn everyone(&self) -> Result<Vec<ProfileRecord>> {
        let rows = self
            .gateway
            .query(Query::from(Table::Profiles).order_by(Order::asc("name")))
            .await?;
        Ok(decode_rows(rows)?)
    }

    /// Everyone except the current user.
    pub async fn others(&self) -> Result<Vec<ProfileRecord>> {
        let rows = self
            .gateway
            .query(
                Query::from(Table::Profiles)
                    .filter(Filter::neq("id", self.user_id))
                    .order_by(Order::asc("name")),
            )
            .await?;
        Ok(decode_rows(rows)?)
    }

    pub async fn room_members(&self, room_id: RoomId) -> Result<Vec<ProfileRecord>> {
        let memberships: Vec<MembershipRecord> = decode_rows(
            self.gateway
                .query(Query::from(Table::RoomMembers).filter(Filter::eq("room_id", room_id)))
                .await?,
        )?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<UserId> = memberships.iter().map(|m| m.user_id).collect();
        let rows = self
            .gateway
            .query(
                Query::from(Table::Profiles)
                    .filter(Filter::is_in("id", ids))
                    .order_by(Order::asc("name")),
            )
            .await?;
        Ok(decode_rows(rows)?)
    }
}

/// Display name per user, used where the backend does not embed one.
pub fn sender_directory(profiles: &[ProfileRecord]) -> HashMap<UserId, String> {
    profiles
        .iter()
        .map(|profile| (profile.id, profile.display_name()))
        .collect()
}

pub fn online_count(profiles: &[ProfileRecord]) -> usize {
    profiles.iter().filter(|profile| profile.is_online).count()
}
