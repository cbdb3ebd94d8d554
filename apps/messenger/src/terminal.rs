//! Host shell for a terminal session: notifications go to stderr, there
//! are no windows to open or close.

use std::path::PathBuf;

use async_trait::async_trait;
use client_core::{HostError, HostShell};
use shared::domain::RoomId;
use tracing::info;

pub struct TerminalHost;

#[async_trait]
impl HostShell for TerminalHost {
    fn is_available(&self) -> bool {
        false
    }

    async fn open_room_window(&self, _room_id: RoomId, _room_name: &str) -> Result<(), HostError> {
        Err(HostError::Unavailable)
    }

    async fn close_current_window(&self) {
        eprintln!("-- you are no longer a member of this room");
    }

    async fn minimize_current_window(&self) {}

    async fn show_notification(&self, title: &str, body: &str) {
        eprintln!("** {title}: {body}");
    }

    async fn open_path(&self, path: &str) -> Result<(), HostError> {
        info!(%path, "file reference");
        Err(HostError::Unavailable)
    }

    async fn pick_file(&self) -> Option<PathBuf> {
        None
    }
}
