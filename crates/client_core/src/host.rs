//! Optional native desktop shell around the client.

use std::path::PathBuf;

use async_trait::async_trait;
use shared::{domain::RoomId, records::RoomRecord};
use thiserror::Error;
use tracing::debug;

use crate::SELF_ROOM_LABEL;

pub const POPUP_WIDTH: u32 = 400;
pub const POPUP_HEIGHT: u32 = 550;
pub const POPUP_RIGHT_MARGIN: u32 = 40;
pub const POPUP_TOP: u32 = 120;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no desktop host is attached")]
    Unavailable,
    #[error("desktop host failed: {0}")]
    Failed(String),
}

/// Window, notification and file services of a desktop host process.
#[async_trait]
pub trait HostShell: Send + Sync {
    fn is_available(&self) -> bool;
    async fn open_room_window(&self, room_id: RoomId, room_name: &str) -> Result<(), HostError>;
    async fn close_current_window(&self);
    async fn minimize_current_window(&self);
    async fn show_notification(&self, title: &str, body: &str);
    async fn open_path(&self, path: &str) -> Result<(), HostError>;
    async fn pick_file(&self) -> Option<PathBuf>;
}

/// Stand-in when the client runs without a desktop host.
pub struct NoHost;

#[async_trait]
impl HostShell for NoHost {
    fn is_available(&self) -> bool {
        false
    }

    async fn open_room_window(&self, _room_id: RoomId, _room_name: &str) -> Result<(), HostError> {
        Err(HostError::Unavailable)
    }

    async fn close_current_window(&self) {}

    async fn minimize_current_window(&self) {}

    async fn show_notification(&self, title: &str, body: &str) {
        debug!(%title, %body, "notification without host");
    }

    async fn open_path(&self, _path: &str) -> Result<(), HostError> {
        Err(HostError::Unavailable)
    }

    async fn pick_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Screen position of a room popup opened without a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupPlacement {
    pub left: i64,
    pub top: i64,
    pub width: u32,
    pub height: u32,
}

impl PopupPlacement {
    pub fn for_screen(screen_width: u32) -> Self {
        Self {
            left: i64::from(screen_width) - i64::from(POPUP_WIDTH) - i64::from(POPUP_RIGHT_MARGIN),
            top: i64::from(POPUP_TOP),
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRequest {
    /// The host opened (or focused) the room window itself.
    Delegated,
    /// The caller opens `path` in a sized popup.
    Popup {
        path: String,
        name: String,
        placement: PopupPlacement,
    },
}

pub fn room_window_title(room: &RoomRecord, display_name: &str) -> String {
    if room.is_self {
        SELF_ROOM_LABEL.to_owned()
    } else {
        display_name.to_owned()
    }
}

/// Open a room window through the host when there is one, otherwise
/// describe the popup the caller should open.
pub async fn open_room(
    host: &dyn HostShell,
    room: &RoomRecord,
    display_name: &str,
    screen_width: u32,
) -> Result<WindowRequest, HostError> {
    if host.is_available() {
        host.open_room_window(room.id, &room_window_title(room, display_name))
            .await?;
        return Ok(WindowRequest::Delegated);
    }
    Ok(WindowRequest::Popup {
        path: format!("/chat/{}", room.id),
        name: format!("chat_{}", room.id),
        placement: PopupPlacement::for_screen(screen_width),
    })
}
