//! Client core of the team messenger: message timelines, read receipts and
//! the room list, driven through a [`gateway::Gateway`].

pub mod board;
pub mod compose;
pub mod error;
pub mod events;
pub mod host;
pub mod members;
pub mod message_store;
pub mod receipts;
pub mod room_session;
pub mod roster;
pub mod session;
pub mod settings;

pub use board::BoardService;
pub use error::{AuthError, ClientError, ErrorContext, Result, Surface};
pub use events::{MembershipChange, RoomEvent, RosterEvent};
pub use host::{HostError, HostShell, NoHost};
pub use members::MemberDirectory;
pub use message_store::{MessageStore, MessageTimeline, PageLoad};
pub use receipts::{ReadReceipts, ReadSweep};
pub use room_session::{ChatRoomSession, RoomUpdate};
pub use roster::{DirectChat, RoomListAggregator, RoomSummary, RosterUpdate};
pub use session::AuthService;
pub use settings::{ChatSettings, SettingsService, SettingsStore};

/// Messages fetched per page when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const MAX_PAGE_SIZE: usize = 100;
/// Label shown for the current user's own notes room.
pub const SELF_ROOM_LABEL: &str = "Notes to self";

pub fn clamp_page_size(page_size: usize) -> usize {
    page_size.clamp(1, MAX_PAGE_SIZE)
}
