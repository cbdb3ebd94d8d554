use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    members::sender_directory, roster::RoomListAggregator, AuthService, BoardService,
    ChatRoomSession, ChatSettings, DirectChat, MemberDirectory, SettingsService, SettingsStore,
};
use gateway::{Gateway, MemoryGateway, RestGateway, Session, Table};
use serde_json::{json, Value};
use shared::{
    domain::{ContentKind, MessageId, RoomId, UserId},
    records::MessageRecord,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod terminal;

use config::{load_settings, normalize_backend_url, Settings};
use terminal::TerminalHost;

const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo";
const TAIL_POLL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(about = "Team messenger client")]
struct Cli {
    /// Use an in-process demo workspace instead of the configured backend.
    #[arg(long, global = true)]
    offline: bool,
    #[arg(long, global = true, env = "MESSENGER_EMAIL")]
    email: Option<String>,
    #[arg(long, global = true, env = "MESSENGER_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and show the own profile.
    Login,
    /// List rooms, self-room first.
    Rooms,
    /// Print a room's latest messages.
    Open {
        room: Uuid,
        /// Extra older pages to load.
        #[arg(long, default_value_t = 0)]
        older: usize,
        /// Keep following the room until interrupted.
        #[arg(long)]
        tail: bool,
    },
    Send {
        room: Uuid,
        text: String,
        #[arg(long)]
        reply_to: Option<Uuid>,
        /// Send `text` as a file path reference.
        #[arg(long)]
        file: bool,
    },
    /// Start or reopen a direct chat with a member, by email.
    Dm { email: String },
    Group {
        name: String,
        #[arg(long = "invite")]
        invite: Vec<String>,
    },
    Leave { room: Uuid },
    Board {
        room: Uuid,
        #[arg(long)]
        post: Option<String>,
        #[arg(long)]
        important: bool,
    },
    /// Show or change local chat settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    /// Set one field by its stored name, e.g. `fontSize 16`.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = load_settings();

    let store = match &settings.settings_dir {
        Some(dir) => SettingsStore::in_dir(dir),
        None => SettingsStore::default_location()
            .ok_or_else(|| anyhow!("no configuration directory; set MESSENGER_SETTINGS_DIR"))?,
    };
    let chat_settings = SettingsService::open(store).await;

    if let Command::Settings { action } = &cli.command {
        return run_settings(&chat_settings, action.as_ref()).await;
    }

    let gateway = connect(&cli, &settings).await?;
    let auth = AuthService::new(Arc::clone(&gateway));
    let (email, password) = credentials(&cli)?;
    let session = auth
        .sign_in(&email, &password)
        .await
        .with_context(|| format!("failed to sign in as {email}"))?;
    let directory = MemberDirectory::new(Arc::clone(&gateway), session.user_id);
    directory.set_online(true).await;

    let outcome = run(&cli.command, &gateway, &session, &directory, &chat_settings, &settings).await;

    if let Err(err) = auth.sign_out().await {
        warn!(error = %err, "sign-out failed");
    }
    outcome
}

async fn connect(cli: &Cli, settings: &Settings) -> Result<Arc<dyn Gateway>> {
    if cli.offline {
        return Ok(demo_gateway().await);
    }
    let raw = settings
        .backend_url
        .as_deref()
        .ok_or_else(|| anyhow!("no backend configured; set MESSENGER_BACKEND_URL or use --offline"))?;
    let base_url = normalize_backend_url(raw)?;
    let gateway = RestGateway::new(&base_url, settings.anon_key.clone())
        .with_context(|| format!("failed to set up backend {base_url}"))?;
    info!(%base_url, "using backend");
    Ok(Arc::new(gateway))
}

fn credentials(cli: &Cli) -> Result<(String, String)> {
    match (&cli.email, &cli.password) {
        (Some(email), Some(password)) => Ok((email.clone(), password.clone())),
        (None, None) if cli.offline => Ok((DEMO_EMAIL.to_owned(), DEMO_PASSWORD.to_owned())),
        _ => bail!("both --email and --password (or MESSENGER_EMAIL/MESSENGER_PASSWORD) are required"),
    }
}

/// Workspace for `--offline`: the demo user, two teammates and one group
/// room with some history.
async fn demo_gateway() -> Arc<dyn Gateway> {
    let gateway = MemoryGateway::new().with_operation_log_capacity(0);
    let demo = gateway.register_account(DEMO_EMAIL, DEMO_PASSWORD, "Demo").await;
    let ben = gateway.register_account("ben@example.com", "ben", "Ben").await;
    let cy = gateway.register_account("cy@example.com", "cy", "Cy").await;
    let room = RoomId::new();
    gateway
        .seed(
            Table::ChatRooms,
            json!({ "id": room, "name": "general", "is_group": true, "is_self": false, "created_by": ben }),
        )
        .await;
    for member in [demo, ben, cy] {
        gateway
            .seed(Table::RoomMembers, json!({ "room_id": room, "user_id": member }))
            .await;
    }
    for (sender, content) in [(ben, "Welcome to the team room."), (cy, "Stand-up moved to 10:00.")] {
        gateway
            .seed(
                Table::Messages,
                json!({
                    "room_id": room,
                    "sender_id": sender,
                    "content": content,
                    "content_type": "text",
                    "read_by": [sender],
                }),
            )
            .await;
    }
    Arc::new(gateway)
}

async fn run(
    command: &Command,
    gateway: &Arc<dyn Gateway>,
    session: &Session,
    directory: &MemberDirectory,
    chat_settings: &SettingsService,
    settings: &Settings,
) -> Result<()> {
    let roster = RoomListAggregator::new(Arc::clone(gateway), session.user_id);
    match command {
        Command::Login => {
            let profile = directory.own_profile().await?;
            println!("signed in as {} <{}>", profile.display_name(), session.email);
        }
        Command::Rooms => {
            for summary in roster.refresh().await? {
                let unread = match summary.unread_count {
                    0 => String::new(),
                    n => format!("({n})"),
                };
                println!(
                    "{}  {:<24} {:>5}  {}",
                    summary.id(),
                    summary.display_name,
                    unread,
                    summary.last_message
                );
            }
        }
        Command::Open { room, older, tail } => {
            let room_session = Arc::new(
                ChatRoomSession::open(
                    Arc::clone(gateway),
                    session.user_id,
                    RoomId(*room),
                    Arc::new(TerminalHost),
                    chat_settings.subscribe(),
                    settings.page_size,
                )
                .await
                .context("failed to open room")?,
            );
            for _ in 0..*older {
                if !room_session.has_more().await {
                    break;
                }
                room_session.load_older().await?;
            }
            println!("# {}", room_session.display_name().await);
            let mut printed = HashSet::new();
            print_new(&room_session, &mut printed).await;
            if *tail {
                follow(&room_session, &mut printed).await?;
            }
        }
        Command::Send { room, text, reply_to, file } => {
            let room_session = ChatRoomSession::open(
                Arc::clone(gateway),
                session.user_id,
                RoomId(*room),
                Arc::new(TerminalHost),
                chat_settings.subscribe(),
                settings.page_size,
            )
            .await
            .context("failed to open room")?;
            let sent = if *file {
                room_session.send_file(text).await?
            } else {
                room_session.set_reply_to(reply_to.map(MessageId)).await;
                room_session.set_compose_text(text.as_str()).await;
                room_session
                    .send_text()
                    .await?
                    .ok_or_else(|| anyhow!("nothing to send"))?
            };
            println!("sent {}", sent.id);
        }
        Command::Dm { email } => {
            let target = directory
                .others()
                .await?
                .into_iter()
                .find(|p| p.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
                .ok_or_else(|| anyhow!("no member with email {email}"))?;
            let chat = roster.start_direct_chat(&target).await?;
            let how = match &chat {
                DirectChat::Existing(_) => "existing",
                DirectChat::Rejoined(_) => "rejoined",
                DirectChat::Created(_) => "new",
            };
            println!("{} ({how} chat with {})", chat.room().id, target.display_name());
        }
        Command::Group { name, invite } => {
            let room = roster.create_group_chat(name).await?;
            let others = directory.others().await?;
            for email in invite {
                match others
                    .iter()
                    .find(|p| p.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
                {
                    Some(profile) => roster.invite_member(room.id, profile.id).await?,
                    None => warn!(%email, "no member with that email, skipped"),
                }
            }
            println!("{}", room.id);
        }
        Command::Leave { room } => {
            roster.leave_room(RoomId(*room)).await?;
            println!("left {room}");
        }
        Command::Board { room, post, important } => {
            let board = BoardService::new(Arc::clone(gateway), RoomId(*room), session.user_id);
            if let Some(content) = post {
                board.create(content, *important).await?;
            }
            let names = sender_directory(&directory.everyone().await?);
            for post in board.list_with_authors(&names).await? {
                let author = post
                    .author
                    .as_ref()
                    .and_then(|a| a.name.clone())
                    .unwrap_or_else(|| post.author_id.to_string());
                let flag = if post.is_important { "!" } else { " " };
                println!("{flag} {}  {author}: {}", post.created_at.format("%Y-%m-%d %H:%M"), post.content);
            }
        }
        Command::Settings { action } => run_settings(chat_settings, action.as_ref()).await?,
    }
    Ok(())
}

async fn print_new(room_session: &ChatRoomSession, printed: &mut HashSet<MessageId>) {
    for message in room_session.messages().await {
        if !printed.insert(message.id) {
            continue;
        }
        let unread = room_session.unread_count(&message).await;
        println!("{}", format_line(&message, room_session.user_id(), unread));
    }
}

async fn follow(room_session: &Arc<ChatRoomSession>, printed: &mut HashSet<MessageId>) -> Result<()> {
    let events = room_session.spawn_events().await?;
    let mut ticker = tokio::time::interval(TAIL_POLL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                print_new(room_session, printed).await;
                if room_session.is_closed().await {
                    break;
                }
            }
        }
    }
    events.abort();
    Ok(())
}

fn format_line(message: &MessageRecord, me: UserId, unread: usize) -> String {
    let who = if message.sender_id == me {
        "me"
    } else {
        message.sender_name().unwrap_or(shared::records::UNKNOWN_DISPLAY_NAME)
    };
    let time = message.created_at.format("%H:%M");
    let unread = if unread > 0 { format!(" [{unread}]") } else { String::new() };
    match message.content_type {
        ContentKind::System => format!("{time}  -- {}", message.content),
        ContentKind::File => format!("{time}  {who}: [file] {}{unread}", message.content),
        ContentKind::Text => format!("{time}  {who}: {}{unread}", message.content),
    }
}

async fn run_settings(service: &SettingsService, action: Option<&SettingsAction>) -> Result<()> {
    if let Some(SettingsAction::Set { key, value }) = action {
        let next = with_field(&service.current(), key, value)?;
        service.update(|current| *current = next).await?;
    }
    let current = service.current();
    println!("{}", serde_json::to_string_pretty(&current)?);
    println!(
        "# {} background, font weight {}",
        if current.is_light_background() { "light" } else { "dark" },
        current.font_weight_value()
    );
    Ok(())
}

/// Replace one field of `settings`, reading `value` as JSON when it parses
/// and as a plain string otherwise.
fn with_field(settings: &ChatSettings, key: &str, value: &str) -> Result<ChatSettings> {
    let mut object = match serde_json::to_value(settings)? {
        Value::Object(object) => object,
        _ => bail!("settings are not an object"),
    };
    if !object.contains_key(key) {
        let known: Vec<&str> = object.keys().map(String::as_str).collect();
        bail!("unknown setting '{key}', expected one of {}", known.join(", "));
    }
    let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    object.insert(key.to_owned(), parsed);
    serde_json::from_value(Value::Object(object)).with_context(|| format!("invalid value for {key}"))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
