/// Workspace controller scenarios against a fake backend and fake rooms
mod support;

use friday_core::models::{Agent, Attachment};
use friday_core::realtime::{ChannelEvent, InboxEvent, RoomName};
use friday_core::transcript::TranscriptItem;
use friday_core::workspace::{Compose, SendOutcome};
use friday_core::{FridayError, Workspace};
use chrono::FixedOffset;
use std::sync::Arc;
use support::*;

const CONVERSATIONS: &str = "GET /users/42/conversations";

fn backend_with_agents(agents: Vec<Agent>) -> Arc<FakeBackend> {
    let backend = Arc::new(FakeBackend::new());
    backend.with(|s| s.subscriptions = vec![subscription(1, 1, agents)]);
    backend
}

async fn enter(backend: &Arc<FakeBackend>, transport: &Arc<FakeTransport>) -> Workspace {
    Workspace::enter(Some(session()), backend.clone(), transport.clone(), &config())
        .await
        .unwrap()
}

/// Deliver the next queued realtime event to the workspace.
async fn pump(workspace: &mut Workspace) {
    let event = workspace.next_event().await.expect("event channel closed");
    workspace.handle_event(event).await;
}

#[tokio::test]
async fn test_enter_without_session_does_nothing() {
    let backend = Arc::new(FakeBackend::new());
    let transport = Arc::new(FakeTransport::new());

    let result = Workspace::enter(None, backend.clone(), transport.clone(), &config()).await;

    assert!(matches!(result, Err(FridayError::NotAuthenticated)));
    assert!(backend.calls().is_empty());
    assert!(transport.opened().is_empty());
}

#[tokio::test]
async fn test_enter_loads_agents_conversations_and_inbox() {
    let backend = backend_with_agents(vec![agent(1, "agentA"), agent(2, "agentB")]);
    backend.with(|s| s.conversations = vec![conversation(3, vec![])]);
    let transport = Arc::new(FakeTransport::new());

    let workspace = enter(&backend, &transport).await;

    assert_eq!(workspace.agents().len(), 2);
    assert!(workspace.active_agent().is_none());
    assert_eq!(workspace.conversations().len(), 1);
    assert!(workspace.selected_conversation().is_none());
    assert_eq!(transport.opened(), vec![RoomName::Inbox(42)]);
    assert!(!workspace.is_loading());
}

#[tokio::test]
async fn test_enter_survives_catalog_and_room_failures() {
    let backend = Arc::new(FakeBackend::new());
    backend.with(|s| {
        s.fail_subscriptions = true;
        s.fail_conversations = true;
    });
    let transport = Arc::new(FakeTransport::new());
    transport.refuse(RoomName::Inbox(42));

    let mut workspace = enter(&backend, &transport).await;

    assert!(workspace.agents().is_empty());
    assert!(workspace.conversations().is_empty());
    let notices = workspace.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].status, 0);
}

#[tokio::test]
async fn test_first_message_starts_conversation() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| {
        s.after_send = Some(vec![conversation(10, vec![message(1, 10, "Hello")])]);
    });
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_agent(1).await.unwrap();
    workspace.set_compose_text("Hello");
    let outcome = workspace.send_message().await.unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    let sent = backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Hello");
    assert_eq!(sent[0].conversation_id, None);
    assert_eq!(sent[0].link, "agentA");

    let calls = backend.calls();
    let post = calls.iter().position(|c| c == "POST /messages").unwrap();
    assert_eq!(calls[post + 1], CONVERSATIONS);

    assert_eq!(workspace.selected_conversation().map(|c| c.id), Some(10));
    assert_eq!(workspace.joined_conversation(), Some(10));
    assert_eq!(workspace.compose(), &Compose::default());
    assert!(!workspace.is_sending());
}

#[tokio::test]
async fn test_send_in_selected_conversation_keeps_selection() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| s.conversations = vec![conversation(4, vec![]), conversation(7, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_agent(1).await.unwrap();
    assert!(workspace.select_conversation(Some(7)).await);
    workspace.set_compose_text("again");
    workspace.send_message().await.unwrap();

    assert_eq!(backend.sent()[0].conversation_id, Some(7));
    assert_eq!(workspace.selected_conversation().map(|c| c.id), Some(7));
}

#[tokio::test]
async fn test_inbox_new_conversation_selects_first() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    assert!(workspace.conversations().is_empty());

    workspace.set_compose_text("draft");
    backend.with(|s| s.conversations = vec![conversation(5, vec![]), conversation(3, vec![])]);
    transport.push(
        &RoomName::Inbox(42),
        ChannelEvent::Inbox(InboxEvent::NewConversation),
    );
    pump(&mut workspace).await;

    assert_eq!(backend.calls().last().map(String::as_str), Some(CONVERSATIONS));
    assert_eq!(workspace.selected_conversation().map(|c| c.id), Some(5));
    assert_eq!(workspace.compose().text, "");
    assert!(transport.is_open(&RoomName::Conversation(5)));
}

#[tokio::test]
async fn test_send_then_inbox_event_leaves_one_selection() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| s.after_send = Some(vec![conversation(11, vec![message(1, 11, "hi")])]));
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_agent(1).await.unwrap();
    workspace.set_compose_text("hi");
    workspace.send_message().await.unwrap();

    // Backend announces the same conversation after the refetch already saw it
    transport.push(
        &RoomName::Inbox(42),
        ChannelEvent::Inbox(InboxEvent::NewConversation),
    );
    pump(&mut workspace).await;

    let selected = workspace.selected_conversation().unwrap();
    assert_eq!(selected.id, 11);
    assert!(workspace.conversations().iter().any(|c| c.id == selected.id));
    assert!(transport.is_open(&RoomName::Conversation(11)));
    assert_eq!(
        transport
            .opened()
            .iter()
            .filter(|r| **r == RoomName::Conversation(11))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_room_message_appends_to_selected() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| {
        s.conversations = vec![
            conversation(7, vec![message(1, 7, "first")]),
            conversation(8, vec![message(2, 8, "elsewhere")]),
        ]
    });
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    assert!(workspace.select_conversation(Some(7)).await);

    transport.push(
        &RoomName::Conversation(7),
        ChannelEvent::RoomMessage {
            room: 7,
            message: message(3, 7, "reply"),
        },
    );
    pump(&mut workspace).await;

    let listed = workspace.conversations().iter().find(|c| c.id == 7).unwrap();
    assert_eq!(listed.messages.len(), 2);
    let selected = workspace.selected_conversation().unwrap();
    assert_eq!(selected.messages.len(), 2);
    assert_eq!(selected.messages[1].content, "reply");

    let other = workspace.conversations().iter().find(|c| c.id == 8).unwrap();
    assert_eq!(other.messages.len(), 1);
    assert_eq!(backend.count(CONVERSATIONS), 1);
}

#[tokio::test]
async fn test_message_for_unknown_conversation_refetches() {
    let backend = backend_with_agents(vec![]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_conversation(Some(7)).await;

    backend.with(|s| s.conversations = vec![conversation(9, vec![]), conversation(7, vec![])]);
    transport.push(
        &RoomName::Conversation(7),
        ChannelEvent::RoomMessage {
            room: 7,
            message: message(5, 9, "stray"),
        },
    );
    pump(&mut workspace).await;

    assert_eq!(backend.count(CONVERSATIONS), 2);
    assert_eq!(workspace.conversations().len(), 2);
    assert_eq!(workspace.selected_conversation().map(|c| c.id), Some(7));
}

#[tokio::test]
async fn test_transcript_matches_selected_messages() {
    let messages = vec![message(5, 2, "b"), message(3, 2, "a"), message(9, 2, "c")];
    let backend = backend_with_agents(vec![]);
    backend.with(|s| {
        s.conversations = vec![
            conversation(1, vec![]),
            conversation(2, messages.clone()),
            conversation(3, vec![]),
        ]
    });
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    let utc = FixedOffset::east_opt(0).unwrap();
    assert!(workspace.transcript(&utc).is_empty());

    workspace.select_conversation(Some(2)).await;
    let rendered: Vec<String> = workspace
        .transcript(&utc)
        .into_iter()
        .filter_map(|item| match item {
            TranscriptItem::Message(entry) => Some(entry.content),
            TranscriptItem::DaySeparator(_) => None,
        })
        .collect();
    assert_eq!(rendered, vec!["b", "a", "c"]);
}

#[tokio::test]
async fn test_switching_agent_resets_compose() {
    let backend = backend_with_agents(vec![agent(1, "agentA"), agent(2, "agentB")]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_agent(1).await.unwrap();
    workspace.select_conversation(Some(7)).await;
    workspace.set_compose_text("half written");
    workspace.attach(Attachment::new("notes.txt", b"x".to_vec()).unwrap());

    workspace.select_agent(2).await.unwrap();

    assert_eq!(workspace.active_agent().map(|a| a.link.as_str()), Some("agentB"));
    assert_eq!(workspace.compose().text, "");
    assert!(workspace.compose().attachment.is_none());
    assert!(workspace.selected_conversation().is_none());
    assert!(!transport.is_open(&RoomName::Conversation(7)));
    assert_eq!(workspace.joined_conversation(), None);
}

#[tokio::test]
async fn test_unknown_agent_is_rejected() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    assert!(matches!(
        workspace.select_agent(99).await,
        Err(FridayError::Validation(_))
    ));
    assert!(workspace.active_agent().is_none());
}

#[tokio::test]
async fn test_whitespace_send_is_noop() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_agent(1).await.unwrap();

    workspace.set_compose_text("  \n\t ");
    let outcome = workspace.send_message().await.unwrap();

    assert_eq!(outcome, SendOutcome::Empty);
    assert!(backend.sent().is_empty());
    assert!(!workspace.is_sending());
    assert_eq!(workspace.compose().text, "  \n\t ");
}

#[tokio::test]
async fn test_send_requires_agent() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.set_compose_text("Hello");
    assert!(matches!(
        workspace.send_message().await,
        Err(FridayError::Validation(_))
    ));
    assert!(backend.sent().is_empty());
}

#[tokio::test]
async fn test_send_requires_agent_link() {
    let backend = backend_with_agents(vec![agent(1, "")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_agent(1).await.unwrap();

    workspace.set_compose_text("Hello");
    assert!(matches!(
        workspace.send_message().await,
        Err(FridayError::Validation(_))
    ));
    assert!(backend.sent().is_empty());
    assert!(!workspace.is_sending());
    assert_eq!(workspace.compose().text, "Hello");
}

#[tokio::test]
async fn test_send_failure_keeps_compose() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| s.fail_send = Some((500, "Agent unreachable".to_string())));
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_agent(1).await.unwrap();
    workspace.set_compose_text("Hello");
    workspace.attach(Attachment::new("photo.png", vec![1, 2, 3]).unwrap());
    let outcome = workspace.send_message().await.unwrap();

    assert_eq!(
        outcome,
        SendOutcome::Failed {
            status: 500,
            message: "Agent unreachable".to_string()
        }
    );
    assert_eq!(workspace.compose().text, "Hello");
    assert!(workspace.compose().attachment.is_some());
    assert!(!workspace.is_sending());
    assert_eq!(backend.count(CONVERSATIONS), 1);

    let notices = workspace.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].status, 500);
    assert!(workspace.take_notices().is_empty());
}

#[tokio::test]
async fn test_send_while_sending_is_refused() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_agent(1).await.unwrap();
    workspace.set_compose_text("Hello");

    let flag = workspace.sending_flag();
    let held = flag.try_acquire().unwrap();
    assert_eq!(
        workspace.send_message().await.unwrap(),
        SendOutcome::AlreadySending
    );
    assert!(backend.sent().is_empty());

    drop(held);
    assert_eq!(workspace.send_message().await.unwrap(), SendOutcome::Sent);
}

#[tokio::test]
async fn test_attachment_is_sent() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_agent(1).await.unwrap();

    workspace.attach(Attachment::new("report.pdf", b"%PDF".to_vec()).unwrap());
    workspace.set_compose_text("see attached");
    workspace.send_message().await.unwrap();

    let sent = backend.sent();
    assert_eq!(
        sent[0].attachment.as_ref().map(|a| a.file_name.as_str()),
        Some("report.pdf")
    );
    assert!(workspace.compose().attachment.is_none());
}

#[tokio::test]
async fn test_selection_switches_rooms() {
    let backend = backend_with_agents(vec![]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![]), conversation(8, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_conversation(Some(7)).await;
    workspace.select_conversation(Some(8)).await;
    assert!(!transport.is_open(&RoomName::Conversation(7)));
    assert!(transport.is_open(&RoomName::Conversation(8)));

    assert!(!workspace.select_conversation(Some(99)).await);
    assert_eq!(workspace.selected_conversation().map(|c| c.id), Some(8));

    workspace.new_conversation().await;
    assert!(!transport.is_open(&RoomName::Conversation(8)));
    assert!(transport.is_open(&RoomName::Inbox(42)));
}

#[tokio::test]
async fn test_dropped_room_reopens_on_reselect() {
    let backend = backend_with_agents(vec![]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_conversation(Some(7)).await;

    transport.drop_room(&RoomName::Conversation(7));
    pump(&mut workspace).await;
    assert_eq!(workspace.joined_conversation(), None);

    workspace.select_conversation(Some(7)).await;
    assert_eq!(workspace.joined_conversation(), Some(7));
    assert_eq!(
        transport
            .opened()
            .iter()
            .filter(|r| **r == RoomName::Conversation(7))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_voice_widget_variables() {
    let mut voiced = agent(1, "agentA");
    voiced.eleven_labs_id = Some("el-voice-1".to_string());
    let backend = backend_with_agents(vec![voiced, agent(2, "agentB")]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    assert!(workspace.voice_widget().is_none());

    workspace.select_agent(1).await.unwrap();
    let widget = workspace.voice_widget().unwrap();
    assert_eq!(widget.agent_id, "el-voice-1");
    assert_eq!(widget.dynamic_variables.user_id, 42);
    assert_eq!(widget.dynamic_variables.user_email, "ada@example.com");

    workspace.select_agent(2).await.unwrap();
    assert!(workspace.voice_widget().is_none());
}

#[tokio::test]
async fn test_previews_follow_room_messages() {
    let backend = backend_with_agents(vec![]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![message(1, 7, "old")])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_conversation(Some(7)).await;

    transport.push(
        &RoomName::Conversation(7),
        ChannelEvent::RoomMessage {
            room: 7,
            message: message(2, 7, "new"),
        },
    );
    pump(&mut workspace).await;

    let previews = workspace.previews();
    assert_eq!(previews[0].last_content.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_leave_closes_rooms() {
    let backend = backend_with_agents(vec![agent(1, "agentA")]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;
    workspace.select_conversation(Some(7)).await;

    workspace.leave().await;

    assert!(!transport.is_open(&RoomName::Inbox(42)));
    assert!(!transport.is_open(&RoomName::Conversation(7)));
    assert!(workspace.conversations().is_empty());
    assert!(workspace.selected_conversation().is_none());
}

#[tokio::test]
async fn test_late_close_of_old_room_keeps_live_room() {
    let backend = backend_with_agents(vec![]);
    backend.with(|s| s.conversations = vec![conversation(7, vec![]), conversation(8, vec![])]);
    let transport = Arc::new(FakeTransport::new());
    let mut workspace = enter(&backend, &transport).await;

    workspace.select_conversation(Some(7)).await;
    let first = transport.generation(&RoomName::Conversation(7));
    workspace.select_conversation(Some(8)).await;
    workspace.select_conversation(Some(7)).await;

    // The first room 7 connection reports its drop only now
    transport.push(
        &RoomName::Conversation(7),
        ChannelEvent::Closed {
            room: RoomName::Conversation(7),
            generation: first,
        },
    );
    pump(&mut workspace).await;

    assert_eq!(workspace.joined_conversation(), Some(7));
    assert!(transport.is_open(&RoomName::Conversation(7)));
}
