use chrono::Utc;
use huddle_common::protocol::ws::{ClientEvent, ServerEvent, CURRENT_PROTOCOL_VERSION};
use huddle_common::room::RoomId;
use huddle_common::types::{
    ChatMessage, DocumentState, Identity, MemberSummary, MessageKind, PresenceSnapshot,
};
use serde_json::Value;

fn demo_room() -> RoomId {
    RoomId::parse("demo").expect("demo is a valid room id")
}

fn ada() -> Identity {
    Identity::new("user-ada", "Ada")
}

#[test]
fn protocol_version_is_huddle_v1() {
    assert_eq!(CURRENT_PROTOCOL_VERSION, "huddle.v1");
}

#[test]
fn client_event_shapes_match_contract() {
    let samples = [
        (
            ClientEvent::Authenticate { credential: "token".to_string() },
            "authenticate",
            &["type", "credential"][..],
        ),
        (ClientEvent::JoinRoom { room_id: demo_room() }, "join-room", &["type", "roomId"][..]),
        (
            ClientEvent::ChatMessage { content: "hello".to_string(), room_id: demo_room() },
            "chat-message",
            &["type", "content", "roomId"][..],
        ),
        (
            ClientEvent::EditorUpdate {
                content: "foo".to_string(),
                room_id: demo_room(),
                observed_version: Some(1),
            },
            "editor-update",
            &["type", "content", "roomId", "observedVersion"][..],
        ),
        (ClientEvent::TypingStart { room_id: demo_room() }, "typing-start", &["type", "roomId"][..]),
        (ClientEvent::TypingStop { room_id: demo_room() }, "typing-stop", &["type", "roomId"][..]),
    ];

    for (event, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(&event).expect("client event should serialize");
        assert_eq!(value["type"], expected_type);
        assert_eq!(event.name(), expected_type);
        assert_eq!(object_keys(&value), sorted(expected_keys));
    }
}

#[test]
fn server_event_shapes_match_contract() {
    let now = Utc::now();
    let message = ChatMessage {
        id: "msg-1".to_string(),
        content: "hello".to_string(),
        sender: ada(),
        kind: MessageKind::Text,
        created_at: now,
    };

    let samples = [
        (
            ServerEvent::Authenticated { identity: ada() },
            "authenticated",
            &["type", "identity"][..],
        ),
        (
            ServerEvent::AuthError { reason: "Invalid token".to_string() },
            "auth-error",
            &["type", "reason"][..],
        ),
        (
            ServerEvent::MemberJoined { identity: ada(), new_count: 2 },
            "member-joined",
            &["type", "identity", "newCount"][..],
        ),
        (
            ServerEvent::MemberLeft { identity: ada(), new_count: 1 },
            "member-left",
            &["type", "identity", "newCount"][..],
        ),
        (
            ServerEvent::PresenceSnapshot(PresenceSnapshot {
                room_id: demo_room(),
                room_name: "Demo".to_string(),
                count: 1,
                members: vec![MemberSummary {
                    id: "user-ada".to_string(),
                    display_name: "Ada".to_string(),
                }],
            }),
            "presence-snapshot",
            &["type", "roomId", "roomName", "count", "members"][..],
        ),
        (
            ServerEvent::ChatHistory { room_id: demo_room(), messages: vec![message.clone()] },
            "chat-history",
            &["type", "roomId", "messages"][..],
        ),
        (
            ServerEvent::MessagePosted(message),
            "message-posted",
            &["type", "id", "content", "sender", "kind", "createdAt"][..],
        ),
        (
            ServerEvent::PostAck { message_id: "msg-1".to_string(), timestamp: now },
            "post-ack",
            &["type", "messageId", "timestamp"][..],
        ),
        (
            ServerEvent::DocumentState(DocumentState::initial(now)),
            "document-state",
            &["type", "content", "version", "lastEditedBy", "lastEditedAt"][..],
        ),
        (
            ServerEvent::TypingChanged { identity: ada(), is_typing: true },
            "typing-changed",
            &["type", "identity", "isTyping"][..],
        ),
        (
            ServerEvent::OperationError {
                code: "VALIDATION_FAILED".to_string(),
                message: "too long".to_string(),
                room_id: Some(demo_room()),
            },
            "operation-error",
            &["type", "code", "message", "roomId"][..],
        ),
    ];

    for (event, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(&event).expect("server event should serialize");
        assert_eq!(value["type"], expected_type);
        assert_eq!(event.name(), expected_type);
        assert_eq!(object_keys(&value), sorted(expected_keys), "keys of `{expected_type}`");
    }
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let editor_update = ClientEvent::EditorUpdate {
        content: String::new(),
        room_id: demo_room(),
        observed_version: None,
    };
    let error_without_room = ServerEvent::OperationError {
        code: "INVALID_MESSAGE".to_string(),
        message: "invalid event payload".to_string(),
        room_id: None,
    };

    let editor_json = serde_json::to_value(editor_update).expect("editor update serializes");
    let error_json = serde_json::to_value(error_without_room).expect("error serializes");
    let identity_json =
        serde_json::to_value(ServerEvent::Authenticated { identity: ada() }).expect("serializes");

    assert!(!object_keys(&editor_json).contains(&"observedVersion".to_string()));
    assert!(!object_keys(&error_json).contains(&"roomId".to_string()));
    assert!(identity_json["identity"].get("avatarRef").is_none());
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn sorted(keys: &[&str]) -> Vec<String> {
    let mut keys = keys.iter().map(|key| key.to_string()).collect::<Vec<_>>();
    keys.sort();
    keys
}
