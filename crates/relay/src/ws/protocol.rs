use axum::extract::ws::{Message, WebSocket};
use huddle_common::protocol::ws::{ClientEvent, ServerEvent};

pub fn decode_event(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<ClientEvent>(raw)
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::{decode_event, encode_event};
    use huddle_common::protocol::ws::{ClientEvent, ServerEvent};
    use huddle_common::room::RoomId;

    #[test]
    fn decodes_typing_events() {
        let event = decode_event(r#"{"type":"typing-start","roomId":"demo"}"#)
            .expect("typing-start should decode");
        assert_eq!(
            event,
            ClientEvent::TypingStart { room_id: RoomId::parse("demo").expect("valid room") }
        );
    }

    #[test]
    fn rejects_payloads_without_room() {
        assert!(decode_event(r#"{"type":"chat-message","content":"hi"}"#).is_err());
        assert!(decode_event("not json").is_err());
    }

    #[test]
    fn encodes_operation_error_without_room() {
        let encoded = encode_event(&ServerEvent::OperationError {
            code: "INVALID_MESSAGE".to_string(),
            message: "bad".to_string(),
            room_id: None,
        })
        .expect("event should encode");

        assert_eq!(encoded, r#"{"type":"operation-error","code":"INVALID_MESSAGE","message":"bad"}"#);
    }
}
