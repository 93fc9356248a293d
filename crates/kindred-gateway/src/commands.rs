use tracing::{debug, trace, warn};
use uuid::Uuid;

use kindred_core::delivery::OutgoingMessage;
use kindred_core::presence::ConnId;
use kindred_core::{KindredError, Services};
use kindred_types::events::{GatewayCommand, GatewayEvent};

/// Run one command. A failure is reported only to the connection that sent
/// it, carrying the ids the client needs to roll back.
pub async fn handle_command(
    services: &Services,
    user_id: Uuid,
    conn_id: ConnId,
    cmd: GatewayCommand,
) {
    let name = cmd.name();
    let (temp_id, message_id) = cmd.correlation();

    let Err(err) = run(services, user_id, conn_id, cmd).await else {
        trace!(%user_id, command = name, "Command handled");
        return;
    };

    match &err {
        KindredError::Internal(e) => warn!(%user_id, command = name, "Command failed: {:#}", e),
        other => debug!(%user_id, command = name, "Command rejected: {}", other),
    }
    let event = GatewayEvent::CommandError {
        command: name.to_string(),
        code: err.code(),
        reason: err.public_reason(),
        temp_id,
        message_id,
    };
    services.presence.send_to_connection(user_id, conn_id, event).await;
}

async fn run(
    services: &Services,
    user_id: Uuid,
    conn_id: ConnId,
    cmd: GatewayCommand,
) -> kindred_core::Result<()> {
    let delivery = &services.delivery;

    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::SendMessage {
            receiver_id,
            temp_id,
            kind,
            content,
            media,
            reply_to_id,
        } => {
            let outgoing = OutgoingMessage {
                receiver_id,
                temp_id,
                kind,
                content,
                media,
                reply_to_id,
            };
            delivery.send(user_id, outgoing).await?;
        }

        GatewayCommand::AckDelivered { message_id } => {
            delivery.ack_delivered(user_id, message_id).await?
        }

        GatewayCommand::MarkRead { conversation_id } => {
            delivery.mark_read(user_id, &conversation_id).await?;
        }

        GatewayCommand::PinMessage { message_id, pin } => {
            delivery.set_pinned(user_id, message_id, pin).await?
        }

        GatewayCommand::StarMessage { message_id, star } => {
            delivery.set_starred(user_id, message_id, star).await?
        }

        GatewayCommand::DeleteMessage {
            message_id,
            for_everyone,
        } => delivery.delete(user_id, message_id, for_everyone).await?,

        GatewayCommand::Typing { receiver_id, is_typing } => {
            delivery.typing(user_id, receiver_id, is_typing).await?
        }

        GatewayCommand::Recording {
            receiver_id,
            is_recording,
        } => delivery.recording(user_id, receiver_id, is_recording).await?,

        GatewayCommand::JoinChat { receiver_id } => delivery.join_chat(user_id, receiver_id).await?,

        GatewayCommand::LeaveChat { receiver_id } => {
            delivery.leave_chat(user_id, receiver_id).await?
        }

        GatewayCommand::ChatPresenceAck { receiver_id } => {
            delivery.presence_ack(user_id, receiver_id).await?
        }

        GatewayCommand::UpdateLocation { latitude, longitude } => {
            services
                .proximity
                .on_location_update(user_id, latitude, longitude)
                .await?;
        }

        GatewayCommand::ToggleConnectNow { enabled } => {
            services.proximity.set_connect_now(user_id, enabled).await?;
        }

        GatewayCommand::SubscribePresence { user_id: target } => {
            delivery.subscribe_presence(user_id, conn_id, target).await?
        }

        GatewayCommand::UnsubscribePresence { user_id: target } => {
            services.presence.unsubscribe(conn_id, target).await
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kindred_core::Settings;
    use kindred_core::notify::RecordingDispatcher;
    use kindred_db::{Database, ProfileRow};
    use kindred_types::events::ErrorCode;
    use kindred_types::models::SwipeAction;

    fn services(n: usize) -> (Services, Vec<Uuid>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let users = (0..n)
            .map(|_| {
                let mut row = ProfileRow::new(Uuid::new_v4());
                row.onboarding_completed = true;
                db.upsert_profile(&row).unwrap();
                row.id
            })
            .collect();
        let notifier = Arc::new(RecordingDispatcher::new());
        (Services::new(db, notifier, Settings::default()), users)
    }

    #[tokio::test]
    async fn test_rejected_send_reaches_only_origin_connection() {
        let (services, users) = services(2);
        let (a, b) = (users[0], users[1]);
        services.matches.swipe(a, b, SwipeAction::Like).await.unwrap();

        let (origin, mut origin_rx) = services.presence.register(a).await;
        let (_other, mut other_rx) = services.presence.register(a).await;

        let cmd = GatewayCommand::SendMessage {
            receiver_id: b,
            temp_id: "t7".into(),
            kind: kindred_types::models::MessageKind::Text,
            content: Some("too soon".into()),
            media: None,
            reply_to_id: None,
        };
        handle_command(&services, a, origin, cmd).await;

        match origin_rx.try_recv() {
            Ok(GatewayEvent::CommandError {
                command,
                code,
                reason,
                temp_id,
                ..
            }) => {
                assert_eq!(command, "SendMessage");
                assert_eq!(code, ErrorCode::StateConflict);
                assert_eq!(reason, "match not active");
                assert_eq!(temp_id.as_deref(), Some("t7"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_uses_connection() {
        let (services, users) = services(2);
        let (a, b) = (users[0], users[1]);
        services.matches.swipe(a, b, SwipeAction::Like).await.unwrap();
        services.matches.swipe(b, a, SwipeAction::Like).await.unwrap();
        let (conn, mut rx) = services.presence.register(a).await;
        while rx.try_recv().is_ok() {}

        let cmd = GatewayCommand::SubscribePresence { user_id: b };
        handle_command(&services, a, conn, cmd).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(GatewayEvent::UserStatusChange { user_id, online: false }) if user_id == b
        ));
    }

    #[tokio::test]
    async fn test_subscribe_to_stranger_is_rejected() {
        let (services, users) = services(2);
        let (a, b) = (users[0], users[1]);
        let (conn, mut rx) = services.presence.register(a).await;

        let cmd = GatewayCommand::SubscribePresence { user_id: b };
        handle_command(&services, a, conn, cmd).await;
        match rx.try_recv() {
            Ok(GatewayEvent::CommandError { command, code, .. }) => {
                assert_eq!(command, "SubscribePresence");
                assert_eq!(code, ErrorCode::StateConflict);
            }
            other => panic!("unexpected {other:?}"),
        }

        // b coming online must not reach a
        let (_b_conn, _b_rx) = services.presence.register(b).await;
        assert!(rx.try_recv().is_err());
    }
}
