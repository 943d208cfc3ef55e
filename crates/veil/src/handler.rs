//! Per-connection handler: registration, outbox writer, message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `register` → hand the client to the hub
//!   2. Send `registered`, start the writer task that drains the outbox
//!   3. Loop: receive frames → decode → dispatch to the hub
//!   4. On exit, the presence guard runs departure cleanup
//!
//! Direct replies (`heartbeat-ack`, `stats`, `error`) are written straight
//! to the socket. Everything the hub or a session pushes goes through the
//! client's outbox, so per-client ordering of those notifications is
//! the order they were produced in.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};
use veil_presence::Profile;
use veil_protocol::{
    ClientId, ClientMessage, Codec, Frame, ProtocolError, RelayKind, ServerMessage, unix_millis,
};
use veil_transport::{Connection, ConnectionId, WebSocketConnection};

use crate::VeilError;
use crate::hub::Hub;
use crate::server::ServerState;

/// Drop guard that runs the hub's departure cleanup when the handler
/// exits, however it exits.
///
/// `Drop` is synchronous, so the cleanup is spawned.
struct PresenceGuard {
    client_id: ClientId,
    connection: ConnectionId,
    hub: Hub,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let client_id = self.client_id.clone();
        let connection = self.connection;
        let hub = self.hub.clone();
        tokio::spawn(async move {
            hub.disconnect(&client_id, connection).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), VeilError> {
    let conn = Arc::new(conn);
    let connection = conn.id();
    debug!(%connection, peer = %conn.peer_addr(), "handling new connection");

    // --- Step 1: Registration ---
    let profile = await_register(&conn, &state).await?;
    let client_id = profile.client_id.clone();

    let (outbox, rx) = mpsc::unbounded_channel();
    state.hub.register(profile, connection, outbox).await;
    let _guard = PresenceGuard {
        client_id: client_id.clone(),
        connection,
        hub: state.hub.clone(),
    };

    send(
        &conn,
        &state.codec,
        &ServerMessage::Registered {
            client_id: client_id.clone(),
        },
    )
    .await?;
    let mut writer = tokio::spawn(drain_outbox(Arc::clone(&conn), Arc::clone(&state), rx));

    // --- Step 2: Message loop ---
    loop {
        let received = tokio::select! {
            received = timeout(state.config.idle_timeout, conn.recv()) => received,
            _ = &mut writer => {
                // The registry dropped our outbox: this client id was
                // registered again on another connection.
                info!(%client_id, %connection, "registration superseded, closing");
                break;
            }
        };

        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                info!(%client_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                debug!(%client_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                info!(%client_id, "connection idle, closing");
                break;
            }
        };

        let msg: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%client_id, error = %e, "failed to decode message");
                send_error(&conn, &state.codec, &VeilError::from(e)).await?;
                continue;
            }
        };

        match dispatch(&state.hub, &client_id, msg).await {
            Ok(Some(reply)) => send(&conn, &state.codec, &reply).await?,
            Ok(None) => {}
            Err(e) => {
                debug!(%client_id, error = %e, "request rejected");
                send_error(&conn, &state.codec, &e).await?;
            }
        }
    }

    writer.abort();
    let _ = conn.close().await;
    // _guard drops here → departure cleanup fires.
    Ok(())
}

/// Waits for the `register` message that must open every connection.
async fn await_register<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
) -> Result<Profile, VeilError> {
    let data = match timeout(state.config.register_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before register".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("register timed out".into()).into());
        }
    };

    let msg: ClientMessage = match state.codec.decode(&data) {
        Ok(msg) => msg,
        Err(e) => {
            let err = VeilError::from(e);
            send_error(conn, &state.codec, &err).await?;
            return Err(err);
        }
    };

    let ClientMessage::Register {
        client_id,
        display_name,
        age,
        gender,
    } = msg
    else {
        let err = VeilError::BadRequest("first message must be register".into());
        send_error(conn, &state.codec, &err).await?;
        return Err(err);
    };

    if client_id.as_str().trim().is_empty() {
        let err = VeilError::BadRequest("client_id must not be empty".into());
        send_error(conn, &state.codec, &err).await?;
        return Err(err);
    }

    Ok(Profile {
        client_id,
        display_name,
        age,
        gender,
    })
}

/// Routes one request. Returns the direct reply, if the request has one.
async fn dispatch(
    hub: &Hub,
    me: &ClientId,
    msg: ClientMessage,
) -> Result<Option<ServerMessage>, VeilError> {
    match msg {
        ClientMessage::Register { .. } => {
            return Err(VeilError::BadRequest("already registered".into()));
        }

        ClientMessage::FindMatch { client_id } => {
            if client_id.as_ref().is_some_and(|claimed| claimed != me) {
                debug!(%me, "find-match client_id ignored, using registered id");
            }
            hub.find_match(me).await?;
        }

        ClientMessage::CancelMatch => {
            hub.cancel_match(me).await;
        }

        ClientMessage::CallFriend {
            caller_id,
            caller_name,
            callee_id,
        } => {
            ensure_self(me, &caller_id, "caller_id")?;
            hub.call_friend(me, caller_name, &callee_id).await?;
        }

        ClientMessage::AcceptCall {
            caller_id,
            callee_id,
        } => {
            ensure_self(me, &callee_id, "callee_id")?;
            hub.accept_call(me, &caller_id).await?;
        }

        ClientMessage::RejectCall {
            caller_id,
            callee_id,
        } => {
            ensure_self(me, &callee_id, "callee_id")?;
            hub.reject_call(me, &caller_id).await?;
        }

        ClientMessage::Offer {
            session_id,
            payload,
        } => hub.relay(me, session_id, RelayKind::Offer, payload).await,
        ClientMessage::Answer {
            session_id,
            payload,
        } => hub.relay(me, session_id, RelayKind::Answer, payload).await,
        ClientMessage::Candidate {
            session_id,
            payload,
        } => hub.relay(me, session_id, RelayKind::Candidate, payload).await,

        ClientMessage::Connected { session_id } => hub.connected(me, session_id).await,
        ClientMessage::RevealRequest { session_id } => hub.reveal_request(me, session_id).await,
        ClientMessage::RevealAccept { session_id } => hub.reveal_accept(me, session_id).await,
        ClientMessage::ChatMessage { session_id, text } => {
            hub.chat(me, session_id, text).await;
        }
        ClientMessage::LeaveSession { session_id } => hub.leave_session(me, session_id).await,

        ClientMessage::Report {
            session_id,
            reported_id,
            reason,
            description,
        } => {
            hub.report(me, session_id, reported_id, reason, description)?;
        }

        ClientMessage::GetStats => {
            let stats = hub.stats(me).await?;
            return Ok(Some(ServerMessage::Stats {
                coins: stats.coins,
                total_sessions: stats.total_sessions,
                total_reveals: stats.total_reveals,
            }));
        }

        ClientMessage::Heartbeat { client_time } => {
            return Ok(Some(ServerMessage::HeartbeatAck {
                client_time,
                server_time: unix_millis(),
            }));
        }
    }
    Ok(None)
}

/// Rejects requests that name someone other than the registered client.
fn ensure_self(me: &ClientId, claimed: &ClientId, field: &str) -> Result<(), VeilError> {
    if me == claimed {
        Ok(())
    } else {
        Err(VeilError::BadRequest(format!(
            "{field} {claimed} does not match registered client {me}"
        )))
    }
}

/// Writes everything pushed into the client's outbox, in order, until
/// every sender is gone or the socket fails.
async fn drain_outbox<C: Codec>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<C>>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = send(&conn, &state.codec, &msg).await {
            debug!(connection = %conn.id(), error = %e, "outbox write failed");
            break;
        }
    }
}

async fn send(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    msg: &ServerMessage,
) -> Result<(), VeilError> {
    match codec.encode(msg)? {
        Frame::Text(text) => conn.send_text(&text).await?,
        Frame::Binary(bytes) => conn.send(&bytes).await?,
    }
    Ok(())
}

/// Sends an `error` message carrying the error's status code.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    err: &VeilError,
) -> Result<(), VeilError> {
    send(
        conn,
        codec,
        &ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        },
    )
    .await
}
