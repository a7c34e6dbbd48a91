//! WebSocket transport: the `rocket_ws` route and the per-connection
//! read/write loop (spec §4.7), grounded on
//! `collabkit/server.py::CollabkitServer._handle_connection`'s
//! receive-with-timeout / rate-limit / size-cap / dispatch sequence.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rocket::{get, State};
use tokio::sync::mpsc;

use crate::protocol::{parse_client_message, ErrorCode, ServerMessage};
use crate::session::{Dispatcher, Session};

#[get("/ws")]
pub fn ws_connect(ws: rocket_ws::WebSocket, dispatcher: &State<Arc<Dispatcher>>) -> rocket_ws::Channel<'static> {
    let dispatcher = dispatcher.inner().clone();
    ws.channel(move |stream| {
        Box::pin(async move {
            let (mut write, mut read) = stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
            let session = Arc::new(Session::new(tx, &dispatcher.config));
            let message_timeout = std::time::Duration::from_secs_f64(dispatcher.config.message_timeout_secs.max(0.1));

            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(msg) = outgoing else { break };
                        let Ok(text) = serde_json::to_string(&msg) else { continue };
                        if write.send(rocket_ws::Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    incoming = tokio::time::timeout(message_timeout, read.next()) => {
                        match incoming {
                            Err(_elapsed) => {
                                let ping = serde_json::to_string(&ServerMessage::Ping).expect("ping serializes");
                                if write.send(rocket_ws::Message::Text(ping)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Ok(Some(Err(_))) => break,
                            Ok(Some(Ok(rocket_ws::Message::Close(_)))) => break,
                            Ok(Some(Ok(rocket_ws::Message::Text(text)))) => {
                                handle_frame(&dispatcher, &session, &mut write, text).await;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                }
            }

            dispatcher.cleanup_connection(&session).await;
            Ok(())
        })
    })
}

async fn handle_frame<W>(dispatcher: &Arc<Dispatcher>, session: &Arc<Session>, write: &mut W, text: String)
where
    W: futures_util::Sink<rocket_ws::Message> + Unpin,
{
    if text.len() > dispatcher.config.max_message_size {
        let _ = send_direct(write, ServerMessage::error(ErrorCode::InvalidMessage, "Message exceeds the maximum size.")).await;
        return;
    }
    if !session.rate_limiter.is_allowed() {
        let _ = send_direct(write, ServerMessage::error(ErrorCode::RateLimited, "Rate limit exceeded, slow down.")).await;
        return;
    }
    match parse_client_message(&text) {
        Ok(message) => dispatcher.handle_message(session, message).await,
        Err(e) => {
            let _ = send_direct(write, ServerMessage::error(ErrorCode::InvalidMessage, e.to_string())).await;
        }
    }
}

async fn send_direct<W>(write: &mut W, msg: ServerMessage) -> Result<(), ()>
where
    W: futures_util::Sink<rocket_ws::Message> + Unpin,
{
    let text = serde_json::to_string(&msg).map_err(|_| ())?;
    write.send(rocket_ws::Message::Text(text)).await.map_err(|_| ())
}
