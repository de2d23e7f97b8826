use crate::service::TuneService;
use crate::viewer::ViewerSession;
use futures::channel::mpsc;
use futures::{future, stream, StreamExt};
use log::info;
use tide::Request;
use tide_websockets::{Message, WebSocketConnection};
use tunesmith_core::protocol::{GenerationEvent, ServerMessage};

enum Inbound {
    Frame(String),
    Event(GenerationEvent),
    Closed,
}

/// One websocket connection. Client frames and hub events are merged into a
/// single loop, so the session is only ever touched from this task.
pub async fn serve_connection(
    req: Request<TuneService>,
    stream: WebSocketConnection,
) -> tide::Result<()> {
    let presented = req
        .url()
        .query_pairs()
        .find(|(key, _)| key == "session")
        .map(|(_, value)| value.into_owned());
    let session_id = ViewerSession::resolve_id(presented.as_deref());
    let (mailbox, events) = mpsc::unbounded();
    let mut session = ViewerSession::new(session_id, req.state().clone(), mailbox);
    info!("viewer {} connected", session_id);

    send(&stream, &session.greeting()).await?;

    let frames = stream
        .clone()
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Inbound::Frame(text)),
                Ok(Message::Close(_)) | Err(_) => Some(Inbound::Closed),
                Ok(_) => None,
            })
        })
        .chain(stream::once(future::ready(Inbound::Closed)));
    let inbound = stream::select(frames, events.map(Inbound::Event));
    futures::pin_mut!(inbound);

    while let Some(item) = inbound.next().await {
        let outgoing = match item {
            Inbound::Frame(text) => session.handle_frame(&text),
            Inbound::Event(event) => session.on_event(event).into_iter().collect(),
            Inbound::Closed => break,
        };
        for message in &outgoing {
            send(&stream, message).await?;
        }
    }

    session.teardown();
    info!("viewer {} disconnected", session_id);
    Ok(())
}

async fn send(stream: &WebSocketConnection, message: &ServerMessage) -> tide::Result<()> {
    stream.send_string(serde_json::to_string(message)?).await?;
    Ok(())
}
