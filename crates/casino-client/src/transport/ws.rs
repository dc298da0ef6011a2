//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use casino_core::ClientError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{Connector, TransportFrame, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects with `ws://` or `wss://` URLs.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, ClientError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("connect {url}: {e}")))?;
        debug!(url, "websocket open");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        drop(tokio::spawn(pump(ws, outbound_rx, inbound_tx)));

        Ok(TransportLink { outbound, inbound })
    }
}

/// Move frames between the socket and the link channels until either side
/// goes away. Always finishes with [`TransportFrame::Closed`].
async fn pump(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportFrame>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    // link dropped by the client
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "websocket send failed");
                    let _ = inbound.send(TransportFrame::Fault(e.to_string()));
                    break;
                }
            }
            msg = stream.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => TransportFrame::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => {
                        TransportFrame::Text(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!(?reason, "websocket closed by server");
                        // flush the queued close reply to finish the handshake
                        let _ = sink.close().await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive failed");
                        let _ = inbound.send(TransportFrame::Fault(e.to_string()));
                        break;
                    }
                    None => break,
                };
                if inbound.send(frame).is_err() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    let _ = inbound.send(TransportFrame::Closed);
}
