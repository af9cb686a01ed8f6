//! Duplex stream halves for the `Game` RPC
//!
//! A session uses its client stream from two tasks at once: the controller
//! writes responses while the press receiver drains requests. The two halves
//! are therefore separate traits, implemented for the split WebSocket
//! connection in production and for plain channels in tests, which stand in
//! for a real client the same way the original service was exercised against
//! a mocked stream.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use shared::{Request, Response};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::Error;

/// The outbound half: responses to the connected client.
#[async_trait]
pub trait ResponseSink: Send {
    async fn send(&mut self, response: Response) -> Result<(), Error>;
}

/// The inbound half: requests from the connected client. `Ok(None)` means
/// the client closed the stream.
#[async_trait]
pub trait RequestSource: Send {
    async fn recv(&mut self) -> Result<Option<Request>, Error>;
}

/// Outbound half of an accepted WebSocket connection.
pub struct WsSink {
    inner: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
}

/// Inbound half of an accepted WebSocket connection.
pub struct WsSource {
    inner: SplitStream<WebSocketStream<TcpStream>>,
}

/// Split an accepted connection into its two session-facing halves.
pub fn split(ws: WebSocketStream<TcpStream>) -> (WsSink, WsSource) {
    let (sink, stream) = ws.split();
    (WsSink { inner: sink }, WsSource { inner: stream })
}

#[async_trait]
impl ResponseSink for WsSink {
    async fn send(&mut self, response: Response) -> Result<(), Error> {
        let data = bincode::serialize(&response)?;
        self.inner
            .send(WsMessage::Binary(data))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[async_trait]
impl RequestSource for WsSource {
    async fn recv(&mut self) -> Result<Option<Request>, Error> {
        while let Some(frame) = self.inner.next().await {
            match frame.map_err(|e| Error::Transport(e.to_string()))? {
                WsMessage::Binary(data) => {
                    let request = bincode::deserialize(&data)
                        .map_err(|e| Error::Protocol(format!("undecodable request frame: {e}")))?;
                    return Ok(Some(request));
                }
                WsMessage::Close(_) => return Ok(None),
                // Control frames carry no requests.
                _ => {}
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ResponseSink for mpsc::Sender<Response> {
    async fn send(&mut self, response: Response) -> Result<(), Error> {
        mpsc::Sender::send(self, response)
            .await
            .map_err(|_| Error::Transport("response channel closed".into()))
    }
}

#[async_trait]
impl RequestSource for mpsc::Receiver<Request> {
    async fn recv(&mut self) -> Result<Option<Request>, Error> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Color, Player, State};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, connect_async};

    #[tokio::test]
    async fn channel_halves_carry_requests_and_responses() {
        let (mut res_tx, mut res_rx) = mpsc::channel::<Response>(8);
        let (req_tx, mut req_rx) = mpsc::channel::<Request>(8);

        ResponseSink::send(
            &mut res_tx,
            Response::Turn {
                turn: State::Begin,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            res_rx.recv().await,
            Some(Response::Turn {
                turn: State::Begin
            })
        );

        req_tx
            .send(Request::Press {
                press: Color::Green,
            })
            .await
            .unwrap();
        let received = RequestSource::recv(&mut req_rx).await.unwrap();
        assert_eq!(
            received,
            Some(Request::Press {
                press: Color::Green
            })
        );

        drop(req_tx);
        assert_eq!(RequestSource::recv(&mut req_rx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn websocket_halves_roundtrip_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let ws = accept_async(socket).await.unwrap();
            let (mut tx, mut rx) = split(ws);

            // Expect a join, then answer with a turn response.
            let request = rx.recv().await.unwrap();
            assert_eq!(
                request,
                Some(Request::Join {
                    player: Player {
                        id: "Player One".into()
                    }
                })
            );
            tx.send(Response::Lightup {
                lightup: Color::Blue,
            })
            .await
            .unwrap();

            // Client closes; the source reports end of stream.
            assert_eq!(rx.recv().await.unwrap(), None);
        });

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let join = bincode::serialize(&Request::Join {
            player: Player {
                id: "Player One".into(),
            },
        })
        .unwrap();
        client.send(WsMessage::Binary(join)).await.unwrap();

        let frame = client.next().await.unwrap().unwrap();
        let WsMessage::Binary(data) = frame else {
            panic!("expected a binary frame, got {frame:?}");
        };
        let response: Response = bincode::deserialize(&data).unwrap();
        assert_eq!(
            response,
            Response::Lightup {
                lightup: Color::Blue
            }
        );

        client.close(None).await.unwrap();
        server.await.unwrap();
    }
}
