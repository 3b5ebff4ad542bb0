use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{EngineError, EngineResult};

/// Text frames from one push connection. The stream ending means the
/// remote side closed.
pub type FrameStream = BoxStream<'static, EngineResult<String>>;

#[async_trait]
pub trait FrameTransport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> EngineResult<FrameStream>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport;

#[async_trait]
impl FrameTransport for WsTransport {
    async fn connect(&self, url: &str) -> EngineResult<FrameStream> {
        let (ws_stream, _) = connect_async(url).await?;
        tracing::debug!("WebSocket connected: {}", url);

        let frames = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(EngineError::from(e))),
                })
            });

        Ok(frames.boxed())
    }
}
