use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PROTOCOL_VSN: &str = "2.0.0";
const MAX_RETRY_DELAY: u64 = 60;

#[derive(Debug)]
pub enum LiveEvent {
    Connected,
    Message(String),
    Disconnected,
}

/// Persistent connection to the server's live endpoint.
pub struct LiveSocket {
    url: Url,
    tx: mpsc::Sender<LiveEvent>,
    heartbeat_ref: u64,
    /// Seconds to wait before the next reconnect
    retry_delay: u64,
}

impl LiveSocket {
    pub fn new(endpoint: &str, tx: mpsc::Sender<LiveEvent>) -> anyhow::Result<Self> {
        Ok(Self {
            url: websocket_url(endpoint)?,
            tx,
            heartbeat_ref: 0,
            retry_delay: 1,
        })
    }

    /// 启动连接任务，每次调用都会建立一个新的连接，不做去重
    pub fn connect(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    // 如果发生错误断开连接，指数退避后重连；连接成功后退避时间重置
    async fn run(mut self) {
        loop {
            match self.connect_and_loop().await {
                Ok(()) => {
                    // 事件接收端已关闭，说明进程正在退出
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "Live connection error: {}. Retrying in {}s...",
                        e,
                        self.retry_delay
                    );
                    if self.tx.send(LiveEvent::Disconnected).await.is_err() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(self.retry_delay)).await;
                    self.retry_delay = std::cmp::min(self.retry_delay * 2, MAX_RETRY_DELAY);
                }
            }
        }
    }

    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();
        if self.tx.send(LiveEvent::Connected).await.is_err() {
            return Ok(());
        }
        self.retry_delay = 1;

        let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.tx.send(LiveEvent::Message(text.to_string())).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Err(anyhow::anyhow!("Connection closed"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("Connection closed")),
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat_ref += 1;
                    let frame = heartbeat_frame(self.heartbeat_ref).to_string();
                    log::debug!("Sending heartbeat: {}", frame);
                    write.send(Message::Text(frame.into())).await?;
                }
            }
        }
    }
}

/// Map a live endpoint (`ws://host/live`, or `http(s)://` / `ws(s)://`) to the
/// socket transport URL `.../live/websocket?vsn=2.0.0`.
pub fn websocket_url(endpoint: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => anyhow::bail!("unsupported live endpoint scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot use scheme {} for {}", scheme, endpoint))?;

    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// Phoenix v2 serializer frame: `[join_ref, ref, topic, event, payload]`.
fn heartbeat_frame(msg_ref: u64) -> Value {
    json!([null, msg_ref.to_string(), "phoenix", "heartbeat", {}])
}
