mod audio;
mod config;
mod dom;
mod dom_bridge;
mod live_socket;
mod sfx;

use audio::{AlsaSink, PlaybackSink};
use config::Config;
use dom::Document;
use dom_bridge::{DomBridge, DomEvent};
use live_socket::{LiveEvent, LiveSocket};
use sfx::{HttpFetcher, SfxSettings, SoundEffects};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} {} starting", config.app_name, config.app_version);

    // 创建通道，用于组件间通信
    let (tx_live_event, mut rx_live_event) = mpsc::channel::<LiveEvent>(100);
    let (tx_dom_event, mut rx_dom_event) = mpsc::channel::<DomEvent>(100);

    // 建立到服务器 /live 的长连接，只连接一次，重连由连接任务自己负责
    LiveSocket::new(config.live_url, tx_live_event)?.connect();

    // 页面文档，音效根节点由页面渲染提供
    let document = Arc::new(Document::new());
    let sfx_root = document.create_element();
    document.set_attribute(sfx_root, "id", config.sfx_root_id)?;
    document.append_child(document.body(), sfx_root)?;

    // 打开音频输出，没有可用的播放设备时直接退出
    let sink: Arc<dyn PlaybackSink> = Arc::new(AlsaSink::open(&config.playback())?);

    // 启动DOM桥，接收页面渲染进程发来的补丁
    let dom_bridge = DomBridge::new(&config, tx_dom_event).await?;
    tokio::spawn(async move {
        if let Err(e) = dom_bridge.run().await {
            log::error!("DomBridge error: {}", e);
        }
    });

    // 音效加载与主循环并行，加载完成前插入的节点不会触发播放
    let player = SoundEffects::new(
        SfxSettings::from_config(&config),
        HttpFetcher::new(config.assets_base_url)?,
    );
    {
        let document = document.clone();
        tokio::spawn(async move {
            if let Err(e) = player.init(&document, sink).await {
                log::error!("Sound effects disabled: {}", e);
            }
        });
    }

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_live_event.recv() => {
                match event {
                    LiveEvent::Connected => log::info!("Live socket connected"),
                    LiveEvent::Disconnected => log::info!("Live socket disconnected"),
                    LiveEvent::Message(text) => log::debug!("Live message: {}", text),
                }
            }

            // 一个补丁就是一批变更，应用完再统一派发给观察者
            Some(DomEvent::Patch(patch)) = rx_dom_event.recv() => {
                if let Err(e) = dom_bridge::apply_patch(&document, patch) {
                    log::warn!("Failed to apply DOM patch: {}", e);
                }
                document.deliver();
            }
        }
    }
    Ok(())
}
