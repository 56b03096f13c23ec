use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    live: Live,
    assets: Assets,
    sound_fx: SoundFx,
    playback: Playback,
    dom_bridge: DomBridge,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Live {
    url: String,
}

#[derive(Deserialize)]
struct Assets {
    base_url: String,
    sfx: Vec<String>,
}

#[derive(Deserialize)]
struct SoundFx {
    root_id: String,
    data_attribute: String,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

#[derive(Deserialize)]
struct DomBridge {
    local_port: u16,
    buffer_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 音效清单以逗号拼接，路径本身不能包含逗号
    if let Some(bad) = config.assets.sfx.iter().find(|p| p.contains(',') || p.is_empty()) {
        panic!("invalid sound effect path in config.toml: {:?}", bad);
    }

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 网络配置
    println!("cargo:rustc-env=LIVE_URL={}", config.live.url);
    println!("cargo:rustc-env=ASSETS_BASE_URL={}", config.assets.base_url);
    println!("cargo:rustc-env=SFX_ASSETS={}", config.assets.sfx.join(","));

    // 音效观察配置
    println!("cargo:rustc-env=SFX_ROOT_ID={}", config.sound_fx.root_id);
    println!("cargo:rustc-env=SFX_DATA_ATTRIBUTE={}", config.sound_fx.data_attribute);

    // 播放设备配置
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.playback.sample_rate);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);

    // DOM 桥配置
    println!("cargo:rustc-env=DOM_LOCAL_PORT={}", config.dom_bridge.local_port);
    println!("cargo:rustc-env=DOM_BUFFER_SIZE={}", config.dom_bridge.buffer_size);
}
