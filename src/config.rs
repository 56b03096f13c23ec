use crate::audio::PlaybackConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 网络配置
    pub live_url: &'static str,
    pub assets_base_url: &'static str,

    // 音效清单，编译时固定
    pub sfx_assets: Vec<&'static str>,
    pub sfx_root_id: &'static str,
    pub sfx_data_attribute: &'static str,

    // 播放设备配置
    pub playback_device: &'static str,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // DOM桥配置
    pub dom_local_port: u16,
    pub dom_buffer_size: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            live_url: env!("LIVE_URL"),
            assets_base_url: env!("ASSETS_BASE_URL"),

            sfx_assets: parse_manifest(env!("SFX_ASSETS")),
            sfx_root_id: env!("SFX_ROOT_ID"),
            sfx_data_attribute: env!("SFX_DATA_ATTRIBUTE"),

            playback_device: env!("PLAYBACK_DEVICE"),
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            dom_local_port: env!("DOM_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse DOM_LOCAL_PORT")?,
            dom_buffer_size: env!("DOM_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse DOM_BUFFER_SIZE")?,
        })
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            device: self.playback_device.to_string(),
            sample_rate: self.playback_sample_rate,
            channels: self.playback_channels,
            period_size: self.playback_period_size,
        }
    }
}

fn parse_manifest(joined: &'static str) -> Vec<&'static str> {
    joined.split(',').filter(|p| !p.is_empty()).collect()
}
