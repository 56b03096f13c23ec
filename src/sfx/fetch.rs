use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use url::Url;

/// Source of encoded sound effect payloads, keyed by manifest path.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, name: &str) -> anyhow::Result<Bytes>;
}

/// Plain HTTP GET of manifest paths against the server origin.
pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::new(),
            base: Url::parse(base_url)?,
        })
    }

    pub fn resolve(&self, name: &str) -> anyhow::Result<Url> {
        Ok(self.base.join(name)?)
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, name: &str) -> anyhow::Result<Bytes> {
        let url = self.resolve(name)?;
        log::debug!("Fetching {}", url);
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?)
    }
}
