//! Sound effect player.
//!
//! Loads every manifest asset up front, then plays the buffer named by the
//! data attribute of each node inserted under the observed root.

mod fetch;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use thiserror::Error;

use crate::audio::{AudioBuffer, AudioContext, PlaybackSink};
use crate::config::Config;
use crate::dom::{Document, MutationKind, MutationRecord, ObserveOptions};

pub use fetch::{AssetFetcher, HttpFetcher};

#[derive(Debug, Error)]
pub enum SfxError {
    #[error("no audio output available: {0}")]
    NoAudio(String),
    #[error("failed to load sound effect {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("sound effect root #{0} not found")]
    MissingRoot(String),
}

#[derive(Debug, Clone)]
pub struct SfxSettings {
    /// Asset paths to preload, in manifest order
    pub manifest: Vec<String>,
    /// `id` of the element whose subtree is observed
    pub root_id: String,
    /// Attribute on inserted nodes naming the asset to play
    pub data_attribute: String,
}

impl SfxSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            manifest: config.sfx_assets.iter().map(|s| s.to_string()).collect(),
            root_id: config.sfx_root_id.to_string(),
            data_attribute: config.sfx_data_attribute.to_string(),
        }
    }
}

/// Decoded buffers keyed by asset path. Built once after every asset has
/// loaded, read-only afterwards.
#[derive(Debug)]
pub struct SoundTable {
    buffers: HashMap<String, Arc<AudioBuffer>>,
}

impl SoundTable {
    pub fn get(&self, name: &str) -> Option<&Arc<AudioBuffer>> {
        self.buffers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.buffers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub struct SoundEffects<F> {
    settings: SfxSettings,
    fetcher: F,
}

impl<F: AssetFetcher> SoundEffects<F> {
    pub fn new(settings: SfxSettings, fetcher: F) -> Self {
        Self { settings, fetcher }
    }

    /// Create the audio context, load and decode the whole manifest, then
    /// install the observer on the root element.
    ///
    /// Nothing is observed unless every asset loads. Each call loads again
    /// and installs another independent observer.
    pub async fn init(
        &self,
        document: &Document,
        destination: Arc<dyn PlaybackSink>,
    ) -> Result<Arc<SoundTable>, SfxError> {
        let context = Arc::new(AudioContext::new(destination)?);

        let table = Arc::new(self.load(&context).await?);
        let names = table.names();
        log::info!("Loaded {} sound effects: {:?}", names.len(), names);

        let root_id = &self.settings.root_id;
        let root = document
            .get_element_by_id(root_id)
            .ok_or_else(|| SfxError::MissingRoot(root_id.clone()))?;

        let options = ObserveOptions {
            child_list: true,
            subtree: true,
            ..Default::default()
        };
        let callback = {
            let table = table.clone();
            let attribute = self.settings.data_attribute.clone();
            Box::new(move |records: &[MutationRecord]| {
                dispatch(records, &table, &context, &attribute)
            })
        };
        document
            .observe(root, options, callback)
            .map_err(|_| SfxError::MissingRoot(root_id.clone()))?;

        Ok(table)
    }

    // All fetch+decode pairs run concurrently; the first failure fails the lot.
    async fn load(&self, context: &AudioContext) -> Result<SoundTable, SfxError> {
        let loads = self.settings.manifest.iter().map(|name| async move {
            let loaded = async {
                let data = self.fetcher.fetch(name).await?;
                context.decode_audio_data(data).await
            }
            .await;
            loaded
                .map(|buffer| (name.clone(), buffer))
                .map_err(|e| SfxError::Load {
                    name: name.clone(),
                    source: e.into(),
                })
        });
        let fetched = try_join_all(loads).await?;

        let mut buffers = HashMap::with_capacity(fetched.len());
        for (name, buffer) in fetched {
            buffers.insert(name, Arc::new(buffer));
        }
        Ok(SoundTable { buffers })
    }
}

fn dispatch(records: &[MutationRecord], table: &SoundTable, context: &AudioContext, attribute: &str) {
    for record in records {
        if record.kind != MutationKind::ChildList {
            continue;
        }
        for node in &record.added_nodes {
            if let Some(buffer) = node.attribute(attribute).and_then(|name| table.get(name)) {
                context.start_buffer(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Barrier;

    use super::*;
    use crate::audio::{wav_bytes, RecordingSink};
    use crate::dom::NodeId;

    const MANIFEST: [&str; 4] = [
        "/sfx/fighter-die.wav",
        "/sfx/fighter-powerup.wav",
        "/sfx/fighter-shields-up-loop.wav",
        "/sfx/fighter-shoot.wav",
    ];

    struct MapFetcher {
        assets: HashMap<String, Bytes>,
        barrier: Option<Barrier>,
    }

    impl MapFetcher {
        /// Every manifest asset, each with distinct sample content.
        fn full() -> Self {
            let assets = MANIFEST
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let level = (i as i16 + 1) * 100;
                    (name.to_string(), wav_bytes(8000, 1, &[level; 16]))
                })
                .collect();
            Self {
                assets,
                barrier: None,
            }
        }

        fn without(mut self, name: &str) -> Self {
            self.assets.remove(name);
            self
        }
    }

    #[async_trait]
    impl AssetFetcher for MapFetcher {
        async fn fetch(&self, name: &str) -> anyhow::Result<Bytes> {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            self.assets
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", name))
        }
    }

    fn settings() -> SfxSettings {
        SfxSettings {
            manifest: MANIFEST.iter().map(|s| s.to_string()).collect(),
            root_id: "sound-fx".to_string(),
            data_attribute: "data-src".to_string(),
        }
    }

    fn page() -> (Document, NodeId) {
        let doc = Document::new();
        let root = doc.create_element();
        doc.set_attribute(root, "id", "sound-fx").unwrap();
        doc.append_child(doc.body(), root).unwrap();
        (doc, root)
    }

    fn sfx_node(doc: &Document, src: Option<&str>) -> NodeId {
        let node = doc.create_element();
        if let Some(src) = src {
            doc.set_attribute(node, "data-src", src).unwrap();
        }
        node
    }

    fn insert(doc: &Document, parent: NodeId, src: &str) {
        let node = sfx_node(doc, Some(src));
        doc.append_child(parent, node).unwrap();
        doc.deliver();
    }

    #[tokio::test]
    async fn loaded_table_holds_every_manifest_entry() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());

        let table = player.init(&doc, sink).await.unwrap();
        assert_eq!(table.names().len(), MANIFEST.len());
        for name in MANIFEST {
            assert!(table.get(name).is_some(), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn one_failed_fetch_installs_nothing() {
        let (doc, root) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let fetcher = MapFetcher::full().without("/sfx/fighter-powerup.wav");
        let player = SoundEffects::new(settings(), fetcher);

        let err = player.init(&doc, sink.clone()).await.unwrap_err();
        match err {
            SfxError::Load { name, .. } => assert_eq!(name, "/sfx/fighter-powerup.wav"),
            other => panic!("unexpected error: {}", other),
        }

        insert(&doc, root, "/sfx/fighter-shoot.wav");
        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn undecodable_asset_fails_the_load() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let mut fetcher = MapFetcher::full();
        fetcher.assets.insert(
            "/sfx/fighter-die.wav".to_string(),
            Bytes::from_static(b"<html>not found</html>"),
        );
        let player = SoundEffects::new(settings(), fetcher);

        let err = player.init(&doc, sink).await.unwrap_err();
        assert!(matches!(err, SfxError::Load { .. }));
    }

    #[tokio::test]
    async fn inserted_node_plays_its_buffer_once() {
        let (doc, root) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        let table = player.init(&doc, sink.clone()).await.unwrap();

        insert(&doc, root, "/sfx/fighter-shoot.wav");

        let started = sink.started();
        assert_eq!(started.len(), 1);
        assert!(Arc::ptr_eq(&started[0], table.get("/sfx/fighter-shoot.wav").unwrap()));
    }

    #[tokio::test]
    async fn unknown_or_missing_identifier_is_skipped() {
        let (doc, root) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        player.init(&doc, sink.clone()).await.unwrap();

        insert(&doc, root, "/sfx/fighter-explode.wav");
        let bare = sfx_node(&doc, None);
        doc.append_child(root, bare).unwrap();
        doc.deliver();

        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn sibling_batch_plays_in_insertion_order() {
        let (doc, root) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        let table = player.init(&doc, sink.clone()).await.unwrap();

        let order = [MANIFEST[3], MANIFEST[0], MANIFEST[3], MANIFEST[1]];
        for src in order {
            let node = sfx_node(&doc, Some(src));
            doc.append_child(root, node).unwrap();
        }
        let fragment: Vec<_> = [MANIFEST[2], MANIFEST[0]]
            .iter()
            .map(|src| sfx_node(&doc, Some(src)))
            .collect();
        doc.append_children(root, &fragment).unwrap();
        assert_eq!(doc.deliver(), 1);

        let expected: Vec<_> = order
            .iter()
            .chain([MANIFEST[2], MANIFEST[0]].iter())
            .map(|name| table.get(name).unwrap().clone())
            .collect();
        let started = sink.started();
        assert_eq!(started.len(), expected.len());
        for (got, want) in started.iter().zip(&expected) {
            assert!(Arc::ptr_eq(got, want));
        }
    }

    #[tokio::test]
    async fn nested_insertions_are_observed() {
        let (doc, root) = page();
        let wrapper = doc.create_element();
        doc.append_child(root, wrapper).unwrap();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        player.init(&doc, sink.clone()).await.unwrap();

        insert(&doc, wrapper, "/sfx/fighter-die.wav");
        assert_eq!(sink.started().len(), 1);
    }

    #[tokio::test]
    async fn insertions_outside_the_root_are_ignored() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        player.init(&doc, sink.clone()).await.unwrap();

        insert(&doc, doc.body(), "/sfx/fighter-die.wav");
        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn second_init_installs_a_second_observer() {
        let (doc, root) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());
        player.init(&doc, sink.clone()).await.unwrap();
        player.init(&doc, sink.clone()).await.unwrap();

        insert(&doc, root, "/sfx/fighter-shoot.wav");
        assert_eq!(sink.started().len(), 2);
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let doc = Document::new();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let player = SoundEffects::new(settings(), MapFetcher::full());

        let err = player.init(&doc, sink).await.unwrap_err();
        assert!(matches!(err, SfxError::MissingRoot(id) if id == "sound-fx"));
    }

    #[tokio::test]
    async fn unusable_output_fails_before_loading() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(0, 0));
        let player = SoundEffects::new(settings(), MapFetcher::full().without(MANIFEST[0]));

        let err = player.init(&doc, sink).await.unwrap_err();
        assert!(matches!(err, SfxError::NoAudio(_)));
    }

    #[tokio::test]
    async fn assets_load_concurrently() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let mut fetcher = MapFetcher::full();
        // Every fetch waits for all the others, so a sequential load never finishes.
        fetcher.barrier = Some(Barrier::new(MANIFEST.len()));
        let player = SoundEffects::new(settings(), fetcher);

        let table = tokio::time::timeout(Duration::from_secs(5), player.init(&doc, sink))
            .await
            .expect("load did not run concurrently")
            .unwrap();
        assert_eq!(table.names().len(), MANIFEST.len());
    }

    #[tokio::test]
    async fn duplicate_manifest_entries_collapse() {
        let (doc, _) = page();
        let sink = Arc::new(RecordingSink::new(8000, 1));
        let mut settings = settings();
        settings.manifest.push(MANIFEST[0].to_string());
        let player = SoundEffects::new(settings, MapFetcher::full());

        let table = player.init(&doc, sink).await.unwrap();
        assert_eq!(table.names().len(), MANIFEST.len());
    }
}
