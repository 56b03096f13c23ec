use crate::config::Config;
use crate::dom::Document;
use std::collections::BTreeMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use anyhow::Context;
use serde::Deserialize;

pub enum DomEvent {
    Patch(DomPatch),
}

/// One datagram from the page renderer; applied as a single mutation batch.
#[derive(Debug, Deserialize, PartialEq)]
pub struct DomPatch {
    pub ops: Vec<DomOp>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DomOp {
    Append {
        parent: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
    Remove {
        id: String,
    },
}

pub struct DomBridge {
    socket: UdpSocket,
    buffer_size: usize,
    tx: mpsc::Sender<DomEvent>,
}

// 页面渲染进程和本进程通过本地UDP通信，端口在配置中指定
impl DomBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<DomEvent>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("127.0.0.1:{}", config.dom_local_port)).await?;
        Ok(Self {
            socket,
            buffer_size: config.dom_buffer_size,
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            // 格式错误的补丁直接丢弃
            let patch = match serde_json::from_slice::<DomPatch>(&buf[..len]) {
                Ok(patch) => patch,
                Err(e) => {
                    log::warn!("Dropping malformed patch from {}: {}", from, e);
                    continue;
                }
            };
            if let Err(e) = self.tx.send(DomEvent::Patch(patch)).await {
                log::error!("Failed to send DOM event: {}", e);
                break;
            }
        }
        Ok(())
    }
}

/// Apply every op of `patch` in order. Records are queued, not delivered;
/// the caller delivers once the whole batch is in.
///
/// Stops at the first failing op. Ops before it stay applied and their
/// records stay queued, so the caller's next `deliver` still reports them.
pub fn apply_patch(document: &Document, patch: DomPatch) -> anyhow::Result<()> {
    for op in patch.ops {
        match op {
            DomOp::Append { parent, attributes } => {
                let parent_node = document
                    .get_element_by_id(&parent)
                    .with_context(|| format!("append target #{} not found", parent))?;
                let node = document.create_element();
                for (name, value) in &attributes {
                    document.set_attribute(node, name, value)?;
                }
                document.append_child(parent_node, node)?;
            }
            DomOp::Remove { id } => {
                let node = document
                    .get_element_by_id(&id)
                    .with_context(|| format!("remove target #{} not found", id))?;
                let parent = document
                    .parent(node)
                    .with_context(|| format!("#{} has no parent", id))?;
                document.remove_child(parent, node)?;
            }
        }
    }
    Ok(())
}
