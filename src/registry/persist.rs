//! Registry persistence
//!
//! Static channels (with their stream keys) and bridges survive restarts
//! through two JSON files under `conf/`. Files are rewritten by writing a
//! sibling temp file and renaming it over the target, so a crash mid-write
//! never corrupts the config.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::is_id;
use crate::registry::bridge::{Bridge, BridgeAttr, BridgeDirection, Spot};
use crate::registry::channel::{Channel, ChannelStyle};
use crate::registry::studio::Studio;

/// Persisted form of a channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Stable id; a fresh one is assigned when absent or malformed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Channel name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Lifecycle style
    #[serde(default)]
    pub style: ChannelStyle,
    /// Stream key; empty means open
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream_key: String,
    /// Blocked channels admit nobody
    #[serde(default)]
    pub blocked: bool,
    /// Start recording with the first publisher
    #[serde(default)]
    pub record_auto: bool,
    /// Start transcoding with the first publisher
    #[serde(default)]
    pub trans_auto: bool,
}

impl ChannelSpec {
    /// Snapshot a live channel into its persisted form.
    pub fn of(ch: &Channel) -> Self {
        Self {
            id: ch.id().to_string(),
            name: ch.name().to_string(),
            desc: ch.meta.describe.clone(),
            style: ch.style,
            stream_key: ch.stream_key(),
            blocked: ch.meta.blocked(),
            record_auto: ch.record.auto(),
            trans_auto: ch.trans.auto(),
        }
    }
}

/// Persisted form of a bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSpec {
    /// Stable id; a fresh one is assigned when absent or malformed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Bridge name
    pub name: String,
    /// Start policy
    #[serde(default)]
    pub attr: BridgeAttr,
    /// Copy direction
    #[serde(default)]
    pub direction: BridgeDirection,
    /// Dial timeout in seconds
    #[serde(default)]
    pub timeout: u64,
    /// Origin spot
    #[serde(default)]
    pub from: Spot,
    /// Destination spot
    #[serde(default)]
    pub to: Spot,
    /// Blocked bridges never start
    #[serde(default)]
    pub blocked: bool,
}

impl BridgeSpec {
    /// Snapshot a live bridge into its persisted form.
    pub fn of(b: &Bridge) -> Self {
        Self {
            id: b.id().to_string(),
            name: b.meta.name.clone(),
            attr: b.attr,
            direction: b.direction,
            timeout: b.timeout,
            from: b.from.clone(),
            to: b.to.clone(),
            blocked: b.meta.blocked(),
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Studio {
    /// Load the channel array from `path`. Channels already registered
    /// under the same id are left alone.
    pub fn load_channels(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let specs: Vec<ChannelSpec> = serde_json::from_slice(&data)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;

        let mut loaded = 0;
        for spec in specs {
            if is_id(&spec.id) && self.channel(&spec.id).is_some() {
                tracing::warn!(channel = %spec.id, "already registered channel id");
                continue;
            }
            let mut ch = Channel::new(spec.name.as_str(), spec.style);
            if is_id(&spec.id) {
                ch.meta.id = spec.id.clone();
            }
            ch.meta.describe = spec.desc.clone();
            ch.meta.set_blocked(spec.blocked);
            ch.set_stream_key(spec.stream_key.as_str());
            ch.record.set_auto(spec.record_auto);
            ch.trans.set_auto(spec.trans_auto);
            self.add_channel(ch);
            loaded += 1;
        }
        tracing::info!(count = loaded, path = %path.display(), "channels loaded");
        Ok(loaded)
    }

    /// Write the channel array to `path`, sorted by id.
    pub fn save_channels(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut specs: Vec<ChannelSpec> = self
            .channel_ids()
            .into_iter()
            .filter_map(|id| self.channel(&id))
            .map(|ch| ChannelSpec::of(&ch))
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        write_atomic(path.as_ref(), &serde_json::to_vec_pretty(&specs)?)
    }

    /// Load the bridge array from `path`.
    pub fn load_bridges(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let specs: Vec<BridgeSpec> = serde_json::from_slice(&data)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;

        let mut loaded = 0;
        for spec in specs {
            if is_id(&spec.id) && self.bridge(&spec.id).is_some() {
                tracing::warn!(bridge = %spec.id, "already registered bridge id");
                continue;
            }
            let mut b = Bridge::new(spec.name.as_str());
            if is_id(&spec.id) {
                b.meta.id = spec.id.clone();
            }
            b.meta.set_blocked(spec.blocked);
            b.attr = spec.attr;
            b.direction = spec.direction;
            b.timeout = spec.timeout;
            b.from = spec.from.clone();
            b.to = spec.to.clone();
            b.normalize();
            self.add_bridge(b);
            loaded += 1;
        }
        tracing::info!(count = loaded, path = %path.display(), "bridges loaded");
        Ok(loaded)
    }

    /// Write the bridge array to `path`, sorted by id.
    pub fn save_bridges(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut specs: Vec<BridgeSpec> = self.bridges().iter().map(|b| BridgeSpec::of(b)).collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        write_atomic(path.as_ref(), &serde_json::to_vec_pretty(&specs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::studio::Limits;

    fn studio() -> Studio {
        Studio::new("t", Limits::default())
    }

    #[test]
    fn test_channels_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");

        let st = studio();
        let ch = st.add_channel(Channel::new("live1", ChannelStyle::Static));
        ch.set_stream_key("k1");
        ch.record.set_auto(true);
        st.save_channels(&path).unwrap();

        let st2 = studio();
        assert_eq!(st2.load_channels(&path).unwrap(), 1);
        let ch2 = st2.channel(ch.id()).unwrap();
        assert_eq!(ch2.name(), "live1");
        assert_eq!(ch2.stream_key(), "k1");
        assert!(ch2.record.auto());
        assert_eq!(ch2.style, ChannelStyle::Static);
    }

    #[test]
    fn test_missing_channels_file_is_config_error() {
        let st = studio();
        assert!(matches!(
            st.load_channels("/no/such/dir/channels.json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_malformed_channels_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        fs::write(&path, b"{not json").unwrap();

        let st = studio();
        assert!(matches!(st.load_channels(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_specs_without_ids_get_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        fs::write(&path, br#"[{"name": "a", "style": "static"}, {"name": "b", "style": "dynamic"}]"#)
            .unwrap();

        let st = studio();
        assert_eq!(st.load_channels(&path).unwrap(), 2);
        assert!(st.channel_by_name("a").is_some());
        let b = st.channel_by_name("b").unwrap();
        assert!(crate::id::is_id(b.id()));
        assert_eq!(b.style, ChannelStyle::Dynamic);
    }

    #[test]
    fn test_bridges_round_trip_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridges.json");
        fs::write(
            &path,
            br#"[{"name": "b1", "attr": "ever", "direction": "push",
                 "from": {"chid": "c40hp6epjh65aeq6ne50"},
                 "to": {"addr": "peer:8276", "api": "/pang/ws/pub", "chid": "c40hp6epjh65aeq6ne51"}}]"#,
        )
        .unwrap();

        let st = studio();
        assert_eq!(st.load_bridges(&path).unwrap(), 1);
        let b = &st.bridges()[0];
        assert_eq!(b.attr, BridgeAttr::Ever);
        assert_eq!(b.from.proto, "int"); // normalized default
        assert_eq!(b.to.proto, "ws");
        assert_eq!(b.timeout, crate::registry::bridge::BRIDGE_BASE_TIMEOUT);

        st.save_bridges(&path).unwrap();
        let st2 = studio();
        assert_eq!(st2.load_bridges(&path).unwrap(), 1);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let st = studio();
        st.add_channel(Channel::new("x", ChannelStyle::Static));
        st.save_channels(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
