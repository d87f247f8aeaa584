//! Request query parsing
//!
//! Every endpoint (WebSocket upgrade, RSSP-TCP request line, bridge
//! dial) speaks the same query grammar. Parsing produces a canonical
//! [`QueryOption`]; channel resolution against the registry happens
//! separately ([`crate::registry::Studio::resolve_channel`]).

use std::collections::HashMap;

use crate::error::{Error, Result};

/// URL part of a parsed request
#[derive(Debug, Clone, Default)]
pub struct UrlOpt {
    /// Transport scheme the request arrived on (`ws`, `tcp`, `int`)
    pub scheme: String,
    /// API path
    pub path: String,
    /// Remote address, when known
    pub addr: String,
}

/// UDP negotiation part
#[derive(Debug, Clone, Default)]
pub struct StreamOpt {
    /// Peer host for the UDP data plane
    pub host: String,
    /// Peer port for the UDP data plane
    pub port: String,
    /// Role selector for the TCP peer flow
    pub role: String,
}

/// Session part
#[derive(Debug, Clone, Default)]
pub struct SessionOpt {
    /// Target session id (control surface)
    pub id: String,
    /// Sleep unit (`nano`/`micro`/`milli`/`sec`/`zero`)
    pub unit: String,
    /// Deadline in seconds, 1..3599
    pub timeout: u64,
    /// Wait policy on a track without publishers
    pub wait: String,
    /// Opaque client request id
    pub reqid: String,
}

/// Channel part
#[derive(Debug, Clone, Default)]
pub struct ChannelOpt {
    /// Channel id, or a style name (`instant`/`dynamic`/`static`) to
    /// select by (name, style)
    pub id: String,
    /// Channel name, required with a non-id `channel` value
    pub name: String,
    /// Stream key
    pub key: String,
    /// Recording auto flag (`on`/`off`)
    pub record: String,
    /// Transcoding auto flag (`on`/`off`)
    pub trans: String,
    /// Requested period in hours
    pub period: String,
}

/// Track part
#[derive(Debug, Clone, Default)]
pub struct TrackOpt {
    /// `single` (default) or `bundle`
    pub mode: String,
    /// `mono` (default) or `multi`
    pub style: String,
    /// `group` (default), `echo`, `self`, `all`
    pub filter: String,
    /// Requested codec name
    pub codec: String,
    /// Requested processor name
    pub proc_name: String,
    /// Requested bitrate
    pub bitrate: String,
}

/// Ring-buffer tuning part
#[derive(Debug, Clone, Default)]
pub struct BufferOpt {
    /// Total number of rings
    pub total: usize,
    /// Ring index
    pub order: usize,
    /// Slots to allocate
    pub cap: usize,
    /// Slots to use
    pub len: usize,
}

/// Canonical request options
#[derive(Debug, Clone, Default)]
pub struct QueryOption {
    /// URL part
    pub url: UrlOpt,
    /// UDP/peer negotiation part
    pub stream: StreamOpt,
    /// Response format
    pub format: String,
    /// Session part
    pub session: SessionOpt,
    /// Channel part
    pub channel: ChannelOpt,
    /// Source label, default `base`
    pub source_label: String,
    /// Track label, default `video`
    pub track_label: String,
    /// Track part
    pub track: TrackOpt,
    /// Ring tuning part
    pub buffer: BufferOpt,
}

fn parse_usize(map: &HashMap<String, String>, key: &str) -> usize {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

impl QueryOption {
    /// Build options from decoded query pairs, applying the documented
    /// defaults.
    pub fn from_pairs(map: &HashMap<String, String>) -> Self {
        let get = |k: &str| map.get(k).cloned().unwrap_or_default();
        let or = |k: &str, d: &str| {
            let v = get(k);
            if v.is_empty() {
                d.to_string()
            } else {
                v
            }
        };

        QueryOption {
            url: UrlOpt::default(),
            stream: StreamOpt {
                host: get("host"),
                port: get("port"),
                role: get("role"),
            },
            format: or("format", "text"),
            session: SessionOpt {
                id: get("session"),
                unit: or("unit", "milli"),
                timeout: map.get("timeout").and_then(|v| v.parse().ok()).unwrap_or(0),
                wait: get("wait"),
                reqid: get("reqid"),
            },
            channel: ChannelOpt {
                id: get("channel"),
                name: get("name"),
                key: get("key"),
                record: get("record"),
                trans: get("trans"),
                period: get("period"),
            },
            source_label: or("source", "base"),
            track_label: or("track", "video"),
            track: TrackOpt {
                mode: or("mode", "single"),
                style: or("style", "mono"),
                filter: or("filter", "group"),
                codec: get("codec"),
                proc_name: get("proc"),
                bitrate: get("bitrate"),
            },
            buffer: BufferOpt {
                total: parse_usize(map, "buf_total"),
                order: parse_usize(map, "buf_order"),
                cap: parse_usize(map, "buf_cap"),
                len: parse_usize(map, "buf_len"),
            },
        }
    }

    /// Parse a raw query string as used by the RSSP-TCP request line and
    /// the bridge dialers.
    pub fn from_string(scheme: &str, path: &str, query: &str) -> Result<Self> {
        let map: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut qo = Self::from_pairs(&map);
        qo.url.scheme = scheme.into();
        qo.url.path = path.into();
        Ok(qo)
    }

    /// Parse an RSSP-TCP request line: `<path>?<query>`.
    pub fn from_request_line(scheme: &str, line: &str) -> Result<Self> {
        let (path, query) = line
            .split_once('?')
            .ok_or_else(|| Error::Validation(format!("invalid request line: {line}")))?;
        Self::from_string(scheme, path, query)
    }
}

impl std::fmt::Display for QueryOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}] channel: {},{} source: {} track: {},{} timeout: {}{}",
            self.url.scheme,
            self.url.path,
            self.channel.id,
            self.channel.name,
            self.source_label,
            self.track_label,
            self.track.mode,
            self.session.timeout,
            self.session.unit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let qo = QueryOption::from_string("ws", "/pang/ws/pub", "channel=dynamic&name=t1").unwrap();
        assert_eq!(qo.channel.id, "dynamic");
        assert_eq!(qo.channel.name, "t1");
        assert_eq!(qo.source_label, "base");
        assert_eq!(qo.track_label, "video");
        assert_eq!(qo.track.mode, "single");
        assert_eq!(qo.track.style, "mono");
        assert_eq!(qo.track.filter, "group");
        assert_eq!(qo.session.unit, "milli");
        assert_eq!(qo.session.timeout, 0);
        assert_eq!(qo.format, "text");
    }

    #[test]
    fn test_explicit_values() {
        let qo = QueryOption::from_string(
            "tcp",
            "/pang/tcp/pub",
            "channel=c40hp6epjh65aeq6ne50&source=addon&track=audio&mode=bundle&style=multi\
             &timeout=5&unit=sec&key=k1&buf_cap=30&buf_len=10&reqid=r-7",
        )
        .unwrap();
        assert_eq!(qo.channel.id, "c40hp6epjh65aeq6ne50");
        assert_eq!(qo.source_label, "addon");
        assert_eq!(qo.track_label, "audio");
        assert_eq!(qo.track.mode, "bundle");
        assert_eq!(qo.track.style, "multi");
        assert_eq!(qo.session.timeout, 5);
        assert_eq!(qo.session.unit, "sec");
        assert_eq!(qo.channel.key, "k1");
        assert_eq!(qo.buffer.cap, 30);
        assert_eq!(qo.buffer.len, 10);
        assert_eq!(qo.session.reqid, "r-7");
    }

    #[test]
    fn test_request_line() {
        let qo = QueryOption::from_request_line("tcp", "/pang/tcp/sub?channel=instant&name=m1").unwrap();
        assert_eq!(qo.url.path, "/pang/tcp/sub");
        assert_eq!(qo.channel.name, "m1");

        assert!(QueryOption::from_request_line("tcp", "/pang/tcp/sub").is_err());
    }

    #[test]
    fn test_bad_numbers_ignored() {
        let qo = QueryOption::from_string("ws", "/p", "timeout=abc&buf_len=-3").unwrap();
        assert_eq!(qo.session.timeout, 0);
        assert_eq!(qo.buffer.len, 0);
    }

    #[test]
    fn test_udp_negotiation_params() {
        let qo = QueryOption::from_string("ws", "/pang/udp/pub", "host=10.0.0.2&port=5004&role=pub").unwrap();
        assert_eq!(qo.stream.host, "10.0.0.2");
        assert_eq!(qo.stream.port, "5004");
        assert_eq!(qo.stream.role, "pub");
    }
}
