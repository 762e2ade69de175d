//! Magnet URI parsing.

use rivulet_torrent_core::{EngineError, EngineResult, InfoHash};
use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

pub(crate) struct MagnetLink {
    pub(crate) info_hash: InfoHash,
    pub(crate) display_name: Option<String>,
}

/// Parse a `magnet:?xt=urn:btih:<hex>` link. Base32 topics are not supported.
pub(crate) fn parse(uri: &str) -> EngineResult<MagnetLink> {
    let invalid = |reason: &'static str| EngineError::InvalidMagnet {
        uri: uri.to_string(),
        reason,
    };
    let url = Url::parse(uri).map_err(|_| invalid("malformed uri"))?;
    if url.scheme() != "magnet" {
        return Err(invalid("not a magnet uri"));
    }

    let mut info_hash = None;
    let mut display_name = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                if let Some(topic) = value.strip_prefix(BTIH_PREFIX) {
                    info_hash = Some(
                        InfoHash::from_hex(topic).map_err(|_| invalid("btih topic is not hex"))?,
                    );
                }
            }
            "dn" => display_name = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(MagnetLink {
        info_hash: info_hash.ok_or_else(|| invalid("missing btih topic"))?,
        display_name,
    })
}
