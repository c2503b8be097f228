/*
    link.rs - Join URL contract

    {base}/room/{room_id}?peers={max_peers_hint}#key={base64url key}
    {base}/room/{room_id}?peers={max_peers_hint}#proof={hex proof}

    The fragment is never sent to any server (not in requests, not in
    referrer headers), so it is the only part of the link allowed to carry
    the room key or the access proof. The `peers` hint is display-only: the
    effective capacity always comes from the relay's room record.
*/

use super::errors::{CryptoError, CryptoResult};
use super::key::RoomKey;
use super::proof::AccessProof;
use crate::core_model::RoomId;
use std::fmt;
use url::Url;

/// Secret material carried in the link fragment
#[derive(Clone, PartialEq, Eq)]
pub enum LinkSecret {
    /// Raw room key (link-secret mode)
    Key(RoomKey),
    /// Access proof (password mode); the password itself is never in the link
    Proof(AccessProof),
    /// No fragment; the joiner must supply a password
    None,
}

impl fmt::Debug for LinkSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSecret::Key(_) => f.write_str("Key(<redacted>)"),
            LinkSecret::Proof(proof) => write!(f, "Proof({:?})", proof),
            LinkSecret::None => f.write_str("None"),
        }
    }
}

/// A shareable join link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLink {
    pub base: String,
    pub room_id: RoomId,
    pub max_peers_hint: Option<u8>,
    pub secret: LinkSecret,
}

impl JoinLink {
    pub fn new(base: impl Into<String>, room_id: RoomId, secret: LinkSecret) -> Self {
        JoinLink {
            base: base.into(),
            room_id,
            max_peers_hint: None,
            secret,
        }
    }

    pub fn with_max_peers_hint(mut self, max_peers: u8) -> Self {
        self.max_peers_hint = Some(max_peers);
        self
    }

    /// The room key, if this is a link-secret link
    pub fn key(&self) -> Option<&RoomKey> {
        match &self.secret {
            LinkSecret::Key(key) => Some(key),
            _ => None,
        }
    }

    /// The access proof, if this is a password-mode link
    pub fn proof(&self) -> Option<&AccessProof> {
        match &self.secret {
            LinkSecret::Proof(proof) => Some(proof),
            _ => None,
        }
    }

    /// Render the link. The result contains secret material in its fragment
    /// and must not be logged.
    pub fn to_url(&self) -> CryptoResult<String> {
        let mut url = Url::parse(&self.base).map_err(|e| CryptoError::InvalidLink(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(CryptoError::InvalidLink(format!(
                "base '{}' cannot carry a path",
                self.base
            )));
        }

        let path = format!(
            "{}/room/{}",
            url.path().trim_end_matches('/'),
            self.room_id.as_str()
        );
        url.set_path(&path);

        match self.max_peers_hint {
            Some(hint) => url.set_query(Some(&format!("peers={}", hint))),
            None => url.set_query(None),
        }

        match &self.secret {
            LinkSecret::Key(key) => url.set_fragment(Some(&format!("key={}", key.to_fragment()))),
            LinkSecret::Proof(proof) => url.set_fragment(Some(&format!("proof={}", proof.as_hex()))),
            LinkSecret::None => url.set_fragment(None),
        }

        Ok(url.to_string())
    }

    /// Parse a join link
    pub fn parse(input: &str) -> CryptoResult<Self> {
        let url = Url::parse(input.trim()).map_err(|e| CryptoError::InvalidLink(e.to_string()))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let room_pos = segments
            .iter()
            .rposition(|seg| *seg == "room")
            .ok_or_else(|| CryptoError::InvalidLink("missing /room/ segment".to_string()))?;
        let room_id = segments
            .get(room_pos + 1)
            .map(|id| RoomId::new(*id))
            .ok_or_else(|| CryptoError::InvalidLink("missing room id".to_string()))?;
        if !room_id.is_valid() || segments.len() != room_pos + 2 {
            return Err(CryptoError::InvalidLink("malformed room id".to_string()));
        }

        let max_peers_hint = url
            .query_pairs()
            .find(|(k, _)| k == "peers")
            .and_then(|(_, v)| v.parse::<u8>().ok());

        let secret = match url.fragment() {
            None | Some("") => LinkSecret::None,
            Some(fragment) => parse_fragment(fragment)?,
        };

        let mut base = url.clone();
        let base_path = segments[..room_pos].join("/");
        base.set_path(&base_path);
        base.set_query(None);
        base.set_fragment(None);
        let base = base.as_str().trim_end_matches('/').to_string();

        Ok(JoinLink {
            base,
            room_id,
            max_peers_hint,
            secret,
        })
    }
}

fn parse_fragment(fragment: &str) -> CryptoResult<LinkSecret> {
    let (name, value) = fragment
        .split_once('=')
        .ok_or_else(|| CryptoError::InvalidLink("fragment must be key=… or proof=…".to_string()))?;
    match name {
        "key" => Ok(LinkSecret::Key(RoomKey::from_fragment(value)?)),
        "proof" => AccessProof::from_hex(value)
            .map(LinkSecret::Proof)
            .ok_or_else(|| CryptoError::InvalidLink("malformed proof".to_string())),
        other => Err(CryptoError::InvalidLink(format!(
            "unknown fragment field '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::key::generate_key;
    use secrecy::SecretString;

    #[test]
    fn test_key_link_round_trip() {
        let key = generate_key();
        let link = JoinLink::new(
            "https://livedoc.example",
            RoomId::new("abc123"),
            LinkSecret::Key(key.clone()),
        )
        .with_max_peers_hint(2);

        let url = link.to_url().unwrap();
        assert!(url.starts_with("https://livedoc.example/room/abc123?peers=2#key="));

        let parsed = JoinLink::parse(&url).unwrap();
        assert_eq!(parsed.room_id, RoomId::new("abc123"));
        assert_eq!(parsed.max_peers_hint, Some(2));
        assert_eq!(parsed.key(), Some(&key));
        assert_eq!(parsed.base, "https://livedoc.example");
    }

    #[test]
    fn test_key_lives_only_in_fragment() {
        let key = generate_key();
        let link = JoinLink::new("https://x.example/app", RoomId::new("r1"), LinkSecret::Key(key.clone()));
        let url = Url::parse(&link.to_url().unwrap()).unwrap();

        let encoded = key.to_fragment();
        assert!(!url.path().contains(&encoded));
        assert!(url.query().map_or(true, |q| !q.contains(&encoded)));
        assert!(url.fragment().unwrap().contains(&encoded));
        assert_eq!(url.path(), "/app/room/r1");
    }

    #[test]
    fn test_proof_link() {
        let room = RoomId::new("r2");
        let proof = AccessProof::compute(&room, &SecretString::new("pw".to_string()), "00112233");
        let link = JoinLink::new("https://x.example", room, LinkSecret::Proof(proof.clone()));

        let parsed = JoinLink::parse(&link.to_url().unwrap()).unwrap();
        assert!(parsed.proof().unwrap().matches(&proof));
        assert!(parsed.key().is_none());
    }

    #[test]
    fn test_link_without_fragment() {
        let parsed = JoinLink::parse("https://x.example/room/r3").unwrap();
        assert_eq!(parsed.secret, LinkSecret::None);
        assert_eq!(parsed.max_peers_hint, None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(JoinLink::parse("not a url").is_err());
        assert!(JoinLink::parse("https://x.example/other/r3").is_err());
        assert!(JoinLink::parse("https://x.example/room/").is_err());
        assert!(JoinLink::parse("https://x.example/room/r3#key=short").is_err());
        assert!(JoinLink::parse("https://x.example/room/r3#nonsense").is_err());
        assert!(JoinLink::parse("https://x.example/room/r3#token=abc").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = generate_key();
        let link = JoinLink::new("https://x.example", RoomId::new("r"), LinkSecret::Key(key.clone()));
        let printed = format!("{:?}", link);
        assert!(!printed.contains(&key.to_fragment()));
        assert!(printed.contains("<redacted>"));
    }
}
