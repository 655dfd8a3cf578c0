//! Configuration types for a webcam session

use crate::media::MediaConstraints;
use crate::sdp::CodecPreferences;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public STUN servers used when no ICE server is configured
pub const DEFAULT_ICE_SERVERS: [&str; 16] = [
    "stun:stun.l.google.com:19302",
    "stun:23.21.150.121",
    "stun:stun01.sipphone.com",
    "stun:stun.ekiga.net",
    "stun:stun.fwdnet.net",
    "stun:stun.ideasip.com",
    "stun:stun.iptel.org",
    "stun:stun.rixtelecom.se",
    "stun:stun.schlund.de",
    "stun:stunserver.org",
    "stun:stun.softjoys.com",
    "stun:stun.voiparound.com",
    "stun:stun.voipbuster.com",
    "stun:stun.voipstunt.com",
    "stun:stun.voxgratia.org",
    "stun:stun.xten.com",
];

/// Main configuration for a SessionManager
///
/// Re-read at the start of every `connect`; changes never affect a session
/// that is already up until it is reconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// ICE servers (empty: built-in public STUN list)
    pub ice_servers: Vec<IceServerConfig>,

    /// Capture request (default: video only)
    pub constraints: MediaConstraints,

    /// Codec restriction per media kind (default: none)
    pub codecs: CodecPreferences,

    /// Bounds on the negotiation waits (default: unbounded)
    pub timeouts: NegotiationTimeouts,

    /// Fail negotiation when a codec restriction empties a media section
    /// instead of only logging a warning (default: false)
    pub reject_unmatched_codec: bool,
}

/// ICE server entry, either a bare URL or a structured record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceServerConfig {
    /// `"stun:stun.example.org:3478"`
    Url(String),
    /// `{"urls": [...], "username": "...", "credential": "..."}`
    Server {
        urls: IceUrls,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
}

/// One URL or a list of URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }
}

impl IceServerConfig {
    /// Normalize into the structured form
    pub fn to_ice_server(&self) -> IceServer {
        match self {
            IceServerConfig::Url(url) => IceServer {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            },
            IceServerConfig::Server {
                urls,
                username,
                credential,
            } => IceServer {
                urls: urls.to_vec(),
                username: username.clone(),
                credential: credential.clone(),
            },
        }
    }
}

/// Normalized ICE server record handed to the native factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Immutable configuration snapshot for one native peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS
                .iter()
                .map(|url| IceServer {
                    urls: vec![url.to_string()],
                    username: None,
                    credential: None,
                })
                .collect(),
        }
    }
}

/// Bounds on the three suspension points of a negotiation
///
/// `None` waits forever. Serialized as milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationTimeouts {
    /// Candidate gathering completion
    #[serde(with = "optional_millis")]
    pub ice_gathering: Option<Duration>,

    /// Signaling exchange round trip
    #[serde(with = "optional_millis")]
    pub exchange: Option<Duration>,

    /// Native connection leaving `new`/`connecting` after the answer
    #[serde(with = "optional_millis")]
    pub settle: Option<Duration>,
}

impl NegotiationTimeouts {
    /// Every wait unbounded
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds suitable for an interactive session
    ///
    /// # Example
    ///
    /// ```
    /// use webcam_rtc::config::NegotiationTimeouts;
    /// use std::time::Duration;
    ///
    /// let timeouts = NegotiationTimeouts::bounded();
    /// assert_eq!(timeouts.ice_gathering, Some(Duration::from_secs(10)));
    /// ```
    pub fn bounded() -> Self {
        Self {
            ice_gathering: Some(Duration::from_secs(10)),
            exchange: Some(Duration::from_secs(30)),
            settle: Some(Duration::from_secs(30)),
        }
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            constraints: MediaConstraints::default(),
            codecs: CodecPreferences::default(),
            timeouts: NegotiationTimeouts::default(),
            reject_unmatched_codec: false,
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - an ICE server has no URL, or a URL without a stun/stuns/turn/turns scheme
    /// - a TURN server lacks username or credential
    /// - neither audio nor video is requested
    /// - a timeout is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for server in self.ice_servers.iter().map(IceServerConfig::to_ice_server) {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry without URLs".to_string(),
                ));
            }
            for url in &server.urls {
                let scheme = url.split(':').next().unwrap_or("");
                match scheme {
                    "stun" | "stuns" => {}
                    "turn" | "turns" => {
                        if server.username.is_none() || server.credential.is_none() {
                            return Err(Error::InvalidConfig(format!(
                                "TURN server {} requires username and credential",
                                url
                            )));
                        }
                    }
                    _ => {
                        return Err(Error::InvalidConfig(format!(
                            "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                            url
                        )));
                    }
                }
            }
        }

        if !self.constraints.any_enabled() {
            return Err(Error::InvalidConfig(
                "At least one of audio and video must be requested".to_string(),
            ));
        }

        let timeouts = [
            ("ice_gathering", self.timeouts.ice_gathering),
            ("exchange", self.timeouts.exchange),
            ("settle", self.timeouts.settle),
        ];
        for (name, timeout) in timeouts {
            if timeout == Some(Duration::ZERO) {
                return Err(Error::InvalidConfig(format!(
                    "{} timeout must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Snapshot handed to the native factory
    pub fn peer_config(&self) -> PeerConfig {
        if self.ice_servers.is_empty() {
            return PeerConfig::default();
        }
        PeerConfig {
            ice_servers: self
                .ice_servers
                .iter()
                .map(IceServerConfig::to_ice_server)
                .collect(),
        }
    }

    /// Replace the ICE servers
    ///
    /// # Example
    ///
    /// ```
    /// use webcam_rtc::config::{IceServerConfig, SessionConfig};
    ///
    /// let config = SessionConfig::default()
    ///     .with_ice_servers(vec![IceServerConfig::Url("stun:stun.example.org".to_string())]);
    /// assert_eq!(config.peer_config().ice_servers.len(), 1);
    /// ```
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_codecs(mut self, codecs: CodecPreferences) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_timeouts(mut self, timeouts: NegotiationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_reject_unmatched_codec(mut self, reject: bool) -> Self {
        self.reject_unmatched_codec = reject;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackConstraint;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts, NegotiationTimeouts::unbounded());
    }

    #[test]
    fn test_empty_ice_servers_use_public_stun() {
        let peer = SessionConfig::default().peer_config();
        assert_eq!(peer.ice_servers.len(), DEFAULT_ICE_SERVERS.len());
        assert_eq!(peer.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_ice_server_forms() {
        let config = SessionConfig::from_json_str(
            r#"{
                "ice_servers": [
                    "stun:stun.example.org:3478",
                    {"urls": "turn:turn.example.org", "username": "u", "credential": "p"},
                    {"urls": ["stun:a.example.org", "stun:b.example.org"]}
                ]
            }"#,
        )
        .unwrap();

        let peer = config.peer_config();
        assert_eq!(peer.ice_servers.len(), 3);
        assert_eq!(peer.ice_servers[0].urls, vec!["stun:stun.example.org:3478"]);
        assert_eq!(peer.ice_servers[1].username.as_deref(), Some("u"));
        assert_eq!(peer.ice_servers[2].urls.len(), 2);
    }

    #[test]
    fn test_turn_without_credentials_fails() {
        let config = SessionConfig::default().with_ice_servers(vec![IceServerConfig::Url(
            "turn:turn.example.org".to_string(),
        )]);
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_invalid_scheme_fails() {
        let config = SessionConfig::default()
            .with_ice_servers(vec![IceServerConfig::Url("http://example.org".to_string())]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nothing_requested_fails() {
        let config = SessionConfig::default().with_constraints(MediaConstraints {
            audio: TrackConstraint::disabled(),
            video: TrackConstraint::disabled(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_fails() {
        let config = SessionConfig::default().with_timeouts(NegotiationTimeouts {
            exchange: Some(Duration::ZERO),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_serialize_as_millis() {
        let config = SessionConfig::default().with_timeouts(NegotiationTimeouts::bounded());
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeouts"]["ice_gathering"], 10_000);

        let parsed: SessionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_codec_in_file_fails() {
        let err = SessionConfig::from_json_str(r#"{"codecs": {"video": "H2*4"}}"#).unwrap_err();
        assert!(matches!(err, crate::Error::SerializationError(_)));
    }
}
