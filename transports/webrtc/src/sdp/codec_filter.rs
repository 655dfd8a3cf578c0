//! Codec filter
//!
//! Restricts the payload types of every media section of one kind to the
//! ones mapped to a requested codec, plus the RTX payload types whose `apt=`
//! references one of those.
//!
//! ```text
//! m=video 9 UDP/TLS/RTP/SAVPF 96 97 98        m=video 9 UDP/TLS/RTP/SAVPF 96 97
//! a=rtpmap:96 H264/90000                      a=rtpmap:96 H264/90000
//! a=rtpmap:97 rtx/90000             H264      a=rtpmap:97 rtx/90000
//! a=fmtp:97 apt=96                 ----->     a=fmtp:97 apt=96
//! a=rtpmap:98 VP8/90000                       a=mid:0
//! a=rtcp-fb:98 nack
//! a=mid:0
//! ```
//!
//! Lines outside the targeted sections are copied verbatim, line endings are
//! preserved, and the rewrite is idempotent.

use crate::media::MediaKind;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static RTPMAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^a=rtpmap:(\d+) (\S+)").expect("rtpmap pattern is valid")
});

static RTX_APT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^a=fmtp:(\d+) apt=(\d+)\s*$").expect("apt pattern is valid")
});

static PAYLOAD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^a=(?:fmtp|rtcp-fb|rtpmap):(\d+)").expect("payload line pattern is valid")
});

/// Validated codec identifier, e.g. `H264` or `opus`
///
/// Accepts the `"<mime> <fmtp>"` strings produced by codec listing; the
/// mime prefix and the parameters are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodecName(String);

impl CodecName {
    pub fn parse(input: &str) -> Result<Self> {
        let name = input.split_whitespace().next().unwrap_or("");
        let name = strip_mime_prefix(name);

        if name.is_empty() {
            return Err(Error::InvalidCodec(format!("Empty codec name in {:?}", input)));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')))
        {
            return Err(Error::InvalidCodec(format!(
                "Unexpected character {:?} in codec name {:?}",
                bad, input
            )));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive prefix match against an rtpmap encoding such as
    /// `H264/90000`
    fn matches_encoding(&self, encoding: &str) -> bool {
        encoding
            .get(..self.0.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.0))
    }
}

fn strip_mime_prefix(name: &str) -> &str {
    for prefix in ["video/", "audio/"] {
        if let Some(head) = name.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return &name[prefix.len()..];
            }
        }
    }
    name
}

impl fmt::Display for CodecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Codec selection for one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CodecPreference {
    /// Leave the offer untouched
    #[default]
    Default,
    /// Restrict the section to this codec
    Codec(CodecName),
}

impl CodecPreference {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            Ok(CodecPreference::Default)
        } else {
            CodecName::parse(trimmed).map(CodecPreference::Codec)
        }
    }

    pub fn codec(&self) -> Option<&CodecName> {
        match self {
            CodecPreference::Default => None,
            CodecPreference::Codec(name) => Some(name),
        }
    }
}

impl TryFrom<String> for CodecPreference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CodecPreference::parse(&value)
    }
}

impl From<CodecPreference> for String {
    fn from(value: CodecPreference) -> Self {
        match value {
            CodecPreference::Default => "default".to_string(),
            CodecPreference::Codec(name) => name.0,
        }
    }
}

/// Per-kind codec selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPreferences {
    #[serde(default)]
    pub audio: CodecPreference,
    #[serde(default)]
    pub video: CodecPreference,
}

impl CodecPreferences {
    pub fn get(&self, kind: MediaKind) -> &CodecPreference {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn with_video(mut self, codec: CodecName) -> Self {
        self.video = CodecPreference::Codec(codec);
        self
    }

    pub fn with_audio(mut self, codec: CodecName) -> Self {
        self.audio = CodecPreference::Codec(codec);
        self
    }
}

/// Result of filtering one media kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Rewritten SDP text
    pub sdp: String,
    /// Kept payload types of each targeted section, in collection order
    pub sections: Vec<Vec<u32>>,
}

impl FilterOutcome {
    /// Whether some targeted section was left without payload types
    pub fn has_empty_section(&self) -> bool {
        self.sections.iter().any(Vec::is_empty)
    }
}

/// Restrict every `kind` section of `sdp` to `codec`
pub fn filter_codec(sdp: &str, kind: MediaKind, codec: &CodecName) -> FilterOutcome {
    let lines: Vec<&str> = sdp.split_inclusive('\n').collect();
    let header = format!("m={} ", kind);

    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("m=") {
            if let Some(start) = open.take() {
                ranges.push(start..i);
            }
            if line.starts_with(&header) {
                open = Some(i);
            }
        }
    }
    if let Some(start) = open {
        ranges.push(start..lines.len());
    }

    let mut out = String::with_capacity(sdp.len());
    let mut sections = Vec::with_capacity(ranges.len());
    let mut cursor = 0;
    for range in ranges {
        for line in &lines[cursor..range.start] {
            out.push_str(line);
        }

        let section = &lines[range.clone()];
        let allowed = collect_payload_types(section, codec);
        out.push_str(&rewrite_header(section[0], &allowed));
        for line in &section[1..] {
            let keep = match PAYLOAD_LINE.captures(strip_eol(line).0) {
                Some(caps) => parse_pt(&caps[1]).is_some_and(|pt| allowed.contains(&pt)),
                None => true,
            };
            if keep {
                out.push_str(line);
            }
        }

        sections.push(allowed);
        cursor = range.end;
    }
    for line in &lines[cursor..] {
        out.push_str(line);
    }

    FilterOutcome { sdp: out, sections }
}

fn collect_payload_types(section: &[&str], codec: &CodecName) -> Vec<u32> {
    let mut allowed = Vec::new();

    for line in section {
        if let Some(caps) = RTPMAP.captures(strip_eol(line).0) {
            if let Some(pt) = parse_pt(&caps[1]) {
                if codec.matches_encoding(&caps[2]) && !allowed.contains(&pt) {
                    allowed.push(pt);
                }
            }
        }
    }

    for line in section {
        if let Some(caps) = RTX_APT.captures(strip_eol(line).0) {
            if let (Some(pt), Some(apt)) = (parse_pt(&caps[1]), parse_pt(&caps[2])) {
                if allowed.contains(&apt) && !allowed.contains(&pt) {
                    allowed.push(pt);
                }
            }
        }
    }

    allowed
}

/// Keep `m=<kind> <port> <proto>` and replace the format list
fn rewrite_header(line: &str, allowed: &[u32]) -> String {
    let (body, eol) = strip_eol(line);
    let mut header = body.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    for pt in allowed {
        header.push(' ');
        header.push_str(&pt.to_string());
    }
    header.push_str(eol);
    header
}

fn strip_eol(line: &str) -> (&str, &str) {
    let body = line.trim_end_matches(['\r', '\n']);
    (body, &line[body.len()..])
}

fn parse_pt(digits: &str) -> Option<u32> {
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OFFER: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
a=mid:1\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:98 VP8/90000\r\n\
a=rtcp-fb:98 nack\r\n\
a=rtcp-fb:98 goog-remb\r\n\
a=sendrecv\r\n";

    fn codec(name: &str) -> CodecName {
        CodecName::parse(name).unwrap()
    }

    #[test]
    fn test_keeps_codec_and_its_rtx() {
        let outcome = filter_codec(OFFER, MediaKind::Video, &codec("H264"));

        assert_eq!(outcome.sections, vec![vec![96, 97]]);
        assert!(outcome.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n"));
        assert!(outcome.sdp.contains("a=fmtp:97 apt=96\r\n"));
        assert!(!outcome.sdp.contains(":98"));
        assert!(outcome.sdp.contains("a=mid:1\r\n"));
        assert!(outcome.sdp.ends_with("a=sendrecv\r\n"));
    }

    #[test]
    fn test_other_sections_untouched() {
        let outcome = filter_codec(OFFER, MediaKind::Video, &codec("VP8"));
        let audio_before: Vec<&str> = OFFER.lines().take(8).collect();
        let audio_after: Vec<&str> = outcome.sdp.lines().take(8).collect();

        assert_eq!(audio_before, audio_after);
        assert_eq!(outcome.sections, vec![vec![98]]);
    }

    #[test]
    fn test_no_match_empties_payload_list() {
        let outcome = filter_codec(OFFER, MediaKind::Video, &codec("AV1"));

        assert_eq!(outcome.sections, vec![Vec::<u32>::new()]);
        assert!(outcome.has_empty_section());
        assert!(outcome.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF\r\n"));
        assert!(!outcome.sdp.contains("a=rtpmap:96"));
        assert!(outcome.sdp.contains("a=rtpmap:111 opus/48000/2\r\n"));
    }

    #[test]
    fn test_audio_filter_is_case_insensitive() {
        let outcome = filter_codec(OFFER, MediaKind::Audio, &codec("audio/OPUS"));
        assert_eq!(outcome.sections, vec![vec![111]]);
        assert!(outcome.sdp.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"));
        assert!(!outcome.sdp.contains("PCMU"));
    }

    #[test]
    fn test_missing_section_is_noop() {
        let sdp = "v=0\nm=audio 9 RTP/AVP 0\na=rtpmap:0 PCMU/8000\n";
        let outcome = filter_codec(sdp, MediaKind::Video, &codec("VP8"));
        assert_eq!(outcome.sdp, sdp);
        assert!(outcome.sections.is_empty());
        assert!(!outcome.has_empty_section());
    }

    #[test]
    fn test_codec_name_parse() {
        assert_eq!(
            codec("video/H264 level-asymmetry-allowed=1;packetization-mode=1").as_str(),
            "H264"
        );
        assert!(CodecName::parse("").is_err());
        assert!(CodecName::parse("video/").is_err());
        assert!(CodecName::parse("VP8;drop").is_err());
    }

    #[test]
    fn test_codec_preference_serde() {
        let prefs: CodecPreferences = serde_json::from_str(r#"{"video": "VP9"}"#).unwrap();
        assert_eq!(prefs.audio, CodecPreference::Default);
        assert_eq!(prefs.video.codec().map(CodecName::as_str), Some("VP9"));

        let json = serde_json::to_string(&prefs).unwrap();
        assert_eq!(json, r#"{"audio":"default","video":"VP9"}"#);

        assert!(serde_json::from_str::<CodecPreferences>(r#"{"video": "VP*"}"#).is_err());
    }

    fn video_sdp(codecs: &[(&str, bool)], eol: &str) -> String {
        let mut pts = Vec::new();
        let mut attrs = String::new();
        let mut next = 96u32;
        for (name, with_rtx) in codecs {
            let pt = next;
            next += 1;
            pts.push(pt);
            attrs.push_str(&format!("a=rtpmap:{} {}/90000{}", pt, name, eol));
            attrs.push_str(&format!("a=rtcp-fb:{} nack{}", pt, eol));
            if *with_rtx {
                let rtx = next;
                next += 1;
                pts.push(rtx);
                attrs.push_str(&format!("a=rtpmap:{} rtx/90000{}", rtx, eol));
                attrs.push_str(&format!("a=fmtp:{} apt={}{}", rtx, pt, eol));
            }
        }
        let list = pts.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
        format!(
            "v=0{eol}m=audio 9 RTP/AVP 0{eol}a=rtpmap:0 PCMU/8000{eol}m=video 9 UDP/TLS/RTP/SAVPF {list}{eol}{attrs}a=sendrecv{eol}",
        )
    }

    proptest! {
        #[test]
        fn prop_filter_is_idempotent(
            codecs in prop::collection::vec(
                (prop::sample::select(vec!["H264", "VP8", "VP9", "AV1"]), any::<bool>()),
                1..6,
            ),
            target in prop::sample::select(vec!["H264", "VP8", "VP9", "AV1", "H265"]),
            crlf in any::<bool>(),
        ) {
            let sdp = video_sdp(&codecs, if crlf { "\r\n" } else { "\n" });
            let name = codec(target);

            let once = filter_codec(&sdp, MediaKind::Video, &name);
            let twice = filter_codec(&once.sdp, MediaKind::Video, &name);

            prop_assert_eq!(&once.sdp, &twice.sdp);
            prop_assert_eq!(&once.sections, &twice.sections);
        }
    }
}
