//! Source URL recognition
//!
//! The receiver accepts a small closed set of URL schemes, each mapping to a
//! different source sub-graph. Parsing happens before any pipeline work so
//! that a bad URL never leaves the idle state.

use crate::error::Error;
use std::fmt;

/// Recognized source kinds, keyed by exact URL prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    /// `rtsp://` - RTSP client, auto-parsed
    Rtsp,
    /// `udp://` - H.264 over RTP/UDP
    RtpH264,
    /// `udp265://` - H.265 over RTP/UDP
    RtpH265,
    /// `mpegts://` - MPEG-TS over UDP
    MpegTsUdp,
    /// `tcp://` - MPEG-TS over TCP
    MpegTsTcp,
    /// `tsusb://` - raw H.264 over UDP (Taisync style links)
    RawH264Udp,
}

impl UrlScheme {
    fn prefix(&self) -> &'static str {
        match self {
            UrlScheme::Rtsp => "rtsp://",
            UrlScheme::RtpH264 => "udp://",
            UrlScheme::RtpH265 => "udp265://",
            UrlScheme::MpegTsUdp => "mpegts://",
            UrlScheme::MpegTsTcp => "tcp://",
            UrlScheme::RawH264Udp => "tsusb://",
        }
    }

    const ALL: [UrlScheme; 6] = [
        UrlScheme::Rtsp,
        UrlScheme::RtpH264,
        UrlScheme::RtpH265,
        UrlScheme::MpegTsUdp,
        UrlScheme::MpegTsTcp,
        UrlScheme::RawH264Udp,
    ];

    /// The source element this scheme selects.
    pub fn source_factory(&self) -> &'static str {
        match self {
            UrlScheme::Rtsp => "rtspsrc",
            UrlScheme::MpegTsTcp => "tcpclientsrc",
            _ => "udpsrc",
        }
    }

    /// MPEG-TS variants cannot rely on auto-parsing and need an explicit
    /// transport-stream demuxer.
    pub fn needs_ts_demux(&self) -> bool {
        matches!(self, UrlScheme::MpegTsUdp | UrlScheme::MpegTsTcp)
    }

    /// RTP encoding name for the fixed caps filter, where UDP carries no
    /// caps of its own.
    pub fn rtp_encoding(&self) -> Option<&'static str> {
        match self {
            UrlScheme::RtpH264 => Some("H264"),
            UrlScheme::RtpH265 => Some("H265"),
            _ => None,
        }
    }

    /// Whether this scheme receives over a plain UDP socket.
    pub fn is_udp(&self) -> bool {
        !matches!(self, UrlScheme::Rtsp | UrlScheme::MpegTsTcp)
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches("://"))
    }
}

/// A validated source URL, with host and port split out for the schemes
/// whose source elements take them as separate properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    raw: String,
    scheme: UrlScheme,
    host: String,
    port: Option<u16>,
}

impl SourceUrl {
    pub fn parse(url: &str) -> Result<Self, Error> {
        if url.is_empty() {
            return Err(Error::EmptyUrl);
        }

        let scheme = UrlScheme::ALL
            .iter()
            .copied()
            .find(|s| url.starts_with(s.prefix()))
            .ok_or_else(|| Error::UnsupportedScheme(url.to_string()))?;

        // RTSP locations are handed to the source whole; everything else
        // addresses a socket and must split into host and port.
        let (host, port) = if scheme == UrlScheme::Rtsp {
            (String::new(), None)
        } else {
            let rest = &url[scheme.prefix().len()..];
            let authority = rest.split(['/', '?']).next().unwrap_or("");

            let (host, port) = authority
                .rsplit_once(':')
                .ok_or_else(|| Error::InvalidUrl(url.to_string(), "missing port"))?;
            if host.is_empty() {
                return Err(Error::InvalidUrl(url.to_string(), "missing host"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::InvalidUrl(url.to_string(), "invalid port"))?;

            (host.to_string(), Some(port))
        };

        Ok(SourceUrl {
            raw: url.to_string(),
            scheme,
            host,
            port,
        })
    }

    pub fn scheme(&self) -> UrlScheme {
        self.scheme
    }

    /// The URL exactly as the caller supplied it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Rewritten location for `udpsrc`, which only understands `udp://`.
    pub fn udp_uri(&self) -> String {
        format!("udp://{}:{}", self.host, self.port.unwrap_or(0))
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_routing() {
        let cases = [
            ("rtsp://camera.local/stream", UrlScheme::Rtsp, "rtspsrc"),
            ("udp://0.0.0.0:5600", UrlScheme::RtpH264, "udpsrc"),
            ("udp265://0.0.0.0:5600", UrlScheme::RtpH265, "udpsrc"),
            ("mpegts://0.0.0.0:5600", UrlScheme::MpegTsUdp, "udpsrc"),
            ("tcp://10.0.0.2:5600", UrlScheme::MpegTsTcp, "tcpclientsrc"),
            ("tsusb://0.0.0.0:5600", UrlScheme::RawH264Udp, "udpsrc"),
        ];

        for (url, scheme, factory) in cases {
            let parsed = SourceUrl::parse(url).unwrap();
            assert_eq!(parsed.scheme(), scheme, "{url}");
            assert_eq!(parsed.scheme().source_factory(), factory, "{url}");
        }
    }

    #[test]
    fn test_rtp_caps_selection() {
        assert_eq!(
            SourceUrl::parse("udp://0.0.0.0:5600")
                .unwrap()
                .scheme()
                .rtp_encoding(),
            Some("H264")
        );
        assert_eq!(
            SourceUrl::parse("udp265://0.0.0.0:5600")
                .unwrap()
                .scheme()
                .rtp_encoding(),
            Some("H265")
        );
        assert_eq!(
            SourceUrl::parse("mpegts://0.0.0.0:5600")
                .unwrap()
                .scheme()
                .rtp_encoding(),
            None
        );
    }

    #[test]
    fn test_ts_demux_selection() {
        assert!(SourceUrl::parse("mpegts://0.0.0.0:5600")
            .unwrap()
            .scheme()
            .needs_ts_demux());
        assert!(SourceUrl::parse("tcp://10.0.0.2:5600")
            .unwrap()
            .scheme()
            .needs_ts_demux());
        assert!(!SourceUrl::parse("udp://0.0.0.0:5600")
            .unwrap()
            .scheme()
            .needs_ts_demux());
    }

    #[test]
    fn test_host_and_port() {
        let url = SourceUrl::parse("tcp://10.0.0.2:5600").unwrap();
        assert_eq!(url.host(), "10.0.0.2");
        assert_eq!(url.port(), Some(5600));

        let url = SourceUrl::parse("udp265://0.0.0.0:5601").unwrap();
        assert_eq!(url.udp_uri(), "udp://0.0.0.0:5601");

        // RTSP is passed through whole, host/port split is not required
        let url = SourceUrl::parse("rtsp://camera.local/stream").unwrap();
        assert_eq!(url.as_str(), "rtsp://camera.local/stream");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(SourceUrl::parse(""), Err(Error::EmptyUrl)));
        assert!(matches!(
            SourceUrl::parse("http://example.com/stream"),
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!(
            SourceUrl::parse("udp://:5600"),
            Err(Error::InvalidUrl(_, _))
        ));
        assert!(matches!(
            SourceUrl::parse("tcp://10.0.0.2"),
            Err(Error::InvalidUrl(_, _))
        ));
        assert!(matches!(
            SourceUrl::parse("udp://0.0.0.0:notaport"),
            Err(Error::InvalidUrl(_, _))
        ));
    }

    #[test]
    fn test_prefix_is_exact() {
        // `udp265://` must not be mistaken for `udp://`
        let parsed = SourceUrl::parse("udp265://0.0.0.0:5600").unwrap();
        assert_eq!(parsed.scheme(), UrlScheme::RtpH265);
    }
}
