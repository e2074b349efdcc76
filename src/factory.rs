//! Element factory
//!
//! Builds the three sub-graphs the receiver composes at runtime: the source
//! bin for a given URL scheme, the auto-plugging decoder, and the muxer +
//! file-writer bin for a recording. Each sub-graph is a sealed bin; dynamic
//! pads of the inner parser are re-exposed as ghost pads so downstream
//! linking does not care where the pad came from.

use crate::error::Error;
use crate::url::{SourceUrl, UrlScheme};
use gstreamer as gst;
use gstreamer::prelude::*;
use log::{debug, error, warn};
use std::path::Path;
use std::str::FromStr;

/// Buffering latency for the RTSP client (ms).
const RTSP_LATENCY_MS: u32 = 17;

/// RTSP UDP reconnect timeout (us).
const RTSP_RECONNECT_US: u64 = 5_000_000;

/// Clock rate for RTP video payloads.
const RTP_VIDEO_CLOCK_RATE: i32 = 90_000;

/// Container formats a recording branch can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mkv,
    Mov,
    Mp4,
}

impl ContainerFormat {
    /// Muxer factory for this container.
    pub fn muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mkv => "matroskamux",
            ContainerFormat::Mov => "qtmux",
            ContainerFormat::Mp4 => "mp4mux",
        }
    }

    /// Conventional file extension, matching the tag.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

impl FromStr for ContainerFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mkv" => Ok(ContainerFormat::Mkv),
            "mov" => Ok(ContainerFormat::Mov),
            "mp4" => Ok(ContainerFormat::Mp4),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

fn make_element(factory: &'static str) -> Result<gst::Element, Error> {
    gst::ElementFactory::make(factory).build().map_err(|_| {
        error!("failed to create element `{}`", factory);
        Error::ElementCreate(factory)
    })
}

fn rtp_filter() -> gst::Caps {
    gst::Caps::new_empty_simple("application/x-rtp")
}

/// Whether a pad currently produces RTP, and therefore wants a jitter
/// buffer in front of the parser.
fn pad_is_rtp(pad: &gst::Pad) -> bool {
    let caps = pad.query_caps(None);
    !caps.is_any() && caps.can_intersect(&rtp_filter())
}

/// Build the source sub-graph for `url`.
///
/// The returned bin contains the network source and a parser (`parsebin`,
/// or `tsdemux` for the MPEG-TS schemes). A jitter buffer is inserted in
/// front of the parser whenever the source produces RTP: eagerly when the
/// source's static pads already say so, or at `pad-added` time for sources
/// that expose pads late. Every pad the parser exposes is re-published as
/// a ghost pad on the bin.
pub fn build_source(url: &SourceUrl) -> Result<gst::Element, Error> {
    let source = match url.scheme() {
        UrlScheme::Rtsp => gst::ElementFactory::make("rtspsrc")
            .name("source")
            .property("location", url.as_str())
            .property("latency", RTSP_LATENCY_MS)
            .property("udp-reconnect", true)
            .property("timeout", RTSP_RECONNECT_US)
            .build()
            .map_err(|_| Error::ElementCreate("rtspsrc"))?,
        UrlScheme::MpegTsTcp => gst::ElementFactory::make("tcpclientsrc")
            .name("source")
            .property("host", url.host())
            .property("port", i32::from(url.port().unwrap_or(0)))
            .build()
            .map_err(|_| Error::ElementCreate("tcpclientsrc"))?,
        _ => {
            let source = gst::ElementFactory::make("udpsrc")
                .name("source")
                .property("uri", url.udp_uri())
                .build()
                .map_err(|_| Error::ElementCreate("udpsrc"))?;

            // UDP carries no caps; pin them down for the RTP variants
            if let Some(encoding) = url.scheme().rtp_encoding() {
                let caps = gst::Caps::builder("application/x-rtp")
                    .field("media", "video")
                    .field("clock-rate", RTP_VIDEO_CLOCK_RATE)
                    .field("encoding-name", encoding)
                    .build();
                source.set_property("caps", &caps);
            }

            source
        }
    };

    let parser = if url.scheme().needs_ts_demux() {
        make_element("tsdemux")?
    } else {
        make_element("parsebin")?
    };

    let bin = gst::Bin::builder().name("video-source").build();
    bin.add_many([&source, &parser])
        .map_err(|_| Error::Link("source bin children"))?;

    let static_pads = source.src_pads();

    if static_pads.is_empty() {
        // Pads appear later; decide about the jitter buffer when they do
        let parser_weak = parser.downgrade();
        source.connect_pad_added(move |source, pad| {
            let Some(parser) = parser_weak.upgrade() else {
                return;
            };
            link_source_pad(source, pad, &parser);
        });
    } else if static_pads.iter().any(pad_is_rtp) {
        let buffer = make_element("rtpjitterbuffer")?;
        bin.add(&buffer)
            .map_err(|_| Error::Link("jitter buffer"))?;
        gst::Element::link_many([&source, &buffer, &parser])
            .map_err(|_| Error::Link("source -> jitter buffer -> parser"))?;
    } else {
        source
            .link(&parser)
            .map_err(|_| Error::Link("source -> parser"))?;
    }

    parser.connect_pad_added(|parser, pad| {
        expose_ghost_pad(parser, pad);
    });

    Ok(bin.upcast())
}

/// Deferred source linking, for sources whose pads only show up once the
/// stream is negotiated. Inserts a jitter buffer iff the new pad is RTP.
fn link_source_pad(source: &gst::Element, pad: &gst::Pad, parser: &gst::Element) {
    debug!("source pad `{}` appeared", pad.name());

    let Some(parser_sink) = parser.static_pad("sink") else {
        error!("parser has no sink pad");
        return;
    };

    if parser_sink.is_linked() {
        debug!("parser already linked, ignoring pad `{}`", pad.name());
        return;
    }

    let mut upstream = pad.clone();

    if pad_is_rtp(pad) {
        match insert_jitter_buffer(source, pad) {
            Some(buffer_src) => upstream = buffer_src,
            None => warn!("jitter buffer insertion failed, linking pad directly"),
        }
    }

    if let Err(err) = upstream.link(&parser_sink) {
        error!("failed to link source pad to parser: {}", err);
    }
}

fn insert_jitter_buffer(source: &gst::Element, pad: &gst::Pad) -> Option<gst::Pad> {
    let bin = source.parent()?.downcast::<gst::Bin>().ok()?;

    let buffer = gst::ElementFactory::make("rtpjitterbuffer").build().ok()?;
    bin.add(&buffer).ok()?;
    buffer.sync_state_with_parent().ok()?;

    let buffer_sink = buffer.static_pad("sink")?;
    if pad.link(&buffer_sink).is_err() {
        let _ = bin.remove(&buffer);
        return None;
    }

    buffer.static_pad("src")
}

/// Re-expose an inner pad on the enclosing bin, so downstream linking is
/// position-independent.
fn expose_ghost_pad(element: &gst::Element, pad: &gst::Pad) {
    let Some(bin) = element
        .parent()
        .and_then(|p| p.downcast::<gst::Bin>().ok())
    else {
        error!("cannot ghost pad `{}`: element has no parent bin", pad.name());
        return;
    };

    let ghost = match gst::GhostPad::builder_with_target(pad) {
        Ok(builder) => builder.name(pad.name()).build(),
        Err(err) => {
            error!("failed to ghost pad `{}`: {}", pad.name(), err);
            return;
        }
    };

    if let Err(err) = ghost.set_active(true) {
        error!("failed to activate ghost pad `{}`: {}", pad.name(), err);
        return;
    }

    if bin.add_pad(&ghost).is_err() {
        error!("failed to add ghost pad `{}` to source bin", pad.name());
    }
}

/// Build an auto-plugging decoder whose plug selection is coupled to the
/// supplied video sink: CAPS queries are answered with the sink pad's
/// accepted caps and CONTEXT queries are forwarded to the sink, so a
/// GL-capable sink pulls in a matching decoder.
pub fn build_decoder(caps: &gst::Caps, sink: &gst::Element) -> Result<gst::Element, Error> {
    debug!("building decoder for caps {}", caps);

    let decoder = make_element("decodebin")?;

    let sink_weak = sink.downgrade();
    decoder.connect("autoplug-query", false, move |args| {
        let unhandled = Some(false.to_value());

        let Some(sink) = sink_weak.upgrade() else {
            return unhandled;
        };
        let Some(sink_pad) = sink.static_pad("sink") else {
            return unhandled;
        };
        let Ok(mut query) = args[3].get::<gst::Query>() else {
            return unhandled;
        };

        // The marshaller may only grant shared access; in that case report
        // unhandled and decodebin falls back to its default ranking.
        let handled = match query.get_mut() {
            Some(query) => answer_autoplug_query(&sink_pad, query),
            None => false,
        };

        Some(handled.to_value())
    });

    Ok(decoder)
}

fn answer_autoplug_query(sink_pad: &gst::Pad, query: &mut gst::QueryRef) -> bool {
    if matches!(query.view(), gst::QueryView::Context(_)) {
        return sink_pad.query(query);
    }

    if let gst::QueryViewMut::Caps(caps_query) = query.view_mut() {
        let filter = caps_query.filter().map(|f| f.to_owned());
        let result = sink_pad.query_caps(filter.as_ref());
        let handled = !result.is_empty();
        caps_query.set_result(&result);
        return handled;
    }

    false
}

/// Build the muxer + file-writer bin for a recording branch. The muxer's
/// requested `video_%u` pad is ghosted as the bin's sole sink pad.
pub fn build_file_sink(path: &Path, format: ContainerFormat) -> Result<gst::Element, Error> {
    let mux = make_element(format.muxer())?;
    let sink = gst::ElementFactory::make("filesink")
        .name("filesink")
        .property("location", path.display().to_string())
        .build()
        .map_err(|_| Error::ElementCreate("filesink"))?;

    let bin = gst::Bin::builder().name("file-sink").build();
    bin.add_many([&mux, &sink])
        .map_err(|_| Error::Link("file sink bin children"))?;
    mux.link(&sink).map_err(|_| Error::Link("muxer -> filesink"))?;

    let pad = mux
        .request_pad_simple("video_%u")
        .ok_or(Error::PadRequest("video_%u"))?;

    let ghost = gst::GhostPad::builder_with_target(&pad)?
        .name("sink")
        .build();
    ghost
        .set_active(true)
        .map_err(|_| Error::Probe("file sink ghost pad"))?;
    bin.add_pad(&ghost)
        .map_err(|_| Error::Link("file sink ghost pad"))?;

    Ok(bin.upcast())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::SourceUrl;

    fn init() {
        crate::ensure_initialized().unwrap();
    }

    #[test]
    fn test_format_muxer_mapping() {
        assert_eq!(ContainerFormat::Mkv.muxer(), "matroskamux");
        assert_eq!(ContainerFormat::Mov.muxer(), "qtmux");
        assert_eq!(ContainerFormat::Mp4.muxer(), "mp4mux");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("mkv".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mkv);
        assert_eq!("MOV".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mov);
        assert_eq!("mp4".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mp4);
        assert!("avi".parse::<ContainerFormat>().is_err());
    }

    #[test]
    fn test_build_udp_source() {
        init();

        let url = SourceUrl::parse("udp://127.0.0.1:5600").unwrap();
        let source = build_source(&url).unwrap();
        let bin = source.downcast::<gst::Bin>().unwrap();

        let inner = bin.by_name("source").unwrap();
        assert_eq!(
            inner.factory().map(|f| f.name().to_string()),
            Some("udpsrc".to_string())
        );

        // The fixed caps filter must carry the H264 encoding name
        let caps = inner.property::<gst::Caps>("caps");
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<&str>("encoding-name").unwrap(), "H264");
    }

    #[test]
    fn test_build_udp265_source_caps() {
        init();

        let url = SourceUrl::parse("udp265://127.0.0.1:5600").unwrap();
        let bin = build_source(&url).unwrap().downcast::<gst::Bin>().unwrap();

        let inner = bin.by_name("source").unwrap();
        let caps = inner.property::<gst::Caps>("caps");
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<&str>("encoding-name").unwrap(), "H265");
    }

    #[test]
    fn test_build_rtsp_source() {
        init();

        let url = SourceUrl::parse("rtsp://127.0.0.1/stream").unwrap();
        let bin = build_source(&url).unwrap().downcast::<gst::Bin>().unwrap();

        let inner = bin.by_name("source").unwrap();
        assert_eq!(
            inner.factory().map(|f| f.name().to_string()),
            Some("rtspsrc".to_string())
        );
        assert_eq!(inner.property::<u32>("latency"), 17);
    }

    #[test]
    fn test_build_decoder() {
        init();

        let sink = gst::ElementFactory::make("fakesink").build().unwrap();
        let caps = gst::Caps::new_empty_simple("video/x-h264");
        let decoder = build_decoder(&caps, &sink).unwrap();
        assert_eq!(
            decoder.factory().map(|f| f.name().to_string()),
            Some("decodebin".to_string())
        );
    }

    #[test]
    fn test_build_file_sink_exposes_single_sink_pad() {
        init();

        let dir = std::env::temp_dir();
        for format in [
            ContainerFormat::Mkv,
            ContainerFormat::Mov,
            ContainerFormat::Mp4,
        ] {
            let path = dir.join(format!("videorx-test.{}", format.extension()));
            let sink = build_file_sink(&path, format).unwrap();

            let pads = sink.sink_pads();
            assert_eq!(pads.len(), 1, "{format}");
            assert_eq!(pads[0].name(), "sink", "{format}");
            assert!(sink.src_pads().is_empty(), "{format}");
        }
    }
}
