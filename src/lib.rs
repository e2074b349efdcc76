//! videorx - live video stream receiver
//!
//! Ingests a network video stream (RTSP, RTP/UDP, MPEG-TS) and, on demand
//! and independently, decodes it for display and/or remuxes the compressed
//! stream into a container file whose first buffer is a keyframe at
//! presentation time zero. Branches attach and detach while the stream
//! keeps running; a watchdog restarts the stream when frames stop
//! arriving.

use gstreamer as gst;
use gstreamer::glib;
use once_cell::sync::Lazy;

pub mod error;
pub mod events;
pub mod factory;
pub mod pipeline;
pub mod url;

pub use error::Error;
pub use events::{EventBus, ReceiverEvent};
pub use factory::ContainerFormat;
pub use pipeline::state::{BranchState, ReceiverState};
pub use pipeline::stats::ReceiverStats;
pub use pipeline::VideoReceiver;
pub use url::{SourceUrl, UrlScheme};

static MEDIA_RUNTIME: Lazy<Result<(), glib::Error>> = Lazy::new(gst::init);

/// Initialize the process-wide media runtime. Idempotent; every public
/// entry point calls this before touching any element, so hosts only need
/// it for early failure detection.
pub fn ensure_initialized() -> Result<(), Error> {
    MEDIA_RUNTIME
        .as_ref()
        .map_err(|err| Error::Glib(err.clone()))?;
    Ok(())
}
