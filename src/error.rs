use gstreamer as gst;
use gstreamer::glib;

/// Everything that can go wrong while configuring or driving the receiver.
///
/// Configuration problems (`EmptyUrl`, `UnsupportedScheme`, `InvalidUrl`)
/// are returned to the caller before any pipeline work starts. Build and
/// link failures abort the operation in progress and leave the receiver
/// idle. Runtime pipeline errors are reported on the bus and handled by
/// the restart path, not through this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no source url specified")]
    EmptyUrl,

    #[error("unsupported url scheme in `{0}`")]
    UnsupportedScheme(String),

    #[error("unsupported container format `{0}`")]
    UnsupportedFormat(String),

    #[error("malformed url `{0}`: {1}")]
    InvalidUrl(String, &'static str),

    #[error("failed to create element `{0}`")]
    ElementCreate(&'static str),

    #[error("failed to link {0}")]
    Link(&'static str),

    #[error("element has no `{0}` pad")]
    NoPad(&'static str),

    #[error("failed to request `{0}` pad from muxer")]
    PadRequest(&'static str),

    #[error("failed to install {0} probe")]
    Probe(&'static str),

    #[error("pipeline state change failed: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error(transparent)]
    Glib(#[from] glib::Error),

    #[error(transparent)]
    Bool(#[from] glib::BoolError),

    #[error("receiver control thread is gone")]
    ControllerGone,
}
