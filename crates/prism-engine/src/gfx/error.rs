use thiserror::Error;

use super::desc::Format;

/// Errors reported by a [`Backend`](super::Backend).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GfxError {
    #[error("failed to create {kind}: {reason}")]
    ResourceCreation { kind: &'static str, reason: String },

    #[error("format {0:?} is not supported as {1}")]
    UnsupportedFormat(Format, &'static str),

    #[error("shader `{name}` rejected:\n{diagnostic}")]
    Shader { name: String, diagnostic: String },

    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),

    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("composite binding set does not reference the current attachment image")]
    StaleBinding,

    #[error("surface ran out of memory")]
    SurfaceOutOfMemory,
}

impl GfxError {
    pub(crate) fn creation(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Self::InvalidUsage(msg.into())
    }
}

pub type GfxResult<T> = Result<T, GfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_resource() {
        let err = GfxError::creation("render pass", "attachment 1 has zero size");
        assert_eq!(
            err.to_string(),
            "failed to create render pass: attachment 1 has zero size"
        );
    }

    #[test]
    fn display_unsupported_format() {
        let err = GfxError::UnsupportedFormat(Format::Rgba16Float, "color attachment");
        assert_eq!(
            err.to_string(),
            "format Rgba16Float is not supported as color attachment"
        );
    }
}
