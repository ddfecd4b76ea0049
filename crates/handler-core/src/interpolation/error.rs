use thiserror::Error;

/// Errors that can occur while interpolating a template.
///
/// Both variants display the same text. The underlying cause is kept for
/// callers that need to tell a malformed template from a failed render.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    /// The template is malformed.
    #[error("cannot interpolate string")]
    Compile { cause: String },

    /// The template is well formed but could not be rendered.
    #[error("cannot interpolate string")]
    Render { cause: String },
}

impl InterpolationError {
    pub(crate) fn compile(cause: impl Into<String>) -> Self {
        Self::Compile { cause: cause.into() }
    }

    pub(crate) fn render(cause: impl Into<String>) -> Self {
        Self::Render { cause: cause.into() }
    }

    /// The underlying cause.
    pub fn cause(&self) -> &str {
        match self {
            Self::Compile { cause } | Self::Render { cause } => cause,
        }
    }
}

/// Result type for interpolation.
pub type Result<T> = std::result::Result<T, InterpolationError>;
