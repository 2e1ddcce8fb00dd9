//! Declared pipeline streams, as resolved by the graph compiler.
//!
//! Graph construction, link validation and serialization to the device's
//! native format happen in a separate layer; a session only needs the
//! resolved endpoint list this module describes.

/// An input stream declaration (host to device).
#[derive(Debug, Clone)]
pub struct InputStream {
    /// Stream name, unique within the pipeline.
    pub name: String,
    /// Maximum payload size in bytes, used to size the transport channel
    /// and to reject oversized sends.
    pub max_data_size: usize,
}

/// An output stream declaration (device to host).
#[derive(Debug, Clone)]
pub struct OutputStream {
    /// Stream name, unique within the pipeline.
    pub name: String,
    /// Whether this stream is a record source: when recording is enabled,
    /// its traffic is captured to a file.
    pub record_source: bool,
}

/// Resolved set of stream endpoints for one compiled pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineDescription {
    /// Declared input streams.
    pub inputs: Vec<InputStream>,
    /// Declared output streams.
    pub outputs: Vec<OutputStream>,
}

impl PipelineDescription {
    /// Create an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input stream with its maximum payload size.
    pub fn input(mut self, name: impl Into<String>, max_data_size: usize) -> Self {
        self.inputs.push(InputStream {
            name: name.into(),
            max_data_size,
        });
        self
    }

    /// Declare an output stream.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputStream {
            name: name.into(),
            record_source: false,
        });
        self
    }

    /// Declare an output stream whose traffic is captured when recording
    /// is enabled.
    pub fn recorded_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputStream {
            name: name.into(),
            record_source: true,
        });
        self
    }
}
