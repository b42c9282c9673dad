// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for format definitions and normalization.

use thiserror::Error;

/// Errors raised while loading or compiling a custom format definition.
///
/// Per-line parse failures are never errors: the normalizer always falls
/// back to the plain-text path instead of dropping a line.
#[derive(Error, Debug)]
pub enum Error {
    /// The format definition file could not be read.
    #[error("Failed to read format definition '{path}': {details}")]
    FormatFileRead {
        /// Path of the definition file.
        path: String,
        /// Human-readable details of the I/O failure.
        details: String,
    },

    /// The format definition file is not valid YAML for the schema.
    #[error("Invalid format definition '{path}': {details}")]
    FormatFileParse {
        /// Path of the definition file.
        path: String,
        /// Human-readable details of the deserialization failure.
        details: String,
    },

    /// A regex declared by the format definition failed to compile.
    #[error("Invalid pattern '{pattern}' in format definition: {details}")]
    InvalidPattern {
        /// The offending pattern source.
        pattern: String,
        /// Human-readable details of the regex compilation failure.
        details: String,
    },

    /// The declared transform is not one of the supported names.
    #[error("Unknown transform '{transform}' in format definition")]
    UnknownTransform {
        /// The unrecognized transform name.
        transform: String,
    },

    /// The batch expansion path uses a shape the engine does not support.
    #[error("Unsupported batch expand path '{path}' (supported: 'a[].b[]' and '[]')")]
    UnsupportedExpandPath {
        /// The rejected expansion path.
        path: String,
    },
}
