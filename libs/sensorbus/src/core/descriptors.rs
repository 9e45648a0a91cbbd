// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stream identity types shared by producers and consumers.
//!
//! A stream is named by its [`StreamDescription`], a {type, subtype} pair.
//! Types identify the semantic kind of data (color, depth); subtypes
//! distinguish multiple streams of the same kind on one device.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic kind of a stream (color, depth, infrared, or a vendor value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamType(pub u32);

impl StreamType {
    pub const COLOR: StreamType = StreamType(1);
    pub const DEPTH: StreamType = StreamType(2);
    pub const INFRARED: StreamType = StreamType(3);
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StreamType::COLOR => write!(f, "color"),
            StreamType::DEPTH => write!(f, "depth"),
            StreamType::INFRARED => write!(f, "infrared"),
            StreamType(other) => write!(f, "type-{other}"),
        }
    }
}

/// Distinguishes sibling streams of the same [`StreamType`] on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamSubtype(pub u32);

impl StreamSubtype {
    pub const DEFAULT: StreamSubtype = StreamSubtype(0);
}

impl fmt::Display for StreamSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable identity of a stream within its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescription {
    pub stream_type: StreamType,
    pub subtype: StreamSubtype,
}

impl StreamDescription {
    pub const fn new(stream_type: StreamType, subtype: StreamSubtype) -> Self {
        StreamDescription {
            stream_type,
            subtype,
        }
    }

    /// Shorthand for `{type, DEFAULT}`.
    pub const fn with_default_subtype(stream_type: StreamType) -> Self {
        StreamDescription::new(stream_type, StreamSubtype::DEFAULT)
    }
}

impl fmt::Display for StreamDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.subtype)
    }
}

/// Numeric id of a plugin-defined stream parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterId(pub u32);

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric id of a plugin-originated host event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostEventId(pub u32);

impl fmt::Display for HostEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wait policy for frame acquisition on a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTimeout {
    /// Block until a frame is ready.
    Indefinite,
    /// Check once and return immediately.
    Poll,
    /// Block up to the given number of milliseconds.
    Millis(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_display() {
        let desc = StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT);
        assert_eq!(desc.to_string(), "color/0");

        let vendor = StreamDescription::new(StreamType(40), StreamSubtype(2));
        assert_eq!(vendor.to_string(), "type-40/2");
    }

    #[test]
    fn test_description_is_a_map_key() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(StreamDescription::with_default_subtype(StreamType::COLOR), 1);
        map.insert(StreamDescription::with_default_subtype(StreamType::DEPTH), 2);

        let color = StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT);
        assert_eq!(map.get(&color), Some(&1));
    }
}
