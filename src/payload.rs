//! Data units
//!
//! Devices and pipeline stages exchange [`Payload`]s. The orchestrator never
//! looks inside pixel buffers; it only needs enough metadata to describe a
//! frame in events and statistics.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit single channel
    Gray8,
    /// 8 bits per channel, packed, RGB order
    Rgb24,
    /// 8 bits per channel, packed, BGR order (OpenCV default)
    Bgr24,
    /// 8 bits per channel with alpha
    Rgba32,
    /// YUV 4:2:2 packed
    Yuyv,
}

impl PixelFormat {
    /// Buffer size needed for a frame of this format
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Gray8 => pixels,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels * 3,
            PixelFormat::Rgba32 => pixels * 4,
            PixelFormat::Yuyv => pixels * 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Gray8 => write!(f, "GRAY8"),
            PixelFormat::Rgb24 => write!(f, "RGB24"),
            PixelFormat::Bgr24 => write!(f, "BGR24"),
            PixelFormat::Rgba32 => write!(f, "RGBA32"),
            PixelFormat::Yuyv => write!(f, "YUYV (YUV 4:2:2 packed)"),
        }
    }
}

/// A captured or processed image
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,
    /// Pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a zero-filled frame
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: 0,
            sequence: 0,
            data: vec![0u8; format.buffer_size(width, height)],
        }
    }

    /// Create a frame from existing data
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: 0,
            sequence: 0,
            data,
        }
    }

    /// Builder: set timestamp and sequence number
    pub fn with_timing(mut self, timestamp_us: u64, sequence: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self.sequence = sequence;
        self
    }

    /// Whether the buffer length matches the declared geometry
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }
}

/// Unit of data passed to `process` and threaded through pipeline stages
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No input (e.g. a capture device producing its next frame)
    Empty,
    /// Image data
    Frame(Frame),
    /// Structured data (sensor readings, detections, GPIO levels)
    Value(Value),
}

impl Payload {
    /// Borrow the frame, if this is one
    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Payload::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Take the frame, if this is one
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Payload::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Borrow the structured value, if this is one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Short kind tag used in logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Frame(_) => "frame",
            Payload::Value(_) => "value",
        }
    }

    /// Event-friendly description. Frames are summarised, never copied.
    pub fn summary(&self) -> Value {
        match self {
            Payload::Empty => json!({ "kind": "empty" }),
            Payload::Frame(frame) => json!({
                "kind": "frame",
                "width": frame.width,
                "height": frame.height,
                "format": frame.format,
                "sequence": frame.sequence,
                "timestamp_us": frame.timestamp_us,
                "bytes": frame.data.len(),
            }),
            Payload::Value(value) => json!({ "kind": "value", "value": value }),
        }
    }
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        Payload::Frame(frame)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}
