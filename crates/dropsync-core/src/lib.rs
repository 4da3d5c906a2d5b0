//! Dropsync Core - Device model, wire codec, and layout parsing
//!
//! This crate provides the data layer for the dropsync system:
//! - The immutable device model of a DMF chip layout and its derived
//!   electrical/geometric attributes
//! - The JSON wire codec used on the message bus
//! - The single-owner device store with change notification
//! - SVG layout parsing behind the `DeviceParser` seam

pub mod codec;
pub mod device;
pub mod store;
pub mod svg;

pub use codec::{DecodeError, EncodeError, LoadRequest};
pub use device::{BoundingBox, DeviceModel, Electrode, ModelError, NO_CHANNEL};
pub use store::DeviceStore;
pub use svg::{DeviceParser, ParseError, SvgDeviceParser};
