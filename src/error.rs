use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use image;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Error communicating with device: {source}")]
    Io { #[from] source: io::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("A writable bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("The device does not advertise any service uuid")]
    NoServiceUuid,
}

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Image is too tall to print: {height} rows, at most {max} are supported")]
    TooTall { height: u32, max: u32 },
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Printer is not connected")]
    NotConnected,

    #[error("Failed to write to printer: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to rasterize image: {source}")]
    Raster { #[from] source: RasterError },
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("The {0} event stream already has a subscriber")]
    EventsTaken(&'static str),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to run (config): {source}")]
    Config { #[from] source: ConfigError },

    #[error("Failed to run (device): {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to run (service): {source}")]
    Service { #[from] source: ServiceError },

    #[error("Failed to print: {source}")]
    Send { #[from] source: SendError },

    #[error("Failed to load image: {source}")]
    Image { #[from] source: image::ImageError },

    #[error("Printer is unavailable: {0}")]
    PrinterUnavailable(String),
}
