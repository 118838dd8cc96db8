//! Host detection for GStreamer camera sources

use std::path::Path;

/// Kind of machine the capture runs on, which decides the source element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureHost {
    /// AVFoundation cameras, addressed by index
    MacOS,
    /// libcamera sensors on the RP1 I2C buses
    RaspberryPi,
    /// V4L2 device nodes
    Linux,
}

impl CaptureHost {
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Self::MacOS,
            "linux" if has_device_tree_model() => Self::RaspberryPi,
            _ => Self::Linux,
        }
    }

    /// Device used when a camera's `device` is left empty
    ///
    /// Camera 1 maps to the first device of the host.
    pub fn default_device(self, camera_id: u32) -> String {
        let index = camera_id.saturating_sub(1);
        match (self, index) {
            (Self::MacOS, _) => index.to_string(),
            (Self::RaspberryPi, 0) => "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10".into(),
            (Self::RaspberryPi, 1) => "/base/axi/pcie@1000120000/rp1/i2c@80000/imx219@10".into(),
            (Self::RaspberryPi, _) | (Self::Linux, _) => format!("/dev/video{index}"),
        }
    }

    /// First element of the capture pipeline
    pub fn source_element(self, device: &str) -> String {
        match self {
            Self::MacOS => format!("avfvideosrc device-index={device}"),
            Self::RaspberryPi if device.starts_with("/dev/") => format!("v4l2src device={device}"),
            Self::RaspberryPi => format!("libcamerasrc camera-name=\"{device}\""),
            Self::Linux => format!("v4l2src device={device}"),
        }
    }
}

fn has_device_tree_model() -> bool {
    Path::new("/proc/device-tree/model").exists()
        || Path::new("/sys/firmware/devicetree/base/model").exists()
}
