//! GStreamer raw I420 capture through an `appsink`

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info};

use super::platform::CaptureHost;
use super::{CaptureError, FrameProducer};
use crate::config::CameraConfig;

/// How long one `next_frame` call waits for a sample
const PULL_TIMEOUT_MS: u64 = 100;

pub struct GstSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

impl GstSource {
    pub fn new(config: &CameraConfig) -> Result<Self, CaptureError> {
        gst::init()?;

        let host = CaptureHost::detect();
        let device = if config.device.is_empty() {
            host.default_device(config.id)
        } else {
            config.device.clone()
        };
        let description = pipeline_description(&host.source_element(&device), config);
        debug!(camera = config.id, pipeline = %description, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&description)?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("Not a pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::Pipeline("No appsink found".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("Not an appsink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::StateChange(format!("{:?}", e)))?;

        info!(camera = config.id, device = %device, "GStreamer capture started");

        Ok(Self { pipeline, appsink })
    }
}

impl FrameProducer for GstSource {
    fn next_frame(&mut self, frame: &mut Vec<u8>) -> Result<bool, CaptureError> {
        let Some(sample) = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        else {
            if self.appsink.is_eos() {
                return Err(CaptureError::Pipeline("End of stream".to_string()));
            }
            return Ok(false);
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Pipeline("Sample had no buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Pipeline("Unable to map buffer".to_string()))?;

        frame.clear();
        frame.extend_from_slice(map.as_slice());
        Ok(true)
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Builds a pipeline ending in I420 frames of the configured size
fn pipeline_description(source: &str, config: &CameraConfig) -> String {
    format!(
        "{source} ! videoconvert ! videoscale ! videorate ! \
         video/x-raw,format=I420,width={w},height={h},framerate={fps}/1 ! \
         appsink name=sink max-buffers=2 drop=true sync=false",
        source = source,
        w = config.width,
        h = config.height,
        fps = config.fps,
    )
}
