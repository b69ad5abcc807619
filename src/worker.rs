//! Message contract between the pipeline and the host that runs it in a
//! worker.
//!
//! Requests arrive as camelCase JSON objects. Every option is optional and
//! falls back to its default. Responses are streamed as [`WorkerMessage`]s:
//! any number of progress updates followed by exactly one terminal message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::color::DistanceMethod;
use crate::error::PipelineError;
use crate::progressive::{
    ClusterEngine, Observer, PipelineConfig, PreviewColor, Profile, Progress, extract_palette,
};
use crate::selection::{PaletteEntry, SelectionConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaletteOptions {
    pub iterations: usize,
    /// The wire name keeps the historical spelling.
    #[serde(rename = "palletSize", alias = "paletteSize")]
    pub palette_size: usize,
    pub hsv_tolerance: f64,
    pub tolerance_enabled: bool,
    pub distance_method: DistanceMethod,
    pub profile: Profile,
    pub engine: ClusterEngine,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            palette_size: 10,
            hsv_tolerance: 30.0,
            tolerance_enabled: true,
            distance_method: DistanceMethod::default(),
            profile: Profile::default(),
            engine: ClusterEngine::default(),
        }
    }
}

impl PaletteOptions {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            iterations: self.iterations,
            profile: self.profile,
            engine: self.engine,
            selection: SelectionConfig {
                palette_size: self.palette_size,
                tolerance_degrees: self.hsv_tolerance,
                tolerance_enabled: self.tolerance_enabled,
                distance_method: self.distance_method,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteRequest {
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub options: PaletteOptions,
}

impl PaletteRequest {
    /// Wrap the raw RGBA buffer, which must hold exactly `width * height`
    /// pixels.
    pub fn image(self) -> Result<RgbaImage, PipelineError> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| PipelineError::InvalidConfiguration("image dimensions overflow".into()))?;
        if expected == 0 || self.image_data.is_empty() {
            return Err(PipelineError::InvalidConfiguration("image is empty".into()));
        }
        if self.image_data.len() != expected {
            return Err(PipelineError::InvalidConfiguration(format!(
                "expected {expected} bytes of RGBA data for {}x{}, got {}",
                self.width,
                self.height,
                self.image_data.len()
            )));
        }
        RgbaImage::from_raw(self.width, self.height, self.image_data)
            .ok_or_else(|| PipelineError::InvalidConfiguration("image buffer too small".into()))
    }
}

// ------------------------------------------------------------
// Responses
// ------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub progress_update: u8,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_palette: Option<Vec<PreviewColor>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphNode {
    pub x: u32,
    pub y: u32,
    pub color: String,
}

impl From<&PaletteEntry> for GraphNode {
    fn from(entry: &PaletteEntry) -> Self {
        Self {
            x: entry.x,
            y: entry.y,
            color: entry.hex.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Progress(ProgressMessage),
    Complete {
        #[serde(rename = "graphNodes")]
        graph_nodes: Vec<GraphNode>,
    },
    Failed {
        error: String,
    },
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress(_))
    }
}

impl From<Progress> for WorkerMessage {
    fn from(progress: Progress) -> Self {
        WorkerMessage::Progress(ProgressMessage {
            progress_update: progress.percent,
            status: progress.status,
            processing_palette: progress.preview,
        })
    }
}

// ------------------------------------------------------------
// Outbox
// ------------------------------------------------------------

/// Observer that forwards pipeline checkpoints to a message sink.
///
/// Pauses are ignored unless `blocking_pauses` is set; inside wasm the module
/// already runs off the host's main thread and has no way to sleep.
pub struct Outbox<F> {
    sink: F,
    blocking_pauses: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<F: FnMut(WorkerMessage)> Outbox<F> {
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            blocking_pauses: false,
            cancel: None,
        }
    }

    pub fn blocking_pauses(mut self, enabled: bool) -> Self {
        self.blocking_pauses = enabled;
        self
    }

    /// Cancel the run once `flag` becomes true.
    pub fn cancel_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn post(&mut self, message: WorkerMessage) {
        (self.sink)(message);
    }
}

impl<F: FnMut(WorkerMessage)> Observer for Outbox<F> {
    fn on_progress(&mut self, progress: Progress) {
        self.post(progress.into());
    }

    fn pause(&mut self, delay: Duration) {
        if self.blocking_pauses && !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Run one request to completion, streaming progress through `outbox` and
/// finishing with exactly one terminal message.
pub fn handle_request<F>(
    request: PaletteRequest,
    outbox: &mut Outbox<F>,
) -> Result<Vec<PaletteEntry>, PipelineError>
where
    F: FnMut(WorkerMessage),
{
    let config = request.options.pipeline_config();
    let result = request
        .image()
        .and_then(|image| extract_palette(&image, &config, outbox));

    match &result {
        Ok(palette) => {
            debug!(colors = palette.len(), "posting palette");
            outbox.post(WorkerMessage::Complete {
                graph_nodes: palette.iter().map(GraphNode::from).collect(),
            });
        }
        Err(err) => {
            error!(%err, "palette extraction failed");
            outbox.post(WorkerMessage::Failed {
                error: err.to_string(),
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn omitted_options_fall_back_to_defaults() {
        let request: PaletteRequest = serde_json::from_value(json!({
            "imageData": [255, 0, 0, 255],
            "width": 1,
            "height": 1
        }))
        .unwrap();
        assert_eq!(request.options, PaletteOptions::default());
    }

    #[test]
    fn wire_names_are_recognised() {
        let options: PaletteOptions = serde_json::from_value(json!({
            "palletSize": 4,
            "hsvTolerance": 12.5,
            "toleranceEnabled": false,
            "distanceMethod": "max-hsv-hsl",
            "profile": "constrained",
            "engine": "scheduled"
        }))
        .unwrap();
        assert_eq!(options.palette_size, 4);
        assert_eq!(options.hsv_tolerance, 12.5);
        assert!(!options.tolerance_enabled);
        assert_eq!(options.distance_method, DistanceMethod::MaxHsvHsl);
        assert_eq!(options.profile, Profile::Constrained);
        assert_eq!(options.engine, ClusterEngine::Scheduled);
        assert_eq!(options.iterations, 10);
    }

    #[test]
    fn progress_serialises_without_empty_preview() {
        let message = WorkerMessage::from(Progress {
            percent: 16,
            status: "Processing 6x6 quads resolution...".into(),
            preview: None,
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "progressUpdate": 16, "status": "Processing 6x6 quads resolution..." })
        );
    }

    #[test]
    fn terminal_messages_have_single_keys() {
        let done = WorkerMessage::Complete {
            graph_nodes: vec![GraphNode {
                x: 5,
                y: 5,
                color: "#ff0000".into(),
            }],
        };
        assert!(done.is_terminal());
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({ "graphNodes": [{ "x": 5, "y": 5, "color": "#ff0000" }] })
        );

        let failed = WorkerMessage::Failed {
            error: PipelineError::NoCentroidsProduced.to_string(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({ "error": "Clustering failed to generate centroids" })
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let request = PaletteRequest {
            image_data: vec![0; 12],
            width: 2,
            height: 2,
            options: PaletteOptions::default(),
        };
        let mut messages = Vec::new();
        let mut outbox = Outbox::new(|m: WorkerMessage| messages.push(m));
        let result = handle_request(request, &mut outbox);
        assert!(matches!(result, Err(PipelineError::InvalidConfiguration(_))));
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], WorkerMessage::Failed { .. }));
    }

    #[test]
    fn cancel_flag_ends_the_run() {
        let flag = Arc::new(AtomicBool::new(true));
        let request = PaletteRequest {
            image_data: [0u8, 0, 255, 255].repeat(16),
            width: 4,
            height: 4,
            options: PaletteOptions::default(),
        };
        let mut messages = Vec::new();
        let mut outbox = Outbox::new(|m: WorkerMessage| messages.push(m)).cancel_on(flag);
        assert_eq!(handle_request(request, &mut outbox), Err(PipelineError::Cancelled));
        assert_eq!(
            messages.last(),
            Some(&WorkerMessage::Failed {
                error: "palette extraction was cancelled".into()
            })
        );
    }
}
