use wasm_bindgen::prelude::*;

pub mod color;
pub mod error;
pub mod kmeans;
pub mod progressive;
pub mod selection;
pub mod sequence;
pub mod worker;

pub use color::{ColorVector, DistanceMethod};
pub use error::{ClusterError, PipelineError, SequenceError};
pub use progressive::{ClusterEngine, Observer, PipelineConfig, Profile, Progress};
pub use selection::PaletteEntry;
pub use worker::{Outbox, PaletteOptions, PaletteRequest, WorkerMessage, handle_request};

// ------------------------------------------------------------
// Host entry point
// ------------------------------------------------------------

fn post(callback: &js_sys::Function, message: &WorkerMessage) -> Result<(), JsValue> {
    let json = serde_json::to_string(message)
        .map_err(|e| JsValue::from_str(&format!("Unable to encode message: {e}")))?;
    let value = js_sys::JSON::parse(&json)?;
    callback.call1(&JsValue::NULL, &value)?;
    Ok(())
}

fn parse_options(options: &JsValue) -> Result<PaletteOptions, String> {
    if options.is_undefined() || options.is_null() {
        return Ok(PaletteOptions::default());
    }
    let json: String = js_sys::JSON::stringify(options)
        .map_err(|_| "Options must be a plain object".to_string())?
        .into();
    serde_json::from_str(&json).map_err(|e| format!("Invalid options: {e}"))
}

/// Extract a palette from raw RGBA pixels.
///
/// `image_data` holds `width * height` pixels, four bytes each, row-major.
/// `options` is an object with any of `iterations`, `palletSize`,
/// `hsvTolerance`, `toleranceEnabled`, `distanceMethod`, `profile` and
/// `engine`; `undefined` uses the defaults.
///
/// `on_message` is called with every progress object
/// (`{ progressUpdate, status, processingPalette? }`) and finally with exactly
/// one of `{ graphNodes: [{ x, y, color }] }` or `{ error }`. The call only
/// throws when `on_message` itself throws.
#[wasm_bindgen]
pub fn extract_palette(
    image_data: Vec<u8>,
    width: u32,
    height: u32,
    options: JsValue,
    on_message: &js_sys::Function,
) -> Result<(), JsValue> {
    let options = match parse_options(&options) {
        Ok(options) => options,
        Err(error) => return post(on_message, &WorkerMessage::Failed { error }),
    };
    let request = PaletteRequest {
        image_data,
        width,
        height,
        options,
    };

    let mut delivery: Result<(), JsValue> = Ok(());
    let mut outbox = Outbox::new(|message: WorkerMessage| {
        if delivery.is_ok() {
            delivery = post(on_message, &message);
        }
    });
    // failures were already posted as the terminal message
    let _ = handle_request(request, &mut outbox);
    drop(outbox);
    delivery
}

/// Decode an encoded image file and run a request over its pixels.
#[cfg(not(target_arch = "wasm32"))]
pub fn extract_palette_bytes<F>(
    input: &[u8],
    options: &PaletteOptions,
    outbox: &mut Outbox<F>,
) -> anyhow::Result<Vec<PaletteEntry>>
where
    F: FnMut(WorkerMessage),
{
    let img = image::load_from_memory(input)?.to_rgba8();
    let (width, height) = img.dimensions();
    let request = PaletteRequest {
        image_data: img.into_raw(),
        width,
        height,
        options: options.clone(),
    };
    Ok(handle_request(request, outbox)?)
}
