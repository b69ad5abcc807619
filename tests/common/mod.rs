//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use progressive_palette_wasm::worker::{GraphNode, ProgressMessage};
use progressive_palette_wasm::{Outbox, PaletteOptions, PaletteRequest, WorkerMessage, handle_request};

pub const RED: [u8; 3] = [255, 0, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

/// Row-major RGBA bytes painted by `paint(x, y)`.
pub fn rgba(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let [r, g, b] = paint(x, y);
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    data
}

pub fn request(width: u32, height: u32, image_data: Vec<u8>, options: PaletteOptions) -> PaletteRequest {
    PaletteRequest {
        image_data,
        width,
        height,
        options,
    }
}

pub fn with_palette_size(palette_size: usize) -> PaletteOptions {
    PaletteOptions {
        palette_size,
        ..PaletteOptions::default()
    }
}

/// Run a request through the worker contract and collect every message.
pub fn run(request: PaletteRequest) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    let mut outbox = Outbox::new(|message: WorkerMessage| messages.push(message));
    let _ = handle_request(request, &mut outbox);
    messages
}

pub fn progress(messages: &[WorkerMessage]) -> Vec<&ProgressMessage> {
    messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::Progress(p) => Some(p),
            _ => None,
        })
        .collect()
}

/// The graph nodes of the terminal message; panics on any other ending.
pub fn graph_nodes(messages: &[WorkerMessage]) -> &[GraphNode] {
    match messages.last() {
        Some(WorkerMessage::Complete { graph_nodes }) => graph_nodes,
        other => panic!("expected a palette, got {other:?}"),
    }
}

pub fn assert_single_terminal(messages: &[WorkerMessage]) {
    let terminals = messages.iter().filter(|m| m.is_terminal()).count();
    assert_eq!(terminals, 1, "messages: {messages:?}");
    assert!(messages.last().is_some_and(WorkerMessage::is_terminal));
}
