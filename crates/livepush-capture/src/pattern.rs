//! Test pattern generation and BGRA to NV12 conversion.

/// SMPTE-style color bars (white, yellow, cyan, green, magenta, red, blue),
/// as BGRA.
const BARS: [[u8; 4]; 7] = [
    [235, 235, 235, 255],
    [16, 235, 235, 255],
    [235, 235, 16, 255],
    [16, 235, 16, 255],
    [235, 16, 235, 255],
    [16, 16, 235, 255],
    [235, 16, 16, 255],
];

/// Render vertical color bars as a tightly packed BGRA image.
///
/// `offset` scrolls the bars horizontally so consecutive frames differ.
pub fn color_bars_bgra(width: u32, height: u32, offset: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let bar_width = (w / BARS.len()).max(1);
    let mut bgra = Vec::with_capacity(w * h * 4);

    for _ in 0..h {
        for x in 0..w {
            let bar = ((x + offset as usize) / bar_width) % BARS.len();
            bgra.extend_from_slice(&BARS[bar]);
        }
    }

    bgra
}

/// Convert BGRA to NV12 format.
///
/// `row_pitch` is the byte stride of one BGRA row. Odd trailing rows and
/// columns are sampled from their even neighbour for the chroma plane.
pub fn bgra_to_nv12(bgra: &[u8], width: u32, height: u32, row_pitch: usize) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    // NV12: Y plane followed by interleaved UV plane
    let y_size = w * h;
    let uv_size = y_size / 2;
    let mut nv12 = vec![0u8; y_size + uv_size];

    // Y plane
    for y in 0..h {
        for x in 0..w {
            let src = y * row_pitch + x * 4;
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;

            // BT.601 conversion
            nv12[y * w + x] = (0.299 * r + 0.587 * g + 0.114 * b) as u8;
        }
    }

    // UV plane (subsampled 2x2)
    for y in (0..h).step_by(2) {
        for x in (0..w.saturating_sub(1)).step_by(2) {
            let src = y * row_pitch + x * 4;
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;

            let u = ((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0).clamp(0.0, 255.0) as u8;
            let v = ((0.500 * r - 0.419 * g - 0.081 * b) + 128.0).clamp(0.0, 255.0) as u8;

            let uv_idx = y_size + (y / 2) * w + x;
            if uv_idx + 1 < nv12.len() {
                nv12[uv_idx] = u;
                nv12[uv_idx + 1] = v;
            }
        }
    }

    nv12
}
