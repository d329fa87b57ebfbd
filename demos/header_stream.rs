//! Example: H.265 packed header stream
//!
//! Drives a short IPB GOP through the header generator and writes every
//! packed header to `headers.h265`, printing one line per NAL unit.
//! Set `RUST_LOG=pixelforge_hevc=debug` to follow the generator.

use pixelforge_hevc::{
    create_header_generator, ContentLightMetadata, EncodeConfig, FrameSideData, GopScheduler,
    RateControlMode,
};
use std::fs::File;
use std::io::Write;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;
const NUM_FRAMES: u64 = 12;
const OUTPUT_PATH: &str = "headers.h265";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            ),
        )
        .init();

    println!("PixelForge H.265 Header Stream Example\n");

    let config = EncodeConfig::h265(WIDTH, HEIGHT)
        .with_rate_control(RateControlMode::Cqp)
        .with_quality_level(26)
        .with_frame_rate(30, 1)
        .with_gop_size(8)
        .with_b_frames(2)
        .with_aud(true);

    println!(
        "Config: {:?}, QP={}, GOP={}, B-frames={}\n",
        config.rate_control_mode, config.quality_level, config.gop_size, config.b_frame_count
    );

    let mut generator = create_header_generator(&config)?;
    let scheduler = GopScheduler::new(config.gop_size, config.b_frame_count, 0);
    let mut plan = scheduler.plan(NUM_FRAMES);

    // Key pictures carry HDR metadata.
    for picture in plan.iter_mut().filter(|p| p.picture_type.is_irap()) {
        picture.side_data = FrameSideData {
            mastering_display: None,
            content_light_level: Some(ContentLightMetadata {
                max_cll: 1000,
                max_fall: 400,
            }),
        };
    }

    let mut output = File::create(OUTPUT_PATH)?;
    let mut buffer = vec![0u8; 1024];
    let mut total_bytes = 0;

    for (position, picture) in plan.iter().enumerate() {
        let window = scheduler.live_window(&plan, position);
        let setup = generator.begin_picture(picture, &window)?;
        println!(
            "display={:<2} encode={:<2} {:?} coding_type={}",
            picture.display_order,
            picture.encode_order,
            picture.picture_type,
            setup.picture.pic_fields.coding_type
        );

        let mut headers = Vec::new();
        if picture.picture_type.is_idr() {
            let bits = generator.write_sequence_header(&mut buffer)?;
            headers.push(buffer[..bits.div_ceil(8)].to_vec());
        }
        if let Some(bits) = generator.write_extra_header(&mut buffer)? {
            headers.push(buffer[..bits.div_ceil(8)].to_vec());
        }
        let bits = generator.write_slice_header(&mut buffer)?;
        headers.push(buffer[..bits.div_ceil(8)].to_vec());

        for header in &headers {
            for nal in nal_units(header) {
                let nal_type = (nal[0] >> 1) & 0x3f;
                println!("    NAL type {nal_type:>2}: {:>3} bytes", nal.len());
            }
            output.write_all(header)?;
            total_bytes += header.len();
        }
    }

    println!("\nWrote {} pictures, {total_bytes} header bytes", plan.len());
    println!("Output: {OUTPUT_PATH}");

    Ok(())
}

/// Split an Annex B byte stream into NAL unit payloads.
fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i..i + 3] == [0, 0, 1] {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let mut end = starts.get(n + 1).map_or(data.len(), |&next| next - 3);
            // A four-byte start code leaves one zero byte behind.
            if n + 1 < starts.len() && end > start && data[end - 1] == 0 {
                end -= 1;
            }
            &data[start..end]
        })
        .collect()
}
